//! ## HECI Technology Background
//!
//! The Host Embedded Controller Interface (HECI) is the on-chip transport between host firmware and the Converged
//! Security Engine (CSE), an auxiliary microcontroller handling security and management functions. Each direction
//! of a HECI function is a hardware circular buffer of 32-bit slots plus a control and status register; register
//! names call the CSE side "SEC".
//!
//! The secondary HECI function is owned by Management Mode (MM) after boot. Firmware components outside MM reach it
//! through a MMI handler, passing a communicate buffer that names a function (send, read, send and wait for the
//! acknowledgement, status, and the end of POST and end of services notifications).
//!
//! A host message is written as one or more bursts. Every burst starts with a header slot naming the client
//! addresses and the length of the burst; the CSE acknowledges each burst through the host interrupt status. The
//! link may be put into the low power D0i3 state once the operating system owns the platform, and must be woken
//! before the next send.
//!
//! This crate provides the MMI handler ([`dispatch::HeciSmmHandler`]), the messaging engine behind it
//! ([`engine::HeciEngine`]), and the register access seam ([`hardware::HeciRegisterAccess`]) a platform
//! implements or binds to the PCI function with [`hardware::MmioHeciRegisters`].
//!
//! ## Examples and Usage
//!
//! ```rust,no_run
//! use patina_heci::{
//!     communicate::build,
//!     config::HeciConfiguration,
//!     dispatch::HeciSmmHandler,
//!     error::Result,
//!     hardware::{HeciPciDevice, MmioHeciRegisters},
//!     service::{SystemResetNotification, TrustedKeyProvider},
//!     trusted_channel::TrustedChannelKey,
//! };
//!
//! struct PlatformKeyProvider;
//!
//! impl TrustedKeyProvider for PlatformKeyProvider {
//!     fn retrieve_trusted_key(&self) -> Result<TrustedChannelKey> {
//!         Ok(TrustedChannelKey { key: [0u8; 32], monotonic_counter: 0 })
//!     }
//! }
//!
//! struct PlatformResetNotification;
//!
//! impl SystemResetNotification for PlatformResetNotification {
//!     fn register_reset_notify(&self) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn heci_mm_entry() -> Result<()> {
//!     // SAFETY: The platform maps ECAM and the HECI BAR for the lifetime of MM.
//!     let registers = unsafe { MmioHeciRegisters::from_pci(HeciPciDevice::default(), 19) }?;
//!     let handler =
//!         HeciSmmHandler::new(HeciConfiguration::default(), registers, Box::new(PlatformResetNotification))?;
//!     handler.initialize(&PlatformKeyProvider)?;
//!
//!     let mut request = build::send_message(&[0x04, 0x00, 0x00, 0x00], 0x01, 0x02);
//!     let status = handler.handle(&mut request);
//!     log::info!("HECI send returned {:?}", status);
//!     Ok(())
//! }
//! ```
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
#![cfg_attr(all(not(feature = "std"), not(test), not(feature = "mockall")), no_std)]

extern crate alloc;

pub mod communicate;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod message;
pub mod queue;
pub mod registers;
pub mod service;
pub mod simulation;
pub mod transport;
pub mod trusted_channel;

pub use dispatch::{ChannelLifecycle, HeciSmmHandler};
pub use error::HeciError;
