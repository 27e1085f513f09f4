//! Patina HECI Test Framework
//!
//! Wires a [`HeciSmmHandler`] to the [`SimulatedCse`] and drives it through communicate buffers, the same way the
//! platform MMI dispatcher does.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
use crate::patina_heci_integration::common::constants::*;
use patina_heci::simulation::{Responder, SimulatedCse};

extern crate alloc;
use alloc::{boxed::Box, vec::Vec};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use patina_heci::{
    communicate::{self, build, HeciChannelStatus, SmmHeciGetStatus, SmmHeciReadMessage, SmmHeciSendMessageWithAck},
    config::{HeciConfiguration, PollPolicy},
    error::{HeciError, Result},
    service::{SystemResetNotification, TrustedKeyProvider},
    trusted_channel::TrustedChannelKey,
    HeciSmmHandler,
};
use r_efi::efi;

static INIT: Once = Once::new();

pub fn init_logger() {
    INIT.call_once(|| {
        // Default to no logging unless RUST_LOG environment variable is set
        let mut builder = env_logger::Builder::from_default_env();

        if std::env::var("RUST_LOG").is_err() {
            builder.filter_level(log::LevelFilter::Off);
        }

        builder.init();
    });
}

/// Hands out a fixed key, or fails when none is configured.
pub struct StaticKeyProvider {
    key: Option<([u8; 32], u32)>,
}

impl StaticKeyProvider {
    pub fn new(key: [u8; 32], monotonic_counter: u32) -> Self {
        Self { key: Some((key, monotonic_counter)) }
    }

    pub fn failing() -> Self {
        Self { key: None }
    }
}

impl TrustedKeyProvider for StaticKeyProvider {
    fn retrieve_trusted_key(&self) -> Result<TrustedChannelKey> {
        match self.key {
            Some((key, monotonic_counter)) => Ok(TrustedChannelKey { key, monotonic_counter }),
            None => Err(HeciError::DeviceError),
        }
    }
}

/// Counts reset notification registrations.
pub struct CountingResetNotification {
    registrations: Arc<AtomicUsize>,
}

impl SystemResetNotification for CountingResetNotification {
    fn register_reset_notify(&self) -> Result<()> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll policies short enough for the simulated CSE, which never needs a real stall.
pub fn fast_configuration() -> HeciConfiguration {
    HeciConfiguration {
        register_poll: PollPolicy::new(1, 8),
        link_poll: PollPolicy::new(1, 8),
        response_poll: PollPolicy::new(1, 8),
        flush_iterations: 64,
        ..HeciConfiguration::default()
    }
}

/// [`fast_configuration`] without the trusted channel, so long messages reach the CSE unmodified.
pub fn unsigned_configuration() -> HeciConfiguration {
    HeciConfiguration { trusted_channel: false, ..fast_configuration() }
}

/// Result of a send with acknowledgement.
#[derive(Debug)]
pub struct AckResponse {
    pub status: efi::Status,
    pub response: Vec<u8>,
}

/// A handler bound to a simulated CSE.
pub struct HeciTestFramework {
    pub cse: SimulatedCse,
    pub handler: HeciSmmHandler<SimulatedCse>,
    reset_registrations: Arc<AtomicUsize>,
    initialize_result: Result<()>,
}

impl HeciTestFramework {
    pub fn builder() -> HeciTestFrameworkBuilder {
        HeciTestFrameworkBuilder::new()
    }

    /// Result of the handler initialization performed by the builder.
    pub fn initialize_result(&self) -> Result<()> {
        self.initialize_result
    }

    pub fn reset_registrations(&self) -> usize {
        self.reset_registrations.load(Ordering::SeqCst)
    }

    /// Fire-and-forget send from the default host client to the default CSE client.
    pub fn send(&self, message: &[u8]) -> efi::Status {
        self.send_to(message, HOST_ADDRESS, CSE_ADDRESS)
    }

    pub fn send_to(&self, message: &[u8], host_address: u8, cse_address: u8) -> efi::Status {
        let mut buffer = build::send_message(message, host_address, cse_address);
        let status = self.handler.handle(&mut buffer);
        assert_eq!(communicate::return_status(&buffer), Ok(status));
        status
    }

    /// Blocking send that returns the response the CSE produced, truncated to `capacity`.
    pub fn send_with_ack(&self, message: &[u8], capacity: usize) -> AckResponse {
        let mut buffer = build::send_message_with_ack(message, capacity, HOST_ADDRESS, CSE_ADDRESS);
        let status = self.handler.handle(&mut buffer);

        let response = match communicate::read_arguments::<SmmHeciSendMessageWithAck>(&buffer) {
            Ok(arguments) if status == efi::Status::SUCCESS => {
                communicate::data::<SmmHeciSendMessageWithAck>(&buffer)[..arguments.rec_length as usize].to_vec()
            }
            _ => Vec::new(),
        };
        AckResponse { status, response }
    }

    /// Reads one message of up to `capacity` bytes.
    pub fn read(&self, capacity: usize) -> (efi::Status, Vec<u8>) {
        let mut buffer = build::read_message(capacity);
        let status = self.handler.handle(&mut buffer);
        if status != efi::Status::SUCCESS {
            return (status, Vec::new());
        }

        let length = communicate::read_arguments::<SmmHeciReadMessage>(&buffer).map(|a| a.length as usize).unwrap_or(0);
        (status, communicate::data::<SmmHeciReadMessage>(&buffer)[..length].to_vec())
    }

    pub fn get_status(&self) -> (efi::Status, HeciChannelStatus) {
        let mut buffer = build::get_status();
        let status = self.handler.handle(&mut buffer);
        let channel = communicate::read_arguments::<SmmHeciGetStatus>(&buffer)
            .map(|arguments| HeciChannelStatus::from(arguments.status))
            .unwrap_or(HeciChannelStatus::Busy);
        (status, channel)
    }

    pub fn end_of_post(&self) -> efi::Status {
        self.handler.handle(&mut build::end_of_post())
    }

    pub fn end_of_services(&self) -> efi::Status {
        self.handler.handle(&mut build::end_of_services())
    }

    /// Sends a raw communicate buffer naming `function`, with a send message argument block.
    pub fn raw_function(&self, function: u64) -> efi::Status {
        let mut buffer = build::send_message(&[0x01], HOST_ADDRESS, CSE_ADDRESS);
        buffer[..8].copy_from_slice(&function.to_le_bytes());
        self.handler.handle(&mut buffer)
    }
}

/// Builder for [`HeciTestFramework`].
pub struct HeciTestFrameworkBuilder {
    depth: u8,
    config: HeciConfiguration,
    sec_ready: bool,
    responder: Option<Responder>,
    key: Option<([u8; 32], u32)>,
}

impl HeciTestFrameworkBuilder {
    pub fn new() -> Self {
        Self {
            depth: DEFAULT_HOST_DEPTH,
            config: fast_configuration(),
            sec_ready: true,
            responder: None,
            key: Some((TEST_KEY, TEST_INITIAL_COUNTER)),
        }
    }

    /// Host circular buffer depth in slots.
    pub fn with_depth(mut self, depth: u8) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_config(mut self, config: HeciConfiguration) -> Self {
        self.config = config;
        self
    }

    /// Starts with the SEC side not ready, forcing the reset handshake.
    pub fn with_sec_not_ready(mut self) -> Self {
        self.sec_ready = false;
        self
    }

    pub fn with_responder(mut self, responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Replies to every message with the message itself.
    pub fn with_echo_responder(self) -> Self {
        self.with_responder(|message| vec![message.to_vec()])
    }

    /// Makes the key provider fail.
    pub fn without_key(mut self) -> Self {
        self.key = None;
        self
    }

    pub fn build(self) -> HeciTestFramework {
        let cse = SimulatedCse::new(self.depth);
        cse.set_sec_ready(self.sec_ready);
        if let Some(mut responder) = self.responder {
            cse.set_responder(move |message| responder(message));
        }

        let reset_registrations = Arc::new(AtomicUsize::new(0));
        let notification = CountingResetNotification { registrations: Arc::clone(&reset_registrations) };
        let handler = HeciSmmHandler::new(self.config, cse.clone(), Box::new(notification))
            .expect("test configuration should be valid");

        let provider = match self.key {
            Some((key, counter)) => StaticKeyProvider::new(key, counter),
            None => StaticKeyProvider::failing(),
        };
        let initialize_result = handler.initialize(&provider);

        HeciTestFramework { cse, handler, reset_registrations, initialize_result }
    }
}

impl Default for HeciTestFrameworkBuilder {
    fn default() -> Self {
        Self::new()
    }
}
