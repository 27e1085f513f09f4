//! HECI MMI Handler
//!
//! [`HeciSmmHandler`] is the single entry point the platform MMI dispatcher calls with a HECI communicate buffer.
//! It decodes the function, checks the CSE firmware mode, runs the function against the [`HeciEngine`], and writes
//! the resulting status back into the buffer.
//!
//! ## Lifecycle
//!
//! ```text
//! PoweredDown -> Reset -> Active <-> Idle (D0i3) -> ActiveUntilFlushed -> Flushed
//! ```
//!
//! `EndOfPost` allows the link to be idled opportunistically and registers the system reset flush. `EndOfServices`
//! pins the link active until the flush. The system reset flush writes out every queued command before the channel
//! is closed.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
extern crate alloc;
use alloc::{boxed::Box, vec::Vec};

use r_efi::efi;

use crate::communicate::{
    self, HeciChannelStatus, HeciFunction, SmmHeciGetStatus, SmmHeciReadMessage, SmmHeciSendMessage,
    SmmHeciSendMessageWithAck,
};
use crate::config::HeciConfiguration;
use crate::engine::{ChannelState, HeciEngine};
use crate::error::{result_to_status, HeciError, Result};
use crate::hardware::HeciRegisterAccess;
use crate::queue::PendingCommand;
use crate::service::{SystemResetNotification, TrustedKeyProvider};
use crate::trusted_channel::TrustedChannel;

/// Lifecycle of the secondary HECI channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelLifecycle {
    /// The handler exists but has not been initialized.
    PoweredDown,
    /// The interface reset handshake is running.
    Reset,
    /// The link is active and the queue is serviced.
    Active,
    /// The link was put into D0i3.
    Idle,
    /// End of services was signaled; the link stays active until the reset flush.
    ActiveUntilFlushed,
    /// The queue was flushed for a system reset; no further traffic is accepted.
    Flushed,
}

struct HeciContext<R: HeciRegisterAccess> {
    engine: HeciEngine<R>,
    trusted_channel: Option<TrustedChannel>,
    lifecycle: ChannelLifecycle,
    end_of_post: bool,
    end_of_services: bool,
    reset_registered: bool,
}

impl<R: HeciRegisterAccess> HeciContext<R> {
    fn sign(&mut self, message: &mut [u8]) -> Result<()> {
        if let Some(channel) = self.trusted_channel.as_mut() {
            channel.sign(message)?;
        }
        Ok(())
    }

    fn wake_link(&mut self) -> Result<()> {
        self.engine.transport().force_link_active()?;
        if self.lifecycle == ChannelLifecycle::Idle {
            self.lifecycle = ChannelLifecycle::Active;
        }
        Ok(())
    }
}

/// HECI MMI Handler
///
/// Owns the engine state for the lifetime of MM. Every call takes the internal lock, so the handler can be shared
/// by reference with the MMI dispatcher.
pub struct HeciSmmHandler<R: HeciRegisterAccess> {
    config: HeciConfiguration,
    context: spin::Mutex<HeciContext<R>>,
    reset_notification: Box<dyn SystemResetNotification>,
}

impl<R: HeciRegisterAccess> HeciSmmHandler<R> {
    /// Creates a handler over `registers`. The channel stays [`ChannelLifecycle::PoweredDown`] until
    /// [`HeciSmmHandler::initialize`] succeeds.
    pub fn new(
        config: HeciConfiguration,
        registers: R,
        reset_notification: Box<dyn SystemResetNotification>,
    ) -> Result<Self> {
        config.validate()?;
        let context = HeciContext {
            engine: HeciEngine::new(registers, &config),
            trusted_channel: None,
            lifecycle: ChannelLifecycle::PoweredDown,
            end_of_post: false,
            end_of_services: false,
            reset_registered: false,
        };
        Ok(Self { config, context: spin::Mutex::new(context), reset_notification })
    }

    /// Retrieves the trusted key and brings the interface up, resetting it if either side is not ready.
    ///
    /// A key retrieval failure is fatal: the handler stays powered down and every request returns `NOT_STARTED`.
    pub fn initialize(&self, key_provider: &dyn TrustedKeyProvider) -> Result<()> {
        let mut context = self.context.lock();
        if !matches!(context.lifecycle, ChannelLifecycle::PoweredDown | ChannelLifecycle::Reset) {
            return Ok(());
        }

        if self.config.trusted_channel && context.trusted_channel.is_none() {
            let key = key_provider.retrieve_trusted_key().map_err(|e| {
                log::error!(target: "heci_smm", "Failed to retrieve the trusted channel key: {}", e);
                HeciError::SecurityViolation
            })?;
            context.trusted_channel = Some(TrustedChannel::new(key));
        }

        if !context.engine.transport().is_interface_ready() {
            context.lifecycle = ChannelLifecycle::Reset;
            context.engine.transport().reset_interface()?;
        }

        context.engine.transport().enable_host_interrupt();
        context.lifecycle = ChannelLifecycle::Active;
        log::info!(target: "heci_smm", "HECI channel active, firmware status {:#010x}", u32::from(context.engine.transport().firmware_status()));
        Ok(())
    }

    pub fn lifecycle(&self) -> ChannelLifecycle {
        self.context.lock().lifecycle
    }

    /// State of the outbound transfer.
    pub fn channel_state(&self) -> ChannelState {
        self.context.lock().engine.state()
    }

    pub fn queued_commands(&self) -> usize {
        self.context.lock().engine.queued_commands()
    }

    /// True while the CSE proxy gate holds queued commands back.
    pub fn is_black_hole(&self) -> bool {
        self.context.lock().engine.is_black_hole()
    }

    /// Handles one HECI communicate buffer and returns the status also written into its header.
    pub fn handle(&self, buffer: &mut [u8]) -> efi::Status {
        let header = match communicate::read_header(buffer) {
            Ok(header) => header,
            Err(e) => {
                log::error!(target: "heci_smm", "Communicate buffer of {} bytes has no header", buffer.len());
                return e.into();
            }
        };

        let result = self.dispatch(header.function, buffer);
        let status = result_to_status(&result);
        if let Err(e) = result {
            log::debug!(target: "heci_smm", "HECI function {} failed: {}", header.function, e);
        }

        match communicate::write_return_status(buffer, status) {
            Ok(()) => status,
            Err(e) => e.into(),
        }
    }

    fn dispatch(&self, function: u64, buffer: &mut [u8]) -> Result<()> {
        let mut context = self.context.lock();
        match context.lifecycle {
            ChannelLifecycle::PoweredDown | ChannelLifecycle::Reset => return Err(HeciError::NotStarted),
            ChannelLifecycle::Flushed => {
                log::warn!(target: "heci_smm", "HECI channel closed for system reset");
                return Err(HeciError::NotReady);
            }
            _ => {}
        }

        let function = HeciFunction::try_from(function)?;

        let firmware_status = context.engine.transport().firmware_status();
        if !firmware_status.is_normal_mode() {
            log::warn!(
                target: "heci_smm",
                "CSE not in normal mode ({:?}, error {}), rejecting {:?}",
                firmware_status.mode(),
                firmware_status.error_code(),
                function
            );
            return Err(HeciError::Unsupported);
        }

        log::debug!(target: "heci_smm", "HECI function {:?}", function);
        match function {
            HeciFunction::SendMessageWithAck => self.send_message_with_ack(&mut context, buffer),
            HeciFunction::ReadMessage => self.read_message(&mut context, buffer),
            HeciFunction::SendMessage => self.send_message(&mut context, buffer),
            HeciFunction::GetStatus => self.get_status(&mut context, buffer),
            HeciFunction::EndOfPost => self.end_of_post(&mut context),
            HeciFunction::EndOfServices => self.end_of_services(&mut context),
        }
    }

    fn outbound_message(data: &[u8], length: u32) -> Result<Vec<u8>> {
        let length = length as usize;
        if length == 0 {
            return Err(HeciError::InvalidParameter);
        }
        data.get(..length).map(|message| message.to_vec()).ok_or(HeciError::BufferTooSmall)
    }

    fn send_message(&self, context: &mut HeciContext<R>, buffer: &mut [u8]) -> Result<()> {
        let arguments: SmmHeciSendMessage = communicate::read_arguments(buffer)?;
        let mut message = Self::outbound_message(communicate::data::<SmmHeciSendMessage>(buffer), arguments.length)?;
        context.sign(&mut message)?;
        let command = PendingCommand::from_message(&message, arguments.host_address, arguments.cse_address)?;

        context.wake_link()?;
        context.engine.submit(command)?;

        match context.engine.check_command_queue() {
            Ok(_) => Ok(()),
            Err(e) if e.is_transient() => {
                log::warn!(target: "heci_smm", "Queued message not sent yet: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn read_message(&self, context: &mut HeciContext<R>, buffer: &mut [u8]) -> Result<()> {
        let arguments: SmmHeciReadMessage = communicate::read_arguments(buffer)?;
        let data = communicate::data_mut::<SmmHeciReadMessage>(buffer);
        let capacity = core::cmp::min(arguments.length as usize, data.len());

        let length = context.engine.read_message(&mut data[..capacity])?;
        communicate::write_arguments(buffer, &SmmHeciReadMessage { length: length as u32, ..arguments })
    }

    fn send_message_with_ack(&self, context: &mut HeciContext<R>, buffer: &mut [u8]) -> Result<()> {
        let arguments: SmmHeciSendMessageWithAck = communicate::read_arguments(buffer)?;
        let mut message =
            Self::outbound_message(communicate::data::<SmmHeciSendMessageWithAck>(buffer), arguments.length)?;
        context.sign(&mut message)?;
        let command = PendingCommand::from_message(&message, arguments.host_address, arguments.cse_address)?;

        context.wake_link()?;
        let data = communicate::data_mut::<SmmHeciSendMessageWithAck>(buffer);
        let capacity = core::cmp::min(arguments.rec_length as usize, data.len());
        let received = context.engine.send_with_ack(command, &mut data[..capacity])?;

        communicate::write_arguments(buffer, &SmmHeciSendMessageWithAck { rec_length: received as u32, ..arguments })
    }

    fn get_status(&self, context: &mut HeciContext<R>, buffer: &mut [u8]) -> Result<()> {
        let status = Self::channel_status(context)?;
        communicate::write_arguments(buffer, &SmmHeciGetStatus { status: status as u32, reserved: 0 })
    }

    fn channel_status(context: &mut HeciContext<R>) -> Result<HeciChannelStatus> {
        if context.engine.transport().is_link_idle() {
            return Ok(HeciChannelStatus::Idle);
        }

        if let Err(e) = context.engine.service_interrupt() {
            if !e.is_transient() {
                return Err(e);
            }
            log::debug!(target: "heci_smm", "Channel service deferred: {}", e);
        }

        if context.engine.is_black_hole() {
            return Ok(HeciChannelStatus::Busy);
        }

        if context.engine.is_busy() {
            return Ok(HeciChannelStatus::Busy);
        }

        if context.lifecycle != ChannelLifecycle::ActiveUntilFlushed {
            context.engine.transport().force_link_idle()?;
            if context.engine.transport().is_link_idle() {
                context.lifecycle = ChannelLifecycle::Idle;
            }
        }
        Ok(HeciChannelStatus::Idle)
    }

    /// Registers the system reset flush once and marks the runtime phase. Either end notification may arrive first.
    fn enter_runtime(&self, context: &mut HeciContext<R>) -> Result<()> {
        if context.reset_registered {
            return Ok(());
        }

        self.reset_notification.register_reset_notify()?;
        context.engine.transport_mut().mark_runtime();
        context.reset_registered = true;
        Ok(())
    }

    fn end_of_post(&self, context: &mut HeciContext<R>) -> Result<()> {
        if context.end_of_post {
            return Ok(());
        }

        self.enter_runtime(context)?;
        context.end_of_post = true;
        log::info!(target: "heci_smm", "End of POST: HECI link may now idle");
        Ok(())
    }

    fn end_of_services(&self, context: &mut HeciContext<R>) -> Result<()> {
        if context.end_of_services {
            return Ok(());
        }

        self.enter_runtime(context)?;
        context.engine.transport().force_link_active()?;
        context.lifecycle = ChannelLifecycle::ActiveUntilFlushed;
        context.end_of_services = true;
        log::info!(target: "heci_smm", "End of services: HECI link held active until reset");
        Ok(())
    }

    /// Flushes every queued command ahead of a system reset and closes the channel.
    pub fn on_system_reset(&self) -> Result<()> {
        let mut context = self.context.lock();
        match context.lifecycle {
            ChannelLifecycle::PoweredDown | ChannelLifecycle::Reset | ChannelLifecycle::Flushed => return Ok(()),
            _ => {}
        }

        log::info!(target: "heci_smm", "System reset: flushing {} queued HECI commands", context.engine.queued_commands());
        context.engine.transport().force_link_active()?;
        let result = context.engine.flush(self.config.flush_iterations);
        context.lifecycle = ChannelLifecycle::Flushed;
        result
    }
}
