//! HECI Engine
//!
//! The chunked send/receive state machine on top of [`HeciTransport`] and [`CommandRingBuffer`].
//!
//! Outbound messages are queued and written to the host circular buffer one burst at a time. Each burst is
//! acknowledged by the CSE through the host interrupt status before the next one is written; only the final burst
//! carries `message_complete`. A transfer interrupted by a timeout stays in flight and resumes from the word it
//! stopped at on the next call to [`HeciEngine::send_next`].
//!
//! ## Proxy gate
//!
//! While the CSE reports its proxy stopped (a `GetProxyState` request), the engine holds every queued command back
//! except one whose first byte is the proxy stop marker. A later `GetProxyState` response reopens the gate.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
extern crate alloc;
use alloc::{collections::VecDeque, vec, vec::Vec};

use crate::config::{HeciConfiguration, PollPolicy, ProxyProtocol};
use crate::error::{HeciError, Result};
use crate::hardware::HeciRegisterAccess;
use crate::message::{HeciMessageHeader, ProxyCommand, SLOT_SIZE};
use crate::queue::{CommandRingBuffer, PendingCommand};
use crate::transport::HeciTransport;

/// State of the outbound channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// No transfer in flight.
    Idle,
    /// A transfer has words left to write.
    Sending,
    /// A burst was written and its acknowledgement has not been observed yet.
    AwaitingPeerDrain,
}

/// The message currently being written to the host circular buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightTransfer {
    command: PendingCommand,
    next_word: usize,
    bytes_written: usize,
    awaiting_ack: bool,
}

impl InFlightTransfer {
    pub fn new(command: PendingCommand) -> Self {
        Self { command, next_word: 0, bytes_written: 0, awaiting_ack: false }
    }

    /// Payload words not yet written to hardware.
    pub fn remaining_words(&self) -> usize {
        self.command.word_count() - self.next_word
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn message_length(&self) -> usize {
        self.command.message_length as usize
    }

    pub fn is_complete(&self) -> bool {
        self.remaining_words() == 0 && !self.awaiting_ack
    }
}

/// The HECI messaging engine.
pub struct HeciEngine<R: HeciRegisterAccess> {
    transport: HeciTransport<R>,
    queue: CommandRingBuffer,
    in_flight: Option<InFlightTransfer>,
    black_hole: bool,
    proxy: ProxyProtocol,
    inbox: VecDeque<Vec<u8>>,
    inbox_depth: usize,
    max_message_length: usize,
    register_poll: PollPolicy,
    response_poll: PollPolicy,
}

impl<R: HeciRegisterAccess> HeciEngine<R> {
    pub fn new(registers: R, config: &HeciConfiguration) -> Self {
        Self {
            transport: HeciTransport::new(registers, config),
            queue: CommandRingBuffer::new(config.command_queue_capacity),
            in_flight: None,
            black_hole: false,
            proxy: config.proxy,
            inbox: VecDeque::with_capacity(config.inbox_depth),
            inbox_depth: config.inbox_depth,
            max_message_length: config.max_message_length,
            register_poll: config.register_poll,
            response_poll: config.response_poll,
        }
    }

    pub fn transport(&self) -> &HeciTransport<R> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut HeciTransport<R> {
        &mut self.transport
    }

    pub fn state(&self) -> ChannelState {
        match &self.in_flight {
            None => ChannelState::Idle,
            Some(transfer) if transfer.awaiting_ack => ChannelState::AwaitingPeerDrain,
            Some(_) => ChannelState::Sending,
        }
    }

    pub fn in_flight(&self) -> Option<&InFlightTransfer> {
        self.in_flight.as_ref()
    }

    /// True while the proxy gate holds queued commands back.
    pub fn is_black_hole(&self) -> bool {
        self.black_hole
    }

    pub fn queued_commands(&self) -> usize {
        self.queue.len()
    }

    pub fn is_queue_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// True if a command is queued or a transfer is in flight.
    pub fn is_busy(&self) -> bool {
        !self.queue.is_empty() || self.in_flight.is_some()
    }

    /// Responses drained by the polling path and not yet read.
    pub fn inbox_len(&self) -> usize {
        self.inbox.len()
    }

    /// Accepts a command for transmission.
    ///
    /// A proxy stop command submitted while the gate is closed and the channel is idle skips the queue; everything
    /// else is appended to the queue in order.
    pub fn submit(&mut self, command: PendingCommand) -> Result<()> {
        if self.black_hole && self.in_flight.is_none() && command.first_byte() == Some(self.proxy.proxy_stop_marker) {
            log::debug!(target: "heci_engine", "Proxy stop command bypasses the queue");
            self.in_flight = Some(InFlightTransfer::new(command));
            return Ok(());
        }
        self.queue.enqueue(&command)
    }

    /// Resumes the transfer in flight, or starts the next queued command the proxy gate lets through.
    ///
    /// While the gate is closed the oldest proxy stop command is taken from anywhere in the queue; everything else
    /// waits.
    ///
    /// Returns true if a message was completely handed to hardware.
    pub fn check_command_queue(&mut self) -> Result<bool> {
        if self.in_flight.is_some() {
            return self.send_next();
        }

        let next = if self.black_hole {
            let stop = self.queue.remove_first_with_byte(self.proxy.proxy_stop_marker);
            if stop.is_none() && !self.queue.is_empty() {
                log::debug!(target: "heci_engine", "Proxy gate closed, holding {} queued commands", self.queue.len());
            }
            stop
        } else {
            self.queue.dequeue()
        };

        match next {
            Some(command) => {
                self.in_flight = Some(InFlightTransfer::new(command));
                self.send_next()
            }
            None => Ok(false),
        }
    }

    /// Writes the remaining bursts of the transfer in flight.
    ///
    /// Returns false if nothing is in flight. On error the transfer stays in flight and the next call resumes it.
    pub fn send_next(&mut self) -> Result<bool> {
        let Some(transfer) = self.in_flight.as_mut() else {
            return Ok(false);
        };

        if transfer.awaiting_ack {
            self.transport.wait_for_peer_interrupt()?;
            self.transport.clear_host_interrupt();
            transfer.awaiting_ack = false;
        }

        let max_burst = self.transport.max_burst_words()?;
        while transfer.remaining_words() > 0 {
            let chunk = core::cmp::min(transfer.remaining_words(), max_burst);
            self.transport.wait_for_host_buffer_room(chunk)?;

            let last = chunk == transfer.remaining_words();
            let length = if last { transfer.message_length() - transfer.bytes_written } else { chunk * SLOT_SIZE };
            let header = HeciMessageHeader::for_burst(
                transfer.command.cse_address,
                transfer.command.host_address,
                length,
                last,
            );

            log::trace!(target: "heci_engine", "Burst of {} bytes at word {}, complete = {}", length, transfer.next_word, last);
            self.transport.write_burst_slot(header.into());
            for word in &transfer.command.payload[transfer.next_word..transfer.next_word + chunk] {
                self.transport.write_burst_slot(*word);
            }
            transfer.next_word += chunk;
            transfer.bytes_written += length;

            self.transport.raise_host_interrupt();
            transfer.awaiting_ack = true;
            self.transport.wait_for_peer_interrupt()?;
            self.transport.clear_host_interrupt();
            transfer.awaiting_ack = false;
        }

        self.transport.disable_host_interrupt();
        self.transport.clear_host_interrupt();
        self.transport.enable_host_interrupt();

        log::debug!(target: "heci_engine", "Sent {} byte message to CSE client {:#x}", transfer.bytes_written, transfer.command.cse_address);
        self.in_flight = None;
        Ok(true)
    }

    /// Reads one message from the SEC circular buffer into `buffer`.
    ///
    /// At most `buffer.len()` bytes are copied; the rest of the message is read and discarded. Returns the number of
    /// bytes copied, or [`HeciError::NotReady`] if the CSE has nothing pending.
    pub fn drain_peer_message(&mut self, buffer: &mut [u8]) -> Result<usize> {
        if !self.transport.is_peer_response_pending() {
            return Err(HeciError::NotReady);
        }

        self.transport.disable_host_interrupt();
        let result = self.read_bursts(buffer);
        self.transport.clear_host_interrupt();
        self.transport.enable_host_interrupt();

        let (copied, declared, first_byte) = result?;
        if declared > copied {
            log::warn!(target: "heci_engine", "Response of {} bytes truncated to {}", declared, copied);
        }
        if let Some(byte) = first_byte {
            self.inspect_proxy_command(byte);
        }
        Ok(copied)
    }

    fn read_bursts(&self, buffer: &mut [u8]) -> Result<(usize, usize, Option<u8>)> {
        let mut copied = 0;
        let mut declared = 0;
        let mut first_byte = None;

        loop {
            let header = HeciMessageHeader::from(self.transport.read_burst_slot());
            let mut burst_left = header.length() as usize;
            declared += burst_left;

            for _ in 0..header.payload_slots() {
                let bytes = self.transport.read_burst_slot().to_le_bytes();
                let valid = core::cmp::min(SLOT_SIZE, burst_left);
                burst_left -= valid;

                if first_byte.is_none() && valid > 0 {
                    first_byte = Some(bytes[0]);
                }

                let take = core::cmp::min(valid, buffer.len() - copied);
                buffer[copied..copied + take].copy_from_slice(&bytes[..take]);
                copied += take;
            }

            if header.message_complete() {
                return Ok((copied, declared, first_byte));
            }
            self.transport.wait_for_peer_response(self.register_poll)?;
        }
    }

    fn inspect_proxy_command(&mut self, byte: u8) {
        let command = ProxyCommand::from(byte);
        if command.command() != self.proxy.get_proxy_state_command {
            return;
        }

        let closed = !command.req_resp();
        if closed != self.black_hole {
            log::info!(target: "heci_engine", "Proxy gate {}", if closed { "closed" } else { "opened" });
        }
        self.black_hole = closed;
    }

    /// Services the channel: resumes the transfer in flight, moves pending responses into the inbox, and starts the
    /// next queued command.
    pub fn service_interrupt(&mut self) -> Result<()> {
        if self.in_flight.is_some() {
            self.send_next()?;
        }

        while self.inbox.len() < self.inbox_depth && self.transport.is_peer_response_pending() {
            let mut message = vec![0u8; self.max_message_length];
            let length = self.drain_peer_message(&mut message)?;
            message.truncate(length);
            self.inbox.push_back(message);
        }

        if self.in_flight.is_none() && self.transport.is_peer_interrupt_pending() {
            self.transport.disable_host_interrupt();
            self.transport.clear_host_interrupt();
            self.transport.enable_host_interrupt();
        }

        if self.in_flight.is_none() {
            self.check_command_queue()?;
        }
        Ok(())
    }

    /// Returns the oldest response, from the inbox if one was drained earlier, otherwise from hardware.
    pub fn read_message(&mut self, buffer: &mut [u8]) -> Result<usize> {
        if let Some(message) = self.inbox.pop_front() {
            let length = core::cmp::min(message.len(), buffer.len());
            buffer[..length].copy_from_slice(&message[..length]);
            if message.len() > buffer.len() {
                log::warn!(target: "heci_engine", "Buffered response of {} bytes truncated to {}", message.len(), length);
            }
            return Ok(length);
        }

        self.drain_peer_message(buffer)
    }

    /// Sends `command` and waits for the CSE response.
    ///
    /// Fails with [`HeciError::NotReady`] if any other traffic is queued or in flight, or if the proxy gate is closed
    /// and `command` is not a proxy stop command.
    pub fn send_with_ack(&mut self, command: PendingCommand, response: &mut [u8]) -> Result<usize> {
        if self.is_busy() {
            log::warn!(target: "heci_engine", "Blocking send refused: {} queued, in flight = {}", self.queue.len(), self.in_flight.is_some());
            return Err(HeciError::NotReady);
        }

        if self.black_hole && command.first_byte() != Some(self.proxy.proxy_stop_marker) {
            log::warn!(target: "heci_engine", "Blocking send refused: proxy gate closed");
            return Err(HeciError::NotReady);
        }

        self.in_flight = Some(InFlightTransfer::new(command));
        if let Err(e) = self.send_next() {
            self.in_flight = None;
            return Err(e);
        }

        self.transport.wait_for_peer_response(self.response_poll)?;
        self.drain_peer_message(response)
    }

    /// Services the queue until it is empty, for at most `iterations` passes.
    pub fn flush(&mut self, iterations: u32) -> Result<()> {
        for _ in 0..iterations {
            if !self.is_busy() {
                return Ok(());
            }
            if let Err(e) = self.check_command_queue() {
                if !e.is_transient() {
                    return Err(e);
                }
            }
        }

        if self.is_busy() {
            log::warn!(target: "heci_engine", "Flush incomplete: {} commands left", self.queue.len());
            return Err(HeciError::TimedOut);
        }
        Ok(())
    }
}
