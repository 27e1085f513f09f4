//! HECI Configuration
//!
//! Defines the configuration needed by the HECI engine: the command queue size, the retry budgets for every
//! register poll, and the command identifiers of the proxy ("black hole") protocol.
//!
//! ## HECI Configuration Usage
//!
//! The platform is expected to construct the configuration once, before the MMI handler is registered. Every busy
//! wait in this crate is bounded by one of the [`PollPolicy`] values held here; there is no unbounded loop.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt;

use crate::error::{HeciError, Result};
use crate::queue::RECORD_HEADER_SIZE;

/// Default size of the command ring buffer in bytes.
pub const DEFAULT_COMMAND_QUEUE_CAPACITY: usize = 0x1000;

/// Default maximum length of a response held in the inbox.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 0x1000;

/// Default number of responses the inbox holds before leaving data in hardware.
pub const DEFAULT_INBOX_DEPTH: usize = 4;

/// A bound on a busy-wait: check, stall, retry.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Stall between two checks, in microseconds.
    pub stall_microseconds: u32,
    /// Number of checks before the wait gives up with [`HeciError::TimedOut`].
    pub retries: u32,
}

impl PollPolicy {
    /// Creates a new poll policy.
    pub const fn new(stall_microseconds: u32, retries: u32) -> Self {
        Self { stall_microseconds, retries }
    }

    /// Total time budget of the policy in microseconds.
    pub const fn budget_microseconds(&self) -> u64 {
        self.stall_microseconds as u64 * self.retries as u64
    }
}

impl fmt::Debug for PollPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PollPolicy({}us x {})", self.stall_microseconds, self.retries)
    }
}

/// Command identifiers used by the CSE proxy protocol.
///
/// The least significant byte of a proxy message holds a 7-bit command and a request/response bit. While the CSE
/// reports that its proxy is stopped (a `GetProxyState` request, `req_resp == 0`), only messages whose first byte
/// equals `proxy_stop_marker` may leave the command queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProxyProtocol {
    /// 7-bit command identifier of the `GetProxyState` notification.
    pub get_proxy_state_command: u8,
    /// First byte of the host message allowed through while the gate is closed.
    pub proxy_stop_marker: u8,
}

impl Default for ProxyProtocol {
    fn default() -> Self {
        ProxyProtocol { get_proxy_state_command: 0x03, proxy_stop_marker: 0x04 }
    }
}

/// HECI Configuration
///
/// A standardized configuration structure for the HECI engine and its MMI handler.
#[derive(Debug, Clone)]
pub struct HeciConfiguration {
    /// Size of the command ring buffer in bytes.
    pub command_queue_capacity: usize,
    /// Bound for host/sec control register waits (buffer room, burst acknowledgement, reset handshake).
    pub register_poll: PollPolicy,
    /// Bound for the D0i3 "command in progress" waits.
    pub link_poll: PollPolicy,
    /// Bound for the peer response wait of a blocking send.
    pub response_poll: PollPolicy,
    /// Largest response kept in the inbox.
    pub max_message_length: usize,
    /// Number of responses kept in the inbox.
    pub inbox_depth: usize,
    /// Proxy protocol command identifiers.
    pub proxy: ProxyProtocol,
    /// Sign outbound messages that carry a trusted channel header.
    pub trusted_channel: bool,
    /// Number of queue service passes allowed while flushing on system reset.
    pub flush_iterations: u32,
}

impl Default for HeciConfiguration {
    fn default() -> Self {
        HeciConfiguration {
            command_queue_capacity: DEFAULT_COMMAND_QUEUE_CAPACITY,
            register_poll: PollPolicy::new(10, 100_000),
            link_poll: PollPolicy::new(10, 10_000),
            response_poll: PollPolicy::new(1000, 5_000),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            inbox_depth: DEFAULT_INBOX_DEPTH,
            proxy: ProxyProtocol::default(),
            trusted_channel: true,
            flush_iterations: 1024,
        }
    }
}

impl HeciConfiguration {
    /// Checks that the configuration can drive the engine.
    pub fn validate(&self) -> Result<()> {
        if self.command_queue_capacity < RECORD_HEADER_SIZE + core::mem::size_of::<u32>() {
            log::error!(target: "heci_smm", "Command queue capacity {:#x} cannot hold a single record", self.command_queue_capacity);
            return Err(HeciError::InvalidParameter);
        }

        for policy in [self.register_poll, self.link_poll, self.response_poll] {
            if policy.retries == 0 {
                log::error!(target: "heci_smm", "Poll policy {:?} has no retries", policy);
                return Err(HeciError::InvalidParameter);
            }
        }

        if self.max_message_length == 0 || self.flush_iterations == 0 {
            return Err(HeciError::InvalidParameter);
        }

        if self.proxy.get_proxy_state_command > 0x7F {
            return Err(HeciError::InvalidParameter);
        }

        Ok(())
    }
}
