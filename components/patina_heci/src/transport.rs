//! HECI Transport
//!
//! Register level operations on the HECI circular buffers, interrupt bits and the D0i3 link control. Every wait is
//! a bounded poll described by a [`PollPolicy`] and reports exhaustion as [`HeciError::TimedOut`].
//!
//! Any drain of the SEC circular buffer must be bracketed by [`HeciTransport::disable_host_interrupt`],
//! [`HeciTransport::clear_host_interrupt`] and [`HeciTransport::enable_host_interrupt`] so that an interrupt raised
//! by the peer during the drain is not lost.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::config::{HeciConfiguration, PollPolicy};
use crate::error::{HeciError, Result};
use crate::hardware::HeciRegisterAccess;
use crate::message::MAX_BURST_SLOTS;
use crate::registers::{offset, D0i3Control, FirmwareStatus, HostCsr, SecCsr};

/// Register level HECI operations.
pub struct HeciTransport<R: HeciRegisterAccess> {
    registers: R,
    register_poll: PollPolicy,
    link_poll: PollPolicy,
    runtime: bool,
}

impl<R: HeciRegisterAccess> HeciTransport<R> {
    pub fn new(registers: R, config: &HeciConfiguration) -> Self {
        Self { registers, register_poll: config.register_poll, link_poll: config.link_poll, runtime: false }
    }

    /// Shared access to the underlying registers.
    pub fn registers(&self) -> &R {
        &self.registers
    }

    pub fn host_csr(&self) -> HostCsr {
        HostCsr::from(self.registers.read_register(offset::H_CSR))
    }

    pub fn sec_csr(&self) -> SecCsr {
        SecCsr::from(self.registers.read_register(offset::SEC_CSR_HA))
    }

    fn write_host_csr(&self, csr: HostCsr) {
        self.registers.write_register(offset::H_CSR, csr.into());
    }

    fn d0i3c(&self) -> D0i3Control {
        D0i3Control::from(self.registers.read_register(offset::D0I3C))
    }

    /// Writes one word into the host circular buffer. The caller must have confirmed room for it.
    pub fn write_burst_slot(&self, word: u32) {
        log::trace!(target: "heci_transport", "H_CB_WW <- {:#010x}", word);
        self.registers.write_register(offset::H_CB_WW, word);
    }

    /// Reads one word from the SEC circular buffer.
    pub fn read_burst_slot(&self) -> u32 {
        let word = self.registers.read_register(offset::SEC_CB_RW);
        log::trace!(target: "heci_transport", "SEC_CB_RW -> {:#010x}", word);
        word
    }

    /// Notifies the CSE that the host buffer holds a new burst.
    pub fn raise_host_interrupt(&self) {
        self.write_host_csr(self.host_csr().preserving_status().with_interrupt_generate(true));
    }

    pub fn is_peer_interrupt_pending(&self) -> bool {
        self.host_csr().interrupt_status()
    }

    pub fn clear_host_interrupt(&self) {
        self.write_host_csr(self.host_csr().with_interrupt_generate(false).with_interrupt_status(true));
    }

    pub fn enable_host_interrupt(&self) {
        self.write_host_csr(self.host_csr().preserving_status().with_interrupt_generate(false).with_interrupt_enable(true));
    }

    pub fn disable_host_interrupt(&self) {
        self.write_host_csr(self.host_csr().preserving_status().with_interrupt_generate(false).with_interrupt_enable(false));
    }

    /// True if the SEC circular buffer holds data the host has not read.
    pub fn is_peer_response_pending(&self) -> bool {
        let sec = self.sec_csr();
        sec.cb_write_pointer() != sec.cb_read_pointer()
    }

    /// Largest burst payload, in words, the host circular buffer can take. One slot is reserved for the header.
    pub fn max_burst_words(&self) -> Result<usize> {
        let depth = self.host_csr().cb_depth() as usize;
        if depth < 2 {
            log::error!(target: "heci_transport", "Host circular buffer depth {} cannot carry a burst", depth);
            return Err(HeciError::DeviceError);
        }
        Ok(core::cmp::min(depth - 1, MAX_BURST_SLOTS))
    }

    /// Waits until the host circular buffer can take a header and `words` payload words.
    pub fn wait_for_host_buffer_room(&self, words: usize) -> Result<()> {
        self.poll_until(self.register_poll, "host buffer room", || self.host_csr().empty_slots() as usize > words)
    }

    /// Waits for the CSE to acknowledge a burst through the host interrupt status.
    pub fn wait_for_peer_interrupt(&self) -> Result<()> {
        self.poll_until(self.register_poll, "burst acknowledgement", || self.is_peer_interrupt_pending())
    }

    /// Waits for the CSE to place data in the SEC circular buffer.
    pub fn wait_for_peer_response(&self, policy: PollPolicy) -> Result<()> {
        self.poll_until(policy, "peer response", || self.is_peer_response_pending())
    }

    pub fn is_link_idle(&self) -> bool {
        self.d0i3c().d0i3()
    }

    /// Brings the link out of D0i3. No-op if it is already active.
    pub fn force_link_active(&self) -> Result<()> {
        self.wait_for_link_command()?;
        let d0i3c = self.d0i3c();
        if !d0i3c.d0i3() {
            return Ok(());
        }
        log::debug!(target: "heci_transport", "Forcing HECI link active");
        self.registers.write_register(offset::D0I3C, d0i3c.with_d0i3(false).with_command_in_progress(false).into());
        self.wait_for_link_command()
    }

    /// Puts the link into D0i3. No-op before runtime or if it is already idle.
    pub fn force_link_idle(&self) -> Result<()> {
        if !self.runtime {
            return Ok(());
        }
        self.wait_for_link_command()?;
        let d0i3c = self.d0i3c();
        if d0i3c.d0i3() {
            return Ok(());
        }
        log::debug!(target: "heci_transport", "Forcing HECI link idle");
        self.registers.write_register(offset::D0I3C, d0i3c.with_d0i3(true).with_command_in_progress(false).into());
        self.wait_for_link_command()
    }

    fn wait_for_link_command(&self) -> Result<()> {
        self.poll_until(self.link_poll, "D0i3 command", || !self.d0i3c().command_in_progress())
    }

    /// Allows opportunistic idling from now on.
    pub fn mark_runtime(&mut self) {
        self.runtime = true;
    }

    pub fn is_runtime(&self) -> bool {
        self.runtime
    }

    pub fn firmware_status(&self) -> FirmwareStatus {
        FirmwareStatus::from(self.registers.read_firmware_status())
    }

    /// True if both the host and the SEC side report ready.
    pub fn is_interface_ready(&self) -> bool {
        self.host_csr().ready() && self.sec_csr().ready()
    }

    /// Resets the HECI interface and waits for the CSE to come back ready.
    pub fn reset_interface(&self) -> Result<()> {
        log::info!(target: "heci_transport", "Resetting HECI interface");
        self.write_host_csr(self.host_csr().preserving_status().with_reset(true).with_interrupt_generate(true));
        self.poll_until(self.register_poll, "SEC reset", || !self.sec_csr().ready())?;

        self.write_host_csr(
            self.host_csr().preserving_status().with_reset(false).with_ready(true).with_interrupt_generate(true),
        );
        self.poll_until(self.register_poll, "SEC ready", || self.sec_csr().ready())
    }

    fn poll_until(&self, policy: PollPolicy, what: &str, condition: impl Fn() -> bool) -> Result<()> {
        for _ in 0..policy.retries {
            if condition() {
                return Ok(());
            }
            self.registers.stall(policy.stall_microseconds);
        }

        if condition() {
            return Ok(());
        }

        log::warn!(target: "heci_transport", "Timed out waiting for {} after {:?}", what, policy);
        Err(HeciError::TimedOut)
    }
}
