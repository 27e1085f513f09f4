//! HECI Simulation
//!
//! A register level model of the CSE side of the secondary HECI function, for exercising the engine and the MMI
//! handler without hardware: the host and SEC circular buffers, the control and status registers, the D0i3 control
//! register and the firmware status register.
//!
//! Host messages are reassembled from their bursts and handed to a responder (or answered from a list of canned
//! replies); replies are written back into the SEC buffer in bursts of a configurable size.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
extern crate alloc;
use alloc::{boxed::Box, collections::VecDeque, sync::Arc, vec, vec::Vec};

use crate::hardware::HeciRegisterAccess;
use crate::message::{bytes_to_words, HeciMessageHeader, MAX_BURST_LENGTH};
use crate::registers::{offset, ControlStatus, D0i3Control, FirmwareStatus};

/// Produces the CSE replies to a reassembled host message.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

/// Depth of the SEC circular buffer reported to the host.
const SEC_BUFFER_DEPTH: u8 = 0x80;

/// A burst observed by the simulated CSE.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BurstRecord {
    pub length: usize,
    pub message_complete: bool,
    pub host_address: u8,
    pub cse_address: u8,
}

struct PeerState {
    host_depth: u8,
    host_slots: Vec<u32>,
    host_read_pointer: u8,
    host_write_pointer: u8,
    host_interrupt_enable: bool,
    host_interrupt_status: bool,
    host_ready: bool,
    sec_slots: VecDeque<u32>,
    sec_read_pointer: u8,
    sec_ready: bool,
    d0i3: bool,
    d0i3_transitions: usize,
    acknowledge: bool,
    response_burst_length: usize,
    partial: Vec<u8>,
    bursts: Vec<BurstRecord>,
    received: Vec<Vec<u8>>,
    responder: Option<Responder>,
    canned_replies: VecDeque<Vec<u8>>,
    firmware_status: u32,
    resets: usize,
    overruns: usize,
}

impl PeerState {
    fn new(host_depth: u8) -> Self {
        Self {
            host_depth,
            host_slots: Vec::new(),
            host_read_pointer: 0,
            host_write_pointer: 0,
            host_interrupt_enable: false,
            host_interrupt_status: false,
            host_ready: true,
            sec_slots: VecDeque::new(),
            sec_read_pointer: 0,
            sec_ready: true,
            d0i3: false,
            d0i3_transitions: 0,
            acknowledge: true,
            response_burst_length: MAX_BURST_LENGTH & !0x3,
            partial: Vec::new(),
            bursts: Vec::new(),
            received: Vec::new(),
            responder: None,
            canned_replies: VecDeque::new(),
            firmware_status: FirmwareStatus::new().with_current_state(5).with_fw_init_complete(true).into(),
            resets: 0,
            overruns: 0,
        }
    }

    /// Writes `message` into the SEC buffer, split into bursts, and raises the host interrupt.
    fn deliver(&mut self, message: &[u8]) {
        let chunks: Vec<&[u8]> =
            if message.is_empty() { vec![message] } else { message.chunks(self.response_burst_length).collect() };
        let last = chunks.len() - 1;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let header = HeciMessageHeader::for_burst(0x02, 0x01, chunk.len(), index == last);
            self.deliver_burst(header, &bytes_to_words(chunk));
        }
    }

    fn deliver_burst(&mut self, header: HeciMessageHeader, words: &[u32]) {
        self.sec_slots.push_back(header.into());
        self.sec_slots.extend(words.iter().copied());
        self.host_interrupt_status = true;
    }

    fn consume_host_burst(&mut self) {
        if self.host_slots.is_empty() {
            return;
        }
        let slots = core::mem::take(&mut self.host_slots);
        self.host_read_pointer = self.host_write_pointer;

        let header = HeciMessageHeader::from(slots[0]);
        let length = header.length() as usize;
        self.bursts.push(BurstRecord {
            length,
            message_complete: header.message_complete(),
            host_address: header.host_address(),
            cse_address: header.cse_address(),
        });
        self.partial.extend(slots[1..].iter().flat_map(|slot| slot.to_le_bytes()).take(length));
        self.host_interrupt_status = true;

        if header.message_complete() {
            let message = core::mem::take(&mut self.partial);
            let replies = match self.responder.as_mut() {
                Some(responder) => responder(&message),
                None => self.canned_replies.pop_front().into_iter().collect(),
            };
            self.received.push(message);
            for reply in replies {
                self.deliver(&reply);
            }
        }
    }

    fn host_csr(&self) -> ControlStatus {
        ControlStatus::new()
            .with_interrupt_enable(self.host_interrupt_enable)
            .with_interrupt_status(self.host_interrupt_status)
            .with_ready(self.host_ready)
            .with_cb_read_pointer(self.host_read_pointer)
            .with_cb_write_pointer(self.host_write_pointer)
            .with_cb_depth(self.host_depth)
    }

    fn sec_csr(&self) -> ControlStatus {
        ControlStatus::new()
            .with_ready(self.sec_ready)
            .with_cb_read_pointer(self.sec_read_pointer)
            .with_cb_write_pointer(self.sec_read_pointer.wrapping_add(self.sec_slots.len() as u8))
            .with_cb_depth(SEC_BUFFER_DEPTH)
    }

    fn write_host_csr(&mut self, csr: ControlStatus) {
        if csr.interrupt_status() {
            self.host_interrupt_status = false;
        }
        self.host_interrupt_enable = csr.interrupt_enable();

        if csr.reset() {
            self.resets += 1;
            self.host_slots.clear();
            self.host_read_pointer = self.host_write_pointer;
            self.sec_slots.clear();
            self.partial.clear();
            self.host_ready = false;
            self.sec_ready = false;
            return;
        }

        self.host_ready = csr.ready();
        if csr.interrupt_generate() {
            if !self.sec_ready {
                self.sec_ready = self.host_ready;
            } else if self.acknowledge {
                self.consume_host_burst();
            }
        }
    }
}

/// Shared handle to a simulated CSE. Clones observe the same state.
#[derive(Clone)]
pub struct SimulatedCse {
    state: Arc<spin::Mutex<PeerState>>,
}

impl Default for SimulatedCse {
    fn default() -> Self {
        Self::new(0x80)
    }
}

impl SimulatedCse {
    /// A ready CSE whose host circular buffer is `host_depth` slots deep.
    pub fn new(host_depth: u8) -> Self {
        Self { state: Arc::new(spin::Mutex::new(PeerState::new(host_depth))) }
    }

    /// Installs the function answering every completed host message.
    pub fn set_responder(&self, responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static) {
        self.state.lock().responder = Some(Box::new(responder));
    }

    /// Queues a reply for the next completed host message. Ignored while a responder is installed.
    pub fn queue_reply(&self, reply: &[u8]) {
        self.state.lock().canned_replies.push_back(reply.to_vec());
    }

    /// Stops (or resumes) consuming host bursts on interrupt generate.
    pub fn set_acknowledge(&self, acknowledge: bool) {
        self.state.lock().acknowledge = acknowledge;
    }

    /// Consumes the burst waiting in the host buffer, as a late acknowledgement.
    pub fn acknowledge_pending(&self) {
        self.state.lock().consume_host_burst();
    }

    /// Largest burst the CSE uses for its own messages, in bytes.
    pub fn set_response_burst_length(&self, length: usize) {
        self.state.lock().response_burst_length = length;
    }

    /// Sends an unsolicited message to the host.
    pub fn inject(&self, message: &[u8]) {
        self.state.lock().deliver(message);
    }

    /// Places one raw burst in the SEC buffer; the header may declare any length.
    pub fn inject_burst(&self, header: HeciMessageHeader, words: &[u32]) {
        self.state.lock().deliver_burst(header, words);
    }

    pub fn set_sec_ready(&self, ready: bool) {
        self.state.lock().sec_ready = ready;
    }

    pub fn set_firmware_status(&self, status: FirmwareStatus) {
        self.state.lock().firmware_status = status.into();
    }

    /// Messages reassembled from host bursts, in arrival order.
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.state.lock().received.clone()
    }

    pub fn bursts(&self) -> Vec<BurstRecord> {
        self.state.lock().bursts.clone()
    }

    /// Lengths declared by every recorded burst, in bytes.
    pub fn burst_lengths(&self) -> Vec<usize> {
        self.state.lock().bursts.iter().map(|burst| burst.length).collect()
    }

    /// Message complete flags of every recorded burst.
    pub fn burst_completion(&self) -> Vec<bool> {
        self.state.lock().bursts.iter().map(|burst| burst.message_complete).collect()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.bursts.clear();
        state.received.clear();
    }

    pub fn is_link_idle(&self) -> bool {
        self.state.lock().d0i3
    }

    /// Number of times the host moved the link into or out of D0i3.
    pub fn d0i3_transitions(&self) -> usize {
        self.state.lock().d0i3_transitions
    }

    pub fn resets(&self) -> usize {
        self.state.lock().resets
    }

    pub fn is_host_ready(&self) -> bool {
        self.state.lock().host_ready
    }

    pub fn is_sec_ready(&self) -> bool {
        self.state.lock().sec_ready
    }

    pub fn host_interrupt_enabled(&self) -> bool {
        self.state.lock().host_interrupt_enable
    }

    pub fn host_interrupt_pending(&self) -> bool {
        self.state.lock().host_interrupt_status
    }

    /// Words the host has not read from the SEC buffer.
    pub fn unread_sec_slots(&self) -> usize {
        self.state.lock().sec_slots.len()
    }

    /// Slots the host wrote past the end of the host circular buffer.
    pub fn overruns(&self) -> usize {
        self.state.lock().overruns
    }
}

impl HeciRegisterAccess for SimulatedCse {
    fn read_register(&self, register: usize) -> u32 {
        let mut state = self.state.lock();
        match register {
            offset::H_CSR => state.host_csr().into(),
            offset::SEC_CSR_HA => state.sec_csr().into(),
            offset::SEC_CB_RW => match state.sec_slots.pop_front() {
                Some(slot) => {
                    state.sec_read_pointer = state.sec_read_pointer.wrapping_add(1);
                    slot
                }
                None => 0,
            },
            offset::D0I3C => D0i3Control::new().with_d0i3(state.d0i3).into(),
            _ => 0,
        }
    }

    fn write_register(&self, register: usize, value: u32) {
        let mut state = self.state.lock();
        match register {
            offset::H_CB_WW => {
                if state.host_slots.len() >= state.host_depth as usize {
                    log::error!(target: "heci_simulation", "Host circular buffer overrun");
                    state.overruns += 1;
                    return;
                }
                state.host_slots.push(value);
                state.host_write_pointer = state.host_write_pointer.wrapping_add(1);
            }
            offset::H_CSR => state.write_host_csr(ControlStatus::from(value)),
            offset::D0I3C => {
                let requested = D0i3Control::from(value).d0i3();
                if requested != state.d0i3 {
                    state.d0i3 = requested;
                    state.d0i3_transitions += 1;
                }
            }
            _ => {}
        }
    }

    fn read_firmware_status(&self) -> u32 {
        self.state.lock().firmware_status
    }

    fn stall(&self, _microseconds: u32) {}
}

/// A message of `words` full slots counting up from `seed`.
#[cfg(test)]
pub(crate) fn counting_message(words: usize, seed: u8) -> Vec<u8> {
    (0..words * crate::message::SLOT_SIZE).map(|i| seed.wrapping_add(i as u8)).collect()
}
