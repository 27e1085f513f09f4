//! HECI Command Queue
//!
//! A byte ring buffer of variable length command records. Each record is a [`CommandRecordHeader`] followed by the
//! message packed as little-endian 32-bit words, so a record can be handed to the transport without repacking.
//!
//! The ring tracks its fill level explicitly; a record that does not fit is rejected with
//! [`HeciError::OutOfResources`] and the queue is left untouched.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
extern crate alloc;
use alloc::{vec, vec::Vec};

use zerocopy::{FromBytes, IntoBytes};
use zerocopy_derive::*;

use crate::error::{HeciError, Result};
use crate::message::{bytes_to_words, MAX_CLIENT_ADDRESS, SLOT_SIZE};

/// Size of the header stored in front of every queued record.
pub const RECORD_HEADER_SIZE: usize = core::mem::size_of::<CommandRecordHeader>();

/// Header stored in the ring in front of the payload words of a record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct CommandRecordHeader {
    /// Number of payload words following the header.
    pub word_count: u32,
    /// Message length in bytes.
    pub message_length: u32,
    pub cse_address: u8,
    pub host_address: u8,
    pub reserved: u16,
}

/// A host message waiting to be written to the CSE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    /// Message packed as little-endian words, zero padded.
    pub payload: Vec<u32>,
    /// Message length in bytes.
    pub message_length: u32,
    pub cse_address: u8,
    pub host_address: u8,
}

impl PendingCommand {
    /// Packs a byte message for the given client pair.
    pub fn from_message(message: &[u8], host_address: u8, cse_address: u8) -> Result<Self> {
        if message.is_empty() || host_address > MAX_CLIENT_ADDRESS || cse_address > MAX_CLIENT_ADDRESS {
            log::error!(
                target: "heci_queue",
                "Rejecting command: length {}, host {:#x}, cse {:#x}",
                message.len(),
                host_address,
                cse_address
            );
            return Err(HeciError::InvalidParameter);
        }

        let message_length = u32::try_from(message.len()).map_err(|_| HeciError::InvalidParameter)?;
        Ok(Self { payload: bytes_to_words(message), message_length, cse_address, host_address })
    }

    /// First byte of the message, used by the proxy gate.
    pub fn first_byte(&self) -> Option<u8> {
        if self.message_length == 0 {
            return None;
        }
        self.payload.first().map(|word| word.to_le_bytes()[0])
    }

    /// Number of payload words.
    pub fn word_count(&self) -> usize {
        self.payload.len()
    }

    /// Bytes the command occupies in the ring.
    pub fn record_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.payload.len() * SLOT_SIZE
    }
}

/// Circular FIFO of [`PendingCommand`] records.
pub struct CommandRingBuffer {
    storage: Vec<u8>,
    head: usize,
    tail: usize,
    used: usize,
    records: usize,
}

impl core::fmt::Debug for CommandRingBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandRingBuffer")
            .field("capacity", &self.storage.len())
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("used", &self.used)
            .field("records", &self.records)
            .finish()
    }
}

impl CommandRingBuffer {
    /// Creates an empty ring of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self { storage: vec![0u8; capacity], head: 0, tail: 0, used: 0, records: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes currently held by queued records.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Number of queued records.
    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Appends a command at the tail.
    pub fn enqueue(&mut self, command: &PendingCommand) -> Result<()> {
        let record_size = command.record_size();
        if record_size > self.capacity() - self.used {
            log::warn!(
                target: "heci_queue",
                "Command queue full: record of {} bytes, {} of {} bytes used",
                record_size,
                self.used,
                self.capacity()
            );
            return Err(HeciError::OutOfResources);
        }

        self.write_record(command);
        log::debug!(target: "heci_queue", "Queued {} byte command ({} records, {} bytes used)", command.message_length, self.records, self.used);
        Ok(())
    }

    /// Header of the record at the head, if any.
    pub fn peek_header(&self) -> Option<CommandRecordHeader> {
        if self.is_empty() {
            return None;
        }
        self.header_at(self.head)
    }

    /// First payload byte of the record at the head. `None` if the queue is empty or the record has no payload.
    pub fn peek_first_payload_byte(&self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        self.first_payload_byte_at(self.head)
    }

    /// Index, counted from the head, of the oldest record whose first payload byte is `byte`.
    pub fn position_of_first_byte(&self, byte: u8) -> Option<usize> {
        let mut cursor = self.head;
        for index in 0..self.records {
            let header = self.header_at(cursor)?;
            if self.first_payload_byte_at(cursor) == Some(byte) {
                return Some(index);
            }
            cursor = self.wrap(cursor + RECORD_HEADER_SIZE + header.word_count as usize * SLOT_SIZE);
        }
        None
    }

    /// Removes the oldest record whose first payload byte is `byte`, wherever it sits. The remaining records keep
    /// their order.
    pub fn remove_first_with_byte(&mut self, byte: u8) -> Option<PendingCommand> {
        let position = self.position_of_first_byte(byte)?;
        if position == 0 {
            return self.dequeue();
        }

        let count = self.records;
        let mut kept = Vec::with_capacity(count - 1);
        let mut removed = None;
        for index in 0..count {
            let command = self.dequeue()?;
            if index == position {
                removed = Some(command);
            } else {
                kept.push(command);
            }
        }

        // The ring is empty now and every kept record fit before, so rewriting them cannot overflow.
        for command in &kept {
            self.write_record(command);
        }
        log::debug!(target: "heci_queue", "Took record {} of {} out of order", position, count);
        removed
    }

    /// Removes and returns the record at the head.
    pub fn dequeue(&mut self) -> Option<PendingCommand> {
        let header = self.peek_header()?;
        let word_count = header.word_count as usize;
        let record_size = RECORD_HEADER_SIZE + word_count * SLOT_SIZE;
        if record_size > self.used {
            log::error!(target: "heci_queue", "Corrupt record at head {:#x}, discarding queue", self.head);
            self.clear();
            return None;
        }

        let mut payload = vec![0u32; word_count];
        self.copy_out(self.wrap(self.head + RECORD_HEADER_SIZE), payload.as_mut_bytes());

        self.head = self.wrap(self.head + record_size);
        self.used -= record_size;
        self.records -= 1;

        Some(PendingCommand {
            payload,
            message_length: header.message_length,
            cse_address: header.cse_address,
            host_address: header.host_address,
        })
    }

    /// Drops every queued record.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.used = 0;
        self.records = 0;
    }

    fn write_record(&mut self, command: &PendingCommand) {
        let header = CommandRecordHeader {
            word_count: command.payload.len() as u32,
            message_length: command.message_length,
            cse_address: command.cse_address,
            host_address: command.host_address,
            reserved: 0,
        };

        self.write_at_tail(header.as_bytes());
        self.write_at_tail(command.payload.as_bytes());
        self.used += command.record_size();
        self.records += 1;
    }

    fn header_at(&self, position: usize) -> Option<CommandRecordHeader> {
        let mut raw = [0u8; RECORD_HEADER_SIZE];
        self.copy_out(position, &mut raw);
        CommandRecordHeader::read_from_bytes(&raw).ok()
    }

    fn first_payload_byte_at(&self, position: usize) -> Option<u8> {
        let header = self.header_at(position)?;
        if header.message_length == 0 || header.word_count == 0 {
            return None;
        }
        let mut byte = [0u8; 1];
        self.copy_out(self.wrap(position + RECORD_HEADER_SIZE), &mut byte);
        Some(byte[0])
    }

    fn wrap(&self, position: usize) -> usize {
        position % self.capacity()
    }

    fn write_at_tail(&mut self, bytes: &[u8]) {
        let mut written = 0;
        while written < bytes.len() {
            let run = core::cmp::min(bytes.len() - written, self.capacity() - self.tail);
            self.storage[self.tail..self.tail + run].copy_from_slice(&bytes[written..written + run]);
            written += run;
            self.tail = self.wrap(self.tail + run);
        }
    }

    fn copy_out(&self, start: usize, out: &mut [u8]) {
        let mut position = start;
        let mut copied = 0;
        while copied < out.len() {
            let run = core::cmp::min(out.len() - copied, self.capacity() - position);
            out[copied..copied + run].copy_from_slice(&self.storage[position..position + run]);
            copied += run;
            position = self.wrap(position + run);
        }
    }
}
