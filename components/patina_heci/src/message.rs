//! HECI Message Framing
//!
//! Every burst written into (or read from) a HECI circular buffer starts with a one-slot [`HeciMessageHeader`]. The
//! header length describes the bytes that follow in *this* burst, not the length of the whole message; only the
//! final burst of a message carries `message_complete`.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
extern crate alloc;
use alloc::vec::Vec;
use bitfield_struct::bitfield;

/// Size of one circular buffer slot in bytes.
pub const SLOT_SIZE: usize = core::mem::size_of::<u32>();

/// Largest burst payload the 9-bit header length can describe, in bytes.
pub const MAX_BURST_LENGTH: usize = 0x1FF;

/// Largest burst payload the header length can describe, in whole slots.
pub const MAX_BURST_SLOTS: usize = MAX_BURST_LENGTH / SLOT_SIZE;

/// Largest host or CSE client address.
pub const MAX_CLIENT_ADDRESS: u8 = 0x7F;

/// HECI message header prefixed to every burst.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct HeciMessageHeader {
    /// Destination (CSE client) address.
    #[bits(7)]
    pub cse_address: u8,
    #[bits(1)]
    __reserved0: u8,
    /// Source (host client) address.
    #[bits(7)]
    pub host_address: u8,
    #[bits(1)]
    __reserved1: u8,
    /// Bytes of payload following the header in this burst.
    #[bits(9)]
    pub length: u16,
    #[bits(6)]
    __reserved2: u8,
    /// Set on the final burst of a message.
    pub message_complete: bool,
}

impl HeciMessageHeader {
    /// Builds a header for one burst.
    pub fn for_burst(cse_address: u8, host_address: u8, length: usize, message_complete: bool) -> Self {
        debug_assert!(length <= MAX_BURST_LENGTH);
        HeciMessageHeader::new()
            .with_cse_address(cse_address & MAX_CLIENT_ADDRESS)
            .with_host_address(host_address & MAX_CLIENT_ADDRESS)
            .with_length((length & MAX_BURST_LENGTH) as u16)
            .with_message_complete(message_complete)
    }

    /// Number of slots the payload described by this header occupies.
    pub fn payload_slots(&self) -> usize {
        slots_for(self.length() as usize)
    }
}

/// First byte of a proxy protocol message.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct ProxyCommand {
    #[bits(7)]
    pub command: u8,
    /// Clear for a request, set for a response.
    pub req_resp: bool,
}

/// Number of 32-bit slots needed to carry `length` bytes.
pub const fn slots_for(length: usize) -> usize {
    length.div_ceil(SLOT_SIZE)
}

/// Packs a byte message into little-endian 32-bit words, zero padding the final word.
pub fn bytes_to_words(message: &[u8]) -> Vec<u32> {
    message
        .chunks(SLOT_SIZE)
        .map(|chunk| {
            let mut word = [0u8; SLOT_SIZE];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect()
}

/// Unpacks little-endian words into `buffer`, stopping at whichever runs out first. Returns the bytes written.
pub fn words_to_bytes(words: &[u32], buffer: &mut [u8]) -> usize {
    let mut written = 0;
    for word in words {
        if written >= buffer.len() {
            break;
        }
        let bytes = word.to_le_bytes();
        let count = core::cmp::min(SLOT_SIZE, buffer.len() - written);
        buffer[written..written + count].copy_from_slice(&bytes[..count]);
        written += count;
    }
    written
}
