//! HECI Trusted Channel
//!
//! Messages on the secondary HECI interface are authenticated with a key and a monotonic counter shared with the CSE
//! once per boot. A message that starts with a [`TrustedChannelHeader`] receives the next counter value and an
//! HMAC-SHA256 signature computed over the whole message with the signature field zeroed.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zerocopy::{FromBytes, IntoBytes};
use zerocopy_derive::*;
use zeroize::Zeroize;

use crate::error::{HeciError, Result};

/// Length of the trusted channel key and of a signature.
pub const TRUSTED_KEY_LENGTH: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Header at the start of every signed message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct TrustedChannelHeader {
    pub command: u32,
    pub monotonic_counter: u32,
    pub signature: [u8; TRUSTED_KEY_LENGTH],
}

/// Size of [`TrustedChannelHeader`]. Shorter messages are sent unsigned.
pub const TRUSTED_HEADER_SIZE: usize = core::mem::size_of::<TrustedChannelHeader>();

/// The one-time secret handed out by the key provider.
#[derive(Clone)]
pub struct TrustedChannelKey {
    pub key: [u8; TRUSTED_KEY_LENGTH],
    pub monotonic_counter: u32,
}

impl fmt::Debug for TrustedChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustedChannelKey").field("key", &"<redacted>").field("monotonic_counter", &self.monotonic_counter).finish()
    }
}

impl Drop for TrustedChannelKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Signs outbound messages with the trusted channel key.
#[derive(Debug)]
pub struct TrustedChannel {
    key: TrustedChannelKey,
}

impl TrustedChannel {
    pub fn new(key: TrustedChannelKey) -> Self {
        Self { key }
    }

    /// The counter value used by the last signed message.
    pub fn monotonic_counter(&self) -> u32 {
        self.key.monotonic_counter
    }

    /// Signs `message` in place. Returns false if the message is too short to carry a trusted header.
    pub fn sign(&mut self, message: &mut [u8]) -> Result<bool> {
        let Ok((mut header, _)) = TrustedChannelHeader::read_from_prefix(message) else {
            return Ok(false);
        };

        let counter = self.key.monotonic_counter.checked_add(1).ok_or_else(|| {
            log::error!(target: "heci_smm", "Trusted channel counter exhausted");
            HeciError::SecurityViolation
        })?;

        header.monotonic_counter = counter;
        header.signature = [0u8; TRUSTED_KEY_LENGTH];
        header.write_to_prefix(message).map_err(|_| HeciError::BufferTooSmall)?;

        header.signature = hmac_sha256(&self.key.key, &[message])?;
        header.write_to_prefix(message).map_err(|_| HeciError::BufferTooSmall)?;

        self.key.monotonic_counter = counter;
        log::trace!(target: "heci_smm", "Signed command {:#x} with counter {}", header.command, counter);
        Ok(true)
    }

    /// Checks the signature of a message produced by [`TrustedChannel::sign`]. The tag comparison is constant time.
    pub fn verify(&self, message: &[u8]) -> bool {
        let Ok((header, _)) = TrustedChannelHeader::read_from_prefix(message) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key.key) else {
            return false;
        };

        mac.update(&message[..8]);
        mac.update(&[0u8; TRUSTED_KEY_LENGTH]);
        mac.update(&message[TRUSTED_HEADER_SIZE..]);
        mac.verify_slice(&header.signature).is_ok()
    }
}

/// HMAC-SHA256 over the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; TRUSTED_KEY_LENGTH]> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| HeciError::SecurityViolation)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}
