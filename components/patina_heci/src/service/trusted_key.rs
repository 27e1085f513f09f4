//! Trusted Key Provider Service
//!
//! Produces the one-time trusted channel key and the starting monotonic counter shared with the CSE.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#[cfg(any(test, feature = "mockall"))]
use mockall::automock;

use crate::error::Result;
use crate::trusted_channel::TrustedChannelKey;

/// Trusted Key Provider
///
/// Consumed exactly once, when the HECI MMI handler is initialized. A failure aborts initialization: no message on
/// the secondary HECI interface can be authenticated without the key.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait TrustedKeyProvider {
    /// Retrieves the trusted channel key.
    fn retrieve_trusted_key(&self) -> Result<TrustedChannelKey>;
}
