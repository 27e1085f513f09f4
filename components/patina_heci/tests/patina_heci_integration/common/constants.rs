//! Test Constants for Patina HECI Integration Tests
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent

use patina_heci::trusted_channel::TRUSTED_KEY_LENGTH;

/// Host client address used by the tests.
pub const HOST_ADDRESS: u8 = 0x01;

/// CSE client address used by the tests.
pub const CSE_ADDRESS: u8 = 0x02;

/// Trusted channel key handed out by the test key provider.
pub const TEST_KEY: [u8; TRUSTED_KEY_LENGTH] = [0x42; TRUSTED_KEY_LENGTH];

/// Monotonic counter handed out with [`TEST_KEY`].
pub const TEST_INITIAL_COUNTER: u32 = 7;

/// Host circular buffer depth of the production CSE.
pub const DEFAULT_HOST_DEPTH: u8 = 0x80;

/// `GetProxyState` request: the CSE proxy is stopping.
pub const GET_PROXY_STATE_REQUEST: [u8; 4] = [0x03, 0x00, 0x00, 0x00];

/// `GetProxyState` response: the CSE proxy is running again.
pub const GET_PROXY_STATE_RESPONSE: [u8; 4] = [0x83, 0x00, 0x00, 0x00];

/// First byte of the proxy stop acknowledgement.
pub const PROXY_STOP_MARKER: u8 = 0x04;
