//! Common Test Infrastructure for Patina HECI Integration Tests
//!
//! This module provides constants and the test framework used across all HECI integration tests, and re-exports the
//! simulated CSE from `patina_heci::simulation`.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent

pub mod constants;
pub mod framework;

// Re-export commonly used items for test infrastructure
pub use constants::*;
pub use framework::*;
pub use patina_heci::simulation::{BurstRecord, Responder, SimulatedCse};
