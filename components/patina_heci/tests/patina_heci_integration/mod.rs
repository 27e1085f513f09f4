//! Patina HECI Integration Tests
//!
//! Drives the `patina_heci` MMI handler through HECI communicate buffers against a simulated CSE.
//!
//! ## Logging
//!
//! The `env_logger` crate can be used to enable logging during tests.
//!
//! To enable logging, set the `RUST_LOG` environment variable to the desired
//! log level (e.g., `debug`, `info`, `warn`, `error`) before running the tests.
//!
//! For example, to trace every burst written by the engine, run:
//!
//! ```sh
//! RUST_LOG=heci_engine=trace cargo make test -p patina_heci --test patina_heci_integration
//! ```
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent

// Common utilities available to all test modules
mod common;

// Test module groups
mod message_flow;
mod smi_dispatch;
