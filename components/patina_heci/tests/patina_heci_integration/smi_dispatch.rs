//! MMI Dispatch Test Module
//!
//! Covers the channel lifecycle and the status function.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent

pub mod lifecycle_tests;
