//! Message Flow Test Module
//!
//! Covers burst chunking, the proxy gate, and sustained traffic through the MMI handler.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent

pub mod stress_tests;
