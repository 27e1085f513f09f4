//! HECI Services
//!
//! The external collaborators the HECI MMI handler depends on. A platform produces them; tests mock them.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
pub mod reset_notification;
pub mod trusted_key;

pub use reset_notification::SystemResetNotification;
pub use trusted_key::TrustedKeyProvider;
