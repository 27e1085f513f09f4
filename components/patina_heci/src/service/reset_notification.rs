//! System Reset Notification Service
//!
//! One-shot registration of the HECI flush for the system reset MMI.
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

/// System Reset Notification
///
/// After end of POST the handler asks the platform to call
/// [`HeciSmmHandler::on_system_reset`](crate::dispatch::HeciSmmHandler::on_system_reset) once, when the system reset
/// MMI fires.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait SystemResetNotification {
    /// Registers the system reset callback. Called at most once per boot.
    fn register_reset_notify(&self) -> Result<()>;
}
