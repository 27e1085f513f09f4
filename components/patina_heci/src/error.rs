//! HECI Error Definitions
//!
//! Every failure in the HECI engine is reported through [`HeciError`]. Conditions that the firmware this component
//! replaces would silently ignore (exhausted poll loops) or assert on (ring buffer overflow) are returned as typed
//! errors here, independent of build configuration.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::fmt::Display;

use r_efi::efi;

/// A specialized [`Result`](core::result::Result) type for HECI operations.
pub type Result<T> = core::result::Result<T, HeciError>;

/// HECI Error Codes
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HeciError {
    /// The channel is busy (queue non-empty or a transfer is in flight), or no data is pending. Retry later.
    NotReady,
    /// The requested operation is not available in the current CSE firmware mode.
    Unsupported,
    /// The command queue or an internal buffer is exhausted.
    OutOfResources,
    /// A bounded polling loop ran out of retries.
    TimedOut,
    /// A caller supplied argument is malformed.
    InvalidParameter,
    /// The caller supplied buffer cannot hold the request or its arguments.
    BufferTooSmall,
    /// The hardware reported an inconsistent state.
    DeviceError,
    /// The component has not been initialized yet.
    NotStarted,
    /// The trusted channel key could not be obtained.
    SecurityViolation,
}

impl HeciError {
    /// Returns true if the error is transient and the caller is expected to retry on a later SMI.
    pub fn is_transient(&self) -> bool {
        matches!(self, HeciError::NotReady | HeciError::TimedOut)
    }
}

impl Display for HeciError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HeciError::NotReady => write!(f, "HECI channel busy or no data pending"),
            HeciError::Unsupported => write!(f, "Operation not supported in the current CSE firmware mode"),
            HeciError::OutOfResources => write!(f, "HECI command queue or buffer exhausted"),
            HeciError::TimedOut => write!(f, "HECI register poll exceeded its retry budget"),
            HeciError::InvalidParameter => write!(f, "Invalid HECI request parameter"),
            HeciError::BufferTooSmall => write!(f, "Buffer too small for the HECI request"),
            HeciError::DeviceError => write!(f, "HECI device reported an inconsistent state"),
            HeciError::NotStarted => write!(f, "HECI component is not initialized"),
            HeciError::SecurityViolation => write!(f, "Trusted channel key unavailable"),
        }
    }
}

impl core::error::Error for HeciError {}

impl From<HeciError> for efi::Status {
    fn from(e: HeciError) -> efi::Status {
        match e {
            HeciError::NotReady => efi::Status::NOT_READY,
            HeciError::Unsupported => efi::Status::UNSUPPORTED,
            HeciError::OutOfResources => efi::Status::OUT_OF_RESOURCES,
            HeciError::TimedOut => efi::Status::TIMEOUT,
            HeciError::InvalidParameter => efi::Status::INVALID_PARAMETER,
            HeciError::BufferTooSmall => efi::Status::BUFFER_TOO_SMALL,
            HeciError::DeviceError => efi::Status::DEVICE_ERROR,
            HeciError::NotStarted => efi::Status::NOT_STARTED,
            HeciError::SecurityViolation => efi::Status::SECURITY_VIOLATION,
        }
    }
}

/// Converts a HECI result into the status reported through the communicate buffer.
pub fn result_to_status<T>(result: &Result<T>) -> efi::Status {
    match result {
        Ok(_) => efi::Status::SUCCESS,
        Err(e) => (*e).into(),
    }
}
