//! HECI Communicate Buffer Layout
//!
//! Callers reach the HECI MMI handler through the MM communicate buffer. The buffer starts with a
//! [`SmmHeciCommunicateHeader`] holding the function and the returned status, followed by the argument structure of
//! that function and, where the function carries a message, the message bytes.
//!
//! | Function | Arguments | Data |
//! |---|---|---|
//! | `SendMessageWithAck` | [`SmmHeciSendMessageWithAck`] | message in, response out |
//! | `ReadMessage` | [`SmmHeciReadMessage`] | response out |
//! | `SendMessage` | [`SmmHeciSendMessage`] | message in |
//! | `GetStatus` | [`SmmHeciGetStatus`] | none |
//! | `EndOfPost` | none | none |
//! | `EndOfServices` | none | none |
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
extern crate alloc;
use alloc::{vec, vec::Vec};

use r_efi::efi;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
use zerocopy_derive::*;

use crate::error::{HeciError, Result};

/// HECI MMI functions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u64)]
pub enum HeciFunction {
    SendMessageWithAck = 1,
    ReadMessage = 2,
    SendMessage = 3,
    GetStatus = 4,
    EndOfPost = 5,
    EndOfServices = 6,
}

impl TryFrom<u64> for HeciFunction {
    type Error = HeciError;

    fn try_from(value: u64) -> Result<Self> {
        match value {
            1 => Ok(HeciFunction::SendMessageWithAck),
            2 => Ok(HeciFunction::ReadMessage),
            3 => Ok(HeciFunction::SendMessage),
            4 => Ok(HeciFunction::GetStatus),
            5 => Ok(HeciFunction::EndOfPost),
            6 => Ok(HeciFunction::EndOfServices),
            _ => Err(HeciError::Unsupported),
        }
    }
}

/// Header at the start of every HECI communicate buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct SmmHeciCommunicateHeader {
    /// A [`HeciFunction`] value.
    pub function: u64,
    /// `efi::Status` of the operation, written by the handler.
    pub return_status: u64,
}

pub const COMMUNICATE_HEADER_SIZE: usize = core::mem::size_of::<SmmHeciCommunicateHeader>();

/// Arguments of `SendMessage`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct SmmHeciSendMessage {
    /// Message length in bytes.
    pub length: u32,
    pub host_address: u8,
    pub cse_address: u8,
    pub reserved: u16,
}

/// Arguments of `ReadMessage`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct SmmHeciReadMessage {
    /// In: capacity of the data area. Out: bytes of response written.
    pub length: u32,
    pub reserved: u32,
}

/// Arguments of `SendMessageWithAck`.
///
/// The data area holds the message on input and the response on output; it is `max(length, rec_length)` bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct SmmHeciSendMessageWithAck {
    /// Message length in bytes.
    pub length: u32,
    /// In: response capacity. Out: bytes of response written.
    pub rec_length: u32,
    pub host_address: u8,
    pub cse_address: u8,
    pub reserved: u16,
}

/// Arguments of `GetStatus`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct SmmHeciGetStatus {
    /// Out: a [`HeciChannelStatus`] value.
    pub status: u32,
    pub reserved: u32,
}

/// Channel status reported by `GetStatus`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum HeciChannelStatus {
    /// Nothing queued or in flight.
    Idle = 0,
    /// Work remains, or the proxy gate is closed.
    Busy = 1,
}

impl From<u32> for HeciChannelStatus {
    fn from(value: u32) -> Self {
        match value {
            0 => HeciChannelStatus::Idle,
            _ => HeciChannelStatus::Busy,
        }
    }
}

/// Reads the header at the start of `buffer`.
pub fn read_header(buffer: &[u8]) -> Result<SmmHeciCommunicateHeader> {
    SmmHeciCommunicateHeader::read_from_prefix(buffer).map(|(header, _)| header).map_err(|_| HeciError::BufferTooSmall)
}

/// Writes `status` into the header at the start of `buffer`.
pub fn write_return_status(buffer: &mut [u8], status: efi::Status) -> Result<()> {
    let mut header = read_header(buffer)?;
    header.return_status = status.as_usize() as u64;
    header.write_to_prefix(buffer).map_err(|_| HeciError::BufferTooSmall)
}

/// Status the handler wrote into `buffer`.
pub fn return_status(buffer: &[u8]) -> Result<efi::Status> {
    Ok(efi::Status::from_usize(read_header(buffer)?.return_status as usize))
}

/// Splits the bytes following the header into the argument structure and the data area.
pub fn read_arguments<T: FromBytes + KnownLayout + Immutable>(buffer: &[u8]) -> Result<T> {
    let payload = buffer.get(COMMUNICATE_HEADER_SIZE..).ok_or(HeciError::BufferTooSmall)?;
    T::read_from_prefix(payload).map(|(arguments, _)| arguments).map_err(|_| HeciError::BufferTooSmall)
}

/// Writes an argument structure back after the header.
pub fn write_arguments<T: IntoBytes + Immutable>(buffer: &mut [u8], arguments: &T) -> Result<()> {
    let payload = buffer.get_mut(COMMUNICATE_HEADER_SIZE..).ok_or(HeciError::BufferTooSmall)?;
    arguments.write_to_prefix(payload).map_err(|_| HeciError::BufferTooSmall)
}

/// The data area following the argument structure `T`.
pub fn data<T>(buffer: &[u8]) -> &[u8] {
    buffer.get(COMMUNICATE_HEADER_SIZE + core::mem::size_of::<T>()..).unwrap_or(&[])
}

/// The mutable data area following the argument structure `T`.
pub fn data_mut<T>(buffer: &mut [u8]) -> &mut [u8] {
    buffer.get_mut(COMMUNICATE_HEADER_SIZE + core::mem::size_of::<T>()..).unwrap_or(&mut [])
}

fn request<T: IntoBytes + Immutable>(function: HeciFunction, arguments: Option<&T>, data_length: usize) -> Vec<u8> {
    let arguments_length = arguments.map_or(0, |_| core::mem::size_of::<T>());
    let mut buffer = vec![0u8; COMMUNICATE_HEADER_SIZE + arguments_length + data_length];
    let header = SmmHeciCommunicateHeader {
        function: function as u64,
        return_status: efi::Status::NOT_STARTED.as_usize() as u64,
    };
    buffer[..COMMUNICATE_HEADER_SIZE].copy_from_slice(header.as_bytes());
    if let Some(arguments) = arguments {
        buffer[COMMUNICATE_HEADER_SIZE..COMMUNICATE_HEADER_SIZE + arguments_length]
            .copy_from_slice(arguments.as_bytes());
    }
    buffer
}

/// Builders for HECI communicate buffers, used by callers of the MMI handler.
pub mod build {
    use super::*;

    /// A fire-and-forget send of `message`.
    pub fn send_message(message: &[u8], host_address: u8, cse_address: u8) -> Vec<u8> {
        let arguments = SmmHeciSendMessage { length: message.len() as u32, host_address, cse_address, reserved: 0 };
        let mut buffer = request(HeciFunction::SendMessage, Some(&arguments), message.len());
        data_mut::<SmmHeciSendMessage>(&mut buffer).copy_from_slice(message);
        buffer
    }

    /// A read of one response into a data area of `capacity` bytes.
    pub fn read_message(capacity: usize) -> Vec<u8> {
        let arguments = SmmHeciReadMessage { length: capacity as u32, reserved: 0 };
        request(HeciFunction::ReadMessage, Some(&arguments), capacity)
    }

    /// A blocking send of `message` expecting a response of up to `response_capacity` bytes.
    pub fn send_message_with_ack(message: &[u8], response_capacity: usize, host_address: u8, cse_address: u8) -> Vec<u8> {
        let arguments = SmmHeciSendMessageWithAck {
            length: message.len() as u32,
            rec_length: response_capacity as u32,
            host_address,
            cse_address,
            reserved: 0,
        };
        let data_length = core::cmp::max(message.len(), response_capacity);
        let mut buffer = request(HeciFunction::SendMessageWithAck, Some(&arguments), data_length);
        data_mut::<SmmHeciSendMessageWithAck>(&mut buffer)[..message.len()].copy_from_slice(message);
        buffer
    }

    pub fn get_status() -> Vec<u8> {
        let arguments = SmmHeciGetStatus { status: HeciChannelStatus::Busy as u32, reserved: 0 };
        request(HeciFunction::GetStatus, Some(&arguments), 0)
    }

    pub fn end_of_post() -> Vec<u8> {
        request::<SmmHeciGetStatus>(HeciFunction::EndOfPost, None, 0)
    }

    pub fn end_of_services() -> Vec<u8> {
        request::<SmmHeciGetStatus>(HeciFunction::EndOfServices, None, 0)
    }
}
