//! HECI Register Definitions
//!
//! Offsets into the HECI MMIO BAR and the bit layout of the registers the engine touches.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use bitfield_struct::bitfield;

/// MMIO offsets from the HECI BAR.
pub mod offset {
    /// Host circular buffer write window.
    pub const H_CB_WW: usize = 0x00;
    /// Host control and status.
    pub const H_CSR: usize = 0x04;
    /// SEC circular buffer read window.
    pub const SEC_CB_RW: usize = 0x08;
    /// SEC control and status, host read access.
    pub const SEC_CSR_HA: usize = 0x0C;
    /// D0i3 control.
    pub const D0I3C: usize = 0x800;
}

/// PCI configuration space offsets of the HECI function.
pub mod pci {
    /// Command register.
    pub const COMMAND: u16 = 0x04;
    /// Memory space enable bit of the command register.
    pub const COMMAND_MSE: u32 = 0x02;
    /// Bus master enable bit of the command register.
    pub const COMMAND_BME: u32 = 0x04;
    /// Memory BAR (low dword).
    pub const BAR0: u16 = 0x10;
    /// Memory BAR (high dword when BAR0 is 64-bit).
    pub const BAR1: u16 = 0x14;
    /// Host firmware status.
    pub const HFS: u16 = 0x40;
}

/// Control and status register shared by the host (`H_CSR`) and SEC (`SEC_CSR_HA`) sides.
///
/// `interrupt_status` is write-one-to-clear. Read-modify-write sequences that do not intend to acknowledge an
/// interrupt must write it back as zero.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct ControlStatus {
    pub interrupt_enable: bool,
    pub interrupt_status: bool,
    pub interrupt_generate: bool,
    pub ready: bool,
    pub reset: bool,
    #[bits(3)]
    __reserved: u8,
    #[bits(8)]
    pub cb_read_pointer: u8,
    #[bits(8)]
    pub cb_write_pointer: u8,
    #[bits(8)]
    pub cb_depth: u8,
}

/// Host control and status register.
pub type HostCsr = ControlStatus;

/// SEC control and status register as seen by the host.
pub type SecCsr = ControlStatus;

impl ControlStatus {
    /// Slots currently holding unread data.
    pub fn filled_slots(&self) -> u8 {
        self.cb_write_pointer().wrapping_sub(self.cb_read_pointer())
    }

    /// Slots available for writing.
    pub fn empty_slots(&self) -> u8 {
        self.cb_depth().saturating_sub(self.filled_slots())
    }

    /// The value to write back to modify the register without acknowledging a pending interrupt.
    pub fn preserving_status(self) -> Self {
        self.with_interrupt_status(false)
    }
}

/// D0i3 control register.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct D0i3Control {
    /// Command in progress; the register must not be written while set.
    pub command_in_progress: bool,
    /// Interrupt request on completion.
    pub interrupt_request: bool,
    /// Set to request (or report) the D0i3 idle state.
    pub d0i3: bool,
    /// Restore required.
    pub restore_required: bool,
    #[bits(28)]
    __reserved: u32,
}

/// CSE operation mode reported in the firmware status register.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SecOperationMode {
    Normal,
    Debug,
    Disabled,
    OverrideJumper,
    OverrideMei,
    Other(u8),
}

impl From<u8> for SecOperationMode {
    fn from(value: u8) -> Self {
        match value {
            0 => SecOperationMode::Normal,
            2 => SecOperationMode::Debug,
            3 => SecOperationMode::Disabled,
            4 => SecOperationMode::OverrideJumper,
            5 => SecOperationMode::OverrideMei,
            other => SecOperationMode::Other(other),
        }
    }
}

/// Host firmware status (HFS) register.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct FirmwareStatus {
    #[bits(4)]
    pub current_state: u8,
    pub manufacturing_mode: bool,
    pub fpt_bad: bool,
    #[bits(3)]
    pub operation_state: u8,
    pub fw_init_complete: bool,
    pub ft_bup_ld_flr: bool,
    pub update_in_progress: bool,
    #[bits(4)]
    pub error_code: u8,
    #[bits(4)]
    pub operation_mode: u8,
    #[bits(4)]
    pub reset_count: u8,
    pub boot_options_present: bool,
    #[bits(3)]
    __reserved: u8,
    #[bits(4)]
    pub bios_message_ack: u8,
}

impl FirmwareStatus {
    /// Decoded operation mode.
    pub fn mode(&self) -> SecOperationMode {
        SecOperationMode::from(self.operation_mode())
    }

    /// True if the CSE runs its normal firmware without a reported error, the only mode the SMM channel serves.
    pub fn is_normal_mode(&self) -> bool {
        self.mode() == SecOperationMode::Normal && self.error_code() == 0
    }
}
