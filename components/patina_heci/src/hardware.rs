//! HECI Hardware Access
//!
//! [`HeciRegisterAccess`] is the seam between the engine and the HECI function. The production implementation,
//! [`MmioHeciRegisters`], performs volatile accesses to the memory BAR of the secondary HECI PCI function; tests
//! substitute a simulated CSE.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use crate::error::{HeciError, Result};
use crate::registers::pci;

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;

/// Raw access to the HECI register block.
///
/// Implementations must not interpret register contents; all protocol knowledge lives in the transport layer.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait HeciRegisterAccess {
    /// Reads the 32-bit MMIO register at `offset` from the HECI BAR.
    fn read_register(&self, offset: usize) -> u32;

    /// Writes the 32-bit MMIO register at `offset` from the HECI BAR.
    fn write_register(&self, offset: usize, value: u32);

    /// Reads the host firmware status register from PCI configuration space.
    fn read_firmware_status(&self) -> u32;

    /// Busy-waits for at least `microseconds`.
    fn stall(&self, microseconds: u32);
}

/// Location of the secondary HECI function in PCI Express configuration space.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeciPciDevice {
    /// Physical base of the ECAM window.
    pub ecam_base: u64,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl Default for HeciPciDevice {
    fn default() -> Self {
        // CSE HECI2 on Broxton: bus 0, device 15, function 1.
        HeciPciDevice { ecam_base: 0xE000_0000, bus: 0, device: 15, function: 1 }
    }
}

impl HeciPciDevice {
    /// ECAM address of a configuration register of this function.
    pub fn config_address(&self, offset: u16) -> u64 {
        self.ecam_base
            + ((self.bus as u64) << 20)
            + (((self.device & 0x1F) as u64) << 15)
            + (((self.function & 0x7) as u64) << 12)
            + ((offset & 0xFFC) as u64)
    }

    /// Reads a 32-bit configuration register.
    ///
    /// ## Safety
    ///
    /// The ECAM window must be identity mapped and cover this function.
    pub unsafe fn read_config(&self, offset: u16) -> u32 {
        // SAFETY: The caller guarantees the ECAM window is mapped.
        unsafe { core::ptr::read_volatile(self.config_address(offset) as *const u32) }
    }

    /// Writes a 32-bit configuration register.
    ///
    /// ## Safety
    ///
    /// The ECAM window must be identity mapped and cover this function.
    pub unsafe fn write_config(&self, offset: u16, value: u32) {
        // SAFETY: The caller guarantees the ECAM window is mapped.
        unsafe { core::ptr::write_volatile(self.config_address(offset) as *mut u32, value) }
    }

    /// Reads the memory BAR of the function, combining both halves of a 64-bit BAR.
    ///
    /// ## Safety
    ///
    /// The ECAM window must be identity mapped and cover this function.
    pub unsafe fn memory_bar(&self) -> Result<u64> {
        // SAFETY: Forwarded to the caller.
        let low = unsafe { self.read_config(pci::BAR0) };
        if low == 0xFFFF_FFFF {
            log::error!(target: "heci_transport", "HECI function {:?} is not present", self);
            return Err(HeciError::DeviceError);
        }

        let mut base = (low & 0xFFFF_FFF0) as u64;
        if (low >> 1) & 0x3 == 0x2 {
            // SAFETY: Forwarded to the caller.
            base |= (unsafe { self.read_config(pci::BAR1) } as u64) << 32;
        }

        if base == 0 {
            log::error!(target: "heci_transport", "HECI memory BAR is not assigned");
            return Err(HeciError::DeviceError);
        }

        Ok(base)
    }
}

/// HECI registers reached through the memory BAR of the PCI function.
#[derive(Debug)]
pub struct MmioHeciRegisters {
    base: usize,
    device: HeciPciDevice,
    stall_loops_per_microsecond: u32,
}

impl MmioHeciRegisters {
    /// Binds to the HECI function, enabling memory decoding if firmware left it disabled.
    ///
    /// ## Safety
    ///
    /// The ECAM window and the BAR must be identity mapped for the lifetime of the returned value, and no other
    /// code may drive the HECI function concurrently.
    pub unsafe fn from_pci(device: HeciPciDevice, stall_loops_per_microsecond: u32) -> Result<Self> {
        // SAFETY: Forwarded to the caller.
        let base = unsafe { device.memory_bar()? };

        // SAFETY: Forwarded to the caller.
        let command = unsafe { device.read_config(pci::COMMAND) };
        if command & pci::COMMAND_MSE == 0 {
            log::debug!(target: "heci_transport", "Enabling memory decode on HECI function");
            // SAFETY: Forwarded to the caller.
            unsafe { device.write_config(pci::COMMAND, command | pci::COMMAND_MSE | pci::COMMAND_BME) };
        }

        log::info!(target: "heci_transport", "HECI MMIO base = {:#x}", base);
        Ok(Self { base: base as usize, device, stall_loops_per_microsecond })
    }
}

impl HeciRegisterAccess for MmioHeciRegisters {
    fn read_register(&self, offset: usize) -> u32 {
        // SAFETY: `from_pci` requires the BAR to stay mapped.
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u32) }
    }

    fn write_register(&self, offset: usize, value: u32) {
        // SAFETY: `from_pci` requires the BAR to stay mapped.
        unsafe { core::ptr::write_volatile((self.base + offset) as *mut u32, value) }
    }

    fn read_firmware_status(&self) -> u32 {
        // SAFETY: `from_pci` requires the ECAM window to stay mapped.
        unsafe { self.device.read_config(pci::HFS) }
    }

    fn stall(&self, microseconds: u32) {
        let loops = microseconds as u64 * self.stall_loops_per_microsecond as u64;
        cfg_if::cfg_if! {
            if #[cfg(target_arch = "x86_64")] {
                // SAFETY: rdtsc is available on every x86_64 processor.
                let start = unsafe { core::arch::x86_64::_rdtsc() };
                while unsafe { core::arch::x86_64::_rdtsc() }.wrapping_sub(start) < loops {
                    core::hint::spin_loop();
                }
            } else {
                for _ in 0..loops {
                    core::hint::spin_loop();
                }
            }
        }
    }
}
