//! What the loader needs from the machine it runs on
//!
//! Everything that touches physical memory or changes CPU mode goes through
//! [`Platform`], so the pipeline above it stays testable on a host.

use super::handoff::Handoff;

/// Firmware handles passed to the EFI handover entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EfiHandles {
    pub image_handle: u64,
    pub system_table: u64,
}

/// Entry conventions the platform can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformCapabilities {
    /// Present while UEFI boot services are still up
    pub efi: Option<EfiHandles>,
    /// Running in 64-bit long mode
    pub long_mode: bool,
    /// Able to drop to 32-bit flat protected mode
    pub protected_mode: bool,
}

pub trait Platform {
    fn capabilities(&self) -> PlatformCapabilities;

    /// Copy `bytes` to physical address `addr`.
    fn write(&mut self, addr: u64, bytes: &[u8]);

    /// Set `len` bytes at `addr` to `value`.
    fn fill(&mut self, addr: u64, len: u64, value: u8);

    /// Jump into the kernel. Never comes back.
    fn transfer(&mut self, handoff: Handoff) -> !;
}
