//! x86_64 architecture-specific boot code
//!
//! Boot paths:
//! - EFI handover protocol (boot services still running)
//! - 64-bit boot protocol (startup_64)
//! - 32-bit protected mode (legacy fallback)

pub mod handoff;
pub mod transitions;

use core::ptr;

use crate::boot::handoff::{EntryMethod, Handoff};
use crate::boot::platform::{Platform, PlatformCapabilities};

pub use handoff::{efi_handover_64, jump_to_startup_64};
pub use transitions::drop_to_protected_mode;

/// Platform on a machine where physical memory is identity mapped, as it
/// is under UEFI boot services.
pub struct IdentityMappedPlatform {
    caps: PlatformCapabilities,
}

impl IdentityMappedPlatform {
    /// # Safety
    ///
    /// Every address later passed to `write`/`fill` must be identity mapped,
    /// writable and owned by the caller (allocated, or already outside any
    /// firmware use). `caps` must describe the CPU mode actually running.
    pub unsafe fn new(caps: PlatformCapabilities) -> Self {
        Self { caps }
    }
}

impl Platform for IdentityMappedPlatform {
    fn capabilities(&self) -> PlatformCapabilities {
        self.caps
    }

    fn write(&mut self, addr: u64, bytes: &[u8]) {
        // SAFETY: guaranteed by `new`'s contract
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len()) }
    }

    fn fill(&mut self, addr: u64, len: u64, value: u8) {
        // SAFETY: guaranteed by `new`'s contract
        unsafe { ptr::write_bytes(addr as *mut u8, value, len as usize) }
    }

    fn transfer(&mut self, handoff: Handoff) -> ! {
        // SAFETY: the zero page and kernel were committed by `dispatch`,
        // and the entry method was chosen against these capabilities
        unsafe {
            match handoff.method {
                EntryMethod::EfiHandover {
                    entry,
                    image_handle,
                    system_table,
                } => efi_handover_64(entry, image_handle, system_table, handoff.params),
                EntryMethod::Boot64 { entry } => jump_to_startup_64(entry, handoff.params),
                EntryMethod::Legacy32 { entry } => {
                    drop_to_protected_mode(entry, handoff.params as u32)
                }
            }
        }
    }
}
