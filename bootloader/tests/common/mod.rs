//! Common test utilities and a recording platform

pub mod builder;
pub use builder::ImageBuilder;

use std::panic::{self, AssertUnwindSafe};

use ukistub_bootloader::boot::{
    EfiHandles, Handoff, MemoryRange, Platform, PlatformCapabilities,
};

/// One write or fill the loader issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    pub addr: u64,
    pub bytes: Vec<u8>,
}

/// Records every physical write; `transfer` unwinds with the `Handoff`.
#[derive(Debug, Default)]
pub struct MockPlatform {
    pub caps: PlatformCapabilities,
    pub writes: Vec<Write>,
}

impl MockPlatform {
    pub fn uefi() -> Self {
        Self::with_caps(PlatformCapabilities {
            efi: Some(EfiHandles {
                image_handle: 0x7e00_0000,
                system_table: 0x7f00_0000,
            }),
            long_mode: true,
            protected_mode: true,
        })
    }

    #[allow(dead_code)]
    pub fn with_caps(caps: PlatformCapabilities) -> Self {
        Self {
            caps,
            writes: Vec::new(),
        }
    }

    /// Bytes most recently written at exactly `addr`.
    #[allow(dead_code)]
    pub fn written_at(&self, addr: u64) -> Option<&[u8]> {
        self.writes
            .iter()
            .rev()
            .find(|w| w.addr == addr)
            .map(|w| w.bytes.as_slice())
    }
}

impl Platform for MockPlatform {
    fn capabilities(&self) -> PlatformCapabilities {
        self.caps
    }

    fn write(&mut self, addr: u64, bytes: &[u8]) {
        self.writes.push(Write {
            addr,
            bytes: bytes.to_vec(),
        });
    }

    fn fill(&mut self, addr: u64, len: u64, value: u8) {
        self.writes.push(Write {
            addr,
            bytes: vec![value; len as usize],
        });
    }

    fn transfer(&mut self, handoff: Handoff) -> ! {
        panic::panic_any(handoff)
    }
}

/// Run `f`, which is expected to reach `Platform::transfer`.
#[allow(dead_code)]
pub fn expect_transfer<F: FnOnce()>(f: F) -> Handoff {
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    match outcome {
        Ok(()) => panic!("loader returned instead of transferring control"),
        Err(payload) => *payload
            .downcast::<Handoff>()
            .expect("panicked with something other than a handoff"),
    }
}

/// 256 MiB of RAM from 1 MiB, like a small VM.
#[allow(dead_code)]
pub fn small_vm_map() -> Vec<MemoryRange> {
    vec![MemoryRange::usable(0x10_0000, 0x1000_0000 - 0x10_0000)]
}

/// Typical UEFI layout: low RAM, legacy hole, RAM, ACPI tables, RAM above 4G.
#[allow(dead_code)]
pub fn uefi_map() -> Vec<MemoryRange> {
    use ukistub_bootloader::boot::MemoryKind;
    vec![
        MemoryRange::from_uefi_pages(7, 0x1000, 0x9f),
        MemoryRange::from_uefi_pages(0, 0xa_0000, 0x60),
        MemoryRange::from_uefi_pages(7, 0x10_0000, 0x7_ef00),
        MemoryRange::from_uefi_pages(2, 0x7ff0_0000, 0x80),
        MemoryRange::new(0x7ff8_0000, 0x8_0000, MemoryKind::AcpiReclaimable),
        MemoryRange::from_uefi_pages(7, 0x1_0000_0000, 0x4_0000),
    ]
}
