// Loader policy knobs

use super::memory::PAGE_SIZE;

/// Where the ramdisk goes when several ranges fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RamdiskPlacement {
    /// As high as the bound allows, clear of the kernel's decompression area
    #[default]
    Highest,
    Lowest,
}

/// Policy the header leaves to the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Boot loader ID (0xFF = undefined, 0x10+ uses the extended encoding)
    pub loader_id: u8,
    /// Loader version, low nibble in `type_of_loader`, rest in `ext_loader_ver`
    pub loader_version: u8,
    /// Alignment for relocatable kernels that declare none
    pub default_kernel_alignment: u64,
    pub ramdisk_placement: RamdiskPlacement,
    /// Lowest ramdisk address
    pub ramdisk_min_address: u64,
    /// Lowest zero page address; page zero stays untouched
    pub params_min_address: u64,
    /// `heap_end_ptr`, offset from the start of the real-mode code
    pub heap_end: u16,
    /// Overrides `vid_mode`; `None` keeps the header's
    pub video_mode: Option<u16>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            loader_id: 0xFF,
            loader_version: 0,
            default_kernel_alignment: PAGE_SIZE,
            ramdisk_placement: RamdiskPlacement::Highest,
            ramdisk_min_address: 0x0010_0000,
            params_min_address: 0x1000,
            heap_end: 0xDE00,
            video_mode: None,
        }
    }
}

impl LoaderConfig {
    /// Registered loader ID with a version.
    pub const fn with_loader(mut self, id: u8, version: u8) -> Self {
        self.loader_id = id;
        self.loader_version = version;
        self
    }

    pub const fn with_ramdisk_placement(mut self, placement: RamdiskPlacement) -> Self {
        self.ramdisk_placement = placement;
        self
    }
}
