//! Boot protocol version negotiation
//!
//! The setup header grew one field at a time. Bytes belonging to a field
//! newer than the image's `version` are whatever the old build left there,
//! so they are never read past this module: everything downstream asks
//! [`Capabilities`] instead of looking at raw header fields.

use bitflags::bitflags;

use super::kernel_loader::{BootHeader, LoadFlags, XLoadFlags};

/// Command-line limit before `cmdline_size` existed (2.06).
pub const LEGACY_CMDLINE_MAX: u32 = 255;

/// Bytes between the image load address and the 64-bit entry point.
pub const STARTUP_64_OFFSET: u64 = 0x200;

bitflags! {
    /// Header fields a given protocol version defines.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ProtocolFeatures: u32 {
        /// 2.00: type_of_loader, loadflags, setup_move_size, code32_start, ramdisk
        const LOADER_FIELDS = 1 << 0;
        /// 2.01: heap_end_ptr
        const HEAP = 1 << 1;
        /// 2.02: cmd_line_ptr, ext_loader_ver/type
        const CMDLINE_PTR = 1 << 2;
        /// 2.03: initrd_addr_max
        const RAMDISK_MAX = 1 << 3;
        /// 2.03: kernel_alignment, relocatable_kernel
        const RELOCATABLE = 1 << 4;
        /// 2.06: cmdline_size
        const CMDLINE_SIZE = 1 << 5;
        /// 2.07: hardware_subarch
        const HARDWARE_SUBARCH = 1 << 6;
        /// 2.08: payload_offset/length
        const PAYLOAD = 1 << 7;
        /// 2.09: setup_data
        const SETUP_DATA = 1 << 8;
        /// 2.10: pref_address, init_size, min_alignment
        const PREF_ADDRESS = 1 << 9;
        /// 2.11: handover_offset
        const HANDOVER = 1 << 10;
        /// 2.12: xloadflags
        const XLOADFLAGS = 1 << 11;
        /// 2.15: kernel_info_offset
        const KERNEL_INFO = 1 << 12;
    }
}

const VERSION_GATES: &[(u16, ProtocolFeatures)] = &[
    (0x0200, ProtocolFeatures::LOADER_FIELDS),
    (0x0201, ProtocolFeatures::HEAP),
    (0x0202, ProtocolFeatures::CMDLINE_PTR),
    (0x0203, ProtocolFeatures::RAMDISK_MAX),
    (0x0203, ProtocolFeatures::RELOCATABLE),
    (0x0206, ProtocolFeatures::CMDLINE_SIZE),
    (0x0207, ProtocolFeatures::HARDWARE_SUBARCH),
    (0x0208, ProtocolFeatures::PAYLOAD),
    (0x0209, ProtocolFeatures::SETUP_DATA),
    (0x020a, ProtocolFeatures::PREF_ADDRESS),
    (0x020b, ProtocolFeatures::HANDOVER),
    (0x020c, ProtocolFeatures::XLOADFLAGS),
    (0x020f, ProtocolFeatures::KERNEL_INFO),
];

impl ProtocolFeatures {
    /// Every field defined at or below `version`.
    pub fn for_version(version: u16) -> Self {
        VERSION_GATES
            .iter()
            .filter(|(since, _)| version >= *since)
            .fold(ProtocolFeatures::empty(), |acc, (_, feature)| acc | *feature)
    }
}

/// In-image compressed payload location, relative to the protected-mode body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    pub offset: u32,
    pub length: u32,
}

/// What the loader may rely on for one particular image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub version: u16,
    pub features: ProtocolFeatures,
    /// Empty below 2.00
    pub loadflags: LoadFlags,
    /// Empty below 2.12
    pub xloadflags: XLoadFlags,
    /// Kernel runs from any suitably aligned address
    pub relocatable: bool,
    /// Declared `kernel_alignment`, 2.03+ and only when non-zero
    pub kernel_alignment: Option<u32>,
    /// 64-bit entry at load address + 0x200
    pub kernel_64: bool,
    /// EFI handover entry, relative to the 64-bit entry
    pub handover_offset: Option<u32>,
    /// Kernel, zero page, command line and ramdisk may live above 4 GiB
    pub above_4g: bool,
    pub payload: Option<Payload>,
    /// Highest address the ramdisk may occupy (inclusive), 2.03+ and only
    /// when non-zero
    pub ramdisk_max: Option<u32>,
    /// Longest command line, terminating NUL excluded
    pub cmdline_max: u32,
    pub heap: bool,
    pub cmdline_ptr: bool,
    pub pref_address: Option<u64>,
    pub init_size: Option<u32>,
}

impl Capabilities {
    pub fn has(&self, feature: ProtocolFeatures) -> bool {
        self.features.contains(feature)
    }
}

/// Derive the trustworthy view of `header`. Never fails; old images just
/// get fewer capabilities.
pub fn negotiate(header: &BootHeader) -> Capabilities {
    let features = ProtocolFeatures::for_version(header.version);
    let gated = |feature: ProtocolFeatures| features.contains(feature);

    let loadflags = if gated(ProtocolFeatures::LOADER_FIELDS) {
        header.loadflags
    } else {
        LoadFlags::empty()
    };
    let xloadflags = if gated(ProtocolFeatures::XLOADFLAGS) {
        header.xloadflags
    } else {
        XLoadFlags::empty()
    };

    let relocatable = gated(ProtocolFeatures::RELOCATABLE) && header.relocatable_kernel != 0;
    let kernel_alignment = (gated(ProtocolFeatures::RELOCATABLE) && header.kernel_alignment != 0)
        .then_some(header.kernel_alignment);

    // 2.11 kernels predate xloadflags and only ever shipped the 64-bit stub
    let handover_offset = (gated(ProtocolFeatures::HANDOVER)
        && header.handover_offset != 0
        && (!gated(ProtocolFeatures::XLOADFLAGS)
            || xloadflags.contains(XLoadFlags::EFI_HANDOVER_64)))
    .then_some(header.handover_offset);

    let payload = gated(ProtocolFeatures::PAYLOAD).then_some(Payload {
        offset: header.payload_offset,
        length: header.payload_length,
    });

    let cmdline_max = if gated(ProtocolFeatures::CMDLINE_SIZE) {
        header.cmdline_size
    } else {
        LEGACY_CMDLINE_MAX
    };

    let (pref_address, init_size) = if gated(ProtocolFeatures::PREF_ADDRESS) {
        (Some(header.pref_address), Some(header.init_size))
    } else {
        (None, None)
    };

    Capabilities {
        version: header.version,
        features,
        loadflags,
        xloadflags,
        relocatable,
        kernel_alignment,
        kernel_64: xloadflags.contains(XLoadFlags::KERNEL_64),
        handover_offset,
        above_4g: xloadflags.contains(XLoadFlags::CAN_BE_LOADED_ABOVE_4G),
        payload,
        ramdisk_max: (gated(ProtocolFeatures::RAMDISK_MAX) && header.initrd_addr_max != 0)
            .then_some(header.initrd_addr_max),
        cmdline_max,
        heap: gated(ProtocolFeatures::HEAP),
        cmdline_ptr: gated(ProtocolFeatures::CMDLINE_PTR),
        pref_address,
        init_size,
    }
}
