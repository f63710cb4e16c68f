// Linux kernel (bzImage) setup header decoder
// Reference: https://www.kernel.org/doc/html/latest/arch/x86/boot.html

use core::fmt;

use bitflags::bitflags;

use super::bytes::{read_u16, read_u32, read_u64, read_u8};
use super::bytes::{write_u16, write_u32, write_u64, write_u8};
use super::protocol::Capabilities;

pub const KERNEL_MAGIC: u32 = 0x53726448; // "HdrS"
pub const BOOT_FLAG: u16 = 0xAA55;

/// Setup header starts here, in the image and in the zero page alike.
pub const SETUP_HEADER_OFFSET: usize = 0x01f1;
/// One past `handover_offset`. Anything shorter is not a setup header.
pub const SETUP_HEADER_MIN: usize = 0x0268;
/// One past `kernel_info_offset`, the last field we know about.
pub const SETUP_HEADER_END: usize = 0x026c;

const SECTOR_SIZE: usize = 512;
const DEFAULT_SETUP_SECTS: usize = 4;

// Field offsets, relative to the start of the image
const OFF_SETUP_SECTS: usize = 0x1f1;
const OFF_ROOT_FLAGS: usize = 0x1f2;
const OFF_SYSSIZE: usize = 0x1f4;
const OFF_RAM_SIZE: usize = 0x1f8;
const OFF_VID_MODE: usize = 0x1fa;
const OFF_ROOT_DEV: usize = 0x1fc;
const OFF_BOOT_FLAG: usize = 0x1fe;
const OFF_JUMP: usize = 0x200;
const OFF_HEADER: usize = 0x202;
const OFF_VERSION: usize = 0x206;
const OFF_REALMODE_SWTCH: usize = 0x208;
const OFF_START_SYS_SEG: usize = 0x20c;
const OFF_KERNEL_VERSION: usize = 0x20e;
const OFF_TYPE_OF_LOADER: usize = 0x210;
const OFF_LOADFLAGS: usize = 0x211;
const OFF_SETUP_MOVE_SIZE: usize = 0x212;
const OFF_CODE32_START: usize = 0x214;
const OFF_RAMDISK_IMAGE: usize = 0x218;
const OFF_RAMDISK_SIZE: usize = 0x21c;
const OFF_BOOTSECT_KLUDGE: usize = 0x220;
const OFF_HEAP_END_PTR: usize = 0x224;
const OFF_EXT_LOADER_VER: usize = 0x226;
const OFF_EXT_LOADER_TYPE: usize = 0x227;
const OFF_CMD_LINE_PTR: usize = 0x228;
const OFF_INITRD_ADDR_MAX: usize = 0x22c;
const OFF_KERNEL_ALIGNMENT: usize = 0x230;
const OFF_RELOCATABLE_KERNEL: usize = 0x234;
const OFF_MIN_ALIGNMENT: usize = 0x235;
const OFF_XLOADFLAGS: usize = 0x236;
const OFF_CMDLINE_SIZE: usize = 0x238;
const OFF_HARDWARE_SUBARCH: usize = 0x23c;
const OFF_HARDWARE_SUBARCH_DATA: usize = 0x240;
const OFF_PAYLOAD_OFFSET: usize = 0x248;
const OFF_PAYLOAD_LENGTH: usize = 0x24c;
const OFF_SETUP_DATA: usize = 0x250;
const OFF_PREF_ADDRESS: usize = 0x258;
const OFF_INIT_SIZE: usize = 0x260;
const OFF_HANDOVER_OFFSET: usize = 0x264;
const OFF_KERNEL_INFO_OFFSET: usize = 0x268;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Buffer ends before the structure being read does
    TruncatedImage { len: usize, needed: usize },
    /// "HdrS" missing at 0x202: not a boot-protocol image
    BadMagic { found: u32 },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KernelError::TruncatedImage { len, needed } => {
                write!(f, "Truncated kernel image ({} bytes, need {})", len, needed)
            }
            KernelError::BadMagic { found } => {
                write!(f, "Bad setup header magic {:#010x}", found)
            }
        }
    }
}

bitflags! {
    /// `loadflags` (0x211)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LoadFlags: u8 {
        /// Protected-mode code goes at 0x100000 instead of 0x10000
        const LOADED_HIGH = 0x01;
        const KASLR_FLAG = 0x02;
        const QUIET_FLAG = 0x20;
        const KEEP_SEGMENTS = 0x40;
        /// heap_end_ptr is valid
        const CAN_USE_HEAP = 0x80;
    }
}

bitflags! {
    /// `xloadflags` (0x236), protocol 2.12+
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct XLoadFlags: u16 {
        /// 64-bit entry at load address + 0x200
        const KERNEL_64 = 0x0001;
        const CAN_BE_LOADED_ABOVE_4G = 0x0002;
        const EFI_HANDOVER_32 = 0x0004;
        const EFI_HANDOVER_64 = 0x0008;
        const EFI_KEXEC = 0x0010;
        const FIVE_LEVEL = 0x0020;
        const FIVE_LEVEL_ENABLED = 0x0040;
    }
}

/// Decoded setup header.
///
/// Plain copy of the on-disk fields; nothing here is version-checked.
/// Go through [`Capabilities`] before trusting anything past `version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootHeader {
    pub setup_sects: u8,
    pub root_flags: u16,
    pub syssize: u32,
    pub ram_size: u16,
    pub vid_mode: u16,
    pub root_dev: u16,
    pub boot_flag: u16,
    pub jump: u16,
    pub header: u32,
    pub version: u16,
    pub realmode_swtch: u32,
    pub start_sys_seg: u16,
    pub kernel_version: u16,
    pub type_of_loader: u8,
    pub loadflags: LoadFlags,
    pub setup_move_size: u16,
    pub code32_start: u32,
    pub ramdisk_image: u32,
    pub ramdisk_size: u32,
    pub bootsect_kludge: u32,
    pub heap_end_ptr: u16,
    pub ext_loader_ver: u8,
    pub ext_loader_type: u8,
    pub cmd_line_ptr: u32,
    pub initrd_addr_max: u32,
    pub kernel_alignment: u32,
    pub relocatable_kernel: u8,
    pub min_alignment: u8,
    pub xloadflags: XLoadFlags,
    pub cmdline_size: u32,
    pub hardware_subarch: u32,
    pub hardware_subarch_data: u64,
    pub payload_offset: u32,
    pub payload_length: u32,
    pub setup_data: u64,
    pub pref_address: u64,
    pub init_size: u32,
    pub handover_offset: u32,
    pub kernel_info_offset: u32,
}

impl BootHeader {
    /// Read the header out of an image (or zero page) buffer.
    ///
    /// Needs at least `SETUP_HEADER_MIN` bytes; `kernel_info_offset` reads
    /// as 0 when the buffer stops before it.
    pub fn decode(data: &[u8]) -> Result<Self, KernelError> {
        if data.len() < SETUP_HEADER_MIN {
            return Err(KernelError::TruncatedImage {
                len: data.len(),
                needed: SETUP_HEADER_MIN,
            });
        }

        let header = read_u32(data, OFF_HEADER);
        if header != KERNEL_MAGIC {
            return Err(KernelError::BadMagic { found: header });
        }

        Ok(BootHeader {
            setup_sects: read_u8(data, OFF_SETUP_SECTS),
            root_flags: read_u16(data, OFF_ROOT_FLAGS),
            syssize: read_u32(data, OFF_SYSSIZE),
            ram_size: read_u16(data, OFF_RAM_SIZE),
            vid_mode: read_u16(data, OFF_VID_MODE),
            root_dev: read_u16(data, OFF_ROOT_DEV),
            boot_flag: read_u16(data, OFF_BOOT_FLAG),
            jump: read_u16(data, OFF_JUMP),
            header,
            version: read_u16(data, OFF_VERSION),
            realmode_swtch: read_u32(data, OFF_REALMODE_SWTCH),
            start_sys_seg: read_u16(data, OFF_START_SYS_SEG),
            kernel_version: read_u16(data, OFF_KERNEL_VERSION),
            type_of_loader: read_u8(data, OFF_TYPE_OF_LOADER),
            loadflags: LoadFlags::from_bits_retain(read_u8(data, OFF_LOADFLAGS)),
            setup_move_size: read_u16(data, OFF_SETUP_MOVE_SIZE),
            code32_start: read_u32(data, OFF_CODE32_START),
            ramdisk_image: read_u32(data, OFF_RAMDISK_IMAGE),
            ramdisk_size: read_u32(data, OFF_RAMDISK_SIZE),
            bootsect_kludge: read_u32(data, OFF_BOOTSECT_KLUDGE),
            heap_end_ptr: read_u16(data, OFF_HEAP_END_PTR),
            ext_loader_ver: read_u8(data, OFF_EXT_LOADER_VER),
            ext_loader_type: read_u8(data, OFF_EXT_LOADER_TYPE),
            cmd_line_ptr: read_u32(data, OFF_CMD_LINE_PTR),
            initrd_addr_max: read_u32(data, OFF_INITRD_ADDR_MAX),
            kernel_alignment: read_u32(data, OFF_KERNEL_ALIGNMENT),
            relocatable_kernel: read_u8(data, OFF_RELOCATABLE_KERNEL),
            min_alignment: read_u8(data, OFF_MIN_ALIGNMENT),
            xloadflags: XLoadFlags::from_bits_retain(read_u16(data, OFF_XLOADFLAGS)),
            cmdline_size: read_u32(data, OFF_CMDLINE_SIZE),
            hardware_subarch: read_u32(data, OFF_HARDWARE_SUBARCH),
            hardware_subarch_data: read_u64(data, OFF_HARDWARE_SUBARCH_DATA),
            payload_offset: read_u32(data, OFF_PAYLOAD_OFFSET),
            payload_length: read_u32(data, OFF_PAYLOAD_LENGTH),
            setup_data: read_u64(data, OFF_SETUP_DATA),
            pref_address: read_u64(data, OFF_PREF_ADDRESS),
            init_size: read_u32(data, OFF_INIT_SIZE),
            handover_offset: read_u32(data, OFF_HANDOVER_OFFSET),
            // 2.15 only; older headers may end right before it
            kernel_info_offset: if data.len() >= SETUP_HEADER_END {
                read_u32(data, OFF_KERNEL_INFO_OFFSET)
            } else {
                0
            },
        })
    }

    /// Write every field back at its offset.
    ///
    /// `out` is image- or zero-page-relative and must be at least
    /// `SETUP_HEADER_END` bytes; bytes outside the header are left alone.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<(), KernelError> {
        if out.len() < SETUP_HEADER_END {
            return Err(KernelError::TruncatedImage {
                len: out.len(),
                needed: SETUP_HEADER_END,
            });
        }

        let encoded = self.encode();
        out[SETUP_HEADER_OFFSET..SETUP_HEADER_END].copy_from_slice(&encoded[SETUP_HEADER_OFFSET..]);
        Ok(())
    }

    /// Header bytes at their image offsets; everything below 0x1f1 is zero.
    pub fn encode(&self) -> [u8; SETUP_HEADER_END] {
        let mut bytes = [0u8; SETUP_HEADER_END];
        let out = &mut bytes[..];

        write_u8(out, OFF_SETUP_SECTS, self.setup_sects);
        write_u16(out, OFF_ROOT_FLAGS, self.root_flags);
        write_u32(out, OFF_SYSSIZE, self.syssize);
        write_u16(out, OFF_RAM_SIZE, self.ram_size);
        write_u16(out, OFF_VID_MODE, self.vid_mode);
        write_u16(out, OFF_ROOT_DEV, self.root_dev);
        write_u16(out, OFF_BOOT_FLAG, self.boot_flag);
        write_u16(out, OFF_JUMP, self.jump);
        write_u32(out, OFF_HEADER, self.header);
        write_u16(out, OFF_VERSION, self.version);
        write_u32(out, OFF_REALMODE_SWTCH, self.realmode_swtch);
        write_u16(out, OFF_START_SYS_SEG, self.start_sys_seg);
        write_u16(out, OFF_KERNEL_VERSION, self.kernel_version);
        write_u8(out, OFF_TYPE_OF_LOADER, self.type_of_loader);
        write_u8(out, OFF_LOADFLAGS, self.loadflags.bits());
        write_u16(out, OFF_SETUP_MOVE_SIZE, self.setup_move_size);
        write_u32(out, OFF_CODE32_START, self.code32_start);
        write_u32(out, OFF_RAMDISK_IMAGE, self.ramdisk_image);
        write_u32(out, OFF_RAMDISK_SIZE, self.ramdisk_size);
        write_u32(out, OFF_BOOTSECT_KLUDGE, self.bootsect_kludge);
        write_u16(out, OFF_HEAP_END_PTR, self.heap_end_ptr);
        write_u8(out, OFF_EXT_LOADER_VER, self.ext_loader_ver);
        write_u8(out, OFF_EXT_LOADER_TYPE, self.ext_loader_type);
        write_u32(out, OFF_CMD_LINE_PTR, self.cmd_line_ptr);
        write_u32(out, OFF_INITRD_ADDR_MAX, self.initrd_addr_max);
        write_u32(out, OFF_KERNEL_ALIGNMENT, self.kernel_alignment);
        write_u8(out, OFF_RELOCATABLE_KERNEL, self.relocatable_kernel);
        write_u8(out, OFF_MIN_ALIGNMENT, self.min_alignment);
        write_u16(out, OFF_XLOADFLAGS, self.xloadflags.bits());
        write_u32(out, OFF_CMDLINE_SIZE, self.cmdline_size);
        write_u32(out, OFF_HARDWARE_SUBARCH, self.hardware_subarch);
        write_u64(out, OFF_HARDWARE_SUBARCH_DATA, self.hardware_subarch_data);
        write_u32(out, OFF_PAYLOAD_OFFSET, self.payload_offset);
        write_u32(out, OFF_PAYLOAD_LENGTH, self.payload_length);
        write_u64(out, OFF_SETUP_DATA, self.setup_data);
        write_u64(out, OFF_PREF_ADDRESS, self.pref_address);
        write_u32(out, OFF_INIT_SIZE, self.init_size);
        write_u32(out, OFF_HANDOVER_OFFSET, self.handover_offset);
        write_u32(out, OFF_KERNEL_INFO_OFFSET, self.kernel_info_offset);
        bytes
    }

    /// Real-mode setup sectors; 0 means the historical 4.
    pub fn setup_sectors(&self) -> usize {
        match self.setup_sects {
            0 => DEFAULT_SETUP_SECTS,
            n => n as usize,
        }
    }

    /// Boot sector plus setup sectors, in bytes.
    pub fn setup_size(&self) -> usize {
        (self.setup_sectors() + 1) * SECTOR_SIZE
    }

    pub fn version_major(&self) -> u8 {
        (self.version >> 8) as u8
    }

    pub fn version_minor(&self) -> u8 {
        self.version as u8
    }
}

/// Decode the setup header from a raw image buffer.
pub fn decode(data: &[u8]) -> Result<BootHeader, KernelError> {
    BootHeader::decode(data)
}

/// Compression of the in-image payload, guessed from its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Gzip,
    Bzip2,
    Lzma,
    Xz,
    Lzo,
    Lz4,
    Zstd,
    Unknown,
}

impl PayloadFormat {
    pub fn detect(payload: &[u8]) -> Self {
        match payload {
            [0x1f, 0x8b, ..] | [0x1f, 0x9e, ..] => PayloadFormat::Gzip,
            [b'B', b'Z', b'h', ..] => PayloadFormat::Bzip2,
            [0xfd, b'7', b'z', b'X', b'Z', 0x00, ..] => PayloadFormat::Xz,
            [0x5d, 0x00, 0x00, ..] => PayloadFormat::Lzma,
            [0x89, b'L', b'Z', b'O', ..] => PayloadFormat::Lzo,
            [0x02, 0x21, 0x4c, 0x18, ..] => PayloadFormat::Lz4,
            [0x28, 0xb5, 0x2f, 0xfd, ..] => PayloadFormat::Zstd,
            _ => PayloadFormat::Unknown,
        }
    }
}

/// A bzImage split into its real-mode setup and protected-mode body.
#[derive(Debug, Clone, Copy)]
pub struct KernelImage<'a> {
    data: &'a [u8],
    header: BootHeader,
}

impl<'a> KernelImage<'a> {
    // Parse a Linux bzImage from memory
    pub fn parse(data: &'a [u8]) -> Result<Self, KernelError> {
        let header = BootHeader::decode(data)?;

        // Setup sectors + 1 (boot sector) × 512 bytes
        let setup_size = header.setup_size();
        if data.len() < setup_size {
            return Err(KernelError::TruncatedImage {
                len: data.len(),
                needed: setup_size,
            });
        }

        Ok(KernelImage { data, header })
    }

    pub fn header(&self) -> &BootHeader {
        &self.header
    }

    pub fn protocol_version(&self) -> u16 {
        self.header.version
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn setup_size(&self) -> usize {
        self.header.setup_size()
    }

    /// Protected-mode kernel body, everything after the setup region.
    pub fn body(&self) -> &'a [u8] {
        &self.data[self.setup_size()..]
    }

    pub fn body_size(&self) -> usize {
        self.data.len() - self.setup_size()
    }

    /// The compressed payload inside the body, when the protocol defines
    /// one and the declared range fits.
    pub fn payload(&self, caps: &Capabilities) -> Option<&'a [u8]> {
        let payload = caps.payload?;
        let start = payload.offset as usize;
        let end = start.checked_add(payload.length as usize)?;
        self.body().get(start..end)
    }
}
