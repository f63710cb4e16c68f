// Linux boot parameters (zero page)
// Reference: https://www.kernel.org/doc/html/latest/arch/x86/zero-page.html
//
// Built as raw bytes at fixed offsets, same as the setup header decoder.

use core::fmt;

use alloc::vec;
use alloc::vec::Vec;

use log::{debug, warn};

use super::bytes::{write_u16, write_u32, write_u64, write_u8};
use super::config::LoaderConfig;
use super::kernel_loader::{BootHeader, LoadFlags, SETUP_HEADER_END, SETUP_HEADER_OFFSET};
use super::memory::{LoadPlan, MemoryRange, PARAMS_SIZE};
use super::platform::Platform;
use super::protocol::{Capabilities, ProtocolFeatures};

pub const ZERO_PAGE_SIZE: usize = PARAMS_SIZE as usize;
pub const E820_MAX_ENTRIES: usize = 128;

// Zero page offsets outside the setup header
const OFF_CL_MAGIC: usize = 0x020; // screen_info.cl_magic
const OFF_CL_OFFSET: usize = 0x022; // screen_info.cl_offset
const OFF_ACPI_RSDP_ADDR: usize = 0x070;
const OFF_EXT_RAMDISK_IMAGE: usize = 0x0c0;
const OFF_EXT_RAMDISK_SIZE: usize = 0x0c4;
const OFF_EXT_CMD_LINE_PTR: usize = 0x0c8;
const OFF_ALT_MEM_K: usize = 0x1e0;
const OFF_E820_ENTRIES: usize = 0x1e8;
const OFF_E820_TABLE: usize = 0x2d0;
const E820_ENTRY_SIZE: usize = 20;

/// Old command-line protocol marker (before 2.02).
pub const CL_MAGIC: u16 = 0xA33F;

/// `heap_end_ptr` counts from the setup code, 0x200 into the real-mode segment.
const HEAP_END_BIAS: u16 = 0x200;

/// Non-fatal problems found while filling the zero page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamWarning {
    CommandLineTruncated { requested: usize, kept: usize },
}

impl fmt::Display for ParamWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParamWarning::CommandLineTruncated { requested, kept } => {
                write!(f, "Command line truncated from {} to {} bytes", requested, kept)
            }
        }
    }
}

/// Zero page plus command line, ready to be committed to their planned
/// addresses. Not `Clone`: there is exactly one and the kernel gets it.
#[derive(Debug)]
pub struct ParamBlock {
    zero_page: Vec<u8>,
    cmdline: Vec<u8>,
    addr: u64,
    cmdline_addr: u64,
}

impl ParamBlock {
    pub fn zero_page(&self) -> &[u8] {
        &self.zero_page
    }

    /// Command line bytes, terminating NUL included.
    pub fn cmdline(&self) -> &[u8] {
        &self.cmdline
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn cmdline_addr(&self) -> u64 {
        self.cmdline_addr
    }

    /// Copy both buffers to their physical addresses.
    pub fn commit<P: Platform + ?Sized>(&self, platform: &mut P) {
        platform.write(self.addr, &self.zero_page);
        platform.write(self.cmdline_addr, &self.cmdline);
    }
}

/// Fills a zero page for one kernel image.
pub struct ParamBuilder<'a> {
    header: &'a BootHeader,
    caps: &'a Capabilities,
    config: &'a LoaderConfig,
    acpi_rsdp: Option<u64>,
}

impl<'a> ParamBuilder<'a> {
    pub fn new(header: &'a BootHeader, caps: &'a Capabilities, config: &'a LoaderConfig) -> Self {
        Self {
            header,
            caps,
            config,
            acpi_rsdp: None,
        }
    }

    /// Hand the kernel the ACPI RSDP instead of letting it scan for one.
    pub fn acpi_rsdp(mut self, addr: u64) -> Self {
        self.acpi_rsdp = Some(addr);
        self
    }

    pub fn build(
        &self,
        plan: &LoadPlan,
        cmdline: &str,
        memory_map: &[MemoryRange],
    ) -> (ParamBlock, Option<ParamWarning>) {
        let mut page = vec![0u8; ZERO_PAGE_SIZE];

        // The planner sized the command-line region; never write past it
        let limit = (self.caps.cmdline_max as usize).min(plan.cmdline.len.saturating_sub(1) as usize);
        let kept = truncate_at_char_boundary(cmdline, limit);
        let warning = (kept.len() < cmdline.len()).then(|| {
            let warning = ParamWarning::CommandLineTruncated {
                requested: cmdline.len(),
                kept: kept.len(),
            };
            warn!("{}", warning);
            warning
        });

        let mut cmdline_bytes = Vec::with_capacity(kept.len() + 1);
        cmdline_bytes.extend_from_slice(kept.as_bytes());
        cmdline_bytes.push(0);

        let mut hdr = *self.header;
        self.fill_loader_fields(&mut hdr, plan);

        if self.caps.cmdline_ptr {
            hdr.cmd_line_ptr = plan.cmdline.start as u32;
            write_u32(&mut page, OFF_EXT_CMD_LINE_PTR, (plan.cmdline.start >> 32) as u32);
        } else {
            // Old protocol: command line lives in the same segment. The
            // planner puts it right behind the zero page, so this is 0x1000.
            let offset = plan.cmdline.start.saturating_sub(plan.params.start);
            debug_assert!(
                offset <= u64::from(u16::MAX),
                "cl_offset {:#x} outside the zero page segment",
                offset
            );
            write_u16(&mut page, OFF_CL_MAGIC, CL_MAGIC);
            write_u16(&mut page, OFF_CL_OFFSET, offset as u16);
        }

        page[SETUP_HEADER_OFFSET..SETUP_HEADER_END]
            .copy_from_slice(&hdr.encode()[SETUP_HEADER_OFFSET..]);

        if let Some(ramdisk) = plan.ramdisk {
            write_u32(&mut page, OFF_EXT_RAMDISK_IMAGE, (ramdisk.start >> 32) as u32);
            write_u32(&mut page, OFF_EXT_RAMDISK_SIZE, (ramdisk.len >> 32) as u32);
        }

        if let Some(rsdp) = self.acpi_rsdp {
            write_u64(&mut page, OFF_ACPI_RSDP_ADDR, rsdp);
        }

        write_u32(&mut page, OFF_ALT_MEM_K, extended_memory_kib(memory_map));
        let entries = write_e820_table(&mut page, memory_map);
        debug!("E820 table: {} entries", entries);

        let block = ParamBlock {
            zero_page: page,
            cmdline: cmdline_bytes,
            addr: plan.params.start,
            cmdline_addr: plan.cmdline.start,
        };
        (block, warning)
    }

    /// Fields a 2.00+ kernel reads back from the loader.
    fn fill_loader_fields(&self, hdr: &mut BootHeader, plan: &LoadPlan) {
        if let Some(mode) = self.config.video_mode {
            hdr.vid_mode = mode;
        }

        if !self.caps.has(ProtocolFeatures::LOADER_FIELDS) {
            return;
        }

        let (type_of_loader, ext) = encode_loader_id(self.config.loader_id, self.config.loader_version);
        match ext {
            Some((ext_type, ext_ver)) if self.caps.cmdline_ptr => {
                hdr.type_of_loader = type_of_loader;
                hdr.ext_loader_type = ext_type;
                hdr.ext_loader_ver = ext_ver;
            }
            // Extended IDs mean nothing before 2.02
            Some(_) if self.config.loader_id >= 0x10 => hdr.type_of_loader = 0xFF,
            _ => hdr.type_of_loader = type_of_loader,
        }

        if hdr.loadflags.contains(LoadFlags::CAN_USE_HEAP) && self.caps.heap {
            hdr.heap_end_ptr = self.config.heap_end.saturating_sub(HEAP_END_BIAS);
        } else {
            hdr.loadflags.remove(LoadFlags::CAN_USE_HEAP);
        }

        if plan.kernel.start < super::memory::FOUR_GIB {
            hdr.code32_start = plan.kernel.start as u32;
        }

        let (image, size) = plan
            .ramdisk
            .map(|r| (r.start as u32, r.len as u32))
            .unwrap_or((0, 0));
        hdr.ramdisk_image = image;
        hdr.ramdisk_size = size;
    }
}

/// `type_of_loader` and, when one nibble is not enough, the extended
/// (type, version) bytes. 0xFF stays "undefined" with no version.
pub fn encode_loader_id(id: u8, version: u8) -> (u8, Option<(u8, u8)>) {
    match id {
        0xFF => (0xFF, None),
        0x00..=0x0F if version < 0x10 => ((id << 4) | version, None),
        0x00..=0x0F => ((id << 4) | (version & 0x0F), Some((0, version >> 4))),
        _ => (0xE0 | (version & 0x0F), Some((id - 0x10, version >> 4))),
    }
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// KiB of memory above 1 MiB, from the top of the highest RAM range.
fn extended_memory_kib(map: &[MemoryRange]) -> u32 {
    let top = map
        .iter()
        .filter(|r| r.len != 0 && r.kind.e820_type() == 1)
        .map(|r| r.region().end())
        .max()
        .unwrap_or(0);
    (top.saturating_sub(0x10_0000) / 1024).min(u64::from(u32::MAX)) as u32
}

fn write_e820_table(page: &mut [u8], map: &[MemoryRange]) -> usize {
    let mut ranges: Vec<&MemoryRange> = map.iter().filter(|r| r.len != 0).collect();
    ranges.sort_by_key(|r| r.start);

    if ranges.len() > E820_MAX_ENTRIES {
        warn!(
            "E820 table full, dropping {} memory ranges",
            ranges.len() - E820_MAX_ENTRIES
        );
    }

    let count = ranges.len().min(E820_MAX_ENTRIES);
    for (i, range) in ranges.iter().take(count).enumerate() {
        let off = OFF_E820_TABLE + i * E820_ENTRY_SIZE;
        write_u64(page, off, range.start);
        write_u64(page, off + 8, range.len);
        write_u32(page, off + 16, range.kind.e820_type());
    }
    write_u8(page, OFF_E820_ENTRIES, count as u8);
    count
}
