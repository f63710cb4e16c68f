// Memory map and load plan types

use core::fmt;

/// What a physical range may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    /// Free RAM the loader may place things in
    Usable,
    /// Firmware or loader memory, RAM once the firmware is gone
    Reclaimable,
    AcpiReclaimable,
    AcpiNvs,
    Unusable,
    Reserved,
}

impl MemoryKind {
    // EfiLoaderCode(1) .. EfiBootServicesData(4) hold this stub and its
    // buffers, so only EfiConventionalMemory(7) is free for placement.
    pub fn from_uefi_type(typ: u32) -> Self {
        match typ {
            7 => MemoryKind::Usable,
            1..=4 => MemoryKind::Reclaimable,
            8 => MemoryKind::Unusable,
            9 => MemoryKind::AcpiReclaimable,
            10 => MemoryKind::AcpiNvs,
            _ => MemoryKind::Reserved,
        }
    }

    pub fn e820_type(self) -> u32 {
        match self {
            MemoryKind::Usable | MemoryKind::Reclaimable => 1, // RAM
            MemoryKind::Reserved => 2,
            MemoryKind::AcpiReclaimable => 3,
            MemoryKind::AcpiNvs => 4,
            MemoryKind::Unusable => 5,
        }
    }
}

/// Half-open physical address range `[start, start + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Region {
    pub start: u64,
    pub len: u64,
}

impl Region {
    pub const fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    pub fn from_bounds(start: u64, end: u64) -> Self {
        Self {
            start,
            len: end.saturating_sub(start),
        }
    }

    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, other: &Region) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end() && other.start < self.end()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end())
    }
}

/// One entry of the caller-supplied memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: u64,
    pub len: u64,
    pub kind: MemoryKind,
}

impl MemoryRange {
    pub const fn new(start: u64, len: u64, kind: MemoryKind) -> Self {
        Self { start, len, kind }
    }

    pub const fn usable(start: u64, len: u64) -> Self {
        Self::new(start, len, MemoryKind::Usable)
    }

    /// From a UEFI memory descriptor (type, PhysicalStart, NumberOfPages).
    pub fn from_uefi_pages(typ: u32, physical_start: u64, number_of_pages: u64) -> Self {
        Self::new(
            physical_start,
            number_of_pages.saturating_mul(super::PAGE_SIZE),
            MemoryKind::from_uefi_type(typ),
        )
    }

    pub fn region(&self) -> Region {
        Region::new(self.start, self.len)
    }
}

/// The things the planner places.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Kernel,
    Params,
    Ramdisk,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegionKind::Kernel => write!(f, "kernel"),
            RegionKind::Params => write!(f, "boot parameters"),
            RegionKind::Ramdisk => write!(f, "ramdisk"),
        }
    }
}

/// Byte counts the planner sizes regions from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSizes {
    /// Whole kernel image, setup sectors included
    pub image: usize,
    /// Zero when booting without a ramdisk
    pub ramdisk: usize,
    /// Command-line text, before any truncation
    pub cmdline: usize,
}

/// Where everything goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadPlan {
    /// Protected-mode body plus its runtime footprint (`init_size`)
    pub kernel: Region,
    /// Alignment the address was chosen under; `None` for a fixed load
    pub kernel_alignment: Option<u64>,
    /// Address the header asked for
    pub preferred_address: u64,
    pub ramdisk: Option<Region>,
    /// The 4 KiB zero page
    pub params: Region,
    /// NUL-terminated command line, directly after the zero page
    pub cmdline: Region,
}

impl LoadPlan {
    pub fn is_relocated(&self) -> bool {
        self.kernel.start != self.preferred_address
    }

    /// Placed regions, in placement order.
    pub fn regions(&self) -> impl Iterator<Item = (RegionKind, Region)> + '_ {
        [
            Some((RegionKind::Kernel, self.kernel)),
            Some((RegionKind::Params, self.params)),
            Some((RegionKind::Params, self.cmdline)),
            self.ramdisk.map(|r| (RegionKind::Ramdisk, r)),
        ]
        .into_iter()
        .flatten()
    }

    /// First pair of placed regions that overlap, if any.
    pub fn find_overlap(&self) -> Option<(RegionKind, RegionKind)> {
        for (i, (kind_a, a)) in self.regions().enumerate() {
            for (kind_b, b) in self.regions().skip(i + 1) {
                if a.overlaps(&b) {
                    return Some((kind_a, kind_b));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_overlap() {
        let a = Region::new(0x1000, 0x1000);
        let b = Region::new(0x2000, 0x1000);
        let c = Region::new(0x1800, 0x1000);

        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
        assert!(!a.overlaps(&Region::new(0x1800, 0)));
    }

    #[test]
    fn test_region_contains() {
        let outer = Region::from_bounds(0x10_0000, 0x1000_0000);
        assert!(outer.contains(&Region::new(0x10_0000, 0x1000)));
        assert!(!outer.contains(&Region::new(0xf_f000, 0x2000)));
        assert!(!outer.contains(&Region::new(0x0fff_f000, 0x2000)));
    }

    #[test]
    fn test_end_saturates() {
        assert_eq!(Region::new(u64::MAX - 1, 16).end(), u64::MAX);
    }

    #[test]
    fn test_uefi_type_mapping() {
        assert_eq!(MemoryKind::from_uefi_type(7), MemoryKind::Usable);
        assert_eq!(MemoryKind::from_uefi_type(2), MemoryKind::Reclaimable);
        assert_eq!(MemoryKind::from_uefi_type(9).e820_type(), 3);
        assert_eq!(MemoryKind::from_uefi_type(10).e820_type(), 4);
        assert_eq!(MemoryKind::from_uefi_type(11).e820_type(), 2);
        assert_eq!(MemoryKind::from_uefi_type(4).e820_type(), 1);

        let range = MemoryRange::from_uefi_pages(7, 0x10_0000, 16);
        assert_eq!(range.region(), Region::new(0x10_0000, 0x10000));
    }

    #[test]
    fn test_plan_overlap_detection() {
        let mut plan = LoadPlan {
            kernel: Region::new(0x10_0000, 0x10_0000),
            kernel_alignment: None,
            preferred_address: 0x10_0000,
            ramdisk: Some(Region::new(0x80_0000, 0x1000)),
            params: Region::new(0x1000, 0x1000),
            cmdline: Region::new(0x2000, 16),
        };
        assert_eq!(plan.find_overlap(), None);
        assert!(!plan.is_relocated());

        plan.ramdisk = Some(Region::new(0x1f_f000, 0x2000));
        assert_eq!(
            plan.find_overlap(),
            Some((RegionKind::Kernel, RegionKind::Ramdisk))
        );
    }
}
