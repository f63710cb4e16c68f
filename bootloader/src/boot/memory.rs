// Physical placement of the kernel, zero page and ramdisk

pub mod allocation;
pub mod types;

use core::fmt;

use alloc::vec::Vec;

use log::debug;

use super::config::{LoaderConfig, RamdiskPlacement};
use super::kernel_loader::{BootHeader, KernelImage, LoadFlags};
use super::platform::Platform;
use super::protocol::Capabilities;

use allocation::{align_up, find_highest, find_lowest, subtract, usable_regions};
pub use types::{LoadPlan, LoadSizes, MemoryKind, MemoryRange, Region, RegionKind};

pub const PAGE_SIZE: u64 = 4096;
pub const FOUR_GIB: u64 = 0x1_0000_0000;

/// Zero page size.
pub const PARAMS_SIZE: u64 = 4096;

// Protected-mode load address without pref_address
const LOW_LOAD_ADDRESS: u64 = 0x0001_0000;
const HIGH_LOAD_ADDRESS: u64 = 0x0010_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// Nothing in the memory map can hold it
    NoUsableRegion { what: RegionKind, size: u64 },
    /// It would fit, but only on top of something already placed
    OverlapDetected { what: RegionKind, with: RegionKind },
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MemoryError::NoUsableRegion { what, size } => {
                write!(f, "No usable memory for {} ({:#x} bytes)", what, size)
            }
            MemoryError::OverlapDetected { what, with } => {
                write!(f, "{} would overlap {}", what, with)
            }
        }
    }
}

/// One placement request against the remaining free space.
struct Request {
    what: RegionKind,
    size: u64,
    alignment: u64,
    min: u64,
    max_end: u64,
    highest: bool,
}

impl Request {
    fn search(&self, free: &[Region]) -> Option<u64> {
        if self.highest {
            find_highest(free, self.size, self.alignment, self.min, self.max_end)
        } else {
            find_lowest(free, self.size, self.alignment, self.min, self.max_end)
        }
    }
}

/// Placement state: free space shrinks as regions are handed out.
struct Planner {
    usable: Vec<Region>,
    free: Vec<Region>,
    placed: Vec<(RegionKind, Region)>,
}

impl Planner {
    fn new(map: &[MemoryRange]) -> Self {
        let usable = usable_regions(map);
        Self {
            free: usable.clone(),
            usable,
            placed: Vec::new(),
        }
    }

    fn claim(&mut self, what: RegionKind, region: Region) {
        self.free = subtract(&self.free, region);
        self.placed.push((what, region));
    }

    fn place(&mut self, request: &Request) -> Result<Region, MemoryError> {
        if let Some(start) = request.search(&self.free) {
            let region = Region::new(start, request.size);
            self.claim(request.what, region);
            return Ok(region);
        }

        // Tell a full map apart from one we filled ourselves
        let blocked = request.search(&self.usable).and_then(|start| {
            let candidate = Region::new(start, request.size);
            self.placed
                .iter()
                .find(|(_, region)| region.overlaps(&candidate))
                .map(|(kind, _)| *kind)
        });

        Err(match blocked {
            Some(with) => MemoryError::OverlapDetected {
                what: request.what,
                with,
            },
            None => MemoryError::NoUsableRegion {
                what: request.what,
                size: request.size,
            },
        })
    }

    fn place_fixed(&mut self, what: RegionKind, region: Region, ceiling: u64) -> Result<Region, MemoryError> {
        let fits = region.end() <= ceiling && self.usable.iter().any(|r| r.contains(&region));
        if !fits {
            return Err(MemoryError::NoUsableRegion {
                what,
                size: region.len,
            });
        }
        if let Some((with, _)) = self.placed.iter().find(|(_, r)| r.overlaps(&region)) {
            return Err(MemoryError::OverlapDetected { what, with: *with });
        }
        self.claim(what, region);
        Ok(region)
    }
}

/// Address the kernel wants to run at.
pub fn preferred_address(caps: &Capabilities) -> u64 {
    match caps.pref_address {
        Some(addr) if addr != 0 => addr,
        _ if caps.loadflags.contains(LoadFlags::LOADED_HIGH) => HIGH_LOAD_ADDRESS,
        _ => LOW_LOAD_ADDRESS,
    }
}

/// Bytes the kernel occupies once running: the larger of its body and
/// `init_size`, in whole pages.
pub fn kernel_footprint(header: &BootHeader, caps: &Capabilities, image_size: usize) -> Option<u64> {
    let body = image_size.saturating_sub(header.setup_size()) as u64;
    let init = caps.init_size.unwrap_or(0) as u64;
    align_up(body.max(init), PAGE_SIZE).map(|size| size.max(PAGE_SIZE))
}

/// Compute where the kernel, zero page, command line and ramdisk go.
///
/// Placement order is kernel, then zero page with the command line right
/// behind it, then ramdisk. The result is pairwise disjoint and inside
/// `Usable` ranges of `map`.
pub fn plan(
    header: &BootHeader,
    caps: &Capabilities,
    sizes: &LoadSizes,
    map: &[MemoryRange],
    config: &LoaderConfig,
) -> Result<LoadPlan, MemoryError> {
    let mut planner = Planner::new(map);

    let footprint =
        kernel_footprint(header, caps, sizes.image).ok_or(MemoryError::NoUsableRegion {
            what: RegionKind::Kernel,
            size: u64::MAX,
        })?;
    let preferred = preferred_address(caps);
    let kernel_ceiling = if caps.above_4g { u64::MAX } else { FOUR_GIB };

    let (kernel, kernel_alignment) = if caps.relocatable {
        let alignment = caps
            .kernel_alignment
            .map(|a| u64::from(a).next_power_of_two())
            .unwrap_or(config.default_kernel_alignment)
            .max(1);
        let region = planner.place(&Request {
            what: RegionKind::Kernel,
            size: footprint,
            alignment,
            min: preferred,
            max_end: kernel_ceiling,
            highest: false,
        })?;
        (region, Some(alignment))
    } else {
        let region = planner.place_fixed(
            RegionKind::Kernel,
            Region::new(preferred, footprint),
            kernel_ceiling,
        )?;
        (region, None)
    };
    debug!("Kernel at {} (preferred {:#x})", kernel, preferred);

    // The command line rides in the same block as the zero page
    let cmdline_len = (sizes.cmdline as u64).min(u64::from(caps.cmdline_max)) + 1;
    let block_size = align_up(PARAMS_SIZE + cmdline_len, PAGE_SIZE).unwrap_or(u64::MAX);
    let block = planner.place(&Request {
        what: RegionKind::Params,
        size: block_size,
        alignment: PAGE_SIZE,
        min: config.params_min_address,
        max_end: FOUR_GIB,
        highest: false,
    })?;
    let params = Region::new(block.start, PARAMS_SIZE);
    let cmdline = Region::new(params.end(), cmdline_len);
    debug!("Boot parameters at {}, command line at {}", params, cmdline);

    let ramdisk = if sizes.ramdisk > 0 {
        let max_end = if caps.above_4g {
            u64::MAX
        } else {
            caps.ramdisk_max
                .map(|max| u64::from(max) + 1)
                .unwrap_or(FOUR_GIB)
                .min(FOUR_GIB)
        };
        let region = planner.place(&Request {
            what: RegionKind::Ramdisk,
            size: sizes.ramdisk as u64,
            alignment: PAGE_SIZE,
            min: config.ramdisk_min_address,
            max_end,
            highest: config.ramdisk_placement == RamdiskPlacement::Highest,
        })?;
        debug!("Ramdisk at {}", region);
        Some(region)
    } else {
        None
    };

    let plan = LoadPlan {
        kernel,
        kernel_alignment,
        preferred_address: preferred,
        ramdisk,
        params,
        cmdline,
    };

    if let Some((what, with)) = plan.find_overlap() {
        return Err(MemoryError::OverlapDetected { what, with });
    }

    Ok(plan)
}

/// Copy the protected-mode body to its planned address and zero the rest
/// of the footprint.
pub fn load_kernel_image<P: Platform + ?Sized>(platform: &mut P, kernel: &KernelImage, plan: &LoadPlan) {
    let body = kernel.body();
    platform.write(plan.kernel.start, body);

    let body_len = body.len() as u64;
    if plan.kernel.len > body_len {
        platform.fill(plan.kernel.start + body_len, plan.kernel.len - body_len, 0);
    }
}

pub fn load_ramdisk<P: Platform + ?Sized>(platform: &mut P, ramdisk: &[u8], plan: &LoadPlan) {
    if let Some(region) = plan.ramdisk {
        platform.write(region.start, ramdisk);
    }
}
