// Boot orchestrator - high-level API for booting a kernel

use core::convert::Infallible;
use core::fmt;

use log::{debug, info};

use super::boot_params::{ParamBlock, ParamBuilder, ParamWarning};
use super::config::LoaderConfig;
use super::handoff::{dispatch, EntryMethod, HandoffError};
use super::kernel_loader::{KernelError, KernelImage, PayloadFormat};
use super::memory::{load_kernel_image, load_ramdisk, plan, LoadPlan, LoadSizes, MemoryError, MemoryRange};
use super::platform::Platform;
use super::protocol::{negotiate, Capabilities};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    Kernel(KernelError),
    Memory(MemoryError),
    Handoff(HandoffError),
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BootError::Kernel(e) => write!(f, "Kernel image: {}", e),
            BootError::Memory(e) => write!(f, "Memory layout: {}", e),
            BootError::Handoff(e) => write!(f, "Handoff: {}", e),
        }
    }
}

impl From<KernelError> for BootError {
    fn from(e: KernelError) -> Self {
        BootError::Kernel(e)
    }
}

impl From<MemoryError> for BootError {
    fn from(e: MemoryError) -> Self {
        BootError::Memory(e)
    }
}

impl From<HandoffError> for BootError {
    fn from(e: HandoffError) -> Self {
        BootError::Handoff(e)
    }
}

/// Everything decided before memory is touched.
#[derive(Debug)]
pub struct PreparedBoot<'a> {
    pub kernel: KernelImage<'a>,
    pub caps: Capabilities,
    pub plan: LoadPlan,
    pub params: ParamBlock,
    pub warning: Option<ParamWarning>,
}

/// Decode, negotiate, plan and fill the zero page. Pure: nothing is
/// written anywhere.
pub fn prepare_boot<'a>(
    config: &LoaderConfig,
    image: &'a [u8],
    ramdisk_len: usize,
    memory_map: &[MemoryRange],
    cmdline: &str,
) -> Result<PreparedBoot<'a>, BootError> {
    info!("Parsing kernel...");
    let kernel = KernelImage::parse(image)?;
    let header = kernel.header();
    let caps = negotiate(header);
    info!(
        "Boot protocol {}.{:02}, setup {} bytes, body {} bytes",
        header.version_major(),
        header.version_minor(),
        kernel.setup_size(),
        kernel.body_size()
    );
    debug!(
        "relocatable={} kernel_64={} handover={:?} above_4g={}",
        caps.relocatable, caps.kernel_64, caps.handover_offset, caps.above_4g
    );
    if let Some(payload) = kernel.payload(&caps) {
        debug!("Payload: {:?}, {} bytes", PayloadFormat::detect(payload), payload.len());
    }

    info!("Planning memory layout...");
    let sizes = LoadSizes {
        image: image.len(),
        ramdisk: ramdisk_len,
        cmdline: cmdline.len(),
    };
    let plan = plan(header, &caps, &sizes, memory_map, config)?;
    info!("Kernel at {:#x}, boot params at {:#x}", plan.kernel.start, plan.params.start);

    info!("Setting up boot params...");
    let (params, warning) = ParamBuilder::new(header, &caps, config).build(&plan, cmdline, memory_map);

    Ok(PreparedBoot {
        kernel,
        caps,
        plan,
        params,
        warning,
    })
}

/// Boot a Linux kernel from a bzImage in memory.
///
/// Only returns if something went wrong; the entry method is settled
/// before the kernel or ramdisk are copied anywhere.
pub fn boot_linux_kernel<P: Platform + ?Sized>(
    platform: &mut P,
    config: &LoaderConfig,
    image: &[u8],
    ramdisk: Option<&[u8]>,
    memory_map: &[MemoryRange],
    cmdline: &str,
) -> Result<Infallible, BootError> {
    let ramdisk = ramdisk.unwrap_or(&[]);
    let prepared = prepare_boot(config, image, ramdisk.len(), memory_map, cmdline)?;

    EntryMethod::choose(&prepared.plan, &prepared.caps, &platform.capabilities())?;

    info!("Loading kernel to memory...");
    load_kernel_image(platform, &prepared.kernel, &prepared.plan);

    if !ramdisk.is_empty() {
        info!("Loading ramdisk ({} bytes)...", ramdisk.len());
        load_ramdisk(platform, ramdisk, &prepared.plan);
    }

    dispatch(platform, &prepared.plan, prepared.params, &prepared.caps).map_err(BootError::from)
}
