// Kernel boot handoff

use core::convert::Infallible;
use core::fmt;

use log::info;

use super::boot_params::ParamBlock;
use super::memory::{LoadPlan, FOUR_GIB};
use super::platform::{Platform, PlatformCapabilities};
use super::protocol::{Capabilities, STARTUP_64_OFFSET};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffError {
    /// Neither the kernel nor the platform share an entry convention
    NoSupportedEntryMethod,
}

impl fmt::Display for HandoffError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HandoffError::NoSupportedEntryMethod => write!(f, "No supported kernel entry method"),
        }
    }
}

/// How control reaches the kernel, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMethod {
    /// Stay in long mode with boot services up; the kernel's EFI stub
    /// takes it from here
    EfiHandover {
        entry: u64,
        image_handle: u64,
        system_table: u64,
    },
    /// Jump to `startup_64` with `%rsi` = zero page
    Boot64 { entry: u64 },
    /// Drop to flat 32-bit protected mode, `%esi` = zero page
    Legacy32 { entry: u32 },
}

impl EntryMethod {
    pub fn choose(
        plan: &LoadPlan,
        caps: &Capabilities,
        platform: &PlatformCapabilities,
    ) -> Result<Self, HandoffError> {
        let startup_64 = plan.kernel.start + STARTUP_64_OFFSET;

        if let (Some(offset), Some(efi), true) = (caps.handover_offset, platform.efi, platform.long_mode) {
            return Ok(EntryMethod::EfiHandover {
                entry: startup_64 + u64::from(offset),
                image_handle: efi.image_handle,
                system_table: efi.system_table,
            });
        }

        if caps.kernel_64 && platform.long_mode {
            return Ok(EntryMethod::Boot64 { entry: startup_64 });
        }

        let below_4g = [plan.kernel, plan.params, plan.cmdline]
            .iter()
            .all(|region| region.end() <= FOUR_GIB);
        if platform.protected_mode && below_4g {
            return Ok(EntryMethod::Legacy32 {
                entry: plan.kernel.start as u32,
            });
        }

        Err(HandoffError::NoSupportedEntryMethod)
    }
}

impl fmt::Display for EntryMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EntryMethod::EfiHandover { entry, .. } => write!(f, "EFI handover at {:#x}", entry),
            EntryMethod::Boot64 { entry } => write!(f, "64-bit entry at {:#x}", entry),
            EntryMethod::Legacy32 { entry } => write!(f, "32-bit entry at {:#x}", entry),
        }
    }
}

/// Everything the final jump needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handoff {
    pub method: EntryMethod,
    /// Physical address of the committed zero page
    pub params: u64,
}

/// Pick an entry method, commit the zero page and command line, and jump.
///
/// Only returns on failure, before anything has been written.
pub fn dispatch<P: Platform + ?Sized>(
    platform: &mut P,
    plan: &LoadPlan,
    params: ParamBlock,
    caps: &Capabilities,
) -> Result<Infallible, HandoffError> {
    let method = EntryMethod::choose(plan, caps, &platform.capabilities())?;

    params.commit(platform);
    info!("Jumping to kernel: {}", method);

    platform.transfer(Handoff {
        method,
        params: params.addr(),
    })
}
