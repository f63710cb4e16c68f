// Boot module - handles kernel loading and boot handoff

pub mod boot_params;
pub mod bytes;
pub mod config;
pub mod handoff;
pub mod kernel_loader;
pub mod loader;
pub mod memory;
pub mod platform;
pub mod protocol;

// Architecture-specific boot code
pub mod arch;

pub use boot_params::{ParamBlock, ParamBuilder, ParamWarning};
pub use config::{LoaderConfig, RamdiskPlacement};
pub use handoff::{dispatch, EntryMethod, Handoff, HandoffError};
pub use kernel_loader::{decode, BootHeader, KernelError, KernelImage, LoadFlags, XLoadFlags};
pub use loader::{boot_linux_kernel, prepare_boot, BootError, PreparedBoot};
pub use memory::{
    plan, LoadPlan, LoadSizes, MemoryError, MemoryKind, MemoryRange, Region, RegionKind,
};
pub use platform::{EfiHandles, Platform, PlatformCapabilities};
pub use protocol::{negotiate, Capabilities, ProtocolFeatures};
