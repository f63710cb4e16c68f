//! UKI stub loader core
//!
//! Decodes the x86 Linux setup header out of a kernel image, negotiates
//! which fields the image's boot protocol version makes trustworthy, plans
//! where kernel, ramdisk and zero page go, fills the zero page and hands
//! control to the kernel.
//!
//! ```text
//! raw bytes ─► kernel_loader ─► protocol ─► memory ─► boot_params ─► handoff
//!              (decode)         (negotiate)  (plan)    (build)        (dispatch)
//! ```
//!
//! Memory enumeration, storage and console are the caller's business; the
//! loader only ever sees byte buffers, a memory map and a [`boot::Platform`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod boot;

pub use boot::{
    boot_linux_kernel, decode, dispatch, negotiate, plan, prepare_boot, BootError, BootHeader,
    Capabilities, KernelImage, LoadPlan, LoaderConfig, ParamBlock, ParamBuilder, Platform,
};
