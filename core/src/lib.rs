//! UKI Stub Core Library
//!
//! Ambient services shared by the stub loader crates.
//! Designed to be no_std compatible: nothing here allocates.

#![cfg_attr(not(test), no_std)]

pub mod logger;
