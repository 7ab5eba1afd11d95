//! Firecracker microVM runtime implementation.
//!
//! This module provides the Firecracker runtime for production use,
//! implementing the `Hypervisor` and `Virtualizer` traits defined in the
//! runtime module.
//!
//! ## Components
//!
//! - `config`: VM configuration structures (machine, boot, drives, network)
//! - `runtime`: `Hypervisor` and `Virtualizer` implementations

mod config;
mod runtime;

pub use config::{
    boot_args, BootSource, DriveConfig, FirecrackerConfig, GuestAddress, MachineConfig,
    NetworkInterface,
};
pub use runtime::{FirecrackerHypervisor, FirecrackerRuntimeConfig, FirecrackerVm};
