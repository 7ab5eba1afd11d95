//! drover launcher library
//!
//! The launcher runs on each compute node and executes instance lifecycle
//! commands (start, stop, restart, delete) sent by the controller. Every
//! failed command is classified into its command's failure taxonomy and
//! reported back over the control channel.
//!
//! ## Architecture
//!
//! ```text
//! intake (poll) ──► Dispatcher ──► per-instance queue ──► Engine
//!                      │                                    │
//!                      ▼                                    ▼
//!               InstanceRegistry          VnicProvisioner / Virtualizer
//!                                                          │
//!                   Reporter ◄── CommandError ◄────────────┘
//! ```
//!
//! ## Modules
//!
//! - `engine`: ordered provisioning steps per command, failure classification
//! - `dispatcher`: decoding, validation, per-instance ordering
//! - `network`: VNIC provisioning (TAP devices and subnet bridges)
//! - `runtime`: VM control interface and mock hypervisor
//! - `firecracker`: Firecracker hypervisor
//! - `reporter`: best-effort failure reporting over the control channel

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod firecracker;
pub mod heartbeat;
pub mod instance;
pub mod intake;
pub mod network;
pub mod reporter;
pub mod runtime;

// Re-export commonly used types
pub use config::{Config, HypervisorKind, NetworkingMode};
pub use dispatcher::{Completion, Dispatcher};
pub use engine::{CommandError, Engine};
pub use instance::{Instance, InstanceRegistry, VmConfig};
pub use network::{TapProvisioner, VnicInfo, VnicProvisioner};
pub use reporter::{ChannelError, ControlChannel, Delivery, Reporter};
pub use runtime::{Hypervisor, MockHypervisor, Virtualizer};
