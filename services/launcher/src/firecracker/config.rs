//! The `--config-file` document handed to Firecracker at launch.
//!
//! Field names follow Firecracker's JSON API; section names are renamed to
//! their hyphenated form on the wire.
//!
//! Reference: https://github.com/firecracker-microvm/firecracker/blob/main/docs/getting-started.md

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use drover_networking::Ipv4Subnet;
use serde::{Deserialize, Serialize};

/// vCPU and memory sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    pub vcpu_count: u8,
    pub mem_size_mib: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smt: Option<bool>,
}

impl MachineConfig {
    /// SMT is always off for guests.
    pub fn new(vcpu_count: u8, mem_size_mib: u32) -> Self {
        Self {
            vcpu_count,
            mem_size_mib,
            smt: Some(false),
        }
    }
}

/// Guest kernel and its command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootSource {
    pub kernel_image_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_args: Option<String>,
}

impl BootSource {
    /// Boot `kernel_image_path` with [`DEFAULT_BOOT_ARGS`].
    pub fn new(kernel_image_path: PathBuf) -> Self {
        Self {
            kernel_image_path,
            boot_args: Some(DEFAULT_BOOT_ARGS.to_string()),
        }
    }

    pub fn with_boot_args(mut self, args: String) -> Self {
        self.boot_args = Some(args);
        self
    }
}

/// Kernel arguments every guest boots with.
pub const DEFAULT_BOOT_ARGS: &str = "console=ttyS0 reboot=k panic=1 pci=off";

/// Static guest addressing passed on the kernel command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestAddress {
    pub ip: Ipv4Addr,
    pub subnet: Ipv4Subnet,
}

/// Build the kernel command line for a guest.
///
/// The node address is always passed as `drover.node_addr`. With a guest
/// address the kernel brings `eth0` up statically via `ip=`.
pub fn boot_args(node_addr: IpAddr, guest: Option<GuestAddress>) -> String {
    let mut args = format!("{DEFAULT_BOOT_ARGS} drover.node_addr={node_addr}");

    if let Some(guest) = guest {
        let netmask = match guest.subnet.prefix_len {
            0 => Ipv4Addr::UNSPECIFIED,
            len => Ipv4Addr::from(u32::MAX << (32 - u32::from(len))),
        };
        args.push_str(&format!(
            " ip={}::{}:{}::eth0:off",
            guest.ip,
            guest.subnet.gateway(),
            netmask
        ));
    }

    args
}

/// A block device attached to the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveConfig {
    pub drive_id: String,
    pub path_on_host: PathBuf,
    pub is_root_device: bool,
    pub is_read_only: bool,
}

impl DriveConfig {
    /// The instance's writable root disk, exposed to the guest as `vda`.
    pub fn root_disk(path: PathBuf) -> Self {
        Self {
            drive_id: "rootfs".to_string(),
            path_on_host: path,
            is_root_device: true,
            is_read_only: false,
        }
    }
}

/// A guest NIC backed by a host TAP device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub iface_id: String,
    /// Name of the TAP device on the host.
    pub host_dev_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_mac: Option<String>,
}

impl NetworkInterface {
    pub fn new(iface_id: &str, host_dev_name: &str) -> Self {
        Self {
            iface_id: iface_id.to_string(),
            host_dev_name: host_dev_name.to_string(),
            guest_mac: None,
        }
    }

    pub fn with_mac(mut self, mac: &str) -> Self {
        self.guest_mac = Some(mac.to_string());
        self
    }
}

/// A complete `--config-file` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirecrackerConfig {
    #[serde(rename = "boot-source")]
    pub boot_source: BootSource,
    pub drives: Vec<DriveConfig>,
    #[serde(rename = "machine-config")]
    pub machine_config: MachineConfig,
    #[serde(rename = "network-interfaces", default)]
    pub network_interfaces: Vec<NetworkInterface>,
}

impl FirecrackerConfig {
    /// Create a configuration with no drives or interfaces.
    pub fn new(boot_source: BootSource, machine_config: MachineConfig) -> Self {
        Self {
            boot_source,
            drives: Vec::new(),
            machine_config,
            network_interfaces: Vec::new(),
        }
    }

    pub fn add_drive(mut self, drive: DriveConfig) -> Self {
        self.drives.push(drive);
        self
    }

    pub fn add_network(mut self, iface: NetworkInterface) -> Self {
        self.network_interfaces.push(iface);
        self
    }
}
