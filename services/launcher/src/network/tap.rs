//! TAP device creation and management.
//!
//! Creates and configures TAP devices for instance VNICs.
//! Each VNIC is a dedicated TAP device that the VM uses for its
//! virtio-net interface (eth0 inside the guest).
//!
//! Host-side setup:
//! - TAP device named `vnic-{vnic_uuid_prefix}`
//! - MTU matching the tunnel to the concentrator
//! - Enslaved to the tenant subnet bridge, which is created on demand
//! - Bridge carries the subnet gateway address
//! - Interface alias set to the VNIC UUID, marking which VNIC owns the TAP

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use drover_id::VnicUuid;
use drover_networking::{validate_mtu, VnicConfig, MAX_IFACE_NAME_LEN};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{vnic_config, VnicInfo, VnicProvisioner};
use crate::instance::VmConfig;

/// VNIC provisioner backed by TAP devices and Linux bridges, driven by `ip(8)`.
#[derive(Debug, Clone, Default)]
pub struct TapProvisioner {
    /// MTU override applied to every VNIC.
    mtu: Option<u16>,
}

impl TapProvisioner {
    pub fn new() -> Self {
        Self { mtu: None }
    }

    /// Set custom MTU.
    pub fn with_mtu(mut self, mtu: u16) -> Result<Self> {
        self.mtu = Some(validate_mtu(mtu)?);
        Ok(self)
    }
}

#[async_trait]
impl VnicProvisioner for TapProvisioner {
    fn build_config(&self, config: &VmConfig) -> Result<VnicConfig> {
        let vnic = vnic_config(config)?;
        let vnic = match self.mtu {
            Some(mtu) => vnic.with_mtu(mtu)?,
            None => vnic,
        };

        let name = vnic.vnic_name();
        if name.len() > MAX_IFACE_NAME_LEN {
            anyhow::bail!("interface name {name} exceeds {MAX_IFACE_NAME_LEN} characters");
        }

        Ok(vnic)
    }

    /// Create and configure a TAP device for a VNIC.
    ///
    /// This sets up:
    /// 1. Subnet bridge, if missing
    /// 2. TAP device with the VNIC name
    /// 3. MTU configuration
    /// 4. Bridge membership
    ///
    /// An existing TAP device with the same name is reused when its alias
    /// names this VNIC or it carries no alias, so restarting a stopped
    /// instance finds its VNIC again. A TAP owned by another VNIC is an error.
    async fn create_vnic(&self, vnic: &VnicConfig) -> Result<(String, VnicInfo)> {
        let tap_name = vnic.vnic_name();
        let bridge = vnic.bridge_name();

        info!(
            tap = %tap_name,
            bridge = %bridge,
            instance_uuid = %vnic.instance_uuid,
            ip = %vnic.ip,
            mtu = vnic.mtu,
            "Creating VNIC"
        );

        ensure_bridge(&bridge, vnic).await?;

        match link_owner(Path::new(SYS_CLASS_NET), &tap_name).await {
            Some(owner) if owned_by(&owner, vnic.vnic_uuid) => {
                debug!(tap = %tap_name, "TAP device already exists, reusing");
            }
            Some(owner) => {
                anyhow::bail!("TAP device {tap_name} belongs to VNIC {owner}");
            }
            None => {
                run_ip(&["tuntap", "add", "dev", &tap_name, "mode", "tap"])
                    .await
                    .context("failed to create TAP device")?;
            }
        }

        let alias = vnic.vnic_uuid.to_string();
        let configure = async {
            run_ip(&["link", "set", "dev", &tap_name, "alias", &alias])
                .await
                .context("failed to tag TAP device")?;
            run_ip(&["link", "set", "dev", &tap_name, "mtu", &vnic.mtu.to_string()])
                .await
                .context("failed to set MTU")?;
            run_ip(&["link", "set", "dev", &tap_name, "master", &bridge])
                .await
                .context("failed to attach TAP device to bridge")?;
            run_ip(&["link", "set", "dev", &tap_name, "up"])
                .await
                .context("failed to bring TAP device up")
        };

        if let Err(e) = configure.await {
            // Try to clean up on failure
            if let Err(cleanup) = run_ip(&["link", "delete", &tap_name]).await {
                warn!(tap = %tap_name, error = %cleanup, "Failed to remove half-configured TAP device");
            }
            return Err(e);
        }

        debug!(tap = %tap_name, "TAP device created and configured");

        Ok((
            tap_name,
            VnicInfo { bridge },
        ))
    }

    /// Delete the TAP device. The subnet bridge stays for other VNICs.
    async fn destroy_vnic(&self, vnic: &VnicConfig) -> Result<()> {
        let tap_name = vnic.vnic_name();
        info!(tap = %tap_name, instance_uuid = %vnic.instance_uuid, "Deleting VNIC");

        match link_owner(Path::new(SYS_CLASS_NET), &tap_name).await {
            None => {
                debug!(tap = %tap_name, "TAP device already gone");
                return Ok(());
            }
            Some(owner) if !owned_by(&owner, vnic.vnic_uuid) => {
                warn!(tap = %tap_name, owner = %owner, "TAP device belongs to another VNIC, leaving it");
                return Ok(());
            }
            Some(_) => {}
        }

        run_ip(&["link", "delete", &tap_name])
            .await
            .context("failed to delete TAP device")?;

        debug!(tap = %tap_name, "TAP device deleted");
        Ok(())
    }
}

/// Create the subnet bridge if it does not exist yet.
async fn ensure_bridge(bridge: &str, vnic: &VnicConfig) -> Result<()> {
    if link_exists(bridge) {
        return Ok(());
    }

    info!(bridge = %bridge, subnet = %vnic.subnet, "Creating subnet bridge");

    run_ip(&["link", "add", "name", bridge, "type", "bridge"])
        .await
        .context("failed to create bridge")?;

    let gateway = format!("{}/{}", vnic.gateway(), vnic.subnet.prefix_len);
    let configure = async {
        run_ip(&["addr", "add", &gateway, "dev", bridge])
            .await
            .context("failed to assign gateway address")?;
        run_ip(&["link", "set", "dev", bridge, "up"])
            .await
            .context("failed to bring bridge up")
    };

    if let Err(e) = configure.await {
        let _ = run_ip(&["link", "delete", bridge]).await;
        return Err(e);
    }

    Ok(())
}

/// Run an `ip` command and return result.
async fn run_ip(args: &[&str]) -> Result<()> {
    let output = Command::new("ip")
        .args(args)
        .output()
        .await
        .context("failed to execute ip command")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("ip {} failed: {}", args.join(" "), stderr.trim());
    }

    Ok(())
}

const SYS_CLASS_NET: &str = "/sys/class/net";

/// Check if a network link exists.
fn link_exists(name: &str) -> bool {
    Path::new(SYS_CLASS_NET).join(name).exists()
}

/// Alias of an existing link, or `None` when there is no such link.
///
/// A link without an alias yields an empty string.
async fn link_owner(net_root: &Path, name: &str) -> Option<String> {
    let link = net_root.join(name);
    if !link.exists() {
        return None;
    }
    let alias = tokio::fs::read_to_string(link.join("ifalias"))
        .await
        .unwrap_or_default();
    Some(alias.trim().to_string())
}

/// An untagged TAP predates aliasing and is treated as ours.
fn owned_by(owner: &str, vnic_uuid: VnicUuid) -> bool {
    owner.is_empty() || owner == vnic_uuid.to_string()
}
