//! VNIC provisioning for instances.
//!
//! Each networked instance gets a dedicated VNIC: a TAP device the VM uses
//! for its virtio-net interface, attached to a bridge shared by every VNIC
//! on the same tenant subnet.
//!
//! Architecture:
//! - TAP device per VNIC (e.g., `vnic-3390740c`)
//! - Bridge per tenant subnet (e.g., `br-0a00000018`)
//! - MTU leaves room for the tunnel to the concentrator

mod tap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use drover_networking::VnicConfig;

use crate::instance::VmConfig;

pub use tap::TapProvisioner;

/// What a VNIC was attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VnicInfo {
    /// Bridge the VNIC is enslaved to.
    pub bridge: String,
}

/// Creates and destroys instance VNICs.
#[async_trait]
pub trait VnicProvisioner: Send + Sync {
    /// Derive a VNIC configuration from an instance's VM configuration.
    fn build_config(&self, config: &VmConfig) -> Result<VnicConfig>;

    /// Create the VNIC, returning its interface name.
    async fn create_vnic(&self, vnic: &VnicConfig) -> Result<(String, VnicInfo)>;

    /// Tear the VNIC down.
    async fn destroy_vnic(&self, vnic: &VnicConfig) -> Result<()>;
}

/// Validate an instance's network section into a [`VnicConfig`].
pub fn vnic_config(config: &VmConfig) -> Result<VnicConfig> {
    let network = config
        .network
        .as_ref()
        .ok_or_else(|| anyhow!("instance {} has no network section", config.instance_uuid))?;

    let vnic = VnicConfig::new(
        config.instance_uuid,
        network.vnic_uuid,
        network.tenant_uuid,
        &network.vnic_mac,
        network.private_ip,
        &network.subnet,
        network.concentrator_uuid,
        network.concentrator_ip,
    )?;

    Ok(vnic)
}
