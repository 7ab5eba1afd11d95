//! VM control interface and mock implementation.
//!
//! The runtime interface abstracts the hypervisor:
//! - A [`Hypervisor`] hands out one [`Virtualizer`] per instance
//! - A [`Virtualizer`] prepares, boots, stops and removes that instance's VM
//!
//! Every call is fatal to the command that issued it when it fails; nothing
//! here retries. A mock implementation is provided for development.

use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use drover_id::InstanceUuid;
use tracing::{debug, info};

use crate::instance::VmConfig;

/// Control over a single instance's VM.
#[async_trait]
pub trait Virtualizer: Send + Sync {
    /// Prepare the instance's root disk from its image.
    async fn create_image(&self, config: &VmConfig) -> Result<()>;

    /// Boot the VM. An empty `vnic_name` means no dedicated interface.
    async fn start_vm(&self, vnic_name: &str, node_addr: IpAddr) -> Result<()>;

    /// Shut the VM down.
    async fn stop_vm(&self) -> Result<()>;

    /// Remove the instance's root disk.
    async fn delete_image(&self) -> Result<()>;

    /// Whether the VM is up, including one booted by an earlier launcher.
    async fn is_running(&self) -> bool;
}

/// Factory for per-instance virtualizers.
pub trait Hypervisor: Send + Sync {
    fn virtualizer(&self, instance_dir: &Path, config: &VmConfig) -> Arc<dyn Virtualizer>;
}

/// Mock hypervisor for development.
#[derive(Default)]
pub struct MockHypervisor {
    /// Whether VMs should "fail" to start.
    fail_starts: bool,
}

impl MockHypervisor {
    pub fn new() -> Self {
        Self { fail_starts: false }
    }

    /// Create a mock hypervisor whose VMs all fail to start.
    pub fn failing() -> Self {
        Self { fail_starts: true }
    }
}

impl Hypervisor for MockHypervisor {
    fn virtualizer(&self, _instance_dir: &Path, config: &VmConfig) -> Arc<dyn Virtualizer> {
        Arc::new(MockVirtualizer {
            instance_uuid: config.instance_uuid,
            boot_counter: AtomicU64::new(0),
            running: AtomicBool::new(false),
            fail_starts: self.fail_starts,
        })
    }
}

/// Mock VM that only logs.
pub struct MockVirtualizer {
    instance_uuid: InstanceUuid,

    /// Counter for generating boot IDs.
    boot_counter: AtomicU64,

    running: AtomicBool,
    fail_starts: bool,
}

impl MockVirtualizer {
    /// Number of times this VM has booted.
    pub fn boots(&self) -> u64 {
        self.boot_counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Virtualizer for MockVirtualizer {
    async fn create_image(&self, config: &VmConfig) -> Result<()> {
        info!(
            instance_uuid = %self.instance_uuid,
            image_uuid = %config.image_uuid,
            "[MOCK] Creating image"
        );
        Ok(())
    }

    async fn start_vm(&self, vnic_name: &str, node_addr: IpAddr) -> Result<()> {
        if self.fail_starts {
            anyhow::bail!("Mock hypervisor configured to fail");
        }

        info!(
            instance_uuid = %self.instance_uuid,
            vnic = %vnic_name,
            node_addr = %node_addr,
            "[MOCK] Starting VM"
        );

        // Simulate some startup delay
        tokio::time::sleep(Duration::from_millis(100)).await;

        let boot = self.boot_counter.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        debug!(instance_uuid = %self.instance_uuid, boot, "[MOCK] VM started");

        Ok(())
    }

    async fn stop_vm(&self) -> Result<()> {
        info!(instance_uuid = %self.instance_uuid, "[MOCK] Stopping VM");

        // Simulate some shutdown delay
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.running.store(false, Ordering::SeqCst);

        Ok(())
    }

    async fn delete_image(&self) -> Result<()> {
        info!(instance_uuid = %self.instance_uuid, "[MOCK] Deleting image");
        Ok(())
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
