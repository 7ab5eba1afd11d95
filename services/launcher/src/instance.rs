//! Instance state tracking.
//!
//! Every instance the launcher knows about lives in the [`InstanceRegistry`].
//! Each instance owns a directory `<instances_dir>/<instance_uuid>` holding
//! its persisted [`VmConfig`] (`instance.yaml`), so instances survive a
//! launcher restart. A restored instance counts as running when its VM
//! is still alive.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use drover_id::{ImageUuid, InstanceUuid};
use drover_payloads::{Command, FirmwareType, NetworkSpec, ResourceKind, StartCommand, VmType};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::runtime::{Hypervisor, Virtualizer};

/// File name of the persisted VM configuration.
pub const VM_CONFIG_FILE: &str = "instance.yaml";

/// Default vCPU count when a start command requests none.
pub const DEFAULT_VCPUS: u32 = 1;

/// Default memory when a start command requests none.
pub const DEFAULT_MEM_MB: u64 = 128;

/// VM configuration of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    pub instance_uuid: InstanceUuid,
    pub image_uuid: ImageUuid,
    pub fw_type: FirmwareType,
    pub vm_type: VmType,
    pub vcpus: u32,
    pub mem_mb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSpec>,
}

impl VmConfig {
    /// Build the configuration a start command asks for.
    pub fn from_start(start: &StartCommand) -> Self {
        let vcpus = start
            .requested(ResourceKind::Vcpus)
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_VCPUS);

        let mem_mb = start
            .requested(ResourceKind::MemMb)
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_MEM_MB);

        Self {
            instance_uuid: start.instance_uuid,
            image_uuid: start.image_uuid,
            fw_type: start.fw_type,
            vm_type: start.vm_type,
            vcpus,
            mem_mb,
            disk_mb: start.requested(ResourceKind::DiskMb),
            network: start.networking.clone(),
        }
    }

    /// Load the configuration persisted in an instance directory.
    pub async fn load(instance_dir: &Path) -> Result<Self> {
        let path = instance_dir.join(VM_CONFIG_FILE);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        serde_yaml::from_slice(&bytes).with_context(|| format!("invalid {}", path.display()))
    }

    /// Persist the configuration into an instance directory, creating it.
    pub async fn save(&self, instance_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(instance_dir)
            .await
            .with_context(|| format!("failed to create {}", instance_dir.display()))?;

        let yaml = serde_yaml::to_string(self).context("failed to serialize VM config")?;

        // Readers see either the old config or the new one, never a partial write.
        let path = instance_dir.join(VM_CONFIG_FILE);
        let tmp = instance_dir.join(format!("{VM_CONFIG_FILE}.tmp"));
        tokio::fs::write(&tmp, yaml)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to rename into {}", path.display()))?;

        Ok(())
    }
}

/// A command queued for an instance, with a completion signal.
#[derive(Debug)]
pub struct QueuedCommand {
    pub command: Command,
    pub done: oneshot::Sender<()>,
}

/// A single instance known to this launcher.
pub struct Instance {
    uuid: InstanceUuid,
    dir: PathBuf,
    config: VmConfig,
    running: AtomicBool,
    deleted: AtomicBool,
    vm: Arc<dyn Virtualizer>,
    queue: mpsc::UnboundedSender<QueuedCommand>,
}

impl Instance {
    /// Create an instance and the receiving end of its command queue.
    pub fn new(
        dir: PathBuf,
        config: VmConfig,
        vm: Arc<dyn Virtualizer>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<QueuedCommand>) {
        let (queue, rx) = mpsc::unbounded_channel();
        let instance = Arc::new(Self {
            uuid: config.instance_uuid,
            dir,
            config,
            running: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
            vm,
            queue,
        });
        (instance, rx)
    }

    pub fn uuid(&self) -> InstanceUuid {
        self.uuid
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vm(&self) -> &dyn Virtualizer {
        self.vm.as_ref()
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    pub fn mark_deleted(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.deleted.store(true, Ordering::SeqCst);
    }

    /// Append a command to this instance's queue.
    ///
    /// Returns the command back if the queue's worker has gone away.
    pub fn enqueue(&self, queued: QueuedCommand) -> Result<(), QueuedCommand> {
        self.queue.send(queued).map_err(|e| e.0)
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("uuid", &self.uuid)
            .field("dir", &self.dir)
            .field("running", &self.is_running())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

/// Why an instance could not be added to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveError {
    /// An instance with this UUID is already known.
    Exists { running: bool },
    /// The node is at capacity.
    Full,
}

/// Registry of all instances on this node.
pub struct InstanceRegistry {
    root: PathBuf,
    instances: RwLock<HashMap<InstanceUuid, Arc<Instance>>>,
}

impl InstanceRegistry {
    /// Create an empty registry rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Directory an instance's state lives in.
    pub fn instance_dir(&self, uuid: InstanceUuid) -> PathBuf {
        self.root.join(uuid.to_string())
    }

    pub async fn get(&self, uuid: InstanceUuid) -> Option<Arc<Instance>> {
        self.instances.read().await.get(&uuid).cloned()
    }

    /// Insert an instance unless it already exists or the node is full.
    pub async fn reserve(&self, instance: Arc<Instance>, max: usize) -> Result<(), ReserveError> {
        let mut instances = self.instances.write().await;

        if let Some(existing) = instances.get(&instance.uuid()) {
            return Err(ReserveError::Exists {
                running: existing.is_running(),
            });
        }
        if instances.len() >= max {
            return Err(ReserveError::Full);
        }

        instances.insert(instance.uuid(), instance);
        Ok(())
    }

    pub async fn remove(&self, uuid: InstanceUuid) -> Option<Arc<Instance>> {
        self.instances.write().await.remove(&uuid)
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }

    pub async fn running_count(&self) -> usize {
        self.instances
            .read()
            .await
            .values()
            .filter(|i| i.is_running())
            .count()
    }

    /// Load every instance persisted under the registry root.
    ///
    /// A restored instance is marked running when its virtualizer reports a
    /// live VM, e.g. a VMM that outlived the previous launcher. Returns the
    /// new instances with their command queues so the caller can attach
    /// workers.
    pub async fn restore(
        &self,
        hypervisor: &dyn Hypervisor,
    ) -> Result<Vec<(Arc<Instance>, mpsc::UnboundedReceiver<QueuedCommand>)>> {
        let mut restored = Vec::new();
        let mut found = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(root = %self.root.display(), "No instances directory, nothing to restore");
                return Ok(restored);
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read {}", self.root.display()))
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let dir = entry.path();
            if !entry.file_type().await?.is_dir() {
                continue;
            }

            let config = match VmConfig::load(&dir).await {
                Ok(config) => config,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable instance");
                    continue;
                }
            };

            if dir.file_name() != Some(std::ffi::OsStr::new(&config.instance_uuid.to_string())) {
                warn!(
                    dir = %dir.display(),
                    instance_uuid = %config.instance_uuid,
                    "Skipping instance stored under a foreign directory"
                );
                continue;
            }

            found.push((dir, config));
        }

        for (dir, config) in found {
            let vm = hypervisor.virtualizer(&dir, &config);
            let running = vm.is_running().await;
            if running {
                info!(instance_uuid = %config.instance_uuid, "VM still running");
            }
            let (instance, rx) = Instance::new(dir, config, vm);
            instance.set_running(running);
            restored.push((instance, rx));
        }

        let mut instances = self.instances.write().await;
        for (instance, _) in &restored {
            instances.insert(instance.uuid(), Arc::clone(instance));
        }

        info!(count = restored.len(), "Restored instances");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockHypervisor;
    use drover_id::AgentUuid;
    use drover_payloads::RequestedResource;

    fn start_command(resources: Vec<RequestedResource>) -> StartCommand {
        StartCommand {
            instance_uuid: InstanceUuid::new(),
            workload_agent_uuid: AgentUuid::new(),
            image_uuid: ImageUuid::new(),
            fw_type: FirmwareType::Efi,
            vm_type: VmType::Qemu,
            requested_resources: resources,
            networking: None,
        }
    }

    fn new_instance(registry: &InstanceRegistry) -> Arc<Instance> {
        let config = VmConfig::from_start(&start_command(vec![]));
        let dir = registry.instance_dir(config.instance_uuid);
        let vm = MockHypervisor::new().virtualizer(&dir, &config);
        Instance::new(dir, config, vm).0
    }

    #[test]
    fn test_vm_config_defaults() {
        let config = VmConfig::from_start(&start_command(vec![]));
        assert_eq!(config.vcpus, DEFAULT_VCPUS);
        assert_eq!(config.mem_mb, DEFAULT_MEM_MB);
        assert_eq!(config.disk_mb, None);
        assert_eq!(config.fw_type, FirmwareType::Efi);
    }

    #[test]
    fn test_vm_config_requested_resources() {
        let config = VmConfig::from_start(&start_command(vec![
            RequestedResource {
                kind: ResourceKind::Vcpus,
                value: 4,
            },
            RequestedResource {
                kind: ResourceKind::MemMb,
                value: 2048,
            },
            RequestedResource {
                kind: ResourceKind::DiskMb,
                value: 10240,
            },
        ]));
        assert_eq!(config.vcpus, 4);
        assert_eq!(config.mem_mb, 2048);
        assert_eq!(config.disk_mb, Some(10240));
    }

    #[tokio::test]
    async fn test_vm_config_persistence() {
        let tmp = tempfile::tempdir().unwrap();
        let config = VmConfig::from_start(&start_command(vec![]));
        let dir = tmp.path().join(config.instance_uuid.to_string());

        config.save(&dir).await.unwrap();
        assert!(dir.join(VM_CONFIG_FILE).exists());
        assert!(!dir.join(format!("{VM_CONFIG_FILE}.tmp")).exists());

        let loaded = VmConfig::load(&dir).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_reserve_rejects_duplicates() {
        let registry = InstanceRegistry::new("/tmp/drover-test");
        let instance = new_instance(&registry);

        registry.reserve(Arc::clone(&instance), 4).await.unwrap();
        instance.set_running(true);

        let dir = registry.instance_dir(instance.uuid());
        let config = instance.config().clone();
        let vm = MockHypervisor::new().virtualizer(&dir, &config);
        let (duplicate, _rx) = Instance::new(dir, config, vm);

        assert_eq!(
            registry.reserve(duplicate, 4).await,
            Err(ReserveError::Exists { running: true })
        );
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.running_count().await, 1);
    }

    #[tokio::test]
    async fn test_reserve_rejects_when_full() {
        let registry = InstanceRegistry::new("/tmp/drover-test");

        registry.reserve(new_instance(&registry), 1).await.unwrap();
        assert_eq!(
            registry.reserve(new_instance(&registry), 1).await,
            Err(ReserveError::Full)
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = InstanceRegistry::new("/tmp/drover-test");
        let instance = new_instance(&registry);
        let uuid = instance.uuid();

        registry.reserve(instance, 4).await.unwrap();
        assert!(registry.remove(uuid).await.is_some());
        assert!(registry.get(uuid).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_restore() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = InstanceRegistry::new(tmp.path());

        let config = VmConfig::from_start(&start_command(vec![]));
        config
            .save(&registry.instance_dir(config.instance_uuid))
            .await
            .unwrap();

        // Junk that must be skipped.
        tokio::fs::create_dir_all(tmp.path().join("not-an-instance"))
            .await
            .unwrap();
        tokio::fs::write(tmp.path().join("stray-file"), b"x")
            .await
            .unwrap();

        let restored = registry.restore(&MockHypervisor::new()).await.unwrap();
        assert_eq!(restored.len(), 1);

        let instance = registry.get(config.instance_uuid).await.unwrap();
        assert!(!instance.is_running());
        assert_eq!(instance.config(), &config);
    }

    #[tokio::test]
    async fn test_restore_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = InstanceRegistry::new(tmp.path().join("missing"));
        let restored = registry.restore(&MockHypervisor::new()).await.unwrap();
        assert!(restored.is_empty());
    }
}
