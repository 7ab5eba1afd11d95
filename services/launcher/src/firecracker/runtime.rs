//! Firecracker runtime implementation.
//!
//! Every instance directory holds the files of its VM:
//!
//! ```text
//! <instance_dir>/
//! ├── instance.yaml         (persisted VmConfig)
//! ├── rootfs.ext4           (private copy of the image)
//! ├── vm.json               (Firecracker --config-file)
//! ├── firecracker.socket    (API socket)
//! ├── firecracker.log       (stdout/stderr of the VMM)
//! └── firecracker.pid
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use drover_payloads::FirmwareType;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::instance::VmConfig;
use crate::runtime::{Hypervisor, Virtualizer};

use super::config::{
    boot_args, BootSource, DriveConfig, FirecrackerConfig, GuestAddress, MachineConfig,
    NetworkInterface,
};

/// Time the VMM gets to fail fast before a start counts as successful.
const BOOT_GRACE: Duration = Duration::from_millis(200);

/// Time a VM gets to exit after SIGTERM before it is killed.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

const ROOTFS_FILE: &str = "rootfs.ext4";
const VM_CONFIG_FILE: &str = "vm.json";
const SOCKET_FILE: &str = "firecracker.socket";
const LOG_FILE: &str = "firecracker.log";
const PID_FILE: &str = "firecracker.pid";

/// Configuration for the Firecracker runtime.
#[derive(Debug, Clone)]
pub struct FirecrackerRuntimeConfig {
    /// Path to the firecracker binary.
    pub firecracker_path: PathBuf,
    /// Path to the kernel image.
    pub kernel_path: PathBuf,
    /// Directory holding `<image_uuid>.ext4` root filesystems.
    pub images_dir: PathBuf,
}

impl FirecrackerRuntimeConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            firecracker_path: config.firecracker_bin.clone(),
            kernel_path: config.kernel_image.clone(),
            images_dir: config.images_dir.clone(),
        }
    }
}

/// Hypervisor handing out Firecracker-backed virtualizers.
pub struct FirecrackerHypervisor {
    config: Arc<FirecrackerRuntimeConfig>,
}

impl FirecrackerHypervisor {
    pub fn new(config: FirecrackerRuntimeConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Hypervisor for FirecrackerHypervisor {
    fn virtualizer(&self, instance_dir: &Path, config: &VmConfig) -> Arc<dyn Virtualizer> {
        Arc::new(FirecrackerVm {
            runtime: Arc::clone(&self.config),
            dir: instance_dir.to_path_buf(),
            config: config.clone(),
            process: Mutex::new(None),
        })
    }
}

/// One instance's Firecracker VM.
pub struct FirecrackerVm {
    runtime: Arc<FirecrackerRuntimeConfig>,
    dir: PathBuf,
    config: VmConfig,
    /// VMM process, when started by this launcher.
    process: Mutex<Option<Child>>,
}

impl FirecrackerVm {
    fn rootfs_path(&self) -> PathBuf {
        self.dir.join(ROOTFS_FILE)
    }

    fn image_path(&self) -> PathBuf {
        self.runtime
            .images_dir
            .join(format!("{}.ext4", self.config.image_uuid))
    }

    /// Assemble the `--config-file` document for this VM.
    fn vm_file(&self, vnic_name: &str, node_addr: IpAddr) -> Result<FirecrackerConfig> {
        let vcpu_count = u8::try_from(self.config.vcpus)
            .map_err(|_| anyhow!("{} vCPUs exceeds firecracker limits", self.config.vcpus))?;
        let mem_size_mib = u32::try_from(self.config.mem_mb)
            .map_err(|_| anyhow!("{} MiB exceeds firecracker limits", self.config.mem_mb))?;

        let network = self.config.network.as_ref().filter(|_| !vnic_name.is_empty());

        let guest = match network {
            Some(network) => Some(GuestAddress {
                ip: network.private_ip,
                subnet: network
                    .subnet
                    .parse()
                    .with_context(|| format!("invalid subnet {}", network.subnet))?,
            }),
            None => None,
        };

        let boot_source = BootSource::new(self.runtime.kernel_path.clone())
            .with_boot_args(boot_args(node_addr, guest));

        let mut file = FirecrackerConfig::new(boot_source, MachineConfig::new(vcpu_count, mem_size_mib))
            .add_drive(DriveConfig::root_disk(self.rootfs_path()));

        if !vnic_name.is_empty() {
            let mut iface = NetworkInterface::new("eth0", vnic_name);
            if let Some(network) = network {
                iface = iface.with_mac(&network.vnic_mac);
            }
            file = file.add_network(iface);
        }

        Ok(file)
    }

    /// Pid of a VMM left behind by an earlier launcher, if still alive.
    ///
    /// The pid only counts while its command line still carries this
    /// instance's `--id`, so a recycled pid is never signalled.
    async fn recorded_pid(&self) -> Option<libc::pid_t> {
        let contents = tokio::fs::read_to_string(self.dir.join(PID_FILE)).await.ok()?;
        let pid: libc::pid_t = contents.trim().parse().ok()?;
        if !process_alive(pid) {
            return None;
        }

        let cmdline = tokio::fs::read(format!("/proc/{pid}/cmdline")).await.ok()?;
        let id = self.config.instance_uuid.to_string();
        cmdline
            .split(|b| *b == 0)
            .any(|arg| arg == id.as_bytes())
            .then_some(pid)
    }

    async fn clear_runtime_files(&self) {
        for file in [PID_FILE, SOCKET_FILE] {
            match tokio::fs::remove_file(self.dir.join(file)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(file, error = %e, "Failed to remove runtime file"),
            }
        }
    }
}

#[async_trait]
impl Virtualizer for FirecrackerVm {
    async fn create_image(&self, config: &VmConfig) -> Result<()> {
        let source = self.image_path();
        let target = self.rootfs_path();

        info!(
            instance_uuid = %config.instance_uuid,
            image = %source.display(),
            "Creating root disk"
        );

        let wanted = match config.disk_mb {
            Some(disk_mb) => Some(
                disk_mb
                    .checked_mul(1024 * 1024)
                    .ok_or_else(|| anyhow!("requested disk of {disk_mb} MiB is too large"))?,
            ),
            None => None,
        };

        tokio::fs::copy(&source, &target)
            .await
            .with_context(|| format!("failed to copy {}", source.display()))?;

        if let Some(wanted) = wanted {
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .open(&target)
                .await
                .with_context(|| format!("failed to open {}", target.display()))?;
            let current = file.metadata().await?.len();
            if wanted > current {
                debug!(instance_uuid = %config.instance_uuid, bytes = wanted, "Growing root disk");
                file.set_len(wanted).await.context("failed to grow root disk")?;
            }
        }

        Ok(())
    }

    async fn start_vm(&self, vnic_name: &str, node_addr: IpAddr) -> Result<()> {
        let instance_uuid = self.config.instance_uuid;

        if self.config.fw_type == FirmwareType::Efi {
            anyhow::bail!("firecracker cannot boot EFI firmware");
        }
        if !self.rootfs_path().exists() {
            anyhow::bail!("root disk {} is missing", self.rootfs_path().display());
        }

        let file = self.vm_file(vnic_name, node_addr)?;
        let config_path = self.dir.join(VM_CONFIG_FILE);
        tokio::fs::write(&config_path, serde_json::to_vec_pretty(&file)?)
            .await
            .with_context(|| format!("failed to write {}", config_path.display()))?;

        // Remove stale socket if exists
        let socket_path = self.dir.join(SOCKET_FILE);
        if socket_path.exists() {
            tokio::fs::remove_file(&socket_path).await.ok();
        }

        let log = tokio::fs::File::create(self.dir.join(LOG_FILE))
            .await
            .context("failed to create VMM log")?
            .into_std()
            .await;
        let log_err = log.try_clone()?;

        info!(%instance_uuid, vnic = %vnic_name, "Starting Firecracker VM");

        let mut child = Command::new(&self.runtime.firecracker_path)
            .arg("--api-sock")
            .arg(&socket_path)
            .arg("--id")
            .arg(instance_uuid.to_string())
            .arg("--config-file")
            .arg(&config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .with_context(|| {
                format!("failed to spawn {}", self.runtime.firecracker_path.display())
            })?;

        tokio::time::sleep(BOOT_GRACE).await;
        if let Some(status) = child.try_wait()? {
            anyhow::bail!("firecracker exited during boot: {status}");
        }

        if let Some(pid) = child.id() {
            tokio::fs::write(self.dir.join(PID_FILE), pid.to_string())
                .await
                .context("failed to write pid file")?;
        }

        *self.process.lock().await = Some(child);

        debug!(%instance_uuid, "Firecracker VM started");
        Ok(())
    }

    async fn stop_vm(&self) -> Result<()> {
        let instance_uuid = self.config.instance_uuid;
        info!(%instance_uuid, "Stopping Firecracker VM");

        let child = self.process.lock().await.take();

        match child {
            Some(mut child) => {
                if let Some(pid) = child.id() {
                    terminate(pid as libc::pid_t)?;
                }
                match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
                    Ok(status) => {
                        debug!(%instance_uuid, status = ?status, "VMM exited");
                    }
                    Err(_) => {
                        warn!(%instance_uuid, "VMM ignored SIGTERM, killing");
                        child.kill().await.context("failed to kill VMM")?;
                    }
                }
            }
            None => match self.recorded_pid().await {
                Some(pid) => {
                    terminate(pid)?;
                    let deadline = tokio::time::Instant::now() + STOP_TIMEOUT;
                    while process_alive(pid) {
                        if tokio::time::Instant::now() >= deadline {
                            anyhow::bail!("VMM {pid} did not exit after SIGTERM");
                        }
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
                None => {
                    debug!(%instance_uuid, "No VMM process to stop");
                }
            },
        }

        self.clear_runtime_files().await;
        Ok(())
    }

    async fn delete_image(&self) -> Result<()> {
        let rootfs = self.rootfs_path();
        match tokio::fs::remove_file(&rootfs).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", rootfs.display())),
        }
    }

    async fn is_running(&self) -> bool {
        if let Some(child) = self.process.lock().await.as_mut() {
            return matches!(child.try_wait(), Ok(None));
        }
        self.recorded_pid().await.is_some()
    }
}

/// Send SIGTERM to a process.
fn terminate(pid: libc::pid_t) -> Result<()> {
    // SAFETY: kill(2) has no memory safety requirements.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err).with_context(|| format!("failed to signal VMM {pid}"));
        }
    }
    Ok(())
}

fn process_alive(pid: libc::pid_t) -> bool {
    // SAFETY: signal 0 only checks for existence.
    unsafe { libc::kill(pid, 0) == 0 }
}
