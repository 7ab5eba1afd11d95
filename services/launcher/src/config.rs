//! Configuration for the launcher.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use drover_id::AgentUuid;

/// Whether instances get a dedicated VNIC.
///
/// Fixed at startup and handed to every command by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkingMode {
    Enabled,
    Disabled,
}

impl NetworkingMode {
    pub fn is_enabled(self) -> bool {
        self == NetworkingMode::Enabled
    }
}

/// Which hypervisor backs instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HypervisorKind {
    Firecracker,
    Mock,
}

/// Launcher configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identity the controller addresses this launcher by.
    pub agent_uuid: AgentUuid,

    /// Controller API URL.
    pub controller_url: String,

    /// Data directory; instances live under `<data_dir>/instances`.
    pub data_dir: PathBuf,

    pub networking: NetworkingMode,

    /// Address of this node, passed to every VM at launch.
    pub node_addr: IpAddr,

    /// Instances this node accepts before reporting itself full.
    pub max_instances: usize,

    /// Interval between command polls.
    pub poll_interval: Duration,

    /// Heartbeat interval.
    pub heartbeat_interval: Duration,

    /// Upper bound on a single failure report.
    pub report_timeout: Duration,

    pub hypervisor: HypervisorKind,

    /// Path to the firecracker binary.
    pub firecracker_bin: PathBuf,

    /// Guest kernel image.
    pub kernel_image: PathBuf,

    /// Directory holding root filesystem images, named `<image_uuid>.ext4`.
    pub images_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let agent_uuid: AgentUuid = lookup("DROVER_AGENT_UUID")
            .ok_or_else(|| anyhow!("DROVER_AGENT_UUID is required"))?
            .parse()
            .context("invalid DROVER_AGENT_UUID")?;

        let controller_url = lookup("DROVER_CONTROLLER_URL")
            .unwrap_or_else(|| "http://127.0.0.1:8080".to_string());

        let data_dir = PathBuf::from(
            lookup("DROVER_DATA_DIR").unwrap_or_else(|| "/var/lib/drover".to_string()),
        );

        let networking = match lookup("DROVER_NETWORKING").as_deref() {
            None | Some("true") | Some("1") => NetworkingMode::Enabled,
            Some("false") | Some("0") => NetworkingMode::Disabled,
            Some(other) => return Err(anyhow!("invalid DROVER_NETWORKING '{other}'")),
        };

        let node_addr: IpAddr = lookup("DROVER_NODE_ADDR")
            .unwrap_or_else(|| "127.0.0.1".to_string())
            .parse()
            .context("invalid DROVER_NODE_ADDR")?;

        let max_instances: usize = parse_or(&lookup, "DROVER_MAX_INSTANCES", 64)?;
        let poll_interval = Duration::from_secs(parse_or(&lookup, "DROVER_POLL_INTERVAL", 2)?);
        let heartbeat_interval =
            Duration::from_secs(parse_or(&lookup, "DROVER_HEARTBEAT_INTERVAL", 10)?);
        let report_timeout =
            Duration::from_millis(parse_or(&lookup, "DROVER_REPORT_TIMEOUT_MS", 5000)?);

        let hypervisor = match lookup("DROVER_HYPERVISOR").as_deref() {
            None | Some("firecracker") => HypervisorKind::Firecracker,
            Some("mock") => HypervisorKind::Mock,
            Some(other) => return Err(anyhow!("invalid DROVER_HYPERVISOR '{other}'")),
        };

        let firecracker_bin = PathBuf::from(
            lookup("DROVER_FIRECRACKER_BIN").unwrap_or_else(|| "/usr/bin/firecracker".to_string()),
        );
        let kernel_image = lookup("DROVER_KERNEL_IMAGE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("kernel").join("vmlinux"));
        let images_dir = lookup("DROVER_IMAGES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("images"));

        let log_level = lookup("DROVER_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            agent_uuid,
            controller_url,
            data_dir,
            networking,
            node_addr,
            max_instances,
            poll_interval,
            heartbeat_interval,
            report_timeout,
            hypervisor,
            firecracker_bin,
            kernel_image,
            images_dir,
            log_level,
        })
    }

    /// Directory holding one subdirectory per instance.
    pub fn instances_dir(&self) -> PathBuf {
        self.data_dir.join("instances")
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value.parse().with_context(|| format!("invalid {key}")),
        None => Ok(default),
    }
}
