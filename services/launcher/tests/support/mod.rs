//! Recording fakes for the launcher's capability traits.
//!
//! Every fake appends the step it performed to a shared [`CallLog`] so tests
//! can assert ordering across adapters, and any step can be made to fail.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use drover_id::{AgentUuid, ImageUuid, InstanceUuid, TenantUuid};
use drover_launcher::network::vnic_config;
use drover_launcher::{
    ChannelError, ControlChannel, Dispatcher, Engine, Hypervisor, InstanceRegistry,
    NetworkingMode, Reporter, Virtualizer, VmConfig, VnicInfo, VnicProvisioner,
};
use drover_networking::VnicConfig;
use drover_payloads::{
    encode_command, Command, ErrorKind, FirmwareType, InstanceTarget, NetworkSpec,
    StartCommand, VmType,
};
use tempfile::TempDir;

pub const AGENT_UUID: &str = "59460b8a-5f53-4e3e-b5ce-b71fed8c7e64";

pub const NODE_ADDR: &str = "192.168.0.3";

pub fn agent_uuid() -> AgentUuid {
    AGENT_UUID.parse().unwrap()
}

/// Steps the fakes record.
pub mod step {
    pub const VNIC_BUILD: &str = "vnic.build";
    pub const VNIC_CREATE: &str = "vnic.create";
    pub const VNIC_DESTROY: &str = "vnic.destroy";
    pub const CREATE_IMAGE: &str = "vm.create_image";
    pub const START_VM: &str = "vm.start";
    pub const STOP_VM: &str = "vm.stop";
    pub const DELETE_IMAGE: &str = "vm.delete_image";
}

/// Ordered record of adapter calls plus the set of steps that should fail.
#[derive(Default)]
pub struct CallLog {
    calls: Mutex<Vec<&'static str>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl CallLog {
    pub fn fail(&self, step: &'static str) {
        self.failing.lock().unwrap().insert(step);
    }

    pub fn heal(&self, step: &'static str) {
        self.failing.lock().unwrap().remove(step);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, step: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|s| **s == step).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, step: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(step);
        if self.failing.lock().unwrap().contains(step) {
            return Err(anyhow!("injected {step} failure"));
        }
        Ok(())
    }
}

/// VNIC provisioner that only records.
pub struct FakeVnics {
    log: Arc<CallLog>,
}

#[async_trait]
impl VnicProvisioner for FakeVnics {
    fn build_config(&self, config: &VmConfig) -> Result<VnicConfig> {
        self.log.record(step::VNIC_BUILD)?;
        vnic_config(config)
    }

    async fn create_vnic(&self, vnic: &VnicConfig) -> Result<(String, VnicInfo)> {
        self.log.record(step::VNIC_CREATE)?;
        Ok((
            vnic.vnic_name(),
            VnicInfo {
                bridge: vnic.bridge_name(),
            },
        ))
    }

    async fn destroy_vnic(&self, _vnic: &VnicConfig) -> Result<()> {
        self.log.record(step::VNIC_DESTROY)
    }
}

/// VM that only records; shared by every instance of a [`FakeHypervisor`].
pub struct FakeVm {
    log: Arc<CallLog>,
    starts: Mutex<Vec<(String, IpAddr)>>,
    alive: AtomicBool,
}

impl FakeVm {
    /// What `is_running` answers, e.g. a VM that outlived its launcher.
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Arguments of every `start_vm` call, in order.
    pub fn starts(&self) -> Vec<(String, IpAddr)> {
        self.starts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Virtualizer for FakeVm {
    async fn create_image(&self, _config: &VmConfig) -> Result<()> {
        self.log.record(step::CREATE_IMAGE)
    }

    async fn start_vm(&self, vnic_name: &str, node_addr: IpAddr) -> Result<()> {
        self.starts
            .lock()
            .unwrap()
            .push((vnic_name.to_string(), node_addr));
        self.log.record(step::START_VM)
    }

    async fn stop_vm(&self) -> Result<()> {
        self.log.record(step::STOP_VM)
    }

    async fn delete_image(&self) -> Result<()> {
        self.log.record(step::DELETE_IMAGE)
    }

    async fn is_running(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

pub struct FakeHypervisor {
    vm: Arc<FakeVm>,
}

impl Hypervisor for FakeHypervisor {
    fn virtualizer(&self, _instance_dir: &Path, _config: &VmConfig) -> Arc<dyn Virtualizer> {
        Arc::clone(&self.vm) as Arc<dyn Virtualizer>
    }
}

/// Control channel that records every frame it is handed.
pub struct FakeChannel {
    connected: AtomicBool,
    failing: AtomicBool,
    attempts: Mutex<usize>,
    frames: Mutex<Vec<(ErrorKind, String)>>,
}

impl FakeChannel {
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    pub fn frames(&self) -> Vec<(ErrorKind, String)> {
        self.frames.lock().unwrap().clone()
    }
}

#[async_trait]
impl ControlChannel for FakeChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_error(&self, kind: ErrorKind, payload: Vec<u8>) -> Result<(), ChannelError> {
        *self.attempts.lock().unwrap() += 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::Transport("broken pipe".to_string()));
        }
        self.frames
            .lock()
            .unwrap()
            .push((kind, String::from_utf8(payload).unwrap()));
        Ok(())
    }
}

/// Fakes wired together, with a scratch instances directory.
pub struct Harness {
    pub log: Arc<CallLog>,
    pub vnics: Arc<FakeVnics>,
    pub vm: Arc<FakeVm>,
    pub channel: Arc<FakeChannel>,
    pub reporter: Reporter,
    pub root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let log = Arc::new(CallLog::default());
        let channel = Arc::new(FakeChannel {
            connected: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            attempts: Mutex::new(0),
            frames: Mutex::new(Vec::new()),
        });
        let reporter = Reporter::new(
            Arc::clone(&channel) as Arc<dyn ControlChannel>,
            Duration::from_secs(1),
        );

        Self {
            vnics: Arc::new(FakeVnics {
                log: Arc::clone(&log),
            }),
            vm: Arc::new(FakeVm {
                log: Arc::clone(&log),
                starts: Mutex::new(Vec::new()),
                alive: AtomicBool::new(false),
            }),
            log,
            channel,
            reporter,
            root: tempfile::tempdir().unwrap(),
        }
    }

    pub fn engine(&self, networking: NetworkingMode) -> Engine {
        Engine::new(
            networking,
            NODE_ADDR.parse().unwrap(),
            Arc::clone(&self.vnics) as Arc<dyn VnicProvisioner>,
        )
    }

    pub fn registry(&self) -> Arc<InstanceRegistry> {
        Arc::new(InstanceRegistry::new(self.root.path()))
    }

    pub fn dispatcher(&self, networking: NetworkingMode, max_instances: usize) -> Dispatcher {
        Dispatcher::new(
            agent_uuid(),
            self.engine(networking),
            self.registry(),
            Arc::new(FakeHypervisor {
                vm: Arc::clone(&self.vm),
            }),
            self.reporter.clone(),
            max_instances,
        )
    }

    pub fn instance_dir(&self, instance: InstanceUuid) -> std::path::PathBuf {
        self.root.path().join(instance.to_string())
    }

    /// Frames sent so far, rendered as `<kind> <payload>`.
    pub fn reports(&self) -> Vec<String> {
        self.channel
            .frames()
            .into_iter()
            .map(|(kind, payload)| format!("{kind} {payload}"))
            .collect()
    }
}

pub fn network_spec() -> NetworkSpec {
    NetworkSpec {
        vnic_mac: "02:00:0a:02:00:05".to_string(),
        vnic_uuid: "3390740c-dce9-48d6-b83a-a717417072ce".parse().unwrap(),
        tenant_uuid: TenantUuid::new(),
        subnet: "10.2.0.0/16".to_string(),
        private_ip: "10.2.0.5".parse().unwrap(),
        concentrator_uuid: drover_id::ConcentratorUuid::new(),
        concentrator_ip: "192.168.0.10".parse().unwrap(),
    }
}

pub fn start_command(instance: InstanceUuid, networked: bool) -> StartCommand {
    StartCommand {
        instance_uuid: instance,
        workload_agent_uuid: agent_uuid(),
        image_uuid: ImageUuid::new(),
        fw_type: FirmwareType::Legacy,
        vm_type: VmType::Qemu,
        requested_resources: vec![],
        networking: networked.then(network_spec),
    }
}

pub fn vm_config(instance: InstanceUuid, networked: bool) -> VmConfig {
    VmConfig::from_start(&start_command(instance, networked))
}

pub fn start_payload(instance: InstanceUuid, networked: bool) -> Vec<u8> {
    encode_command(&Command::Start(start_command(instance, networked))).unwrap()
}

fn target(instance: InstanceUuid) -> InstanceTarget {
    InstanceTarget {
        instance_uuid: instance,
        workload_agent_uuid: agent_uuid(),
    }
}

pub fn stop_payload(instance: InstanceUuid) -> Vec<u8> {
    encode_command(&Command::Stop(target(instance))).unwrap()
}

pub fn restart_payload(instance: InstanceUuid) -> Vec<u8> {
    encode_command(&Command::Restart(target(instance))).unwrap()
}

pub fn delete_payload(instance: InstanceUuid) -> Vec<u8> {
    encode_command(&Command::Delete(target(instance))).unwrap()
}

/// Expected report text for a failure.
pub fn report(kind: &str, instance: InstanceUuid, reason: &str) -> String {
    format!("{kind} instance_uuid: {instance}\nreason: {reason}\n")
}
