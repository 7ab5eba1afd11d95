//! Command payloads sent by the controller to a launcher.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use drover_id::{AgentUuid, ConcentratorUuid, ImageUuid, InstanceUuid, TenantUuid, VnicUuid};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};

use crate::failure::ErrorKind;

/// Command kind, the top-level key of a command payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Start,
    Stop,
    Restart,
    Delete,
}

impl CommandKind {
    pub const ALL: &'static [CommandKind] = &[
        CommandKind::Start,
        CommandKind::Stop,
        CommandKind::Restart,
        CommandKind::Delete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Start => "start",
            CommandKind::Stop => "stop",
            CommandKind::Restart => "restart",
            CommandKind::Delete => "delete",
        }
    }

    /// Frame type failures of this command are reported under.
    pub fn error_kind(self) -> ErrorKind {
        match self {
            CommandKind::Start => ErrorKind::StartFailure,
            CommandKind::Stop => ErrorKind::StopFailure,
            CommandKind::Restart => ErrorKind::RestartFailure,
            CommandKind::Delete => ErrorKind::DeleteFailure,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Target of a command that acts on an existing instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceTarget {
    pub instance_uuid: InstanceUuid,
    pub workload_agent_uuid: AgentUuid,
}

/// Firmware the instance boots with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirmwareType {
    Efi,
    #[default]
    Legacy,
}

/// Kind of workload an instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmType {
    #[default]
    Qemu,
    Container,
}

/// Resource kinds that may be requested for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vcpus,
    MemMb,
    DiskMb,
}

/// A single requested resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestedResource {
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub value: u64,
}

/// Networking section of a start command.
///
/// Values are carried as the controller sent them; the launcher validates
/// them when it builds the VNIC configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSpec {
    pub vnic_mac: String,
    pub vnic_uuid: VnicUuid,
    pub tenant_uuid: TenantUuid,
    /// Tenant subnet in CIDR notation.
    pub subnet: String,
    pub private_ip: Ipv4Addr,
    pub concentrator_uuid: ConcentratorUuid,
    pub concentrator_ip: Ipv4Addr,
}

/// Start a new instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartCommand {
    pub instance_uuid: InstanceUuid,
    pub workload_agent_uuid: AgentUuid,
    pub image_uuid: ImageUuid,
    #[serde(default)]
    pub fw_type: FirmwareType,
    #[serde(default)]
    pub vm_type: VmType,
    #[serde(default)]
    pub requested_resources: Vec<RequestedResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networking: Option<NetworkSpec>,
}

impl StartCommand {
    /// Value requested for a resource kind, if any.
    pub fn requested(&self, kind: ResourceKind) -> Option<u64> {
        self.requested_resources
            .iter()
            .find(|r| r.kind == kind)
            .map(|r| r.value)
    }
}

/// A decoded command envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(StartCommand),
    Stop(InstanceTarget),
    Restart(InstanceTarget),
    Delete(InstanceTarget),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Start(_) => CommandKind::Start,
            Command::Stop(_) => CommandKind::Stop,
            Command::Restart(_) => CommandKind::Restart,
            Command::Delete(_) => CommandKind::Delete,
        }
    }

    pub fn instance_uuid(&self) -> InstanceUuid {
        match self {
            Command::Start(start) => start.instance_uuid,
            Command::Stop(target) | Command::Restart(target) | Command::Delete(target) => {
                target.instance_uuid
            }
        }
    }

    pub fn workload_agent_uuid(&self) -> AgentUuid {
        match self {
            Command::Start(start) => start.workload_agent_uuid,
            Command::Stop(target) | Command::Restart(target) | Command::Delete(target) => {
                target.workload_agent_uuid
            }
        }
    }
}

impl Serialize for Command {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Command::Start(start) => map.serialize_entry(self.kind().as_str(), start)?,
            Command::Stop(target) | Command::Restart(target) | Command::Delete(target) => {
                map.serialize_entry(self.kind().as_str(), target)?
            }
        }
        map.end()
    }
}
