//! Failure taxonomies.
//!
//! Each command kind owns an independent, closed enumeration of reasons.
//! Every reason has a fixed wire token (`already_running`) and a fixed
//! description used in logs and operator-facing messages.

use std::fmt;

use drover_id::InstanceUuid;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// The frame type a failure payload is sent under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    StartFailure,
    StopFailure,
    RestartFailure,
    DeleteFailure,
}

impl ErrorKind {
    pub const ALL: &'static [ErrorKind] = &[
        ErrorKind::StartFailure,
        ErrorKind::StopFailure,
        ErrorKind::RestartFailure,
        ErrorKind::DeleteFailure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::StartFailure => "start_failure",
            ErrorKind::StopFailure => "stop_failure",
            ErrorKind::RestartFailure => "restart_failure",
            ErrorKind::DeleteFailure => "delete_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A member of one command's failure taxonomy.
pub trait FailureReason:
    fmt::Debug
    + fmt::Display
    + Copy
    + Eq
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Frame type failures of this taxonomy are reported under.
    const KIND: ErrorKind;

    /// Every member, in declaration order.
    const ALL: &'static [Self];

    /// Fixed human-readable description.
    fn describe(self) -> &'static str;

    /// Fixed wire token.
    fn token(self) -> &'static str;
}

/// Defines a failure taxonomy.
///
/// Members are listed once with their token and description, so a member
/// cannot exist without both.
macro_rules! failure_reason {
    (
        $(#[$meta:meta])*
        pub enum $name:ident: $kind:path {
            $( $(#[$vmeta:meta])* $variant:ident = $token:literal => $desc:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $token)]
                $variant,
            )+
        }

        impl FailureReason for $name {
            const KIND: ErrorKind = $kind;
            const ALL: &'static [Self] = &[$(Self::$variant),+];

            fn describe(self) -> &'static str {
                match self {
                    $(Self::$variant => $desc,)+
                }
            }

            fn token(self) -> &'static str {
                match self {
                    $(Self::$variant => $token,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.describe())
            }
        }
    };
}

failure_reason! {
    /// Reasons a `start` command can fail.
    pub enum StartFailureReason: ErrorKind::StartFailure {
        /// No node in the cluster can host the instance.
        FullCloud = "full_cloud" => "Cloud is full",
        /// This node cannot host another instance.
        FullComputeNode = "full_node" => "Compute node is full",
        NoComputeNodes = "no_compute_nodes" => "No compute node available",
        NoNetworkNodes = "no_network_nodes" => "No network node available",
        InvalidPayload = "invalid_payload" => "YAML payload is corrupt",
        InvalidData = "invalid_data" => "Command section of YAML payload is corrupt or missing required information",
        AlreadyRunning = "already_running" => "Instance is already running",
        InstanceExists = "instance_exists" => "Instance already exists",
        ImageFailure = "image_failure" => "Failed to create instance image",
        LaunchFailure = "launch_failure" => "Failed to launch instance",
        NetworkFailure = "network_failure" => "Failed to locate VNIC for instance",
    }
}

failure_reason! {
    /// Reasons a `stop` command can fail.
    pub enum StopFailureReason: ErrorKind::StopFailure {
        NoInstance = "no_instance" => "Instance does not exist",
        InvalidPayload = "invalid_payload" => "YAML payload is corrupt",
        InvalidData = "invalid_data" => "Command section of YAML payload is corrupt or missing required information",
        AlreadyStopped = "already_stopped" => "Instance has already shut down",
        ShutdownFailure = "shutdown_failure" => "Failed to shut down instance",
    }
}

failure_reason! {
    /// Reasons a `restart` command can fail.
    pub enum RestartFailureReason: ErrorKind::RestartFailure {
        NoInstance = "no_instance" => "Instance does not exist",
        InvalidPayload = "invalid_payload" => "YAML payload is corrupt",
        InvalidData = "invalid_data" => "Command section of YAML payload is corrupt or missing required information",
        AlreadyRunning = "already_running" => "Instance is already running",
        /// Persisted state cannot support a restart, e.g. the network
        /// configuration cannot be rebuilt from it.
        InstanceCorrupt = "instance_corrupt" => "Instance is corrupt",
        LaunchFailure = "launch_failure" => "Failed to launch instance",
        NetworkFailure = "network_failure" => "Failed to locate VNIC for instance",
    }
}

failure_reason! {
    /// Reasons a `delete` command can fail.
    pub enum DeleteFailureReason: ErrorKind::DeleteFailure {
        NoInstance = "no_instance" => "Instance does not exist",
        InvalidPayload = "invalid_payload" => "YAML payload is corrupt",
        InvalidData = "invalid_data" => "Command section of YAML payload is corrupt or missing required information",
        ShutdownFailure = "shutdown_failure" => "Failed to shut down instance",
        NetworkFailure = "network_failure" => "Failed to destroy VNIC for instance",
        StorageFailure = "storage_failure" => "Failed to remove instance storage",
    }
}

/// A failure report for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailurePayload<R> {
    pub instance_uuid: InstanceUuid,
    pub reason: R,
}

impl<R: FailureReason> FailurePayload<R> {
    pub fn new(instance_uuid: InstanceUuid, reason: R) -> Self {
        Self {
            instance_uuid,
            reason,
        }
    }

    /// Frame type this payload is sent under.
    pub fn kind(&self) -> ErrorKind {
        R::KIND
    }
}

pub type StartFailure = FailurePayload<StartFailureReason>;
pub type StopFailure = FailurePayload<StopFailureReason>;
pub type RestartFailure = FailurePayload<RestartFailureReason>;
pub type DeleteFailure = FailurePayload<DeleteFailureReason>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashSet;

    fn assert_taxonomy<R: FailureReason>() {
        let mut descriptions = HashSet::new();
        let mut tokens = HashSet::new();
        for reason in R::ALL {
            let description = reason.describe();
            assert!(!description.is_empty(), "{reason:?} has no description");
            assert!(descriptions.insert(description), "{reason:?} reuses a description");
            assert!(tokens.insert(reason.token()), "{reason:?} reuses a token");
            assert_eq!(reason.to_string(), description);

            let yaml = serde_yaml::to_string(reason).unwrap();
            assert_eq!(yaml.trim_end(), reason.token());
            let parsed: R = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(&parsed, reason);
        }
    }

    #[test]
    fn test_start_taxonomy() {
        assert_taxonomy::<StartFailureReason>();
        assert_eq!(StartFailureReason::ALL.len(), 11);
    }

    #[test]
    fn test_stop_taxonomy() {
        assert_taxonomy::<StopFailureReason>();
    }

    #[test]
    fn test_restart_taxonomy() {
        assert_taxonomy::<RestartFailureReason>();
        assert_eq!(RestartFailureReason::ALL.len(), 7);
    }

    #[test]
    fn test_delete_taxonomy() {
        assert_taxonomy::<DeleteFailureReason>();
    }

    #[rstest]
    #[case(RestartFailureReason::NoInstance, "Instance does not exist")]
    #[case(RestartFailureReason::InvalidPayload, "YAML payload is corrupt")]
    #[case(
        RestartFailureReason::InvalidData,
        "Command section of YAML payload is corrupt or missing required information"
    )]
    #[case(RestartFailureReason::AlreadyRunning, "Instance is already running")]
    #[case(RestartFailureReason::InstanceCorrupt, "Instance is corrupt")]
    #[case(RestartFailureReason::LaunchFailure, "Failed to launch instance")]
    #[case(RestartFailureReason::NetworkFailure, "Failed to locate VNIC for instance")]
    fn test_restart_descriptions(#[case] reason: RestartFailureReason, #[case] expected: &str) {
        assert_eq!(reason.describe(), expected);
    }

    #[test]
    fn test_kinds_bound_per_taxonomy() {
        assert_eq!(StartFailureReason::KIND, ErrorKind::StartFailure);
        assert_eq!(StopFailureReason::KIND, ErrorKind::StopFailure);
        assert_eq!(RestartFailureReason::KIND, ErrorKind::RestartFailure);
        assert_eq!(DeleteFailureReason::KIND, ErrorKind::DeleteFailure);

        let payload = RestartFailure::new(InstanceUuid::new(), RestartFailureReason::LaunchFailure);
        assert_eq!(payload.kind(), ErrorKind::RestartFailure);
    }

    #[test]
    fn test_full_node_token() {
        assert_eq!(StartFailureReason::FullComputeNode.token(), "full_node");
    }

    #[test]
    fn test_error_kind_serialization() {
        for kind in ErrorKind::ALL {
            let yaml = serde_yaml::to_string(kind).unwrap();
            assert_eq!(yaml.trim_end(), kind.as_str());
        }
    }
}
