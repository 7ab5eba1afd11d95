//! Instance command execution engine.
//!
//! The engine turns one lifecycle command for one instance into an ordered
//! sequence of provisioning steps. Each step maps its failure to a single
//! member of the command's failure taxonomy and the sequence stops at the
//! first failure. Nothing is retried.
//!
//! The engine holds no per-instance state. Validation that needs the
//! registry (unknown instance, already running, corrupt payload) happens in
//! the dispatcher before a command gets here, and the caller decides whether
//! to report a [`CommandError`].

mod delete;
mod restart;
mod start;
mod stop;

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use drover_id::InstanceUuid;
use drover_payloads::{FailurePayload, FailureReason};

use crate::config::NetworkingMode;
use crate::network::VnicProvisioner;
use crate::reporter::{Delivery, Reporter};

/// A failed command: the taxonomy member to report plus the underlying cause.
#[derive(Debug)]
pub struct CommandError<R> {
    pub source: anyhow::Error,
    pub reason: R,
}

impl<R: FailureReason> CommandError<R> {
    pub fn new(reason: R, source: impl Into<anyhow::Error>) -> Self {
        Self {
            source: source.into(),
            reason,
        }
    }

    /// Report this failure for `instance`.
    ///
    /// Never fails; delivery problems are logged by the reporter.
    pub async fn send(&self, reporter: &Reporter, instance: InstanceUuid) -> Delivery {
        reporter
            .report(&FailurePayload::new(instance, self.reason))
            .await
    }
}

impl<R: FailureReason> fmt::Display for CommandError<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.reason, self.source)
    }
}

impl<R: FailureReason> std::error::Error for CommandError<R> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

/// Executes lifecycle commands against the provisioning adapters.
pub struct Engine {
    networking: NetworkingMode,
    node_addr: IpAddr,
    vnics: Arc<dyn VnicProvisioner>,
}

impl Engine {
    pub fn new(
        networking: NetworkingMode,
        node_addr: IpAddr,
        vnics: Arc<dyn VnicProvisioner>,
    ) -> Self {
        Self {
            networking,
            node_addr,
            vnics,
        }
    }
}
