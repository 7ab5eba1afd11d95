//! Failure reporting over the control channel.
//!
//! Reporting is best effort: a report is skipped while the channel is down,
//! bounded by a timeout while it is up, and any failure is logged and
//! dropped. The outcome of the command being reported is never affected.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drover_payloads::{encode_failure, ErrorKind, FailurePayload, FailureReason};
use thiserror::Error;
use tracing::{debug, error};

/// Errors from sending on the control channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("control channel is not connected")]
    NotConnected,

    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    #[error("controller rejected {kind}: {status}")]
    Rejected { kind: ErrorKind, status: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Connection to the controller that failure payloads are sent over.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Whether the channel is currently usable. Must not block.
    fn is_connected(&self) -> bool;

    /// Send an encoded failure payload as a frame of the given kind.
    async fn send_error(&self, kind: ErrorKind, payload: Vec<u8>) -> Result<(), ChannelError>;
}

/// What became of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Channel was down; nothing was sent.
    Skipped,
    /// Handed to the channel successfully.
    Sent,
    /// Encoding or sending failed; logged and dropped.
    Failed,
}

/// Sends failure payloads without ever blocking past a timeout.
#[derive(Clone)]
pub struct Reporter {
    channel: Arc<dyn ControlChannel>,
    timeout: Duration,
}

impl Reporter {
    pub fn new(channel: Arc<dyn ControlChannel>, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    /// Report a failure.
    pub async fn report<R: FailureReason>(&self, payload: &FailurePayload<R>) -> Delivery {
        if !self.channel.is_connected() {
            debug!(
                instance_uuid = %payload.instance_uuid,
                reason = payload.reason.token(),
                "Control channel down, not reporting"
            );
            return Delivery::Skipped;
        }

        let bytes = match encode_failure(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(
                    instance_uuid = %payload.instance_uuid,
                    kind = %R::KIND,
                    error = %e,
                    "Failed to encode failure payload"
                );
                return Delivery::Failed;
            }
        };

        let send = self.channel.send_error(R::KIND, bytes);
        let result = match tokio::time::timeout(self.timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(self.timeout)),
        };

        match result {
            Ok(()) => {
                debug!(
                    instance_uuid = %payload.instance_uuid,
                    kind = %R::KIND,
                    reason = payload.reason.token(),
                    "Reported failure"
                );
                Delivery::Sent
            }
            Err(e) => {
                error!(
                    instance_uuid = %payload.instance_uuid,
                    kind = %R::KIND,
                    reason = payload.reason.token(),
                    error = %e,
                    "Failed to report failure"
                );
                Delivery::Failed
            }
        }
    }
}
