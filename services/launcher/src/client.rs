//! Controller API client for the launcher.
//!
//! Provides methods for communicating with the controller:
//! - Fetching pending command frames
//! - Posting failure payloads
//! - Sending heartbeats

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use drover_id::AgentUuid;
use drover_payloads::{CommandKind, ErrorKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::reporter::{ChannelError, ControlChannel};

/// Controller API client.
pub struct ControllerClient {
    client: reqwest::Client,
    base_url: String,
    agent_uuid: AgentUuid,
}

impl ControllerClient {
    /// Create a new controller client.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.controller_url.trim_end_matches('/').to_string(),
            agent_uuid: config.agent_uuid,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/agents/{}/{}", self.base_url, self.agent_uuid, path)
    }

    /// Fetch the command frames queued for this launcher.
    pub async fn fetch_commands(&self) -> Result<Vec<CommandFrame>> {
        let url = self.url("commands");
        debug!(url = %url, "Fetching commands");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Failed to fetch commands");
            anyhow::bail!("Failed to fetch commands: {} - {}", status, body);
        }

        let values: Vec<serde_json::Value> = response.json().await?;
        let frames = parse_frames(values);
        if !frames.is_empty() {
            debug!(count = frames.len(), "Fetched commands");
        }

        Ok(frames)
    }

    /// Post an encoded failure payload.
    pub async fn post_error(&self, kind: ErrorKind, payload: Vec<u8>) -> Result<(), ChannelError> {
        let url = self.url(&format!("errors/{kind}"));

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/yaml")
            .body(payload)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChannelError::Rejected {
                kind,
                status: response.status().to_string(),
            });
        }

        Ok(())
    }

    /// Send heartbeat with current state.
    pub async fn send_heartbeat(&self, request: &HeartbeatRequest) -> Result<HeartbeatResponse> {
        let url = self.url("heartbeat");

        let response = self
            .client
            .post(&url)
            .json(request)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Heartbeat failed with status: {}", response.status());
        }

        let body: HeartbeatResponse = response.json().await?;
        Ok(body)
    }
}

/// One command as delivered by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub kind: CommandKind,
    /// YAML command payload.
    pub payload: String,
}

/// Decode each frame on its own; a malformed frame is logged and skipped
/// without affecting the rest of the batch.
fn parse_frames(values: Vec<serde_json::Value>) -> Vec<CommandFrame> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<CommandFrame>(value) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, "Dropping malformed command frame");
                None
            }
        })
        .collect()
}

/// Heartbeat request.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatRequest {
    pub instance_count: usize,
    pub running_count: usize,
    pub max_instances: usize,
}

/// Heartbeat response.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatResponse {
    pub accepted: bool,
    #[serde(default)]
    pub next_heartbeat_secs: Option<u64>,
}

/// Control channel over the controller's HTTP API.
///
/// Connectivity follows the heartbeat: the channel is considered up after an
/// acknowledged heartbeat and down after a failed one.
pub struct HttpControlChannel {
    client: Arc<ControllerClient>,
    connected: AtomicBool,
}

impl HttpControlChannel {
    pub fn new(client: Arc<ControllerClient>) -> Self {
        Self {
            client,
            connected: AtomicBool::new(false),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was != connected {
            if connected {
                info!("Control channel connected");
            } else {
                warn!("Control channel disconnected");
            }
        }
    }
}

#[async_trait]
impl ControlChannel for HttpControlChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_error(&self, kind: ErrorKind, payload: Vec<u8>) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        self.client.post_error(kind, payload).await
    }
}
