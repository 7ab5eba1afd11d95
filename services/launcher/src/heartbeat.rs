//! Heartbeat loop for reporting launcher status to the controller.
//!
//! The launcher sends periodic heartbeats to the controller to:
//! - Indicate the launcher is alive
//! - Report instance counts and capacity
//! - Track whether the control channel is usable

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::client::{ControllerClient, HeartbeatRequest, HttpControlChannel};
use crate::instance::InstanceRegistry;

/// Run the heartbeat loop until shutdown.
pub async fn run_heartbeat_loop(
    client: Arc<ControllerClient>,
    channel: Arc<HttpControlChannel>,
    registry: Arc<InstanceRegistry>,
    max_instances: usize,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "Starting heartbeat loop");

    let mut consecutive_failures = 0u32;
    let mut interval_timer = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                let request = HeartbeatRequest {
                    instance_count: registry.len().await,
                    running_count: registry.running_count().await,
                    max_instances,
                };

                match client.send_heartbeat(&request).await {
                    Ok(response) => {
                        consecutive_failures = 0;
                        channel.set_connected(response.accepted);
                        debug!(
                            accepted = response.accepted,
                            next_interval = response.next_heartbeat_secs,
                            instance_count = request.instance_count,
                            "Heartbeat acknowledged"
                        );
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        channel.set_connected(false);
                        if consecutive_failures <= 3 {
                            warn!(
                                error = %e,
                                consecutive_failures,
                                "Heartbeat failed"
                            );
                        } else {
                            error!(
                                error = %e,
                                consecutive_failures,
                                "Heartbeat failed repeatedly"
                            );
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Heartbeat loop shutting down");
                    break;
                }
            }
        }
    }
}
