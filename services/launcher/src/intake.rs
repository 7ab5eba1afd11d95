//! Command intake loop.
//!
//! The intake loop:
//! - Periodically fetches pending command frames from the controller
//! - Hands each frame to the dispatcher in arrival order
//!
//! Frames are not awaited; the dispatcher queues them per instance.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::ControllerClient;
use crate::dispatcher::Dispatcher;

/// Run the intake loop until shutdown.
pub async fn run_intake_loop(
    client: Arc<ControllerClient>,
    dispatcher: Dispatcher,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        poll_interval_secs = poll_interval.as_secs(),
        "Starting command intake loop"
    );

    let mut interval_timer = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                match client.fetch_commands().await {
                    Ok(frames) => {
                        for frame in frames {
                            debug!(kind = %frame.kind, "Dispatching command frame");
                            dispatcher.dispatch(frame.kind, frame.payload.as_bytes()).await;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to fetch commands, will retry");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Command intake shutting down");
                    break;
                }
            }
        }
    }
}
