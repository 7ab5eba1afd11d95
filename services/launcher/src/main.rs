//! drover launcher
//!
//! The launcher runs on each compute node and executes instance lifecycle
//! commands sent by the controller, reporting failures back to it.
//!
//! ## Architecture
//!
//! - **Heartbeat Loop**: Reports launcher status and tracks channel connectivity
//! - **Intake Loop**: Fetches command frames and hands them to the dispatcher
//! - **Dispatcher**: Validates commands and queues them per instance
//! - **Engine**: Runs provisioning steps (mock or Firecracker VMs, TAP VNICs)

use std::sync::Arc;

use anyhow::Result;
use drover_launcher::client::{ControllerClient, HttpControlChannel};
use drover_launcher::firecracker::{FirecrackerHypervisor, FirecrackerRuntimeConfig};
use drover_launcher::{
    heartbeat, intake, Config, ControlChannel, Dispatcher, Engine, Hypervisor, HypervisorKind,
    InstanceRegistry, MockHypervisor, Reporter, TapProvisioner,
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        agent_uuid = %config.agent_uuid,
        controller_url = %config.controller_url,
        data_dir = %config.data_dir.display(),
        networking = config.networking.is_enabled(),
        hypervisor = ?config.hypervisor,
        "Starting drover launcher"
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let hypervisor: Arc<dyn Hypervisor> = match config.hypervisor {
        HypervisorKind::Firecracker => Arc::new(FirecrackerHypervisor::new(
            FirecrackerRuntimeConfig::from_config(&config),
        )),
        HypervisorKind::Mock => Arc::new(MockHypervisor::new()),
    };

    let client = Arc::new(ControllerClient::new(&config)?);
    let channel = Arc::new(HttpControlChannel::new(Arc::clone(&client)));
    let reporter = Reporter::new(
        Arc::clone(&channel) as Arc<dyn ControlChannel>,
        config.report_timeout,
    );

    let engine = Engine::new(
        config.networking,
        config.node_addr,
        Arc::new(TapProvisioner::new()),
    );
    let registry = Arc::new(InstanceRegistry::new(config.instances_dir()));
    let dispatcher = Dispatcher::new(
        config.agent_uuid,
        engine,
        Arc::clone(&registry),
        hypervisor,
        reporter,
        config.max_instances,
    );

    let restored = dispatcher.restore().await?;
    info!(restored, "Instance registry ready");

    // Start the heartbeat loop
    let heartbeat_handle = tokio::spawn(heartbeat::run_heartbeat_loop(
        Arc::clone(&client),
        Arc::clone(&channel),
        Arc::clone(&registry),
        config.max_instances,
        config.heartbeat_interval,
        shutdown_rx.clone(),
    ));

    // Start the intake loop
    let intake_handle = tokio::spawn(intake::run_intake_loop(
        Arc::clone(&client),
        dispatcher,
        config.poll_interval,
        shutdown_rx.clone(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = heartbeat_handle => {
            if let Err(e) = result {
                error!(error = %e, "Heartbeat task panicked");
            }
        }
        result = intake_handle => {
            if let Err(e) = result {
                error!(error = %e, "Intake task panicked");
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    // Give workers time to shut down gracefully
    info!("Waiting for workers to shut down...");
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    info!("Launcher shutdown complete");
    Ok(())
}
