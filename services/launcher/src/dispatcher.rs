//! Command dispatch.
//!
//! The dispatcher sits between command intake and the engine:
//! - Decodes each frame, rejecting corrupt payloads
//! - Checks the command is addressed to this launcher
//! - Admits new instances (duplicate and capacity checks)
//! - Queues the command on its instance's FIFO queue
//!
//! Every instance has one worker task draining its queue, so commands for
//! the same instance run in the order they arrived while different
//! instances proceed concurrently. State checks (unknown instance, already
//! running, already stopped) are made by the worker when the command reaches
//! the front of the queue, so they observe the effect of earlier commands.

use std::sync::Arc;

use anyhow::Result;
use drover_id::{AgentUuid, InstanceUuid};
use drover_payloads::{
    decode_as, recover_instance_uuid, Command, CommandKind, DecodeError, DeleteFailureReason,
    FailurePayload, FailureReason, RestartFailureReason, StartCommand, StartFailureReason,
    StopFailureReason,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::instance::{Instance, InstanceRegistry, QueuedCommand, ReserveError, VmConfig};
use crate::reporter::Reporter;
use crate::runtime::Hypervisor;

/// Resolves once a queued command has finished, successfully or not.
#[derive(Debug)]
pub struct Completion(oneshot::Receiver<()>);

impl Completion {
    pub async fn wait(self) {
        let _ = self.0.await;
    }
}

/// Routes decoded commands to per-instance workers.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    agent_uuid: AgentUuid,
    engine: Engine,
    registry: Arc<InstanceRegistry>,
    hypervisor: Arc<dyn Hypervisor>,
    reporter: Reporter,
    max_instances: usize,
}

impl Dispatcher {
    pub fn new(
        agent_uuid: AgentUuid,
        engine: Engine,
        registry: Arc<InstanceRegistry>,
        hypervisor: Arc<dyn Hypervisor>,
        reporter: Reporter,
        max_instances: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                agent_uuid,
                engine,
                registry,
                hypervisor,
                reporter,
                max_instances,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.inner.registry
    }

    /// Reload persisted instances and start their workers.
    pub async fn restore(&self) -> Result<usize> {
        let restored = self
            .inner
            .registry
            .restore(self.inner.hypervisor.as_ref())
            .await?;

        let count = restored.len();
        for (instance, rx) in restored {
            spawn_worker(Arc::clone(&self.inner), instance, rx);
        }
        Ok(count)
    }

    /// Handle one command frame.
    ///
    /// Returns `None` when the command was rejected up front (any failure
    /// has already been reported), otherwise a handle to await its outcome.
    pub async fn dispatch(&self, kind: CommandKind, payload: &[u8]) -> Option<Completion> {
        let command = match decode_as(kind, payload) {
            Ok(command) => command,
            Err(e) => {
                self.inner.reject_undecodable(kind, payload, &e).await;
                return None;
            }
        };

        let instance_uuid = command.instance_uuid();

        if command.workload_agent_uuid() != self.inner.agent_uuid {
            warn!(
                %instance_uuid,
                %kind,
                workload_agent_uuid = %command.workload_agent_uuid(),
                "Command addressed to another agent"
            );
            self.inner.reject(kind, instance_uuid, Rejection::InvalidData).await;
            return None;
        }

        let instance = match &command {
            Command::Start(start) => match self.admit(start).await {
                Ok(instance) => instance,
                Err(reason) => {
                    self.inner.refuse(instance_uuid, reason).await;
                    return None;
                }
            },
            _ => match self.inner.registry.get(instance_uuid).await {
                Some(instance) => instance,
                None => {
                    self.inner.reject(kind, instance_uuid, Rejection::NoInstance).await;
                    return None;
                }
            },
        };

        debug!(%instance_uuid, %kind, "Queueing command");

        let (done, rx) = oneshot::channel();
        if let Err(queued) = instance.enqueue(QueuedCommand { command, done }) {
            // The worker drained its queue after a delete.
            self.inner
                .reject(queued.command.kind(), instance_uuid, Rejection::NoInstance)
                .await;
            return None;
        }

        Some(Completion(rx))
    }

    /// Register a new instance for a start command.
    async fn admit(&self, start: &StartCommand) -> Result<Arc<Instance>, StartFailureReason> {
        let config = VmConfig::from_start(start);
        let dir = self.inner.registry.instance_dir(config.instance_uuid);
        let vm = self.inner.hypervisor.virtualizer(&dir, &config);
        let (instance, rx) = Instance::new(dir, config, vm);

        match self
            .inner
            .registry
            .reserve(Arc::clone(&instance), self.inner.max_instances)
            .await
        {
            Ok(()) => {
                spawn_worker(Arc::clone(&self.inner), Arc::clone(&instance), rx);
                Ok(instance)
            }
            Err(ReserveError::Exists { running: true }) => Err(StartFailureReason::AlreadyRunning),
            Err(ReserveError::Exists { running: false }) => {
                Err(StartFailureReason::InstanceExists)
            }
            Err(ReserveError::Full) => Err(StartFailureReason::FullComputeNode),
        }
    }
}

/// Drain an instance's command queue until the instance is gone.
fn spawn_worker(
    inner: Arc<Inner>,
    instance: Arc<Instance>,
    mut rx: mpsc::UnboundedReceiver<QueuedCommand>,
) {
    tokio::spawn(async move {
        while let Some(QueuedCommand { command, done }) = rx.recv().await {
            inner.execute(&instance, command).await;
            let _ = done.send(());

            if instance.is_deleted() {
                // Commands already queued are still answered.
                rx.close();
            }
        }
        debug!(instance_uuid = %instance.uuid(), "Instance worker exiting");
    });
}

/// A command refused before reaching the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    InvalidPayload,
    InvalidData,
    NoInstance,
}

impl Inner {
    async fn execute(&self, instance: &Instance, command: Command) {
        let instance_uuid = instance.uuid();
        let config = instance.config();

        match command {
            Command::Start(_) => {
                match self.engine.start(instance.dir(), instance.vm(), config).await {
                    Ok(()) => instance.set_running(true),
                    Err(e) => {
                        warn!(%instance_uuid, error = %e, "Start failed");
                        instance.mark_deleted();
                        self.registry.remove(instance_uuid).await;
                        e.send(&self.reporter, instance_uuid).await;
                    }
                }
            }
            Command::Restart(_) => {
                if instance.is_deleted() {
                    return self.refuse(instance_uuid, RestartFailureReason::NoInstance).await;
                }
                if instance.is_running() {
                    return self
                        .refuse(instance_uuid, RestartFailureReason::AlreadyRunning)
                        .await;
                }
                match self.engine.restart(instance.dir(), instance.vm(), config).await {
                    Ok(()) => instance.set_running(true),
                    Err(e) => {
                        warn!(%instance_uuid, error = %e, "Restart failed");
                        e.send(&self.reporter, instance_uuid).await;
                    }
                }
            }
            Command::Stop(_) => {
                if instance.is_deleted() {
                    return self.refuse(instance_uuid, StopFailureReason::NoInstance).await;
                }
                if !instance.is_running() {
                    return self
                        .refuse(instance_uuid, StopFailureReason::AlreadyStopped)
                        .await;
                }
                match self.engine.stop(instance.dir(), instance.vm(), config).await {
                    Ok(()) => instance.set_running(false),
                    Err(e) => {
                        warn!(%instance_uuid, error = %e, "Stop failed");
                        e.send(&self.reporter, instance_uuid).await;
                    }
                }
            }
            Command::Delete(_) => {
                if instance.is_deleted() {
                    return self.refuse(instance_uuid, DeleteFailureReason::NoInstance).await;
                }
                let running = instance.is_running();
                match self
                    .engine
                    .delete(instance.dir(), instance.vm(), config, running)
                    .await
                {
                    Ok(()) => {
                        instance.mark_deleted();
                        self.registry.remove(instance_uuid).await;
                    }
                    Err(e) => {
                        warn!(%instance_uuid, error = %e, "Delete failed");
                        if e.reason != DeleteFailureReason::ShutdownFailure {
                            instance.set_running(false);
                        }
                        e.send(&self.reporter, instance_uuid).await;
                    }
                }
            }
        }
    }

    /// Report a decode failure if the instance it concerns can be identified.
    async fn reject_undecodable(&self, kind: CommandKind, payload: &[u8], err: &DecodeError) {
        let Some(instance_uuid) = recover_instance_uuid(payload) else {
            warn!(%kind, error = %err, "Dropping undecodable command");
            return;
        };

        warn!(%instance_uuid, %kind, error = %err, "Rejecting undecodable command");

        let rejection = if err.is_invalid_data() {
            Rejection::InvalidData
        } else {
            Rejection::InvalidPayload
        };
        self.reject(kind, instance_uuid, rejection).await;
    }

    /// Report a rejection under the taxonomy of the command kind.
    async fn reject(&self, kind: CommandKind, instance_uuid: InstanceUuid, rejection: Rejection) {
        match (kind, rejection) {
            (CommandKind::Start, Rejection::InvalidPayload) => {
                self.refuse(instance_uuid, StartFailureReason::InvalidPayload).await
            }
            (CommandKind::Start, Rejection::InvalidData) => {
                self.refuse(instance_uuid, StartFailureReason::InvalidData).await
            }
            (CommandKind::Start, Rejection::NoInstance) => {
                warn!(%instance_uuid, "Start raced with instance removal");
            }
            (CommandKind::Stop, Rejection::InvalidPayload) => {
                self.refuse(instance_uuid, StopFailureReason::InvalidPayload).await
            }
            (CommandKind::Stop, Rejection::InvalidData) => {
                self.refuse(instance_uuid, StopFailureReason::InvalidData).await
            }
            (CommandKind::Stop, Rejection::NoInstance) => {
                self.refuse(instance_uuid, StopFailureReason::NoInstance).await
            }
            (CommandKind::Restart, Rejection::InvalidPayload) => {
                self.refuse(instance_uuid, RestartFailureReason::InvalidPayload).await
            }
            (CommandKind::Restart, Rejection::InvalidData) => {
                self.refuse(instance_uuid, RestartFailureReason::InvalidData).await
            }
            (CommandKind::Restart, Rejection::NoInstance) => {
                self.refuse(instance_uuid, RestartFailureReason::NoInstance).await
            }
            (CommandKind::Delete, Rejection::InvalidPayload) => {
                self.refuse(instance_uuid, DeleteFailureReason::InvalidPayload).await
            }
            (CommandKind::Delete, Rejection::InvalidData) => {
                self.refuse(instance_uuid, DeleteFailureReason::InvalidData).await
            }
            (CommandKind::Delete, Rejection::NoInstance) => {
                self.refuse(instance_uuid, DeleteFailureReason::NoInstance).await
            }
        }
    }

    async fn refuse<R: FailureReason>(&self, instance_uuid: InstanceUuid, reason: R) {
        info!(
            %instance_uuid,
            kind = %R::KIND,
            reason = reason.token(),
            "Refusing command"
        );
        self.reporter
            .report(&FailurePayload::new(instance_uuid, reason))
            .await;
    }
}
