//! Worker task with command inbox, scheduling loop and graceful shutdown.
//!
//! [`spawn_worker`] runs a [`ScanWorker`] on its own task. Coordinator
//! commands arrive through an inbox and scheduling ticks fire from a timer;
//! both are handled one at a time on that task, so the worker state is never
//! touched concurrently.

use tokio::signal;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::WorkerError;
use crate::models::{JobId, JobSpec, StatusSnapshot, StopFlavor, WorkShard};

use super::ScanWorker;

/// Reply channel of a command.
pub type Responder<T> = oneshot::Sender<Result<T, WorkerError>>;

/// A message in a worker's inbox.
#[derive(Debug)]
pub enum WorkerMessage {
    /// See [`ScanWorker::ensure_initialized`].
    EnsureInitialized {
        /// Job to initialize.
        job_id: JobId,
        /// Its spec.
        spec: JobSpec,
        /// This worker's share of it.
        work_shard: WorkShard,
        /// Where to send the reply.
        respond_to: Responder<StatusSnapshot>,
    },
    /// See [`ScanWorker::ensure_resumed`].
    EnsureResumed {
        /// Where to send the reply.
        respond_to: Responder<StatusSnapshot>,
    },
    /// See [`ScanWorker::ensure_paused`].
    EnsurePaused {
        /// Where to send the reply.
        respond_to: Responder<StatusSnapshot>,
    },
    /// See [`ScanWorker::ensure_stopped`].
    EnsureStopped {
        /// How to stop.
        flavor: StopFlavor,
        /// Where to send the reply.
        respond_to: Responder<Option<StatusSnapshot>>,
    },
    /// Liveness nudge, no reply.
    EnsureAwake,
}

/// Creates a shutdown signal channel.
///
/// Send `true` on the sender to stop every worker holding a receiver.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = shutdown_signal();
/// let (handle, task) = spawn_worker(worker, shutdown_rx);
/// shutdown_tx.send(true).ok();
/// ```
#[must_use]
pub fn shutdown_signal() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Waits for SIGINT or SIGTERM, then triggers shutdown.
#[allow(clippy::cognitive_complexity)]
pub async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down workers");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down workers");
        }
    }

    if let Err(e) = shutdown_tx.send(true) {
        tracing::error!("Failed to send shutdown signal: {}", e);
    }
}

/// Client side of a spawned worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    worker_id: String,
    sender: mpsc::Sender<WorkerMessage>,
}

impl WorkerHandle {
    /// Returns the worker's unique identifier.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Sends [`WorkerMessage::EnsureInitialized`] and waits for the reply.
    ///
    /// # Errors
    ///
    /// Returns the worker's error, or `WorkerError::WorkerGone` if the worker
    /// is not running.
    pub async fn ensure_initialized(
        &self,
        job_id: JobId,
        spec: JobSpec,
        work_shard: WorkShard,
    ) -> Result<StatusSnapshot, WorkerError> {
        self.request(|respond_to| WorkerMessage::EnsureInitialized {
            job_id,
            spec,
            work_shard,
            respond_to,
        })
        .await
    }

    /// Sends [`WorkerMessage::EnsureResumed`] and waits for the reply.
    ///
    /// # Errors
    ///
    /// Returns the worker's error, or `WorkerError::WorkerGone`.
    pub async fn ensure_resumed(&self) -> Result<StatusSnapshot, WorkerError> {
        self.request(|respond_to| WorkerMessage::EnsureResumed { respond_to })
            .await
    }

    /// Sends [`WorkerMessage::EnsurePaused`] and waits for the reply.
    ///
    /// # Errors
    ///
    /// Returns the worker's error, or `WorkerError::WorkerGone`.
    pub async fn ensure_paused(&self) -> Result<StatusSnapshot, WorkerError> {
        self.request(|respond_to| WorkerMessage::EnsurePaused { respond_to })
            .await
    }

    /// Sends [`WorkerMessage::EnsureStopped`] and waits for the reply.
    ///
    /// # Errors
    ///
    /// Returns the worker's error, or `WorkerError::WorkerGone`.
    pub async fn ensure_stopped(&self, flavor: StopFlavor) -> Result<Option<StatusSnapshot>, WorkerError> {
        self.request(|respond_to| WorkerMessage::EnsureStopped { flavor, respond_to })
            .await
    }

    /// Nudges the worker without waiting. Returns false if it is not running.
    pub fn ensure_awake(&self) -> bool {
        match self.sender.try_send(WorkerMessage::EnsureAwake) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(Responder<T>) -> WorkerMessage,
    ) -> Result<T, WorkerError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(message(respond_to))
            .await
            .map_err(|_| WorkerError::WorkerGone)?;
        response.await.map_err(|_| WorkerError::WorkerGone)?
    }
}

/// Runs `worker` on a new task until `shutdown` fires, its inbox closes or it
/// fails.
#[must_use]
pub fn spawn_worker(
    worker: ScanWorker,
    shutdown: watch::Receiver<bool>,
) -> (WorkerHandle, JoinHandle<Result<(), WorkerError>>) {
    let (sender, inbox) = mpsc::channel(worker.config().inbox_capacity.max(1));
    let handle = WorkerHandle {
        worker_id: worker.worker_id().to_string(),
        sender,
    };
    let task = tokio::spawn(worker.run(inbox, shutdown));
    (handle, task)
}

impl ScanWorker {
    /// Processes messages and scheduling ticks until shutdown.
    ///
    /// Protocol violations are replied to and the worker carries on. Any other
    /// failure is replied to as `WorkerError::Crashed` and ends the loop with
    /// the original error; the persisted state is left as of the last
    /// successful persist. On a clean shutdown the state is persisted once
    /// more as final.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the worker.
    pub async fn run(
        mut self,
        mut inbox: mpsc::Receiver<WorkerMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), WorkerError> {
        tracing::info!(
            worker_id = %self.worker_id,
            phase = ?self.phase(),
            "Worker started"
        );
        let mut next_update_at = self.has_active_job().then(Instant::now);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let wake_at = next_update_at;
            let tick = async move {
                match wake_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                message = inbox.recv() => {
                    let Some(message) = message else {
                        tracing::info!(worker_id = %self.worker_id, "Inbox closed");
                        break;
                    };
                    self.handle_message(message).await?;
                    next_update_at = self.has_active_job().then(Instant::now);
                }
                () = tick => {
                    next_update_at = match self.update_active_job().await {
                        Ok(delay) => delay.map(|delay| Instant::now() + delay),
                        Err(e) => {
                            tracing::error!(
                                worker_id = %self.worker_id,
                                error = %e,
                                "Scheduling tick failed, stopping worker"
                            );
                            return Err(e);
                        }
                    };
                }
            }
        }

        self.persist_state(true).await?;
        tracing::info!(
            worker_id = %self.worker_id,
            phase = ?self.phase(),
            "Worker shutdown complete"
        );
        Ok(())
    }

    async fn handle_message(&mut self, message: WorkerMessage) -> Result<(), WorkerError> {
        match message {
            WorkerMessage::EnsureInitialized {
                job_id,
                spec,
                work_shard,
                respond_to,
            } => {
                let result = self.ensure_initialized(job_id, spec, work_shard).await;
                self.reply(respond_to, result)
            }
            WorkerMessage::EnsureResumed { respond_to } => {
                let result = self.ensure_resumed().await;
                self.reply(respond_to, result)
            }
            WorkerMessage::EnsurePaused { respond_to } => {
                let result = self.ensure_paused().await;
                self.reply(respond_to, result)
            }
            WorkerMessage::EnsureStopped { flavor, respond_to } => {
                let result = self.ensure_stopped(flavor).await;
                self.reply(respond_to, result)
            }
            WorkerMessage::EnsureAwake => {
                self.ensure_awake();
                Ok(())
            }
        }
    }

    fn reply<T>(&self, respond_to: Responder<T>, result: Result<T, WorkerError>) -> Result<(), WorkerError> {
        let (reply, outcome) = match result {
            Ok(value) => (Ok(value), Ok(())),
            Err(e) if e.is_protocol_violation() => {
                tracing::warn!(worker_id = %self.worker_id, error = %e, "Rejected command");
                (Err(e), Ok(()))
            }
            Err(e) => {
                tracing::error!(
                    worker_id = %self.worker_id,
                    error = %e,
                    "Command failed, stopping worker"
                );
                let crashed = WorkerError::Crashed { reason: e.to_string() };
                (Err(crashed), Err(e))
            }
        };
        if respond_to.send(reply).is_err() {
            tracing::debug!(worker_id = %self.worker_id, "Command sender went away before the reply");
        }
        outcome
    }
}

