//! Single-dispatch worker servicing a [`JobQueue`].
//!
//! The worker takes one job at a time, hands its config path to the
//! executor and records the outcome. Executor errors, timeouts and panics
//! all end as `failed`; none of them stop the loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::adapters::Executor;
use crate::domain::Job;

use super::queue::JobQueue;

/// Worker tuning
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Per-apply timeout in seconds (default: none)
    #[serde(default)]
    pub apply_timeout_seconds: Option<u64>,
}

impl WorkerSettings {
    pub fn apply_timeout(&self) -> Option<Duration> {
        self.apply_timeout_seconds.map(Duration::from_secs)
    }
}

pub struct Worker {
    queue: Arc<JobQueue>,
    executor: Arc<dyn Executor>,
    settings: WorkerSettings,
    /// Held for the duration of one dispatch
    dispatch: Mutex<()>,
}

impl Worker {
    pub fn new(queue: Arc<JobQueue>, executor: Arc<dyn Executor>) -> Self {
        Self::with_settings(queue, executor, WorkerSettings::default())
    }

    pub fn with_settings(
        queue: Arc<JobQueue>,
        executor: Arc<dyn Executor>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            executor,
            settings,
            dispatch: Mutex::new(()),
        }
    }

    /// Dispatch at most one job. Returns the job in its terminal state, or
    /// `None` when nothing was pending.
    #[instrument(skip(self), fields(executor = %self.executor.name()))]
    pub async fn run_once(&self) -> Option<Job> {
        let _guard = self.dispatch.lock().await;

        let job = self.queue.claim_next()?;
        info!(job_id = %job.id, config_path = %job.config_path, priority = %job.priority, "Dispatching job");

        let started = Instant::now();
        let outcome = self.apply(&job).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(()) => info!(job_id = %job.id, duration_ms, "Job succeeded"),
            Err(message) => error!(job_id = %job.id, duration_ms, error = %message, "Job failed"),
        }

        self.queue.complete(&job.id, outcome)
    }

    /// Dispatch until no job is pending; returns the number dispatched
    pub async fn drain(&self) -> usize {
        let mut dispatched = 0;
        while self.run_once().await.is_some() {
            dispatched += 1;
        }
        dispatched
    }

    /// Run the worker loop on a tokio task
    pub fn spawn(self) -> WorkerHandle {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let worker = Arc::new(self);

        let task = tokio::spawn(async move {
            loop {
                worker.drain().await;
                tokio::select! {
                    _ = worker.queue.wait_for_work() => {}
                    _ = stop_rx.recv() => {
                        info!("Worker stopping");
                        break;
                    }
                }
            }
        });

        WorkerHandle { stop_tx, task }
    }

    async fn apply(&self, job: &Job) -> Result<(), String> {
        let executor = Arc::clone(&self.executor);
        let config_path = job.config_path.clone();
        let mut task = tokio::spawn(async move { executor.apply_path(&config_path).await });

        let joined = match self.settings.apply_timeout() {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    return Err(format!("apply timed out after {}s", limit.as_secs()));
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(e) if e.is_panic() => {
                warn!(job_id = %job.id, "Executor panicked");
                Err("executor panicked".to_string())
            }
            Err(e) => Err(format!("executor task aborted: {}", e)),
        }
    }
}

/// Handle to a spawned worker loop
pub struct WorkerHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stop after the current dispatch finishes
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(()).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "Worker task ended abnormally");
        }
    }
}
