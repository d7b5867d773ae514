//! Priority-ordered, idempotent apply-job queue.
//!
//! Jobs wait in one FIFO per priority. The worker always takes the oldest
//! job of the highest priority present. Every terminal transition is
//! published to subscribers after the queue lock has been released, so a
//! subscriber may call back into the queue (the workflow engine enqueues
//! its next step from inside its subscription).

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::domain::{EmergencyStopState, Job, JobFilter, JobStatus, Priority, QueueStats};

use super::error::{parse_seq, ControlError, Result};

/// Completion hook, invoked once per terminal transition with a copy of the job
pub type Subscriber = Arc<dyn Fn(&Job) + Send + Sync>;

/// Queue sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum number of pending jobs (default: 1024)
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    1024
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

#[derive(Default)]
struct QueueState {
    next_seq: u64,
    jobs: BTreeMap<u64, Job>,
    /// One FIFO of job sequence numbers per priority, indexed by `Priority::rank`
    pending: [VecDeque<u64>; 3],
    /// Idempotency key -> job sequence, kept for the process lifetime
    keys: HashMap<String, u64>,
    emergency: EmergencyStopState,
}

impl QueueState {
    fn pending_len(&self) -> usize {
        self.pending.iter().map(VecDeque::len).sum()
    }
}

/// In-memory job queue serviced by one [`Worker`](super::worker::Worker)
pub struct JobQueue {
    settings: QueueSettings,
    state: RwLock<QueueState>,
    subscribers: RwLock<Vec<Subscriber>>,
    ready: Notify,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(QueueSettings::default())
    }
}

impl JobQueue {
    /// Create a queue; a zero capacity is raised to one
    pub fn new(mut settings: QueueSettings) -> Self {
        settings.capacity = settings.capacity.max(1);
        Self {
            settings,
            state: RwLock::new(QueueState::default()),
            subscribers: RwLock::new(Vec::new()),
            ready: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.settings.capacity
    }

    /// Enqueue an apply of `config_path`.
    ///
    /// A non-empty `idempotency_key` that was seen before returns the job it
    /// created, whatever that job's status, without creating anything.
    pub fn enqueue(
        &self,
        config_path: &str,
        idempotency_key: &str,
        force: bool,
        priority: Priority,
    ) -> Result<Job> {
        let config_path = config_path.trim();
        if config_path.is_empty() {
            return Err(ControlError::invalid("config path is required"));
        }

        let mut state = self.state.write();

        if state.emergency.active && !force {
            warn!(config_path, "Enqueue rejected by emergency stop");
            return Err(ControlError::EmergencyStopActive {
                reason: state.emergency.reason.clone(),
            });
        }

        if !idempotency_key.is_empty() {
            if let Some(seq) = state.keys.get(idempotency_key) {
                if let Some(existing) = state.jobs.get(seq) {
                    debug!(job_id = %existing.id, idempotency_key, "Idempotent enqueue hit");
                    return Ok(existing.clone());
                }
            }
        }

        if state.pending_len() >= self.settings.capacity {
            warn!(capacity = self.settings.capacity, "Queue full");
            return Err(ControlError::QueueFull {
                capacity: self.settings.capacity,
            });
        }

        state.next_seq += 1;
        let seq = state.next_seq;
        let job = Job {
            id: format!("job-{}", seq),
            config_path: config_path.to_string(),
            idempotency_key: idempotency_key.to_string(),
            force,
            priority,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            error: None,
        };

        state.jobs.insert(seq, job.clone());
        state.pending[priority.rank()].push_back(seq);
        if !idempotency_key.is_empty() {
            state.keys.insert(idempotency_key.to_string(), seq);
        }
        drop(state);

        info!(job_id = %job.id, config_path, %priority, force, "Job enqueued");
        self.ready.notify_one();

        Ok(job)
    }

    /// Copy of a job
    pub fn get(&self, id: &str) -> Option<Job> {
        let seq = parse_seq(id, "job")?;
        self.state.read().jobs.get(&seq).cloned()
    }

    /// Jobs matching the filter, newest first
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let state = self.state.read();
        let matching = state
            .jobs
            .values()
            .rev()
            .filter(|job| filter.status.map_or(true, |s| job.status == s))
            .cloned();

        if filter.limit > 0 {
            matching.take(filter.limit).collect()
        } else {
            matching.collect()
        }
    }

    /// Cancel a pending job
    pub fn cancel(&self, id: &str) -> Result<Job> {
        let seq = parse_seq(id, "job").ok_or_else(|| ControlError::not_found("job", id))?;

        let canceled = {
            let mut state = self.state.write();
            let job = state
                .jobs
                .get_mut(&seq)
                .ok_or_else(|| ControlError::not_found("job", id))?;

            if job.status != JobStatus::Pending {
                return Err(ControlError::IllegalState(format!(
                    "job {} is {}, only pending jobs can be canceled",
                    id, job.status
                )));
            }

            job.status = JobStatus::Canceled;
            job.ended_at = Some(Utc::now());
            let rank = job.priority.rank();
            let canceled = job.clone();
            state.pending[rank].retain(|s| *s != seq);
            canceled
        };

        info!(job_id = %canceled.id, "Job canceled");
        self.publish(&canceled);

        Ok(canceled)
    }

    /// Toggle the emergency stop. Setting the current state again is a no-op.
    pub fn set_emergency_stop(&self, active: bool, reason: &str) -> EmergencyStopState {
        let mut state = self.state.write();
        if state.emergency.active != active || state.emergency.reason != reason {
            state.emergency = EmergencyStopState {
                active,
                reason: reason.to_string(),
                updated_at: Some(Utc::now()),
            };
            if active {
                warn!(reason, "Emergency stop engaged");
            } else {
                info!(reason, "Emergency stop released");
            }
        }
        state.emergency.clone()
    }

    pub fn emergency_stop(&self) -> EmergencyStopState {
        self.state.read().emergency.clone()
    }

    /// Register a completion hook
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&Job) + Send + Sync + 'static,
    {
        self.subscribers.write().push(Arc::new(subscriber));
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.read();
        let mut stats = QueueStats {
            capacity: self.settings.capacity,
            emergency_stop: state.emergency.active,
            ..Default::default()
        };
        for job in state.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Succeeded => stats.succeeded += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Canceled => stats.canceled += 1,
            }
        }
        stats
    }

    /// Take the oldest job of the highest present priority and mark it running
    pub(crate) fn claim_next(&self) -> Option<Job> {
        let mut state = self.state.write();
        let seq = Priority::ORDERED
            .iter()
            .find_map(|p| state.pending[p.rank()].pop_front())?;

        let job = state.jobs.get_mut(&seq)?;
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        Some(job.clone())
    }

    /// Record the executor outcome of a running job and publish it
    pub(crate) fn complete(&self, id: &str, outcome: std::result::Result<(), String>) -> Option<Job> {
        let seq = parse_seq(id, "job")?;

        let finished = {
            let mut state = self.state.write();
            let job = state.jobs.get_mut(&seq)?;
            if job.status != JobStatus::Running {
                return None;
            }
            match outcome {
                Ok(()) => job.status = JobStatus::Succeeded,
                Err(message) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(message);
                }
            }
            job.ended_at = Some(Utc::now());
            job.clone()
        };

        self.publish(&finished);
        Some(finished)
    }

    /// Wait until a job may be available
    pub(crate) async fn wait_for_work(&self) {
        self.ready.notified().await;
    }

    fn publish(&self, job: &Job) {
        let subscribers: Vec<Subscriber> = self.subscribers.read().clone();
        for subscriber in subscribers {
            let copy = job.clone();
            if catch_unwind(AssertUnwindSafe(|| subscriber(&copy))).is_err() {
                warn!(job_id = %job.id, "Queue subscriber panicked");
            }
        }
    }
}
