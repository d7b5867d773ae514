//! Apply jobs and their lifecycle.
//!
//! A job is created pending on enqueue, moves to running when the worker
//! dispatches it, and ends succeeded, failed or canceled. Terminal jobs are
//! retained for the life of the process.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dispatch priority of a job.
///
/// Parsing is lenient: any unknown string becomes `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// All priorities, highest first
    pub const ORDERED: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    /// Normalize a free-form priority string
    pub fn normalize(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    /// Slot in the pending structure (0 dispatches first)
    pub(crate) fn rank(&self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl From<String> for Priority {
    fn from(value: String) -> Self {
        Self::normalize(&value)
    }
}

impl From<&str> for Priority {
    fn from(value: &str) -> Self {
        Self::normalize(value)
    }
}

impl From<Priority> for &'static str {
    fn from(value: Priority) -> Self {
        value.as_str()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue
    Pending,

    /// Handed to the executor
    Running,

    /// Executor returned success
    Succeeded,

    /// Executor returned an error
    Failed,

    /// Canceled before dispatch
    Canceled,
}

impl JobStatus {
    /// Terminal statuses never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// A unit of apply work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// `job-<N>`, assigned by the queue
    pub id: String,

    /// Config path handed to the executor
    pub config_path: String,

    /// Caller-supplied key (empty when none was given)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub idempotency_key: String,

    /// Whether the job bypassed an active emergency stop
    pub force: bool,

    pub priority: Priority,

    pub status: JobStatus,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Executor error message (failed jobs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Process-wide switch blocking non-forced enqueues
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyStopState {
    pub active: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Filter for listing jobs
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,

    /// Maximum number of jobs returned (0 = unlimited)
    pub limit: usize,
}

impl JobFilter {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            limit: 0,
        }
    }
}

/// Queue counters by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub canceled: usize,
    pub capacity: usize,
    pub emergency_stop: bool,
}

impl QueueStats {
    /// Total jobs ever created
    pub fn total(&self) -> usize {
        self.pending + self.running + self.succeeded + self.failed + self.canceled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_normalization() {
        assert_eq!(Priority::normalize("HIGH"), Priority::High);
        assert_eq!(Priority::normalize(" low "), Priority::Low);
        assert_eq!(Priority::normalize("urgent"), Priority::Normal);
        assert_eq!(Priority::normalize(""), Priority::Normal);
    }

    #[test]
    fn test_priority_serde_is_lenient() {
        let parsed: Priority = serde_json::from_str("\"bogus\"").unwrap();
        assert_eq!(parsed, Priority::Normal);

        let json = serde_json::to_string(&Priority::High).unwrap();
        assert_eq!(json, "\"high\"");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Canceled.is_terminal());
    }
}
