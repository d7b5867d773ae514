//! Workflow definitions and runs.
//!
//! A workflow is an ordered list of template steps executed as a saga: each
//! step is enqueued only after the previous step's job succeeded.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::Priority;

/// One step of a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    #[serde(default)]
    pub name: String,

    /// Launch template providing the config path
    pub template_id: String,

    /// `Normal` defers to the run's default priority
    #[serde(default)]
    pub priority: Priority,
}

/// An ordered sequence of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// `wf-<N>`
    pub id: String,

    pub name: String,

    pub steps: Vec<WorkflowStep>,

    pub created_at: DateTime<Utc>,
}

/// Status of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl WorkflowRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for WorkflowRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One execution of a workflow template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// `wfrun-<N>`
    pub id: String,

    pub workflow_id: String,

    pub status: WorkflowRunStatus,

    /// Index of the step in flight; equals `total_steps` once succeeded
    pub current_step: usize,

    pub total_steps: usize,

    /// Job ID per dispatched step; entry `i` exists iff step `i` was dispatched
    pub step_job_ids: Vec<String>,

    pub default_priority: Priority,

    pub force: bool,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowRun {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Effective priority of a step: the step's own priority wins unless it
    /// is `Normal`, in which case the run default applies.
    pub fn effective_priority(&self, step: &WorkflowStep) -> Priority {
        match step.priority {
            Priority::Normal => self.default_priority,
            other => other,
        }
    }
}
