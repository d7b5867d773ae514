//! Domain types for the masterchef control plane.
//!
//! This module contains the data structures shared by the engines:
//! - Job: queued apply work and its priority
//! - Workflow: step sequences and their runs
//! - Rule: event-to-action mappings
//! - Alert: deduplicated alerts and suppressions
//! - Event: inbound signals
//! - Template: launch templates resolved by the workflow engine

pub mod alert;
pub mod event;
pub mod job;
pub mod rule;
pub mod template;
pub mod workflow;

// Re-export commonly used types
pub use alert::{
    AlertIngest, AlertIngestResult, AlertItem, AlertStatus, AlertSummary, AlertSuppression, Route,
    Severity,
};
pub use event::Event;
pub use job::{EmergencyStopState, Job, JobFilter, JobStatus, Priority, QueueStats};
pub use rule::{Comparator, MatchMode, NewRule, Rule, RuleAction, RuleCondition, RuleMatch};
pub use template::{NewTemplate, SurveyQuestion, Template};
pub use workflow::{WorkflowRun, WorkflowRunStatus, WorkflowStep, WorkflowTemplate};
