//! Core engines of the control plane.
//!
//! This module contains:
//! - JobQueue / Worker: priority queue of apply jobs and its executor loop
//! - WorkflowEngine: sequential sagas driven by queue completions
//! - RuleEngine: event-to-action matching with cooldowns
//! - AlertInbox: deduplicating alert intake with suppressions
//! - ControlPlane: host that routes rule actions to the engines

pub mod alerts;
pub mod control_plane;
pub mod error;
pub mod queue;
pub mod rules;
pub mod templates;
pub mod worker;
pub mod workflow;

// Re-export commonly used types
pub use alerts::{fingerprint, AlertInbox, InboxSettings};
pub use control_plane::{ActionOutcome, ControlPlane, ControlSettings, Dispatched, EventOutcome};
pub use error::{ControlError, ErrorKind, Result};
pub use queue::{JobQueue, QueueSettings, Subscriber};
pub use rules::RuleEngine;
pub use templates::{TemplateRegistry, TemplateStore};
pub use worker::{Worker, WorkerHandle, WorkerSettings};
pub use workflow::WorkflowEngine;
