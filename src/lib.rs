//! masterchef - control-plane core for configuration applies
//!
//! Four cooperating engines behind one host (`ControlPlane`).
//!
//! # Architecture
//!
//! - A bounded priority queue of apply jobs, serviced by a single-dispatch
//!   worker that hands config paths to an `Executor`
//! - A workflow engine that runs ordered template steps as a saga, driven
//!   by job completions published by the queue
//! - A rule engine that matches inbound events to actions, with cooldowns
//! - An alert inbox that deduplicates alerts by fingerprint and honors
//!   time-bounded suppressions
//!
//! # Modules
//!
//! - `adapters`: Executor capability (`FileExecutor`)
//! - `core`: Engines (JobQueue, Worker, WorkflowEngine, RuleEngine, AlertInbox, ControlPlane)
//! - `domain`: Data structures (Job, WorkflowRun, Rule, AlertItem, Event, Template)
//! - `config`: Configuration file and environment resolution
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Apply config files through the queue
//! masterchef apply web.yaml db.yaml --priority high
//!
//! # Replay recorded events against rules and workflows
//! masterchef replay --bundle bundle.yaml --events events.jsonl
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{Executor, FileExecutor};
pub use crate::core::{
    AlertInbox, ControlError, ControlPlane, ControlSettings, JobQueue, RuleEngine, TemplateStore,
    Worker, WorkflowEngine,
};
pub use domain::{AlertItem, Event, Job, JobStatus, Priority, Rule, RuleAction, WorkflowRun};
