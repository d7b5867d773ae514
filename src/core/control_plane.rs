//! Host that wires the engines together and routes rule actions.
//!
//! An inbound event goes to the alert inbox and to the rule engine. Each
//! matched action is then dispatched in match order: `enqueue_apply` to
//! the queue, `launch_template` through the template registry to the
//! queue, `launch_workflow` to the workflow engine. One failed action does
//! not stop the others.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::adapters::Executor;
use crate::domain::{AlertIngestResult, Event, Job, RuleAction, RuleMatch, WorkflowRun};

use super::alerts::{AlertInbox, InboxSettings};
use super::error::{ControlError, Result};
use super::queue::{JobQueue, QueueSettings};
use super::rules::RuleEngine;
use super::templates::{TemplateRegistry, TemplateStore};
use super::worker::{Worker, WorkerSettings};
use super::workflow::WorkflowEngine;

/// Settings for every engine owned by the control plane
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlSettings {
    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub worker: WorkerSettings,

    #[serde(default)]
    pub inbox: InboxSettings,
}

/// What dispatching one action produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Dispatched {
    Job(Job),
    Run(WorkflowRun),
}

/// Result of routing one matched action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub rule_id: String,
    pub action: String,
    pub target: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatched: Option<Dispatched>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything that happened for one inbound event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<AlertIngestResult>,

    pub matches: Vec<RuleMatch>,

    pub actions: Vec<ActionOutcome>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_error: Option<String>,
}

/// Owns the queue, templates, workflows, rules and alert inbox
pub struct ControlPlane {
    settings: ControlSettings,
    queue: Arc<JobQueue>,
    templates: Arc<TemplateStore>,
    workflows: Arc<WorkflowEngine>,
    rules: RuleEngine,
    inbox: AlertInbox,
}

impl Default for ControlPlane {
    fn default() -> Self {
        Self::new(ControlSettings::default())
    }
}

impl ControlPlane {
    pub fn new(settings: ControlSettings) -> Self {
        let queue = Arc::new(JobQueue::new(settings.queue.clone()));
        let templates = Arc::new(TemplateStore::new());
        let registry: Arc<dyn TemplateRegistry> = templates.clone();
        let workflows = WorkflowEngine::new(Arc::clone(&queue), registry);
        let inbox = AlertInbox::new(settings.inbox.clone());

        Self {
            settings,
            queue,
            templates,
            workflows,
            rules: RuleEngine::new(),
            inbox,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn templates(&self) -> &Arc<TemplateStore> {
        &self.templates
    }

    pub fn workflows(&self) -> &Arc<WorkflowEngine> {
        &self.workflows
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn inbox(&self) -> &AlertInbox {
        &self.inbox
    }

    /// Build the worker for this plane's queue
    pub fn worker(&self, executor: Arc<dyn Executor>) -> Worker {
        Worker::with_settings(Arc::clone(&self.queue), executor, self.settings.worker.clone())
    }

    /// Deliver one inbound event
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub fn handle_event(&self, event: &Event) -> EventOutcome {
        let mut outcome = EventOutcome {
            alert: self.inbox.ingest_event(event),
            ..Default::default()
        };

        match self.rules.evaluate(event) {
            Ok(matches) => outcome.matches = matches,
            Err(e) => {
                warn!(error = %e, "Rule evaluation failed");
                outcome.rule_error = Some(e.to_string());
                return outcome;
            }
        }

        for matched in &outcome.matches {
            for action in &matched.actions {
                let result = self.dispatch(action);
                if let Err(e) = &result {
                    warn!(rule_id = %matched.rule_id, action = action.kind(), error = %e, "Action dispatch failed");
                }
                outcome.actions.push(ActionOutcome {
                    rule_id: matched.rule_id.clone(),
                    action: action.kind().to_string(),
                    target: action.target().to_string(),
                    error: result.as_ref().err().map(ToString::to_string),
                    dispatched: result.ok(),
                });
            }
        }

        info!(
            matches = outcome.matches.len(),
            actions = outcome.actions.len(),
            alert = outcome.alert.is_some(),
            "Event handled"
        );
        outcome
    }

    /// Route a single action to its engine
    pub fn dispatch(&self, action: &RuleAction) -> Result<Dispatched> {
        match action {
            RuleAction::EnqueueApply {
                config_path,
                priority,
                force,
            } => self
                .queue
                .enqueue(config_path, "", *force, *priority)
                .map(Dispatched::Job),

            RuleAction::LaunchTemplate {
                template_id,
                priority,
                force,
                answers,
            } => {
                let template = self
                    .templates
                    .get(template_id)
                    .ok_or_else(|| ControlError::not_found("template", template_id))?;
                template.validate_answers(answers)?;
                self.queue
                    .enqueue(&template.config_path, "", *force, *priority)
                    .map(Dispatched::Job)
            }

            RuleAction::LaunchWorkflow {
                workflow_id,
                priority,
                force,
            } => self
                .workflows
                .launch(workflow_id, *priority, *force)
                .map(Dispatched::Run),
        }
    }
}
