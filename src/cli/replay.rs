//! Offline replay of an event stream against a bundle of definitions.
//!
//! A bundle is a YAML document declaring launch templates, workflows,
//! rules and suppressions. Definitions are created in document order on a
//! fresh control plane, so the N-th template is `tpl-N` and the N-th
//! workflow is `wf-N`; rules and workflow steps refer to them by those IDs.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::adapters::Executor;
use crate::core::ControlPlane;
use crate::domain::{AlertSummary, Event, Job, JobFilter, NewRule, NewTemplate, QueueStats, WorkflowRun, WorkflowStep};

/// Definitions loaded before replay
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Bundle {
    #[serde(default)]
    pub templates: Vec<NewTemplate>,

    #[serde(default)]
    pub workflows: Vec<BundleWorkflow>,

    #[serde(default)]
    pub rules: Vec<NewRule>,

    #[serde(default)]
    pub suppressions: Vec<BundleSuppression>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleWorkflow {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleSuppression {
    pub fingerprint: String,
    pub duration_seconds: i64,

    #[serde(default)]
    pub reason: String,
}

impl Bundle {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bundle: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse bundle: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Create every definition on the plane, in document order
    pub fn install(&self, plane: &ControlPlane) -> Result<()> {
        for template in &self.templates {
            plane
                .templates()
                .create(template.clone())
                .with_context(|| format!("Invalid template '{}'", template.name))?;
        }

        for workflow in &self.workflows {
            plane
                .workflows()
                .create_template(&workflow.name, workflow.steps.clone())
                .with_context(|| format!("Invalid workflow '{}'", workflow.name))?;
        }

        for rule in &self.rules {
            plane
                .rules()
                .create(rule.clone())
                .with_context(|| format!("Invalid rule '{}'", rule.name))?;
        }

        for suppression in &self.suppressions {
            let duration = Duration::try_seconds(suppression.duration_seconds)
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "duration_seconds out of range: {}",
                        suppression.duration_seconds
                    )
                })
                .with_context(|| format!("Invalid suppression '{}'", suppression.fingerprint))?;
            plane
                .inbox()
                .suppress(&suppression.fingerprint, duration, &suppression.reason)
                .with_context(|| format!("Invalid suppression '{}'", suppression.fingerprint))?;
        }

        info!(
            templates = self.templates.len(),
            workflows = self.workflows.len(),
            rules = self.rules.len(),
            suppressions = self.suppressions.len(),
            "Bundle installed"
        );
        Ok(())
    }
}

/// Parse newline-delimited JSON events, skipping blank lines
pub fn parse_events(content: &str) -> Result<Vec<Event>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid event on line {}", index + 1))
        })
        .collect()
}

/// What a replay produced
#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub events: usize,
    pub matches: usize,
    pub actions: usize,
    pub action_errors: Vec<String>,
    pub rule_errors: Vec<String>,
    pub queue: QueueStats,
    pub jobs: Vec<Job>,
    pub runs: Vec<WorkflowRun>,
    pub alerts: AlertSummary,
}

/// Feed events through the plane, then run the queue dry
pub async fn replay(
    plane: &ControlPlane,
    events: &[Event],
    executor: Arc<dyn Executor>,
) -> ReplaySummary {
    let mut matches = 0;
    let mut actions = 0;
    let mut action_errors = Vec::new();
    let mut rule_errors = Vec::new();

    for event in events {
        let outcome = plane.handle_event(event);
        matches += outcome.matches.len();
        actions += outcome.actions.len();
        action_errors.extend(outcome.actions.into_iter().filter_map(|action| {
            action
                .error
                .map(|e| format!("{} {} -> {}: {}", action.rule_id, action.action, action.target, e))
        }));
        rule_errors.extend(outcome.rule_error);
    }

    let dispatched = plane.worker(executor).drain().await;
    info!(events = events.len(), dispatched, "Replay finished");

    let mut jobs = plane.queue().list(&JobFilter::default());
    jobs.reverse();
    let mut runs = plane.workflows().list_runs();
    runs.reverse();

    ReplaySummary {
        events: events.len(),
        matches,
        actions,
        action_errors,
        rule_errors,
        queue: plane.queue().stats(),
        jobs,
        runs,
        alerts: plane.inbox().summary(),
    }
}
