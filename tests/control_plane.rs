//! Control Plane Integration Tests
//!
//! End-to-end flow: an inbound event raises an alert, matches a rule, and
//! the rule's actions run through the queue and the workflow engine.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use masterchef::adapters::Executor;
use masterchef::core::{ControlPlane, ControlSettings, Dispatched, QueueSettings};
use masterchef::domain::{
    AlertStatus, Comparator, Event, NewRule, NewTemplate, Priority, RuleAction,
    RuleCondition, WorkflowRunStatus, WorkflowStep,
};

#[derive(Default)]
struct ScriptedExecutor {
    failing: HashSet<String>,
    applied: Mutex<Vec<String>>,
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn apply_path(&self, config_path: &str) -> Result<()> {
        self.applied.lock().push(config_path.to_string());
        if self.failing.contains(config_path) {
            anyhow::bail!("apply of {} failed", config_path);
        }
        Ok(())
    }
}

fn remediation_plane(settings: ControlSettings) -> ControlPlane {
    let plane = ControlPlane::new(settings);

    let drain = plane
        .templates()
        .create(NewTemplate {
            name: "drain-node".to_string(),
            config_path: "drain.yaml".to_string(),
            ..Default::default()
        })
        .unwrap();
    let restart = plane
        .templates()
        .create(NewTemplate {
            name: "restart-db".to_string(),
            config_path: "restart.yaml".to_string(),
            ..Default::default()
        })
        .unwrap();
    let workflow = plane
        .workflows()
        .create_template(
            "db-recovery",
            vec![
                WorkflowStep {
                    name: "drain".to_string(),
                    template_id: drain.id,
                    priority: Priority::Normal,
                },
                WorkflowStep {
                    name: "restart".to_string(),
                    template_id: restart.id,
                    priority: Priority::Normal,
                },
            ],
        )
        .unwrap();

    plane
        .rules()
        .create(NewRule {
            name: "db-critical".to_string(),
            source_prefix: "external.alert.db".to_string(),
            conditions: vec![RuleCondition {
                field: "fields.severity".to_string(),
                comparator: Comparator::Eq,
                value: "critical".to_string(),
            }],
            actions: vec![
                RuleAction::LaunchWorkflow {
                    workflow_id: workflow.id,
                    priority: Priority::High,
                    force: false,
                },
                RuleAction::EnqueueApply {
                    config_path: "notify.yaml".to_string(),
                    priority: Priority::Low,
                    force: false,
                },
            ],
            cooldown_seconds: 300,
            ..Default::default()
        })
        .unwrap();

    plane
}

fn db_down() -> Event {
    Event::new("external.alert.db", "primary unreachable")
        .with_field("severity", "critical")
        .with_field("service", "db")
}

#[tokio::test]
async fn test_event_to_remediation() {
    let plane = remediation_plane(ControlSettings::default());
    let executor = Arc::new(ScriptedExecutor::default());
    let worker = plane.worker(executor.clone());

    let outcome = plane.handle_event(&db_down());
    assert!(outcome.rule_error.is_none());
    assert_eq!(outcome.matches.len(), 1);
    assert_eq!(outcome.actions.len(), 2);

    let run_id = match &outcome.actions[0].dispatched {
        Some(Dispatched::Run(run)) => run.id.clone(),
        other => panic!("expected a workflow run, got {:?}", other),
    };
    assert!(matches!(outcome.actions[1].dispatched, Some(Dispatched::Job(_))));

    let alert = outcome.alert.unwrap().alert.unwrap();
    assert_eq!(alert.status, AlertStatus::Open);

    assert_eq!(worker.drain().await, 3);
    let run = plane.workflows().get_run(&run_id).unwrap();
    assert_eq!(run.status, WorkflowRunStatus::Succeeded);

    // The workflow's high-priority steps ran ahead of the low-priority notify
    assert_eq!(
        *executor.applied.lock(),
        vec!["drain.yaml", "restart.yaml", "notify.yaml"]
    );
    assert_eq!(plane.queue().stats().succeeded, 3);

    // Repeat within the cooldown: deduplicated alert, no new actions
    let repeat = plane.handle_event(&db_down());
    assert!(repeat.matches.is_empty());
    assert!(repeat.alert.unwrap().deduplicated);
    assert_eq!(plane.inbox().summary().total, 1);
}

#[tokio::test]
async fn test_emergency_stop_blocks_rule_actions() {
    let plane = remediation_plane(ControlSettings::default());
    plane.queue().set_emergency_stop(true, "change freeze");

    let outcome = plane.handle_event(&db_down());
    assert_eq!(outcome.actions.len(), 2);
    assert!(outcome
        .actions
        .iter()
        .all(|a| a.error.as_deref().unwrap_or("").contains("change freeze")));

    assert!(plane.workflows().list_runs().is_empty());
    assert_eq!(plane.queue().stats().total(), 0);
    // Alert intake is unaffected
    assert_eq!(plane.inbox().summary().open, 1);
}

#[tokio::test]
async fn test_failed_step_fails_run() {
    let plane = remediation_plane(ControlSettings {
        queue: QueueSettings { capacity: 8 },
        ..Default::default()
    });
    let worker = plane.worker(Arc::new(ScriptedExecutor {
        failing: ["drain.yaml".to_string()].into_iter().collect(),
        ..Default::default()
    }));

    plane.handle_event(&db_down());
    assert_eq!(worker.drain().await, 2);

    let runs = plane.workflows().list_runs();
    assert_eq!(runs[0].status, WorkflowRunStatus::Failed);
    assert!(runs[0].error.as_deref().unwrap().contains("drain.yaml"));
    assert_eq!(plane.queue().stats().failed, 1);
}
