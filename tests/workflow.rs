//! Workflow Integration Tests
//!
//! Tests for saga execution of workflow runs on top of the job queue:
//! step ordering, failure propagation, abort and priority resolution.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use masterchef::adapters::Executor;
use masterchef::core::{ErrorKind, JobQueue, QueueSettings, TemplateStore, Worker, WorkflowEngine};
use masterchef::domain::{JobStatus, NewTemplate, Priority, WorkflowRunStatus, WorkflowStep};
use tokio::sync::Notify;

/// Succeeds unless the path is in the failure set
#[derive(Default)]
struct ScriptedExecutor {
    failing: HashSet<String>,
}

impl ScriptedExecutor {
    fn failing(paths: &[&str]) -> Self {
        Self {
            failing: paths.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn apply_path(&self, config_path: &str) -> Result<()> {
        if self.failing.contains(config_path) {
            anyhow::bail!("{} exited with status 2", config_path);
        }
        Ok(())
    }
}

/// Blocks inside apply until released
#[derive(Default)]
struct GatedExecutor {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl Executor for GatedExecutor {
    fn name(&self) -> &str {
        "gated"
    }

    async fn apply_path(&self, _config_path: &str) -> Result<()> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

struct Harness {
    queue: Arc<JobQueue>,
    templates: Arc<TemplateStore>,
    engine: Arc<WorkflowEngine>,
}

impl Harness {
    fn new() -> Self {
        let queue = Arc::new(JobQueue::new(QueueSettings::default()));
        let templates = Arc::new(TemplateStore::new());
        let engine = WorkflowEngine::new(Arc::clone(&queue), templates.clone());
        Self {
            queue,
            templates,
            engine,
        }
    }

    fn template(&self, name: &str, config_path: &str) -> String {
        self.templates
            .create(NewTemplate {
                name: name.to_string(),
                config_path: config_path.to_string(),
                ..Default::default()
            })
            .unwrap()
            .id
    }

    fn workflow(&self, steps: &[(&str, &str)]) -> String {
        let steps = steps
            .iter()
            .map(|(name, config_path)| WorkflowStep {
                name: name.to_string(),
                template_id: self.template(name, config_path),
                priority: Priority::Normal,
            })
            .collect();
        self.engine.create_template("pipeline", steps).unwrap().id
    }

    fn worker(&self, executor: ScriptedExecutor) -> Worker {
        Worker::new(Arc::clone(&self.queue), Arc::new(executor))
    }
}

#[tokio::test]
async fn test_workflow_success() {
    let h = Harness::new();
    let workflow_id = h.workflow(&[("stepA", "cfgA.yaml"), ("stepB", "cfgB.yaml")]);
    let worker = h.worker(ScriptedExecutor::default());

    let run = h.engine.launch(&workflow_id, Priority::Normal, false).unwrap();
    assert_eq!(run.id, "wfrun-1");
    assert_eq!(run.status, WorkflowRunStatus::Running);
    assert_eq!(run.step_job_ids.len(), 1);

    // Step B is only enqueued once step A succeeded
    assert_eq!(h.queue.stats().pending, 1);
    let first = worker.run_once().await.unwrap();
    assert_eq!(first.config_path, "cfgA.yaml");

    let mid = h.engine.get_run(&run.id).unwrap();
    assert_eq!(mid.status, WorkflowRunStatus::Running);
    assert_eq!(mid.current_step, 1);

    let second = worker.run_once().await.unwrap();
    assert_eq!(second.config_path, "cfgB.yaml");

    let done = h.engine.get_run(&run.id).unwrap();
    assert_eq!(done.status, WorkflowRunStatus::Succeeded);
    assert_eq!(done.step_job_ids.len(), 2);
    assert!(done.step_job_ids.iter().all(|id| !id.is_empty()));
    assert!(done.ended_at.is_some());
    assert!(done.error.is_none());
}

#[tokio::test]
async fn test_workflow_failure() {
    let h = Harness::new();
    let workflow_id = h.workflow(&[("ok", "ok.yaml"), ("bad", "bad.yaml"), ("never", "never.yaml")]);
    let worker = h.worker(ScriptedExecutor::failing(&["bad.yaml"]));

    let run = h.engine.launch(&workflow_id, Priority::Normal, false).unwrap();
    assert_eq!(worker.drain().await, 2);

    let failed = h.engine.get_run(&run.id).unwrap();
    assert_eq!(failed.status, WorkflowRunStatus::Failed);
    assert_eq!(failed.current_step, 1);
    assert_eq!(failed.step_job_ids.len(), 2);
    let error = failed.error.unwrap();
    assert!(error.contains("bad"), "unexpected error: {}", error);

    // The third step was never enqueued
    assert_eq!(h.queue.stats().total(), 2);
}

#[tokio::test]
async fn test_abort_cancels_pending_step() {
    let h = Harness::new();
    let workflow_id = h.workflow(&[("one", "one.yaml"), ("two", "two.yaml")]);
    let worker = h.worker(ScriptedExecutor::default());

    let run = h.engine.launch(&workflow_id, Priority::Normal, false).unwrap();
    let aborted = h.engine.abort(&run.id, "operator request").unwrap();
    assert_eq!(aborted.status, WorkflowRunStatus::Failed);
    assert!(aborted.error.as_deref().unwrap().contains("operator request"));

    let step_job = h.queue.get(&run.step_job_ids[0]).unwrap();
    assert_eq!(step_job.status, JobStatus::Canceled);

    // The cancellation does not rewrite the abort reason
    let after = h.engine.get_run(&run.id).unwrap();
    assert_eq!(after.error, aborted.error);
    assert_eq!(worker.drain().await, 0);

    let err = h.engine.abort(&run.id, "again").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);
}

#[tokio::test]
async fn test_terminal_run_ignores_late_completion() {
    let h = Harness::new();
    let workflow_id = h.workflow(&[("one", "one.yaml"), ("two", "two.yaml")]);
    let executor = Arc::new(GatedExecutor::default());
    let worker = Arc::new(Worker::new(Arc::clone(&h.queue), executor.clone()));

    let run = h.engine.launch(&workflow_id, Priority::Normal, false).unwrap();

    let task = tokio::spawn({
        let worker = Arc::clone(&worker);
        async move { worker.run_once().await }
    });
    executor.started.notified().await;

    // The step job is running, so abort cannot cancel it
    h.engine.abort(&run.id, "stop").unwrap();
    executor.release.notify_one();

    let job = task.await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);

    let after = h.engine.get_run(&run.id).unwrap();
    assert_eq!(after.status, WorkflowRunStatus::Failed);
    assert_eq!(after.error.as_deref(), Some("aborted: stop"));
    assert_eq!(after.step_job_ids.len(), 1);
    assert_eq!(h.queue.stats().total(), 1);
}

#[tokio::test]
async fn test_step_priority_resolution() {
    let h = Harness::new();
    let urgent = h.template("urgent", "urgent.yaml");
    let plain = h.template("plain", "plain.yaml");
    let workflow = h
        .engine
        .create_template(
            "mixed",
            vec![
                WorkflowStep {
                    name: "urgent".to_string(),
                    template_id: urgent,
                    priority: Priority::High,
                },
                WorkflowStep {
                    name: "plain".to_string(),
                    template_id: plain,
                    priority: Priority::Normal,
                },
            ],
        )
        .unwrap();
    let worker = h.worker(ScriptedExecutor::default());

    let run = h.engine.launch(&workflow.id, Priority::Low, false).unwrap();
    let first = worker.run_once().await.unwrap();
    assert_eq!(first.priority, Priority::High);

    let second = worker.run_once().await.unwrap();
    assert_eq!(second.priority, Priority::Low);
    assert_eq!(
        h.engine.get_run(&run.id).unwrap().status,
        WorkflowRunStatus::Succeeded
    );
}

#[test]
fn test_launch_under_emergency_stop() {
    let h = Harness::new();
    let workflow_id = h.workflow(&[("one", "one.yaml")]);
    h.queue.set_emergency_stop(true, "freeze");

    let err = h.engine.launch(&workflow_id, Priority::Normal, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmergencyStopActive);
    assert!(h.engine.list_runs().is_empty());

    // Forced runs pass the stop, and the failed attempt did not use up an ID
    let run = h.engine.launch(&workflow_id, Priority::Normal, true).unwrap();
    assert_eq!(run.id, "wfrun-1");
    assert!(h.queue.get(&run.step_job_ids[0]).unwrap().force);
}

#[test]
fn test_create_template_validation() {
    let h = Harness::new();

    let err = h.engine.create_template("empty", Vec::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = h
        .engine
        .create_template(
            "dangling",
            vec![WorkflowStep {
                name: String::new(),
                template_id: "tpl-7".to_string(),
                priority: Priority::Normal,
            }],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = h.engine.launch("wf-3", Priority::Normal, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_returned_runs_are_copies() {
    let h = Harness::new();
    let workflow_id = h.workflow(&[("one", "one.yaml"), ("two", "two.yaml")]);
    let run = h.engine.launch(&workflow_id, Priority::Normal, false).unwrap();

    let mut fetched = h.engine.get_run(&run.id).unwrap();
    fetched.status = WorkflowRunStatus::Failed;
    fetched.current_step = 7;
    fetched.step_job_ids.clear();
    fetched.error = Some("tampered".to_string());

    let mut listed = h.engine.list_runs();
    listed[0].total_steps = 0;
    listed[0].step_job_ids.push("job-99".to_string());

    let stored = h.engine.get_run(&run.id).unwrap();
    assert_eq!(stored.status, WorkflowRunStatus::Running);
    assert_eq!(stored.current_step, 0);
    assert_eq!(stored.total_steps, 2);
    assert_eq!(stored.step_job_ids, run.step_job_ids);
    assert!(stored.error.is_none());

    // The engine still drives the untouched run to completion
    h.worker(ScriptedExecutor::default()).drain().await;
    let finished = h.engine.get_run(&run.id).unwrap();
    assert_eq!(finished.status, WorkflowRunStatus::Succeeded);
    assert_eq!(finished.step_job_ids.len(), 2);
}
