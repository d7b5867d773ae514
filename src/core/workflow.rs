//! Workflow engine: sequential sagas over queued jobs.
//!
//! A run dispatches step 0 on launch. Each step's job is enqueued with the
//! idempotency key `<run_id>-step-<i>`, and the engine learns about its
//! outcome through a queue subscription. A success dispatches the next
//! step; a failure or cancellation fails the run. Once a run is terminal,
//! late completions are ignored.
//!
//! Lock order is engine, then queue. The queue publishes completions
//! without holding its own lock, and the engine never calls a publishing
//! queue operation while holding its lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::domain::{
    Job, JobStatus, Priority, WorkflowRun, WorkflowRunStatus, WorkflowStep, WorkflowTemplate,
};

use super::error::{parse_seq, ControlError, Result};
use super::queue::JobQueue;
use super::templates::TemplateRegistry;

/// Which run and step a queued job belongs to
#[derive(Debug, Clone, Copy)]
struct StepRef {
    run_seq: u64,
    step_index: usize,
}

#[derive(Default)]
struct WorkflowState {
    next_workflow_seq: u64,
    workflows: BTreeMap<u64, WorkflowTemplate>,
    next_run_seq: u64,
    runs: BTreeMap<u64, WorkflowRun>,
    in_flight: HashMap<String, StepRef>,
}

pub struct WorkflowEngine {
    queue: Arc<JobQueue>,
    templates: Arc<dyn TemplateRegistry>,
    state: Mutex<WorkflowState>,
}

impl WorkflowEngine {
    /// Create an engine subscribed to the queue's completions
    pub fn new(queue: Arc<JobQueue>, templates: Arc<dyn TemplateRegistry>) -> Arc<Self> {
        let engine = Arc::new(Self {
            queue: Arc::clone(&queue),
            templates,
            state: Mutex::new(WorkflowState::default()),
        });

        let weak: Weak<Self> = Arc::downgrade(&engine);
        queue.subscribe(move |job| {
            if let Some(engine) = weak.upgrade() {
                engine.on_job_finished(job);
            }
        });

        engine
    }

    /// Define a workflow. Every step must reference a known template.
    pub fn create_template(&self, name: &str, steps: Vec<WorkflowStep>) -> Result<WorkflowTemplate> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ControlError::invalid("workflow name is required"));
        }
        if steps.is_empty() {
            return Err(ControlError::invalid("workflow needs at least one step"));
        }

        let mut normalized = Vec::with_capacity(steps.len());
        for (index, step) in steps.into_iter().enumerate() {
            let template_id = step.template_id.trim().to_string();
            if template_id.is_empty() {
                return Err(ControlError::invalid(format!(
                    "step {} has no template id",
                    index
                )));
            }
            if self.templates.get(&template_id).is_none() {
                return Err(ControlError::not_found("template", &template_id));
            }
            let name = match step.name.trim() {
                "" => format!("step-{}", index),
                other => other.to_string(),
            };
            normalized.push(WorkflowStep {
                name,
                template_id,
                priority: step.priority,
            });
        }

        let mut state = self.state.lock();
        state.next_workflow_seq += 1;
        let seq = state.next_workflow_seq;
        let workflow = WorkflowTemplate {
            id: format!("wf-{}", seq),
            name: name.to_string(),
            steps: normalized,
            created_at: Utc::now(),
        };
        state.workflows.insert(seq, workflow.clone());

        info!(workflow_id = %workflow.id, steps = workflow.steps.len(), "Workflow created");
        Ok(workflow)
    }

    pub fn get_template(&self, id: &str) -> Option<WorkflowTemplate> {
        let seq = parse_seq(id, "wf")?;
        self.state.lock().workflows.get(&seq).cloned()
    }

    pub fn list_templates(&self) -> Vec<WorkflowTemplate> {
        self.state.lock().workflows.values().cloned().collect()
    }

    /// Start a run and dispatch its first step.
    ///
    /// If the first step cannot be enqueued the run is not created.
    #[instrument(skip(self))]
    pub fn launch(&self, workflow_id: &str, default_priority: Priority, force: bool) -> Result<WorkflowRun> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let workflow = parse_seq(workflow_id, "wf")
            .and_then(|seq| state.workflows.get(&seq))
            .ok_or_else(|| ControlError::not_found("workflow", workflow_id))?;

        let run_seq = state.next_run_seq + 1;
        let mut run = WorkflowRun {
            id: format!("wfrun-{}", run_seq),
            workflow_id: workflow.id.clone(),
            status: WorkflowRunStatus::Pending,
            current_step: 0,
            total_steps: workflow.steps.len(),
            step_job_ids: Vec::new(),
            default_priority,
            force,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            error: None,
        };

        let job_id = self.dispatch(&workflow.steps, &mut run, 0)?;

        state.next_run_seq = run_seq;
        state.in_flight.insert(
            job_id,
            StepRef {
                run_seq,
                step_index: 0,
            },
        );
        state.runs.insert(run_seq, run.clone());

        info!(run_id = %run.id, workflow_id, "Workflow run launched");
        Ok(run)
    }

    pub fn get_run(&self, id: &str) -> Option<WorkflowRun> {
        let seq = parse_seq(id, "wfrun")?;
        self.state.lock().runs.get(&seq).cloned()
    }

    /// All runs, newest first
    pub fn list_runs(&self) -> Vec<WorkflowRun> {
        self.state.lock().runs.values().rev().cloned().collect()
    }

    /// Fail a non-terminal run and cancel its step job if still pending
    pub fn abort(&self, run_id: &str, reason: &str) -> Result<WorkflowRun> {
        let (aborted, in_flight_job) = {
            let mut state = self.state.lock();
            let run = parse_seq(run_id, "wfrun")
                .and_then(|seq| state.runs.get_mut(&seq))
                .ok_or_else(|| ControlError::not_found("workflow run", run_id))?;

            if run.is_terminal() {
                return Err(ControlError::IllegalState(format!(
                    "workflow run {} is already {}",
                    run_id, run.status
                )));
            }

            run.status = WorkflowRunStatus::Failed;
            run.error = Some(format!("aborted: {}", reason));
            run.ended_at = Some(Utc::now());
            (run.clone(), run.step_job_ids.last().cloned())
        };

        warn!(run_id, reason, "Workflow run aborted");

        // Cancelling publishes synchronously into on_job_finished, so the
        // engine lock must already be released here.
        if let Some(job_id) = in_flight_job {
            if let Err(e) = self.queue.cancel(&job_id) {
                info!(run_id, job_id = %job_id, error = %e, "Step job left to finish");
            }
        }

        Ok(aborted)
    }

    /// Enqueue step `index` of `run`; returns the job ID
    fn dispatch(&self, steps: &[WorkflowStep], run: &mut WorkflowRun, index: usize) -> Result<String> {
        let step = steps
            .get(index)
            .ok_or_else(|| ControlError::IllegalState(format!("step {} out of range", index)))?;
        let template = self
            .templates
            .get(&step.template_id)
            .ok_or_else(|| ControlError::not_found("template", &step.template_id))?;

        let priority = run.effective_priority(step);
        let key = format!("{}-step-{}", run.id, index);
        let job = self
            .queue
            .enqueue(&template.config_path, &key, run.force, priority)?;

        run.step_job_ids.push(job.id.clone());
        run.current_step = index;
        if run.started_at.is_none() {
            run.started_at = Some(Utc::now());
            run.status = WorkflowRunStatus::Running;
        }

        info!(run_id = %run.id, step = index, job_id = %job.id, %priority, "Workflow step dispatched");
        Ok(job.id)
    }

    fn on_job_finished(&self, job: &Job) {
        if !job.status.is_terminal() {
            return;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(step_ref) = state.in_flight.remove(&job.id) else {
            return;
        };
        let Some(run) = state.runs.get_mut(&step_ref.run_seq) else {
            return;
        };
        if run.is_terminal() {
            return;
        }

        let steps = parse_seq(&run.workflow_id, "wf")
            .and_then(|seq| state.workflows.get(&seq))
            .map(|wf| wf.steps.as_slice())
            .unwrap_or_default();
        let index = step_ref.step_index;

        match job.status {
            JobStatus::Succeeded if index + 1 >= run.total_steps => {
                run.status = WorkflowRunStatus::Succeeded;
                run.current_step = run.total_steps;
                run.ended_at = Some(Utc::now());
                info!(run_id = %run.id, "Workflow run succeeded");
            }
            JobStatus::Succeeded => match self.dispatch(steps, run, index + 1) {
                Ok(next_job) => {
                    state.in_flight.insert(
                        next_job,
                        StepRef {
                            run_seq: step_ref.run_seq,
                            step_index: index + 1,
                        },
                    );
                }
                Err(e) => {
                    fail_run(run, format!("step {} could not be dispatched: {}", index + 1, e));
                }
            },
            _ => {
                let step_name = steps.get(index).map(|s| s.name.as_str()).unwrap_or("?");
                let detail = job.error.as_deref().unwrap_or("no error message");
                fail_run(
                    run,
                    format!("step {} ({}) {}: {}", index, step_name, job.status, detail),
                );
            }
        }
    }
}

fn fail_run(run: &mut WorkflowRun, error: String) {
    warn!(run_id = %run.id, error = %error, "Workflow run failed");
    run.status = WorkflowRunStatus::Failed;
    run.error = Some(error);
    run.ended_at = Some(Utc::now());
}
