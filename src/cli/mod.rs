//! Command-line interface for masterchef.
//!
//! Provides commands for applying config paths through the job queue,
//! replaying recorded events against a bundle of rules and workflows,
//! and inspecting the resolved configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::adapters::FileExecutor;
use crate::config;
use crate::core::ControlPlane;
use crate::domain::{JobStatus, Priority};

pub mod replay;

/// masterchef - job queue, workflow, rule and alert control plane
#[derive(Parser, Debug)]
#[command(name = "masterchef")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Enqueue config paths and apply them to completion
    Apply {
        /// Config paths to apply
        #[arg(required = true)]
        paths: Vec<String>,

        /// Job priority
        #[arg(short, long, value_enum, default_value = "normal")]
        priority: PriorityArg,

        /// Mark the jobs as forced
        #[arg(short, long)]
        force: bool,
    },

    /// Replay JSONL events against a bundle of templates, workflows and rules
    Replay {
        /// YAML bundle with templates, workflows, rules and suppressions
        #[arg(short, long)]
        bundle: PathBuf,

        /// Newline-delimited JSON events
        #[arg(short, long)]
        events: PathBuf,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Priority for CLI (maps to Priority)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PriorityArg {
    High,
    Normal,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(p: PriorityArg) -> Self {
        match p {
            PriorityArg::High => Priority::High,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::Low => Priority::Low,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Apply {
                paths,
                priority,
                force,
            } => apply_paths(&paths, priority.into(), force).await,
            Commands::Replay { bundle, events } => replay_events(&bundle, &events).await,
            Commands::Config => show_config(),
        }
    }
}

/// Enqueue every path, drain the queue, print the jobs
async fn apply_paths(paths: &[String], priority: Priority, force: bool) -> Result<()> {
    let cfg = config::config()?;
    let plane = ControlPlane::new(cfg.settings.clone());

    let mut job_ids = Vec::with_capacity(paths.len());
    for path in paths {
        let job = plane
            .queue()
            .enqueue(path, "", force, priority)
            .with_context(|| format!("Failed to enqueue {}", path))?;
        job_ids.push(job.id);
    }

    plane.worker(Arc::new(FileExecutor::new())).drain().await;

    let jobs: Vec<_> = job_ids
        .iter()
        .filter_map(|id| plane.queue().get(id))
        .collect();
    println!("{}", serde_json::to_string_pretty(&jobs)?);

    let failed = jobs.iter().filter(|j| j.status == JobStatus::Failed).count();
    if failed > 0 {
        eprintln!("\n[{} of {} jobs failed]", failed, jobs.len());
        std::process::exit(1);
    }

    Ok(())
}

/// Load a bundle, feed the events through the control plane, print a summary
async fn replay_events(bundle_path: &Path, events_path: &Path) -> Result<()> {
    let cfg = config::config()?;
    let plane = ControlPlane::new(cfg.settings.clone());

    let bundle = replay::Bundle::from_file(bundle_path)?;
    bundle.install(&plane)?;

    let content = std::fs::read_to_string(events_path)
        .with_context(|| format!("Failed to read events file: {}", events_path.display()))?;
    let events = replay::parse_events(&content)?;

    // Config paths in the bundle are relative to the bundle itself
    let base_dir = bundle_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_default();
    let executor = Arc::new(FileExecutor::with_base_dir(base_dir));

    let summary = replay::replay(&plane, &events, executor).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

/// Print the resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::reload_config()?;
    let settings = &cfg.settings;

    println!("masterchef configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Queue:");
    println!("  Capacity:       {}", settings.queue.capacity);
    println!();
    println!("Worker:");
    match settings.worker.apply_timeout_seconds {
        Some(seconds) => println!("  Apply timeout:  {}s", seconds),
        None => println!("  Apply timeout:  (none)"),
    }
    println!();
    println!("Alerts:");
    println!("  Max items:      {}", settings.inbox.max_items);

    Ok(())
}
