//! Executor interfaces for applying configuration.
//!
//! The queue never interprets a config path; it hands the path to an
//! [`Executor`] and records whatever the executor reports.

pub mod file;

use anyhow::Result;
use async_trait::async_trait;

pub use file::FileExecutor;

/// Opaque side-effecting applier
#[async_trait]
pub trait Executor: Send + Sync {
    /// Human-readable executor name
    fn name(&self) -> &str;

    /// Apply a config path. Any error marks the job failed with the
    /// error's message.
    async fn apply_path(&self, config_path: &str) -> Result<()>;
}
