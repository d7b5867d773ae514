//! Executor that validates config files on disk.
//!
//! Used by the binary when no real applier is wired in: a config "applies"
//! when the file exists and parses as YAML.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::Executor;

/// Reads and parses config paths, optionally relative to a base directory
#[derive(Debug, Clone, Default)]
pub struct FileExecutor {
    base_dir: Option<PathBuf>,
}

impl FileExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative config paths against `base_dir`
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, config_path: &str) -> PathBuf {
        let path = PathBuf::from(config_path);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }
}

#[async_trait]
impl Executor for FileExecutor {
    fn name(&self) -> &str {
        "file"
    }

    async fn apply_path(&self, config_path: &str) -> Result<()> {
        let path = self.resolve(config_path);

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        let document: serde_yaml::Value = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;

        debug!(path = %path.display(), empty = document.is_null(), "Config applied");
        Ok(())
    }
}
