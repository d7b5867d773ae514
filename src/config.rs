//! Configuration for the masterchef engines.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MASTERCHEF_QUEUE_CAPACITY,
//!    MASTERCHEF_APPLY_TIMEOUT_SECONDS, MASTERCHEF_ALERT_MAX_ITEMS)
//! 2. Project config file (.masterchef/config.yaml in the current
//!    directory or any parent)
//! 3. User config file (~/.masterchef/config.yaml)
//! 4. Defaults

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::ControlSettings;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const ENV_QUEUE_CAPACITY: &str = "MASTERCHEF_QUEUE_CAPACITY";
pub const ENV_APPLY_TIMEOUT: &str = "MASTERCHEF_APPLY_TIMEOUT_SECONDS";
pub const ENV_ALERT_MAX_ITEMS: &str = "MASTERCHEF_ALERT_MAX_ITEMS";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub queue: Option<QueueConfig>,
    #[serde(default)]
    pub worker: Option<WorkerConfig>,
    #[serde(default)]
    pub alerts: Option<AlertsConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub apply_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    pub max_items: Option<usize>,
}

/// Resolved configuration
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    /// Engine settings after all sources were applied
    pub settings: ControlSettings,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Find config file by searching current directory and parents, then home
fn find_config_file() -> Option<PathBuf> {
    if let Ok(mut current) = std::env::current_dir() {
        loop {
            let config_path = current.join(".masterchef").join("config.yaml");
            if config_path.exists() {
                return Some(config_path);
            }

            if !current.pop() {
                break;
            }
        }
    }

    let user_config = dirs::home_dir()?.join(".masterchef").join("config.yaml");
    user_config.exists().then_some(user_config)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Overlay a parsed config file on the settings
fn apply_file(settings: &mut ControlSettings, file: &ConfigFile) {
    if let Some(capacity) = file.queue.as_ref().and_then(|q| q.capacity) {
        settings.queue.capacity = capacity;
    }
    if let Some(timeout) = file.worker.as_ref().and_then(|w| w.apply_timeout_seconds) {
        settings.worker.apply_timeout_seconds = Some(timeout);
    }
    if let Some(max_items) = file.alerts.as_ref().and_then(|a| a.max_items) {
        settings.inbox.max_items = max_items;
    }
}

/// Overlay environment variables, read through `lookup`
fn apply_env<F>(settings: &mut ControlSettings, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(ENV_QUEUE_CAPACITY) {
        settings.queue.capacity = raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a positive integer: {}", ENV_QUEUE_CAPACITY, raw))?;
    }
    if let Some(raw) = lookup(ENV_APPLY_TIMEOUT) {
        let seconds: u64 = raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number of seconds: {}", ENV_APPLY_TIMEOUT, raw))?;
        settings.worker.apply_timeout_seconds = (seconds > 0).then_some(seconds);
    }
    if let Some(raw) = lookup(ENV_ALERT_MAX_ITEMS) {
        settings.inbox.max_items = raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a positive integer: {}", ENV_ALERT_MAX_ITEMS, raw))?;
    }
    Ok(())
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let mut settings = ControlSettings::default();

    let config_file = find_config_file();
    if let Some(ref path) = config_file {
        let file = load_config_file(path)?;
        apply_file(&mut settings, &file);
    }

    apply_env(&mut settings, |key| std::env::var(key).ok())?;

    Ok(ResolvedConfig {
        settings,
        config_file,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Resolve configuration again, bypassing the cache
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}
