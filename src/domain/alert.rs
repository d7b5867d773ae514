//! Alert inbox types: deduplicated alerts, suppressions and routing.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity, totally ordered critical > high > medium > low
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Normalize aliases; anything unrecognized is `Medium`
    pub fn normalize(value: &str) -> Self {
        Self::parse(value).unwrap_or(Self::Medium)
    }

    /// Recognized aliases only
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" | "crit" | "p0" => Some(Self::Critical),
            "high" | "error" | "p1" => Some(Self::High),
            "medium" | "warn" | "warning" | "p2" => Some(Self::Medium),
            "low" | "info" | "p3" => Some(Self::Low),
            _ => None,
        }
    }

    pub fn weight(&self) -> u8 {
        match self {
            Self::Critical => 4,
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    pub fn route(&self) -> Route {
        match self {
            Self::Critical => Route::Pager,
            Self::High => Route::Ticket,
            Self::Medium => Route::Chatops,
            Self::Low => Route::Digest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight().cmp(&other.weight())
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::Medium
    }
}

impl From<String> for Severity {
    fn from(value: String) -> Self {
        Self::normalize(&value)
    }
}

impl From<Severity> for &'static str {
    fn from(value: Severity) -> Self {
        value.as_str()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human destination implied by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Pager,
    Ticket,
    Chatops,
    Digest,
}

/// Operator-facing state of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

/// A deduplicated alert, unique by fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertItem {
    /// `alert-<N>`
    pub id: String,

    pub fingerprint: String,

    pub event_type: String,

    pub message: String,

    pub severity: Severity,

    pub route: Route,

    pub status: AlertStatus,

    /// Non-suppressed ingests merged into this alert
    pub count: u64,

    /// Ingests swallowed by a suppression
    pub suppressed_count: u64,

    #[serde(default)]
    pub fields: BTreeMap<String, String>,

    pub first_seen_at: DateTime<Utc>,

    pub last_seen_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Time-bounded mute for one fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSuppression {
    pub fingerprint: String,

    #[serde(default)]
    pub reason: String,

    pub created_at: DateTime<Utc>,

    pub until: DateTime<Utc>,

    /// Ingests swallowed while active
    pub hits: u64,
}

impl AlertSuppression {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.until > now
    }
}

/// Raw alert intake
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertIngest {
    pub event_type: String,

    #[serde(default)]
    pub message: String,

    /// Free-form severity, normalized on intake
    #[serde(default)]
    pub severity: String,

    /// Used verbatim (lower-cased) when non-empty
    #[serde(default)]
    pub fingerprint: String,

    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// What an ingest did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertIngestResult {
    pub fingerprint: String,

    /// Copy of the alert after the ingest, if one exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<AlertItem>,

    pub created: bool,
    pub deduplicated: bool,
    pub suppressed: bool,
}

/// Inbox counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub open: usize,
    pub acknowledged: usize,
    pub resolved: usize,
    pub active_suppressions: usize,
    pub total: usize,
}
