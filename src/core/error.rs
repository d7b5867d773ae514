//! Errors returned by the control-plane registries.
//!
//! Every error from a mutating operation leaves the registry unchanged.
//! Executor failures are not errors here; they are recorded on the job.

use thiserror::Error;

/// Result alias used across the engines
pub type Result<T> = std::result::Result<T, ControlError>;

/// Abstract error category, independent of the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    IllegalState,
    EmergencyStopActive,
    QueueFull,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Emergency stop active: {reason}")]
    EmergencyStopActive { reason: String },

    #[error("Queue full: {capacity} pending jobs")]
    QueueFull { capacity: usize },
}

impl ControlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::EmergencyStopActive { .. } => ErrorKind::EmergencyStopActive,
            Self::QueueFull { .. } => ErrorKind::QueueFull,
        }
    }

    pub(crate) fn not_found(kind: &'static str, id: &str) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

/// Parse the numeric part of a `<prefix>-<N>` identifier.
///
/// Only the canonical form is accepted: `job-01` and `job-+1` are not
/// `job-1`.
pub(crate) fn parse_seq(id: &str, prefix: &str) -> Option<u64> {
    let digits = id.strip_prefix(prefix)?.strip_prefix('-')?;
    if digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
