//! Event-to-action rules.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::Event;
use super::job::Priority;

/// How a rule combines its conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Every condition must match
    #[default]
    All,

    /// At least one condition must match
    Any,
}

/// Comparison applied between a field value and the expected value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Ne,
    Contains,
    Prefix,
    Suffix,
    Regex,
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Contains => "contains",
            Self::Prefix => "prefix",
            Self::Suffix => "suffix",
            Self::Regex => "regex",
        };
        f.write_str(name)
    }
}

/// Field-path predicate, e.g. `fields.sev eq high`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Dotted path into the event tree (`type`, `message`, `fields.<key>`)
    pub field: String,

    pub comparator: Comparator,

    #[serde(default)]
    pub value: String,
}

/// What the host should do when a rule matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    EnqueueApply {
        config_path: String,

        #[serde(default)]
        priority: Priority,

        #[serde(default)]
        force: bool,
    },

    LaunchTemplate {
        template_id: String,

        #[serde(default)]
        priority: Priority,

        #[serde(default)]
        force: bool,

        #[serde(default)]
        answers: BTreeMap<String, String>,
    },

    LaunchWorkflow {
        workflow_id: String,

        #[serde(default)]
        priority: Priority,

        #[serde(default)]
        force: bool,
    },
}

impl RuleAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EnqueueApply { .. } => "enqueue_apply",
            Self::LaunchTemplate { .. } => "launch_template",
            Self::LaunchWorkflow { .. } => "launch_workflow",
        }
    }

    /// The required reference of this action (path, template or workflow ID)
    pub fn target(&self) -> &str {
        match self {
            Self::EnqueueApply { config_path, .. } => config_path,
            Self::LaunchTemplate { template_id, .. } => template_id,
            Self::LaunchWorkflow { workflow_id, .. } => workflow_id,
        }
    }
}

/// A stored rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// `rule-<N>`
    pub id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Required prefix of `Event::event_type`
    pub source_prefix: String,

    pub match_mode: MatchMode,

    pub conditions: Vec<RuleCondition>,

    pub actions: Vec<RuleAction>,

    pub cooldown_seconds: u64,

    pub enabled: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,

    pub trigger_count: u64,
}

/// Input for creating a rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub source_prefix: String,

    #[serde(default)]
    pub match_mode: MatchMode,

    #[serde(default)]
    pub conditions: Vec<RuleCondition>,

    #[serde(default)]
    pub actions: Vec<RuleAction>,

    #[serde(default)]
    pub cooldown_seconds: u64,
}

/// A rule that matched an event, with a copy of its actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub rule_id: String,
    pub rule_name: String,
    pub event: Event,
    pub actions: Vec<RuleAction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_yaml_shape() {
        let yaml = r#"
- type: enqueue_apply
  config_path: restart.yaml
  priority: high
- type: launch_workflow
  workflow_id: wf-1
"#;
        let actions: Vec<RuleAction> = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(actions[0].kind(), "enqueue_apply");
        assert_eq!(actions[0].target(), "restart.yaml");
        assert!(matches!(
            actions[0],
            RuleAction::EnqueueApply { priority: Priority::High, force: false, .. }
        ));
        assert_eq!(actions[1].target(), "wf-1");
    }

    #[test]
    fn test_unknown_comparator_is_rejected() {
        let result: Result<RuleCondition, _> =
            serde_json::from_str(r#"{"field":"fields.sev","comparator":"gt","value":"1"}"#);
        assert!(result.is_err());
    }
}
