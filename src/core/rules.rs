//! Rule engine: matches inbound events against rules.
//!
//! The engine only reports matches; routing the matched actions to the
//! queue, templates or workflows is the host's job. A whole evaluation
//! runs under the write lock. That makes cooldowns exact even with
//! concurrent producers, at the cost of serializing evaluations.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::domain::event::{lookup_path, value_as_string};
use crate::domain::{Comparator, Event, MatchMode, NewRule, Rule, RuleCondition, RuleMatch};

use super::error::{parse_seq, ControlError, Result};

/// Largest cooldown representable as a chrono duration
const MAX_COOLDOWN_SECONDS: i64 = i64::MAX / 1000;

#[derive(Default)]
struct RuleState {
    next_seq: u64,
    rules: BTreeMap<u64, Rule>,
    /// Compiled regex conditions keyed by pattern source
    patterns: HashMap<String, Regex>,
}

impl RuleState {
    /// Drop compiled patterns no stored rule refers to any more
    fn prune_patterns(&mut self) {
        let rules = &self.rules;
        self.patterns.retain(|source, _| {
            rules.values().any(|rule| {
                rule.conditions
                    .iter()
                    .any(|c| c.comparator == Comparator::Regex && &c.value == source)
            })
        });
    }
}

#[derive(Default)]
pub struct RuleEngine {
    state: RwLock<RuleState>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a rule; new rules start enabled
    pub fn create(&self, input: NewRule) -> Result<Rule> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(ControlError::invalid("rule name is required"));
        }
        let source_prefix = input.source_prefix.trim();
        if source_prefix.is_empty() {
            return Err(ControlError::invalid("rule source prefix is required"));
        }
        if input.actions.is_empty() {
            return Err(ControlError::invalid("rule needs at least one action"));
        }
        for (index, action) in input.actions.iter().enumerate() {
            if action.target().trim().is_empty() {
                return Err(ControlError::invalid(format!(
                    "action {} ({}) is missing its target",
                    index,
                    action.kind()
                )));
            }
        }
        for (index, condition) in input.conditions.iter().enumerate() {
            if condition.field.trim().is_empty() {
                return Err(ControlError::invalid(format!(
                    "condition {} has an empty field path",
                    index
                )));
            }
        }

        let now = Utc::now();
        let mut state = self.state.write();
        state.next_seq += 1;
        let seq = state.next_seq;
        let rule = Rule {
            id: format!("rule-{}", seq),
            name: name.to_string(),
            description: input.description,
            source_prefix: source_prefix.to_string(),
            match_mode: input.match_mode,
            conditions: input
                .conditions
                .into_iter()
                .map(|c| RuleCondition {
                    field: c.field.trim().to_string(),
                    ..c
                })
                .collect(),
            actions: input.actions,
            cooldown_seconds: input.cooldown_seconds,
            enabled: true,
            created_at: now,
            updated_at: now,
            last_triggered_at: None,
            trigger_count: 0,
        };
        state.rules.insert(seq, rule.clone());

        info!(rule_id = %rule.id, source_prefix = %rule.source_prefix, "Rule created");
        Ok(rule)
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<Rule> {
        let mut state = self.state.write();
        let rule = parse_seq(id, "rule")
            .and_then(|seq| state.rules.get_mut(&seq))
            .ok_or_else(|| ControlError::not_found("rule", id))?;

        if rule.enabled != enabled {
            rule.enabled = enabled;
            rule.updated_at = Utc::now();
            info!(rule_id = id, enabled, "Rule toggled");
        }
        Ok(rule.clone())
    }

    pub fn get(&self, id: &str) -> Option<Rule> {
        let seq = parse_seq(id, "rule")?;
        self.state.read().rules.get(&seq).cloned()
    }

    /// All rules in ID order
    pub fn list(&self) -> Vec<Rule> {
        self.state.read().rules.values().cloned().collect()
    }

    pub fn delete(&self, id: &str) -> Result<Rule> {
        let mut state = self.state.write();
        let removed = parse_seq(id, "rule")
            .and_then(|seq| state.rules.remove(&seq))
            .ok_or_else(|| ControlError::not_found("rule", id))?;
        state.prune_patterns();
        info!(rule_id = id, "Rule deleted");
        Ok(removed)
    }

    pub fn evaluate(&self, event: &Event) -> Result<Vec<RuleMatch>> {
        self.evaluate_at(event, Utc::now())
    }

    /// Evaluate against an explicit clock.
    ///
    /// Matches come back in rule-ID order. An invalid regex fails the call
    /// and leaves every rule untouched.
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub fn evaluate_at(&self, event: &Event, now: DateTime<Utc>) -> Result<Vec<RuleMatch>> {
        let tree = event.to_tree();
        let mut guard = self.state.write();
        let state = &mut *guard;

        let mut matched = Vec::new();
        for (seq, rule) in state.rules.iter() {
            if !rule.enabled || !event.event_type.starts_with(&rule.source_prefix) {
                continue;
            }
            if in_cooldown(rule, now) {
                debug!(rule_id = %rule.id, "Rule in cooldown");
                continue;
            }
            if rule_matches(rule, &tree, &mut state.patterns)? {
                matched.push(*seq);
            }
        }

        let mut matches = Vec::with_capacity(matched.len());
        for seq in matched {
            if let Some(rule) = state.rules.get_mut(&seq) {
                rule.last_triggered_at = Some(now);
                rule.trigger_count += 1;
                info!(rule_id = %rule.id, trigger_count = rule.trigger_count, "Rule matched");
                matches.push(RuleMatch {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    event: event.clone(),
                    actions: rule.actions.clone(),
                });
            }
        }

        Ok(matches)
    }
}

fn in_cooldown(rule: &Rule, now: DateTime<Utc>) -> bool {
    if rule.cooldown_seconds == 0 {
        return false;
    }
    let seconds = i64::try_from(rule.cooldown_seconds)
        .unwrap_or(i64::MAX)
        .min(MAX_COOLDOWN_SECONDS);
    let cooldown = Duration::seconds(seconds);
    match rule.last_triggered_at {
        Some(last) => last
            .checked_add_signed(cooldown)
            .map_or(true, |until| now < until),
        None => false,
    }
}

/// All conditions are evaluated so that a bad regex always surfaces
fn rule_matches(rule: &Rule, tree: &Value, patterns: &mut HashMap<String, Regex>) -> Result<bool> {
    if rule.conditions.is_empty() {
        return Ok(true);
    }

    let mut results = Vec::with_capacity(rule.conditions.len());
    for condition in &rule.conditions {
        let hit = condition_matches(condition, tree, patterns).map_err(|e| match e {
            ControlError::InvalidInput(msg) => {
                ControlError::InvalidInput(format!("rule {}: {}", rule.id, msg))
            }
            other => other,
        })?;
        results.push(hit);
    }

    Ok(match rule.match_mode {
        MatchMode::All => results.iter().all(|hit| *hit),
        MatchMode::Any => results.iter().any(|hit| *hit),
    })
}

/// Compile a regex condition once; failures are not cached so they
/// surface on every evaluation
fn compiled<'a>(patterns: &'a mut HashMap<String, Regex>, source: &str) -> Result<&'a Regex> {
    if !patterns.contains_key(source) {
        let regex = Regex::new(source)
            .map_err(|e| ControlError::invalid(format!("invalid regex '{}': {}", source, e)))?;
        patterns.insert(source.to_string(), regex);
    }
    patterns
        .get(source)
        .ok_or_else(|| ControlError::invalid(format!("invalid regex '{}'", source)))
}

fn condition_matches(
    condition: &RuleCondition,
    tree: &Value,
    patterns: &mut HashMap<String, Regex>,
) -> Result<bool> {
    let pattern = match condition.comparator {
        Comparator::Regex => Some(compiled(patterns, &condition.value)?),
        _ => None,
    };

    let Some(actual) = lookup_path(tree, &condition.field).and_then(value_as_string) else {
        return Ok(false);
    };

    if let Some(pattern) = pattern {
        return Ok(pattern.is_match(&actual));
    }

    let actual = actual.to_lowercase();
    let expected = condition.value.to_lowercase();
    Ok(match condition.comparator {
        Comparator::Eq => actual == expected,
        Comparator::Ne => actual != expected,
        Comparator::Contains => actual.contains(&expected),
        Comparator::Prefix => actual.starts_with(&expected),
        Comparator::Suffix => actual.ends_with(&expected),
        Comparator::Regex => false,
    })
}
