//! Alert inbox: deduplicating, fingerprint-indexed alert intake.
//!
//! Ingests that share a fingerprint merge into one alert. Severity only
//! ever rises, and the route follows it. A live suppression swallows
//! ingests for its fingerprint and only bumps counters. All operations
//! are serialized behind one mutex.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{
    AlertIngest, AlertIngestResult, AlertItem, AlertStatus, AlertSummary, AlertSuppression,
    Event, Severity,
};

use super::error::{parse_seq, ControlError, Result};

/// Fields folded into a synthesized fingerprint, in this order
const FINGERPRINT_FIELDS: [&str; 6] = ["service", "host", "resource", "component", "sev", "severity"];

/// Inbox sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxSettings {
    /// Maximum number of alerts retained (default: 5000)
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

fn default_max_items() -> usize {
    5000
}

impl Default for InboxSettings {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
        }
    }
}

#[derive(Default)]
struct InboxState {
    next_seq: u64,
    alerts: BTreeMap<u64, AlertItem>,
    by_fingerprint: HashMap<String, u64>,
    suppressions: BTreeMap<String, AlertSuppression>,
}

impl InboxState {
    fn expire_suppressions(&mut self, now: DateTime<Utc>) {
        self.suppressions.retain(|fingerprint, s| {
            let live = s.is_active_at(now);
            if !live {
                debug!(fingerprint = %fingerprint, hits = s.hits, "Suppression expired");
            }
            live
        });
    }

    /// Make room for one more alert
    fn evict_one(&mut self) {
        let victim = self
            .alerts
            .iter()
            .filter(|(_, a)| a.status == AlertStatus::Resolved)
            .min_by_key(|(seq, a)| (a.last_seen_at, **seq))
            .or_else(|| self.alerts.iter().min_by_key(|(seq, a)| (a.last_seen_at, **seq)))
            .map(|(seq, _)| *seq);

        if let Some(seq) = victim {
            if let Some(evicted) = self.alerts.remove(&seq) {
                self.by_fingerprint.remove(&evicted.fingerprint);
                debug!(alert_id = %evicted.id, "Alert evicted");
            }
        }
    }
}

#[derive(Default)]
pub struct AlertInbox {
    settings: InboxSettings,
    state: Mutex<InboxState>,
}

impl AlertInbox {
    pub fn new(mut settings: InboxSettings) -> Self {
        settings.max_items = settings.max_items.max(1);
        Self {
            settings,
            state: Mutex::new(InboxState::default()),
        }
    }

    pub fn ingest(&self, input: AlertIngest) -> AlertIngestResult {
        self.ingest_at(input, Utc::now())
    }

    pub fn ingest_at(&self, input: AlertIngest, now: DateTime<Utc>) -> AlertIngestResult {
        let fingerprint = fingerprint(&input);
        let severity = Severity::normalize(&input.severity);

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.expire_suppressions(now);

        if let Some(suppression) = state.suppressions.get_mut(&fingerprint) {
            suppression.hits += 1;
            let hits = suppression.hits;

            let alert = state
                .by_fingerprint
                .get(&fingerprint)
                .copied()
                .and_then(|seq| state.alerts.get_mut(&seq))
                .map(|alert| {
                    alert.suppressed_count += 1;
                    alert.last_seen_at = now;
                    alert.clone()
                });

            debug!(fingerprint = %fingerprint, hits, "Alert suppressed");
            return AlertIngestResult {
                fingerprint,
                alert,
                created: false,
                deduplicated: false,
                suppressed: true,
            };
        }

        if let Some(seq) = state.by_fingerprint.get(&fingerprint).copied() {
            if let Some(alert) = state.alerts.get_mut(&seq) {
                alert.last_seen_at = now;
                alert.count += 1;
                alert.event_type = input.event_type;
                alert.message = input.message;
                alert.fields = input.fields;
                alert.severity = alert.severity.max(severity);
                alert.route = alert.severity.route();
                if alert.status != AlertStatus::Open {
                    info!(alert_id = %alert.id, "Alert reopened");
                    alert.status = AlertStatus::Open;
                    alert.acknowledged_at = None;
                    alert.resolved_at = None;
                }

                debug!(alert_id = %alert.id, count = alert.count, severity = %alert.severity, "Alert deduplicated");
                return AlertIngestResult {
                    fingerprint,
                    alert: Some(alert.clone()),
                    created: false,
                    deduplicated: true,
                    suppressed: false,
                };
            }
        }

        if state.alerts.len() >= self.settings.max_items {
            state.evict_one();
        }

        state.next_seq += 1;
        let seq = state.next_seq;
        let alert = AlertItem {
            id: format!("alert-{}", seq),
            fingerprint: fingerprint.clone(),
            event_type: input.event_type,
            message: input.message,
            severity,
            route: severity.route(),
            status: AlertStatus::Open,
            count: 1,
            suppressed_count: 0,
            fields: input.fields,
            first_seen_at: now,
            last_seen_at: now,
            acknowledged_at: None,
            resolved_at: None,
        };
        state.alerts.insert(seq, alert.clone());
        state.by_fingerprint.insert(fingerprint.clone(), seq);

        info!(alert_id = %alert.id, fingerprint = %fingerprint, severity = %severity, route = ?alert.route, "Alert created");
        AlertIngestResult {
            fingerprint,
            alert: Some(alert),
            created: true,
            deduplicated: false,
            suppressed: false,
        }
    }

    /// Ingest an event if it looks like an alert.
    ///
    /// Severity comes from the `severity` or `sev` field; failing that, from
    /// keywords in the event type. Events with neither are not accepted.
    pub fn ingest_event(&self, event: &Event) -> Option<AlertIngestResult> {
        let severity = event_severity(event)?;

        let fields = event
            .fields
            .keys()
            .filter_map(|key| event.field_str(key).map(|value| (key.clone(), value)))
            .collect();

        Some(self.ingest(AlertIngest {
            event_type: event.event_type.clone(),
            message: event.message.clone(),
            severity: severity.as_str().to_string(),
            fingerprint: event.field_str("fingerprint").unwrap_or_default(),
            fields,
        }))
    }

    pub fn get(&self, id: &str) -> Option<AlertItem> {
        let seq = parse_seq(id, "alert")?;
        self.state.lock().alerts.get(&seq).cloned()
    }

    /// Acknowledge an open alert; acknowledging twice is a no-op
    pub fn acknowledge(&self, id: &str) -> Result<AlertItem> {
        self.transition(id, |alert, now| match alert.status {
            AlertStatus::Open => {
                alert.status = AlertStatus::Acknowledged;
                alert.acknowledged_at = Some(now);
                Ok(())
            }
            AlertStatus::Acknowledged => Ok(()),
            AlertStatus::Resolved => Err(ControlError::IllegalState(format!(
                "alert {} is resolved",
                alert.id
            ))),
        })
    }

    /// Resolve an alert; resolving twice is a no-op
    pub fn resolve(&self, id: &str) -> Result<AlertItem> {
        self.transition(id, |alert, now| {
            if alert.status != AlertStatus::Resolved {
                alert.status = AlertStatus::Resolved;
                alert.resolved_at = Some(now);
            }
            Ok(())
        })
    }

    pub fn suppress(&self, fingerprint: &str, duration: Duration, reason: &str) -> Result<AlertSuppression> {
        self.suppress_at(fingerprint, duration, reason, Utc::now())
    }

    /// Create or extend a suppression. An existing suppression keeps the
    /// later of its current and new expiry.
    pub fn suppress_at(
        &self,
        fingerprint: &str,
        duration: Duration,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<AlertSuppression> {
        let fingerprint = fingerprint.trim().to_lowercase();
        if fingerprint.is_empty() {
            return Err(ControlError::invalid("suppression fingerprint is required"));
        }
        if duration <= Duration::zero() {
            return Err(ControlError::invalid("suppression duration must be positive"));
        }
        let until = now
            .checked_add_signed(duration)
            .ok_or_else(|| ControlError::invalid("suppression duration is out of range"))?;

        let mut state = self.state.lock();
        state.expire_suppressions(now);

        let suppression = state
            .suppressions
            .entry(fingerprint.clone())
            .and_modify(|s| {
                s.until = s.until.max(until);
                s.reason = reason.to_string();
            })
            .or_insert_with(|| AlertSuppression {
                fingerprint: fingerprint.clone(),
                reason: reason.to_string(),
                created_at: now,
                until,
                hits: 0,
            })
            .clone();

        warn!(fingerprint = %fingerprint, until = %suppression.until, reason, "Alert suppressed");
        Ok(suppression)
    }

    pub fn clear_suppression(&self, fingerprint: &str) -> bool {
        let fingerprint = fingerprint.trim().to_lowercase();
        let removed = self.state.lock().suppressions.remove(&fingerprint).is_some();
        if removed {
            info!(fingerprint = %fingerprint, "Suppression cleared");
        }
        removed
    }

    /// Alerts, most recently seen first (`limit` 0 = unlimited)
    pub fn list(&self, status: Option<AlertStatus>, limit: usize) -> Vec<AlertItem> {
        let state = self.state.lock();
        let mut alerts: Vec<AlertItem> = state
            .alerts
            .values()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        drop(state);

        alerts.sort_by(|a, b| {
            b.last_seen_at
                .cmp(&a.last_seen_at)
                .then_with(|| b.first_seen_at.cmp(&a.first_seen_at))
        });
        if limit > 0 {
            alerts.truncate(limit);
        }
        alerts
    }

    /// Live suppressions
    pub fn suppressions(&self) -> Vec<AlertSuppression> {
        let now = Utc::now();
        self.state
            .lock()
            .suppressions
            .values()
            .filter(|s| s.is_active_at(now))
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> AlertSummary {
        let now = Utc::now();
        let state = self.state.lock();
        let mut summary = AlertSummary {
            total: state.alerts.len(),
            active_suppressions: state.suppressions.values().filter(|s| s.is_active_at(now)).count(),
            ..Default::default()
        };
        for alert in state.alerts.values() {
            match alert.status {
                AlertStatus::Open => summary.open += 1,
                AlertStatus::Acknowledged => summary.acknowledged += 1,
                AlertStatus::Resolved => summary.resolved += 1,
            }
        }
        summary
    }

    fn transition<F>(&self, id: &str, apply: F) -> Result<AlertItem>
    where
        F: FnOnce(&mut AlertItem, DateTime<Utc>) -> Result<()>,
    {
        let mut state = self.state.lock();
        let alert = parse_seq(id, "alert")
            .and_then(|seq| state.alerts.get_mut(&seq))
            .ok_or_else(|| ControlError::not_found("alert", id))?;

        apply(&mut *alert, Utc::now())?;
        info!(alert_id = id, status = ?alert.status, "Alert updated");
        Ok(alert.clone())
    }
}

/// Canonical fingerprint of an ingest.
///
/// A caller-supplied fingerprint wins. Otherwise it is the event type, the
/// recognized fields as `key=value` in a fixed order, and `msg=<message>`,
/// joined with `|` and lower-cased.
pub fn fingerprint(input: &AlertIngest) -> String {
    let supplied = input.fingerprint.trim();
    if !supplied.is_empty() {
        return supplied.to_lowercase();
    }

    let mut parts = vec![input.event_type.trim().to_string()];
    for key in FINGERPRINT_FIELDS {
        if let Some(value) = input.fields.get(key) {
            let value = value.trim();
            if !value.is_empty() {
                parts.push(format!("{}={}", key, value));
            }
        }
    }
    parts.push(format!("msg={}", input.message.trim()));

    parts.join("|").to_lowercase()
}

fn event_severity(event: &Event) -> Option<Severity> {
    if let Some(raw) = event.field_str("severity").or_else(|| event.field_str("sev")) {
        return Some(Severity::normalize(&raw));
    }

    let event_type = event.event_type.to_lowercase();
    if event_type.contains("critical") {
        Some(Severity::Critical)
    } else if event_type.contains("alert") || event_type.contains("error") {
        Some(Severity::High)
    } else if event_type.contains("saturation") {
        Some(Severity::Medium)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Route;

    fn ingest(event_type: &str, severity: &str, service: &str) -> AlertIngest {
        AlertIngest {
            event_type: event_type.to_string(),
            message: "down".to_string(),
            severity: severity.to_string(),
            fingerprint: String::new(),
            fields: [("service".to_string(), service.to_string())].into_iter().collect(),
        }
    }

    #[test]
    fn test_fingerprint_synthesis() {
        let mut input = ingest("DB.Fail", "high", "X");
        input.fields.insert("host".to_string(), "db-1".to_string());
        input.fields.insert("ignored".to_string(), "zzz".to_string());

        assert_eq!(fingerprint(&input), "db.fail|service=x|host=db-1|msg=down");

        input.fingerprint = "  Custom-FP ".to_string();
        assert_eq!(fingerprint(&input), "custom-fp");
    }

    #[test]
    fn test_event_severity_heuristics() {
        assert_eq!(
            event_severity(&Event::new("x", "").with_field("sev", "p0")),
            Some(Severity::Critical)
        );
        assert_eq!(
            event_severity(&Event::new("x", "").with_field("severity", "bogus")),
            Some(Severity::Medium)
        );
        assert_eq!(event_severity(&Event::new("node.CRITICAL", "")), Some(Severity::Critical));
        assert_eq!(event_severity(&Event::new("external.alert", "")), Some(Severity::High));
        assert_eq!(event_severity(&Event::new("job.error", "")), Some(Severity::High));
        assert_eq!(event_severity(&Event::new("cpu.saturation", "")), Some(Severity::Medium));
        assert_eq!(event_severity(&Event::new("deploy.finished", "")), None);
    }

    #[test]
    fn test_ingest_event_rejects_non_alerts() {
        let inbox = AlertInbox::default();
        assert!(inbox.ingest_event(&Event::new("deploy.finished", "ok")).is_none());
        assert_eq!(inbox.summary().total, 0);

        let result = inbox
            .ingest_event(&Event::new("external.alert", "disk").with_field("host", "db-1"))
            .unwrap();
        assert!(result.created);
        assert_eq!(result.alert.unwrap().route, Route::Ticket);
    }

    #[test]
    fn test_dedup_reopens_resolved_alert() {
        let inbox = AlertInbox::default();
        let first = inbox.ingest(ingest("db.fail", "high", "x"));
        let id = first.alert.unwrap().id;

        inbox.acknowledge(&id).unwrap();
        inbox.resolve(&id).unwrap();
        assert!(matches!(inbox.acknowledge(&id), Err(ControlError::IllegalState(_))));

        let second = inbox.ingest(ingest("db.fail", "low", "x"));
        assert!(second.deduplicated);
        let alert = second.alert.unwrap();
        assert_eq!(alert.id, id);
        assert_eq!(alert.status, AlertStatus::Open);
        assert_eq!(alert.count, 2);
        assert_eq!(alert.severity, Severity::High);
        assert!(alert.resolved_at.is_none());
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let inbox = AlertInbox::default();
        let id = inbox.ingest(ingest("db.fail", "high", "x")).alert.unwrap().id;

        let first = inbox.acknowledge(&id).unwrap();
        let second = inbox.acknowledge(&id).unwrap();
        assert_eq!(first.acknowledged_at, second.acknowledged_at);
        assert!(matches!(
            inbox.acknowledge("alert-99"),
            Err(ControlError::NotFound { .. })
        ));
    }

    #[test]
    fn test_suppression_validation_and_extension() {
        let inbox = AlertInbox::default();
        let now = Utc::now();

        assert!(inbox.suppress_at("fp", Duration::zero(), "x", now).is_err());
        assert!(inbox.suppress_at(" ", Duration::seconds(5), "x", now).is_err());

        let first = inbox.suppress_at("FP", Duration::seconds(60), "maint", now).unwrap();
        assert_eq!(first.fingerprint, "fp");

        let shorter = inbox.suppress_at("fp", Duration::seconds(10), "short", now).unwrap();
        assert_eq!(shorter.until, first.until);

        let longer = inbox.suppress_at("fp", Duration::seconds(120), "long", now).unwrap();
        assert_eq!(longer.until, now + Duration::seconds(120));
        assert_eq!(longer.reason, "long");

        assert!(inbox.clear_suppression("Fp"));
        assert!(!inbox.clear_suppression("fp"));
    }

    #[test]
    fn test_suppression_expires() {
        let inbox = AlertInbox::default();
        let now = Utc::now();
        let input = ingest("db.fail", "high", "x");
        let fp = fingerprint(&input);

        inbox.suppress_at(&fp, Duration::seconds(10), "maint", now).unwrap();
        assert!(inbox.ingest_at(input.clone(), now + Duration::seconds(5)).suppressed);

        let after = inbox.ingest_at(input, now + Duration::seconds(10));
        assert!(after.created);
        assert_eq!(inbox.summary().active_suppressions, 0);
    }

    #[test]
    fn test_capacity_evicts_resolved_first() {
        let inbox = AlertInbox::new(InboxSettings { max_items: 2 });
        let a = inbox.ingest(ingest("a", "high", "x")).alert.unwrap();
        let b = inbox.ingest(ingest("b", "high", "x")).alert.unwrap();
        inbox.resolve(&b.id).unwrap();

        inbox.ingest(ingest("c", "high", "x"));
        assert!(inbox.get(&a.id).is_some());
        assert!(inbox.get(&b.id).is_none());
        assert_eq!(inbox.summary().total, 2);

        // Re-ingesting the evicted fingerprint creates a fresh alert
        let again = inbox.ingest(ingest("b", "high", "x"));
        assert!(again.created);
        assert!(inbox.get(&a.id).is_none());
    }

    #[test]
    fn test_list_order_and_limit() {
        let inbox = AlertInbox::default();
        let now = Utc::now();
        inbox.ingest_at(ingest("a", "high", "x"), now);
        inbox.ingest_at(ingest("b", "high", "x"), now + Duration::seconds(1));
        inbox.ingest_at(ingest("a", "high", "x"), now + Duration::seconds(2));

        let listed: Vec<String> = inbox.list(None, 0).into_iter().map(|a| a.event_type).collect();
        assert_eq!(listed, vec!["a", "b"]);
        assert_eq!(inbox.list(None, 1).len(), 1);
        assert!(inbox.list(Some(AlertStatus::Resolved), 0).is_empty());
    }
}
