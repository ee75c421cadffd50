//! Wire shapes returned by the tracker proxy.
//!
//! Everything here mirrors the proxy's JSON loosely: optional fields are
//! defaulted and conversion into domain types drops what cannot be parsed
//! instead of failing the whole ticket.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::classify::classify;
use crate::models::{BackwardTransition, StatusChangeEvent, TicketHistory, WorkflowCategory};

/// Parses RFC 3339 as well as the tracker's `2026-01-05T09:00:00.000+0000` form.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub jira_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoardList {
    #[serde(default)]
    pub boards: Vec<Board>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Board {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub location: BoardLocation,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoardLocation {
    #[serde(rename = "projectKey")]
    pub project_key: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SprintList {
    #[serde(default)]
    pub sprints: Vec<Sprint>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sprint {
    pub id: u64,
    pub name: String,
    pub state: Option<String>,
    #[serde(rename = "startDate")]
    pub start_date: Option<String>,
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
    #[serde(rename = "boardName")]
    pub board_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub issues: Vec<IssueSummary>,
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueSummary {
    pub key: String,
    #[serde(default)]
    pub fields: IssueFields,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueFields {
    pub status: Option<NamedField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedField {
    pub name: String,
}

impl IssueSummary {
    pub fn status(&self) -> Option<&str> {
        self.fields.status.as_ref().map(|status| status.name.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStatusChange {
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteTransition {
    pub from: Option<String>,
    pub to: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueHistory {
    pub key: Option<String>,
    pub summary: Option<String>,
    pub current_status: Option<String>,
    pub created: Option<String>,
    pub resolution_date: Option<String>,
    #[serde(default)]
    pub status_changes: Vec<RawStatusChange>,
    pub ping_pong_score: Option<u32>,
    #[serde(default)]
    pub ping_pong_transitions: Vec<RemoteTransition>,
    pub error: Option<String>,
}

/// Category for either a proxy machine key (`in_qa`) or a raw status label.
fn category_of(raw: &str) -> Option<WorkflowCategory> {
    WorkflowCategory::from_key(raw).or_else(|| classify(raw))
}

pub fn convert_transitions(remote: &[RemoteTransition]) -> Vec<BackwardTransition> {
    remote
        .iter()
        .filter_map(|transition| {
            Some(BackwardTransition {
                from: category_of(transition.from.as_deref()?)?,
                to: category_of(transition.to.as_deref()?)?,
                timestamp: parse_timestamp(transition.date.as_deref()?)?,
            })
        })
        .collect()
}

impl IssueHistory {
    /// Normalizes the payload, dropping status changes that lack a target or a
    /// parseable date. Returns `None` when the current status is unknown.
    ///
    /// The proxy leads `status_changes` with a sourceless entry dated at
    /// creation that carries the *current* status. It is not a transition and
    /// is dropped; the initial status comes from the next change's source.
    pub fn into_ticket(self, key: &str, fallback_status: Option<&str>) -> Option<TicketHistory> {
        if let Some(error) = self.error.as_deref() {
            tracing::debug!(ticket = key, error, "proxy reported a partial history");
        }

        let current_status = self
            .current_status
            .clone()
            .or_else(|| fallback_status.map(str::to_string))?;
        let created = self.created.as_deref().and_then(parse_timestamp);

        let mut events = Vec::with_capacity(self.status_changes.len());
        for (index, change) in self.status_changes.into_iter().enumerate() {
            let (Some(date), Some(to)) = (change.date.as_deref(), change.to) else {
                tracing::warn!(ticket = key, "skipping status change without date or target");
                continue;
            };
            let Some(timestamp) = parse_timestamp(date) else {
                tracing::warn!(ticket = key, date, "skipping status change with unparseable date");
                continue;
            };
            if index == 0 && change.from.is_none() && created == Some(timestamp) {
                tracing::debug!(ticket = key, status = %to, "dropping creation marker");
                continue;
            }
            events.push(StatusChangeEvent {
                timestamp,
                from_label: change.from,
                to_label: to,
                author: change.author,
            });
        }

        let mut history = TicketHistory::new(self.key.unwrap_or_else(|| key.to_string()), current_status)
            .with_events(events);
        history.summary = self.summary;
        history.created = created;
        history.resolution_date = self.resolution_date.as_deref().and_then(parse_timestamp);
        Some(history)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageMetric {
    #[serde(default)]
    pub average_hours: f64,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub total_hours: f64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteChurnScore {
    pub score: u32,
    #[serde(default)]
    pub transitions: Vec<RemoteTransition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChurnMetrics {
    #[serde(default, alias = "total_ping_pongs")]
    pub total_backward_transitions: u64,
    #[serde(default, alias = "tickets_with_ping_pongs")]
    pub tickets_with_churn: u64,
    #[serde(default)]
    pub tickets_with_scores: HashMap<String, RemoteChurnScore>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagedMetrics {
    pub stage_metrics: BTreeMap<String, StageMetric>,
    #[serde(default)]
    pub churn_metrics: Option<ChurnMetrics>,
    pub total_issues: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyMetrics {
    pub cycle_times: BTreeMap<String, StageMetric>,
    #[serde(default)]
    pub ping_pong_metrics: Option<ChurnMetrics>,
    pub total_issues: Option<u64>,
}

/// The two response shapes the resolution-metrics endpoint has produced.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ResolutionMetrics {
    Staged(StagedMetrics),
    Legacy(LegacyMetrics),
}

impl ResolutionMetrics {
    pub fn stages(&self) -> &BTreeMap<String, StageMetric> {
        match self {
            ResolutionMetrics::Staged(metrics) => &metrics.stage_metrics,
            ResolutionMetrics::Legacy(metrics) => &metrics.cycle_times,
        }
    }

    pub fn churn(&self) -> Option<&ChurnMetrics> {
        match self {
            ResolutionMetrics::Staged(metrics) => metrics.churn_metrics.as_ref(),
            ResolutionMetrics::Legacy(metrics) => metrics.ping_pong_metrics.as_ref(),
        }
    }

    pub fn churn_for(&self, key: &str) -> Option<&RemoteChurnScore> {
        self.churn()?.tickets_with_scores.get(key)
    }

    pub fn total_issues(&self) -> Option<u64> {
        match self {
            ResolutionMetrics::Staged(metrics) => metrics.total_issues,
            ResolutionMetrics::Legacy(metrics) => metrics.total_issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn parses_tracker_and_rfc3339_timestamps() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2026-01-05T09:00:00.000+0000"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-05T09:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-05T10:00:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-05T09:00:00"), Some(expected));
        assert_eq!(parse_timestamp("last tuesday"), None);
    }

    #[test]
    fn history_payload_normalizes_into_sorted_events() {
        let payload: IssueHistory = serde_json::from_value(json!({
            "key": "OPS-12",
            "summary": "Retry webhooks",
            "current_status": "In Review",
            "created": "2026-01-05T09:00:00.000+0000",
            "resolution_date": null,
            "status_changes": [
                {"date": "2026-01-05T09:00:00.000+0000", "from": null, "to": "In Review"},
                {"date": "2026-01-06T09:00:00.000+0000", "from": "In Progress", "to": "In Review", "author": "Jules Moreno"},
                {"date": "not a date", "from": "To Do", "to": "In Progress"},
                {"date": "2026-01-05T12:00:00.000+0000", "from": "To Do", "to": "In Progress"}
            ],
            "status_durations": {"To Do": {"total_hours": 3.0, "count": 1}}
        }))
        .unwrap();

        let history = payload.into_ticket("OPS-12", None).unwrap();
        let targets: Vec<&str> = history.events.iter().map(|e| e.to_label.as_str()).collect();
        assert_eq!(targets, vec!["In Progress", "In Review"]);
        assert_eq!(history.events[0].from_label.as_deref(), Some("To Do"));
        assert_eq!(history.events[1].author.as_deref(), Some("Jules Moreno"));
        assert_eq!(history.summary.as_deref(), Some("Retry webhooks"));
        assert_eq!(history.created, Some(Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap()));
        assert!(history.resolution_date.is_none());
    }

    #[test]
    fn creation_marker_without_later_changes_leaves_no_events() {
        let payload: IssueHistory = serde_json::from_value(json!({
            "current_status": "To Do",
            "created": "2026-01-05T09:00:00.000+0000",
            "status_changes": [
                {"date": "2026-01-05T09:00:00.000+0000", "from": null, "to": "To Do"}
            ]
        }))
        .unwrap();

        let history = payload.into_ticket("OPS-13", None).unwrap();
        assert!(history.events.is_empty());
        assert!(history.created.is_some());
    }

    #[test]
    fn sourceless_change_away_from_creation_is_kept() {
        let payload: IssueHistory = serde_json::from_value(json!({
            "current_status": "In Progress",
            "created": "2026-01-05T09:00:00.000+0000",
            "status_changes": [
                {"date": "2026-01-05T10:00:00.000+0000", "from": null, "to": "In Progress"}
            ]
        }))
        .unwrap();

        let history = payload.into_ticket("OPS-14", None).unwrap();
        assert_eq!(history.events.len(), 1);
    }

    #[test]
    fn missing_current_status_uses_fallback() {
        let payload: IssueHistory = serde_json::from_value(json!({"status_changes": []})).unwrap();
        assert!(payload.clone().into_ticket("OPS-1", None).is_none());
        let history = payload.into_ticket("OPS-1", Some("Done")).unwrap();
        assert_eq!(history.current_status, "Done");
        assert_eq!(history.key, "OPS-1");
    }

    #[test]
    fn resolution_metrics_resolve_both_shapes() {
        let staged: ResolutionMetrics = serde_json::from_value(json!({
            "stage_metrics": {"Review": {"average_hours": 12.5, "count": 4}},
            "churn_metrics": {
                "tickets_with_scores": {
                    "OPS-3": {"score": 4, "transitions": [
                        {"from": "in_review", "to": "in_progress", "date": "2026-01-07T10:00:00Z"}
                    ]}
                }
            }
        }))
        .unwrap();
        assert!(matches!(staged, ResolutionMetrics::Staged(_)));
        assert_eq!(staged.stages()["Review"].count, 4);
        let score = staged.churn_for("OPS-3").unwrap();
        assert_eq!(score.score, 4);
        let transitions = convert_transitions(&score.transitions);
        assert_eq!(transitions[0].from, WorkflowCategory::InReview);

        let legacy: ResolutionMetrics = serde_json::from_value(json!({
            "total_issues": 9,
            "cycle_times": {"Total": {"average_hours": 0, "count": 0, "total_hours": 0, "description": "Total time"}},
            "ping_pong_metrics": {"total_ping_pongs": 2, "tickets_with_scores": {"OPS-9": {"score": 2}}}
        }))
        .unwrap();
        assert!(matches!(legacy, ResolutionMetrics::Legacy(_)));
        assert_eq!(legacy.total_issues(), Some(9));
        assert_eq!(legacy.churn().unwrap().total_backward_transitions, 2);
        assert_eq!(legacy.churn_for("OPS-9").unwrap().score, 2);
        assert!(legacy.churn_for("OPS-1").is_none());
    }

    #[test]
    fn unknown_shape_is_rejected() {
        let result = serde_json::from_value::<ResolutionMetrics>(json!({"error": "boom"}));
        assert!(result.is_err());
    }
}
