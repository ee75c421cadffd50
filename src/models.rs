use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowCategory {
    ToDo,
    InProgress,
    InReview,
    InQa,
    Done,
}

impl WorkflowCategory {
    pub const ALL: [WorkflowCategory; 5] = [
        WorkflowCategory::ToDo,
        WorkflowCategory::InProgress,
        WorkflowCategory::InReview,
        WorkflowCategory::InQa,
        WorkflowCategory::Done,
    ];

    /// Machine key used by the proxy in its metrics payloads.
    pub fn key(self) -> &'static str {
        match self {
            WorkflowCategory::ToDo => "to_do",
            WorkflowCategory::InProgress => "in_progress",
            WorkflowCategory::InReview => "in_review",
            WorkflowCategory::InQa => "in_qa",
            WorkflowCategory::Done => "done",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            WorkflowCategory::ToDo => "To Do",
            WorkflowCategory::InProgress => "In Progress",
            WorkflowCategory::InReview => "In Review",
            WorkflowCategory::InQa => "In QA",
            WorkflowCategory::Done => "Done",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.key() == key)
    }

    /// ToDo and Done never accumulate aging time.
    pub fn is_monitored(self) -> bool {
        !matches!(self, WorkflowCategory::ToDo | WorkflowCategory::Done)
    }
}

impl fmt::Display for WorkflowCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusChangeEvent {
    pub timestamp: DateTime<Utc>,
    pub from_label: Option<String>,
    pub to_label: String,
    pub author: Option<String>,
}

/// Normalized history of a single ticket, events in chronological order.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketHistory {
    pub key: String,
    pub summary: Option<String>,
    pub current_status: String,
    pub created: Option<DateTime<Utc>>,
    pub resolution_date: Option<DateTime<Utc>>,
    pub events: Vec<StatusChangeEvent>,
}

impl TicketHistory {
    pub fn new(key: impl Into<String>, current_status: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            summary: None,
            current_status: current_status.into(),
            created: None,
            resolution_date: None,
            events: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: Vec<StatusChangeEvent>) -> Self {
        self.events = events;
        self.events.sort_by_key(|event| event.timestamp);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    None,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub matched_category: WorkflowCategory,
    /// Absent for categories that never age.
    pub continuous_hours: Option<f64>,
    pub threshold_hours: Option<f64>,
    pub risk_level: RiskLevel,
    pub is_aging: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChurnKind {
    InProgressToToDo,
    InReviewToInProgress,
    InQaToInReview,
    InQaToInProgress,
    Reopened,
}

impl ChurnKind {
    pub const ALL: [ChurnKind; 5] = [
        ChurnKind::InProgressToToDo,
        ChurnKind::InReviewToInProgress,
        ChurnKind::InQaToInReview,
        ChurnKind::InQaToInProgress,
        ChurnKind::Reopened,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ChurnKind::InProgressToToDo => "in_progress_to_to_do",
            ChurnKind::InReviewToInProgress => "in_review_to_in_progress",
            ChurnKind::InQaToInReview => "in_qa_to_in_review",
            ChurnKind::InQaToInProgress => "in_qa_to_in_progress",
            ChurnKind::Reopened => "done_to_any",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackwardTransition {
    pub from: WorkflowCategory,
    pub to: WorkflowCategory,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChurnSource {
    Local,
    Backend,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChurnAssessment {
    pub score: u32,
    pub transitions: Vec<BackwardTransition>,
    /// Per-kind counts; empty when the score came from the backend.
    pub kinds: Vec<(ChurnKind, u32)>,
    pub is_churn: bool,
    pub source: ChurnSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TicketAnalysis {
    pub history: TicketHistory,
    pub risk: Option<RiskAssessment>,
    pub churn: Option<ChurnAssessment>,
    pub unrecognized_labels: Vec<String>,
}

impl TicketAnalysis {
    pub fn key(&self) -> &str {
        &self.history.key
    }

    pub fn is_aging(&self) -> bool {
        self.risk.as_ref().is_some_and(|risk| risk.is_aging)
    }

    pub fn is_churn(&self) -> bool {
        self.churn.as_ref().is_some_and(|churn| churn.is_churn)
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk
            .as_ref()
            .map(|risk| risk.risk_level)
            .unwrap_or(RiskLevel::None)
    }

    pub fn churn_score(&self) -> u32 {
        self.churn.as_ref().map(|churn| churn.score).unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct StatusDuration {
    pub status: String,
    pub total_hours: f64,
    pub visits: usize,
    pub average_hours: f64,
    pub current_hours: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct StageSummary {
    pub name: &'static str,
    pub description: &'static str,
    pub average_hours: f64,
    pub total_hours: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct StageReport {
    pub total_tickets: usize,
    pub completed_tickets: usize,
    pub in_flight_tickets: usize,
    pub stages: Vec<StageSummary>,
    pub partial_transitions: Vec<(&'static str, usize)>,
    /// Ticket counts per current category; `None` collects unrecognized statuses.
    pub current_categories: Vec<(Option<WorkflowCategory>, usize)>,
    pub churn_buckets: Vec<(&'static str, usize)>,
    pub uncategorized_statuses: Vec<String>,
}
