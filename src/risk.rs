use chrono::{DateTime, Utc};

use crate::classify::classify;
use crate::models::{RiskAssessment, RiskLevel, StatusChangeEvent};

pub const DEFAULT_THRESHOLD_HOURS: f64 = 72.0;

const DEFAULT_THRESHOLD_LABELS: [&str; 6] = [
    "In Progress",
    "In Review",
    "In QA",
    "Code Review",
    "Testing",
    "Ready for Review",
];

/// Aging thresholds in hours keyed by raw status label, in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskThresholds {
    entries: Vec<(String, f64)>,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            entries: DEFAULT_THRESHOLD_LABELS
                .iter()
                .map(|label| (label.to_string(), DEFAULT_THRESHOLD_HOURS))
                .collect(),
        }
    }
}

impl RiskThresholds {
    /// Overwrites known labels in place and appends new ones.
    pub fn merge<I, K>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        for (label, hours) in overrides {
            let label = label.into();
            if !hours.is_finite() || hours <= 0.0 {
                tracing::warn!(%label, hours, "ignoring non-positive aging threshold");
                continue;
            }
            match self.entries.iter_mut().find(|(known, _)| *known == label) {
                Some(entry) => entry.1 = hours,
                None => self.entries.push((label, hours)),
            }
        }
    }

    pub fn entries(&self) -> &[(String, f64)] {
        &self.entries
    }

    /// Exact label, then the first key contained in the label, then the default.
    pub fn resolve(&self, status: &str) -> f64 {
        if let Some((_, hours)) = self.entries.iter().find(|(label, _)| label == status) {
            return *hours;
        }

        let lowered = status.to_lowercase();
        self.entries
            .iter()
            .find(|(label, _)| lowered.contains(&label.to_lowercase()))
            .map(|(_, hours)| *hours)
            .unwrap_or(DEFAULT_THRESHOLD_HOURS)
    }
}

pub fn risk_level(hours: f64, threshold: f64) -> RiskLevel {
    if hours >= threshold * 2.0 {
        RiskLevel::High
    } else if hours >= threshold {
        RiskLevel::Medium
    } else {
        RiskLevel::None
    }
}

pub fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 3_600_000.0
}

/// Continuous time in the current raw status compared to its threshold.
///
/// `None` means the ticket is not monitored: an unrecognized status, or no
/// recorded transition into the status it is in now.
pub fn evaluate_risk(
    current_status: &str,
    history: &[StatusChangeEvent],
    now: DateTime<Utc>,
    thresholds: &RiskThresholds,
) -> Option<RiskAssessment> {
    let category = classify(current_status)?;

    if !category.is_monitored() {
        return Some(RiskAssessment {
            matched_category: category,
            continuous_hours: None,
            threshold_hours: None,
            risk_level: RiskLevel::None,
            is_aging: false,
        });
    }

    let entered_at = history
        .iter()
        .filter(|event| event.to_label == current_status)
        .map(|event| event.timestamp)
        .max()?;

    let hours = hours_between(entered_at, now).max(0.0);
    let threshold = thresholds.resolve(current_status);
    let level = risk_level(hours, threshold);

    tracing::debug!(
        status = current_status,
        category = %category,
        hours,
        threshold,
        risk = %level,
        "evaluated time in status"
    );

    Some(RiskAssessment {
        matched_category: category,
        continuous_hours: Some(hours),
        threshold_hours: Some(threshold),
        risk_level: level,
        is_aging: level != RiskLevel::None,
    })
}
