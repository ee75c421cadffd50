use crate::classify::classify;
use crate::models::{
    BackwardTransition, ChurnAssessment, ChurnKind, ChurnSource, StatusChangeEvent,
    WorkflowCategory,
};

pub const DEFAULT_CHURN_THRESHOLD: u32 = 3;

/// Histories shorter than this carry too little signal to score.
const MIN_EVENTS: usize = 3;

/// Classifies a category change as backward movement, if it is one.
pub fn backward_kind(previous: WorkflowCategory, current: WorkflowCategory) -> Option<ChurnKind> {
    use WorkflowCategory::*;

    if previous == current {
        return None;
    }

    match (previous, current) {
        (InProgress, ToDo) => Some(ChurnKind::InProgressToToDo),
        (InReview, InProgress) => Some(ChurnKind::InReviewToInProgress),
        (InQa, InReview) => Some(ChurnKind::InQaToInReview),
        (InQa, InProgress) => Some(ChurnKind::InQaToInProgress),
        (Done, _) => Some(ChurnKind::Reopened),
        _ => None,
    }
}

fn assessment(
    score: u32,
    transitions: Vec<BackwardTransition>,
    kinds: Vec<(ChurnKind, u32)>,
    threshold: u32,
    source: ChurnSource,
) -> ChurnAssessment {
    ChurnAssessment {
        score,
        transitions,
        kinds,
        is_churn: score >= threshold,
        source,
    }
}

/// Scores backward movement through workflow categories.
///
/// Events whose target status cannot be classified are skipped, so each
/// categorized event is compared with the last categorized one before it.
pub fn evaluate_churn(history: &[StatusChangeEvent], churn_threshold: u32) -> ChurnAssessment {
    if history.len() < MIN_EVENTS {
        return assessment(0, Vec::new(), Vec::new(), churn_threshold, ChurnSource::Local);
    }

    let mut ordered: Vec<&StatusChangeEvent> = history.iter().collect();
    ordered.sort_by_key(|event| event.timestamp);

    let mut previous: Option<WorkflowCategory> = None;
    let mut transitions = Vec::new();
    let mut counts = [0u32; ChurnKind::ALL.len()];

    for event in ordered {
        let Some(current) = classify(&event.to_label) else {
            continue;
        };

        if let Some(before) = previous {
            if let Some(kind) = backward_kind(before, current) {
                transitions.push(BackwardTransition {
                    from: before,
                    to: current,
                    timestamp: event.timestamp,
                });
                if let Some(slot) = ChurnKind::ALL.iter().position(|known| *known == kind) {
                    counts[slot] += 1;
                }
            }
        }

        previous = Some(current);
    }

    let kinds = ChurnKind::ALL
        .iter()
        .zip(counts)
        .filter(|(_, count)| *count > 0)
        .map(|(kind, count)| (*kind, count))
        .collect();

    let score = transitions.len() as u32;
    assessment(score, transitions, kinds, churn_threshold, ChurnSource::Local)
}

/// Wraps a score the proxy already computed.
pub fn from_backend(
    score: u32,
    transitions: Vec<BackwardTransition>,
    churn_threshold: u32,
) -> ChurnAssessment {
    assessment(score, transitions, Vec::new(), churn_threshold, ChurnSource::Backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn origin() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 12, 0, 0, 0).unwrap()
    }

    fn history(steps: &[(i64, &str)]) -> Vec<StatusChangeEvent> {
        steps
            .iter()
            .map(|(hours, to)| StatusChangeEvent {
                timestamp: origin() + Duration::hours(*hours),
                from_label: None,
                to_label: to.to_string(),
                author: None,
            })
            .collect()
    }

    #[test]
    fn short_histories_score_zero() {
        let events = history(&[(0, "Done"), (1, "In Progress")]);
        let churn = evaluate_churn(&events, DEFAULT_CHURN_THRESHOLD);
        assert_eq!(churn.score, 0);
        assert!(churn.transitions.is_empty());
        assert!(!churn.is_churn);
    }

    #[test]
    fn counts_only_the_review_regression() {
        let events = history(&[
            (0, "To Do"),
            (10, "In Progress"),
            (20, "In Review"),
            (25, "In Progress"),
            (30, "Done"),
        ]);
        let churn = evaluate_churn(&events, DEFAULT_CHURN_THRESHOLD);

        assert_eq!(churn.score, 1);
        assert!(!churn.is_churn);
        assert_eq!(
            churn.transitions,
            vec![BackwardTransition {
                from: WorkflowCategory::InReview,
                to: WorkflowCategory::InProgress,
                timestamp: origin() + Duration::hours(25),
            }]
        );
        assert_eq!(churn.kinds, vec![(ChurnKind::InReviewToInProgress, 1)]);
    }

    #[test]
    fn order_matters_for_detection() {
        let events = history(&[
            (0, "To Do"),
            (1, "In Progress"),
            (2, "In Review"),
            (3, "In Progress"),
        ]);
        assert_eq!(evaluate_churn(&events, 3).score, 1);
    }

    #[test]
    fn every_rule_counts_and_reaches_threshold() {
        let events = history(&[
            (0, "In Progress"),
            (1, "To Do"),
            (2, "In Review"),
            (3, "In Progress"),
            (4, "In QA"),
            (5, "In Review"),
            (6, "In QA"),
            (7, "In Progress"),
            (8, "Done"),
            (9, "QA"),
        ]);
        let churn = evaluate_churn(&events, 3);

        assert_eq!(churn.score, 5);
        assert!(churn.is_churn);
        let counted: Vec<ChurnKind> = churn.kinds.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(counted, ChurnKind::ALL.to_vec());
    }

    #[test]
    fn forward_and_skipping_backward_moves_are_not_counted() {
        // Review -> To Do is not one of the counted regressions.
        let events = history(&[(0, "To Do"), (1, "In Review"), (2, "To Do"), (3, "In QA")]);
        assert_eq!(evaluate_churn(&events, 3).score, 0);
    }

    #[test]
    fn lateral_moves_are_ignored() {
        let events = history(&[
            (0, "In Review"),
            (1, "Code Review"),
            (2, "PR Review"),
            (3, "In Progress"),
        ]);
        let churn = evaluate_churn(&events, 3);
        assert_eq!(churn.score, 1);
        assert!(churn.transitions.iter().all(|t| t.from != t.to));
    }

    #[test]
    fn unrecognized_events_are_skipped_not_breaking_the_sequence() {
        let events = history(&[
            (0, "To Do"),
            (1, "In Review"),
            (2, "Blocked"),
            (3, "In Progress"),
        ]);
        let churn = evaluate_churn(&events, 3);
        assert_eq!(churn.score, 1);
        assert_eq!(churn.transitions[0].from, WorkflowCategory::InReview);
        assert_eq!(churn.transitions[0].timestamp, origin() + Duration::hours(3));
    }

    #[test]
    fn unsorted_input_is_ordered_first() {
        let mut events = history(&[
            (0, "To Do"),
            (1, "In Progress"),
            (2, "In Review"),
            (3, "In Progress"),
        ]);
        events.reverse();
        assert_eq!(evaluate_churn(&events, 3).score, 1);
    }

    #[test]
    fn backend_scores_respect_threshold() {
        assert!(from_backend(4, Vec::new(), 3).is_churn);
        let churn = from_backend(2, Vec::new(), 3);
        assert!(!churn.is_churn);
        assert_eq!(churn.source, ChurnSource::Backend);
    }
}
