use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::classify::classify;
use crate::models::{StageReport, StageSummary, TicketAnalysis, WorkflowCategory};
use crate::risk::hours_between;
use crate::timeline::{visits, Visit};

struct Stage {
    name: &'static str,
    from: WorkflowCategory,
    to: WorkflowCategory,
    description: &'static str,
}

const STAGES: [Stage; 4] = [
    Stage {
        name: "Development",
        from: WorkflowCategory::ToDo,
        to: WorkflowCategory::InProgress,
        description: "Time from TO DO to IN PROGRESS",
    },
    Stage {
        name: "Review",
        from: WorkflowCategory::InProgress,
        to: WorkflowCategory::InReview,
        description: "Time from IN PROGRESS to IN REVIEW",
    },
    Stage {
        name: "QA",
        from: WorkflowCategory::InReview,
        to: WorkflowCategory::InQa,
        description: "Time from IN REVIEW to IN QA",
    },
    Stage {
        name: "Completion",
        from: WorkflowCategory::InQa,
        to: WorkflowCategory::Done,
        description: "Time from IN QA to DONE",
    },
];

const TOTAL: Stage = Stage {
    name: "Total",
    from: WorkflowCategory::ToDo,
    to: WorkflowCategory::Done,
    description: "Total time from TO DO to DONE",
};

const RESOLVED_STATUS: &str = "DONE";

#[derive(Default)]
struct Accumulator {
    total_hours: f64,
    count: usize,
}

impl Accumulator {
    fn add(&mut self, hours: f64) {
        self.total_hours += hours;
        self.count += 1;
    }

    fn summarize(&self, stage: &Stage) -> StageSummary {
        StageSummary {
            name: stage.name,
            description: stage.description,
            average_hours: if self.count == 0 {
                0.0
            } else {
                self.total_hours / self.count as f64
            },
            total_hours: self.total_hours,
            count: self.count,
        }
    }
}

pub fn churn_bucket(score: u32) -> Option<&'static str> {
    match score {
        0 => None,
        1..=5 => Some("1-5"),
        6..=10 => Some("6-10"),
        11..=20 => Some("11-20"),
        _ => Some("21+"),
    }
}

fn span(
    first_seen: &BTreeMap<WorkflowCategory, DateTime<Utc>>,
    from: WorkflowCategory,
    to: WorkflowCategory,
) -> Option<f64> {
    let start = first_seen.get(&from)?;
    let end = first_seen.get(&to)?;
    (end > start).then(|| hours_between(*start, *end))
}

/// Averages the time between first entries into consecutive categories.
pub fn stage_metrics(analyses: &[TicketAnalysis]) -> StageReport {
    let mut stages: Vec<Accumulator> = STAGES.iter().map(|_| Accumulator::default()).collect();
    let mut total = Accumulator::default();
    let mut partial = [0usize; STAGES.len()];
    let mut current_counts: BTreeMap<Option<WorkflowCategory>, usize> = BTreeMap::new();
    let mut buckets: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut uncategorized: BTreeSet<String> = BTreeSet::new();
    let mut completed_tickets = 0;
    let mut in_flight_tickets = 0;

    for analysis in analyses {
        let history = &analysis.history;
        let current = classify(&history.current_status);
        *current_counts.entry(current).or_insert(0) += 1;
        if current.is_none() {
            uncategorized.insert(history.current_status.clone());
        }

        let completed = current == Some(WorkflowCategory::Done) || history.resolution_date.is_some();
        if completed {
            completed_tickets += 1;
        } else if current != Some(WorkflowCategory::ToDo) {
            in_flight_tickets += 1;
        }

        let mut sequence = visits(history);
        if let Some(resolved) = history.resolution_date {
            if sequence.last().map(|visit| visit.start) != Some(resolved) {
                sequence.push(Visit {
                    status: RESOLVED_STATUS.to_string(),
                    start: resolved,
                });
            }
        }
        sequence.sort_by_key(|visit| visit.start);

        let mut first_seen: BTreeMap<WorkflowCategory, DateTime<Utc>> = BTreeMap::new();
        for visit in &sequence {
            match classify(&visit.status) {
                Some(category) => {
                    first_seen.entry(category).or_insert(visit.start);
                }
                None => {
                    uncategorized.insert(visit.status.clone());
                }
            }
        }

        if completed {
            match span(&first_seen, TOTAL.from, TOTAL.to) {
                Some(hours) => total.add(hours),
                None if first_seen.contains_key(&TOTAL.from) && first_seen.contains_key(&TOTAL.to) => {
                    tracing::warn!(ticket = %history.key, "non-positive total cycle time");
                }
                None => {}
            }
        }

        for (index, stage) in STAGES.iter().enumerate() {
            if !completed
                && first_seen.contains_key(&stage.from)
                && !first_seen.contains_key(&stage.to)
                && current == Some(stage.from)
            {
                partial[index] += 1;
            }

            if let Some(hours) = span(&first_seen, stage.from, stage.to) {
                stages[index].add(hours);
            }
        }

        if let Some(bucket) = churn_bucket(analysis.churn_score()) {
            *buckets.entry(bucket).or_insert(0) += 1;
        }
    }

    let mut summaries: Vec<StageSummary> = STAGES
        .iter()
        .zip(stages.iter())
        .map(|(stage, acc)| acc.summarize(stage))
        .collect();
    summaries.push(total.summarize(&TOTAL));

    StageReport {
        total_tickets: analyses.len(),
        completed_tickets,
        in_flight_tickets,
        stages: summaries,
        partial_transitions: STAGES
            .iter()
            .zip(partial)
            .map(|(stage, count)| (stage.name, count))
            .collect(),
        current_categories: current_counts.into_iter().collect(),
        churn_buckets: ["1-5", "6-10", "11-20", "21+"]
            .into_iter()
            .map(|bucket| (bucket, buckets.get(bucket).copied().unwrap_or(0)))
            .collect(),
        uncategorized_statuses: uncategorized.into_iter().collect(),
    }
}
