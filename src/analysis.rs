use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::churn::{evaluate_churn, from_backend};
use crate::classify::classify;
use crate::client::HistorySource;
use crate::models::{ChurnAssessment, TicketAnalysis, TicketHistory};
use crate::payload::{convert_transitions, IssueHistory, RemoteTransition, ResolutionMetrics};
use crate::risk::{evaluate_risk, RiskThresholds};

#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub thresholds: RiskThresholds,
    pub churn_threshold: u32,
}

/// A churn score computed server-side for one ticket.
#[derive(Debug, Clone, Copy)]
pub struct BackendChurn<'a> {
    pub score: u32,
    pub transitions: &'a [RemoteTransition],
}

/// Resolution metrics first, then the history payload, then local scoring.
pub fn resolve_churn(
    history: &TicketHistory,
    from_metrics: Option<BackendChurn<'_>>,
    from_history: Option<BackendChurn<'_>>,
    churn_threshold: u32,
) -> ChurnAssessment {
    match from_metrics.or(from_history) {
        Some(remote) => {
            tracing::debug!(ticket = %history.key, score = remote.score, "using backend churn score");
            from_backend(remote.score, convert_transitions(remote.transitions), churn_threshold)
        }
        None => evaluate_churn(&history.events, churn_threshold),
    }
}

fn unrecognized_labels(history: &TicketHistory) -> Vec<String> {
    let labels: BTreeSet<&str> = history
        .events
        .iter()
        .map(|event| event.to_label.as_str())
        .chain(std::iter::once(history.current_status.as_str()))
        .filter(|label| classify(label).is_none())
        .collect();
    labels.into_iter().map(str::to_string).collect()
}

/// Builds the full per-ticket record in one pass.
pub fn analyze_ticket(
    history: TicketHistory,
    from_metrics: Option<BackendChurn<'_>>,
    from_history: Option<BackendChurn<'_>>,
    now: DateTime<Utc>,
    settings: &AnalysisSettings,
) -> TicketAnalysis {
    let risk = evaluate_risk(&history.current_status, &history.events, now, &settings.thresholds);
    let churn = resolve_churn(&history, from_metrics, from_history, settings.churn_threshold);
    let unrecognized_labels = unrecognized_labels(&history);

    TicketAnalysis {
        history,
        risk,
        churn: Some(churn),
        unrecognized_labels,
    }
}

/// Normalizes a fetched payload and analyzes it. `None` when the payload is
/// too incomplete to say anything about the ticket.
pub fn analyze_payload(
    key: &str,
    mut payload: IssueHistory,
    fallback_status: Option<&str>,
    metrics: Option<&ResolutionMetrics>,
    now: DateTime<Utc>,
    settings: &AnalysisSettings,
) -> Option<TicketAnalysis> {
    let history_score = payload.ping_pong_score;
    let history_transitions = std::mem::take(&mut payload.ping_pong_transitions);
    let history = payload.into_ticket(key, fallback_status)?;

    let from_metrics = metrics.and_then(|metrics| metrics.churn_for(key)).map(|remote| BackendChurn {
        score: remote.score,
        transitions: &remote.transitions,
    });
    let from_history = history_score.map(|score| BackendChurn {
        score,
        transitions: &history_transitions,
    });

    Some(analyze_ticket(history, from_metrics, from_history, now, settings))
}

/// Identifies one fetch cycle. Only the newest token is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CycleToken(u64);

impl CycleToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct CycleTracker {
    current: Arc<AtomicU64>,
}

impl CycleTracker {
    /// Starts a new cycle, making every earlier token stale.
    pub fn begin(&self) -> CycleToken {
        CycleToken(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, token: CycleToken) -> bool {
        self.current.load(Ordering::SeqCst) == token.0
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisSnapshot {
    pub token: CycleToken,
    pub generated_at: DateTime<Utc>,
    pub tickets: BTreeMap<String, TicketAnalysis>,
    /// Tickets whose history could not be fetched or understood.
    pub omitted: Vec<String>,
}

impl AnalysisSnapshot {
    pub fn aging_count(&self) -> usize {
        self.tickets.values().filter(|t| t.is_aging()).count()
    }

    pub fn churn_count(&self) -> usize {
        self.tickets.values().filter(|t| t.is_churn()).count()
    }

    /// Unrecognized labels with the number of tickets that carry each.
    pub fn unrecognized_labels(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for ticket in self.tickets.values() {
            for label in &ticket.unrecognized_labels {
                *counts.entry(label.clone()).or_insert(0) += 1;
            }
        }
        counts
    }
}

/// Holds the latest accepted snapshot.
#[derive(Debug, Default)]
pub struct AnalysisStore {
    tracker: CycleTracker,
    snapshot: Option<AnalysisSnapshot>,
}

impl AnalysisStore {
    pub fn tracker(&self) -> &CycleTracker {
        &self.tracker
    }

    /// Clears the current results and opens a new cycle.
    pub fn begin_cycle(&mut self) -> CycleToken {
        self.snapshot = None;
        self.tracker.begin()
    }

    /// Accepts the snapshot only if it belongs to the current cycle.
    pub fn install(&mut self, snapshot: AnalysisSnapshot) -> bool {
        if !self.tracker.is_current(snapshot.token) {
            tracing::info!(token = snapshot.token.value(), "discarding results from a stale fetch cycle");
            return false;
        }
        self.snapshot = Some(snapshot);
        true
    }

    pub fn snapshot(&self) -> Option<&AnalysisSnapshot> {
        self.snapshot.as_ref()
    }
}

/// A ticket to analyze, with the status the search reported as a fallback.
#[derive(Debug, Clone)]
pub struct TicketRef {
    pub key: String,
    pub status: Option<String>,
}

pub struct BatchRequest<'a> {
    pub tickets: Vec<TicketRef>,
    pub concurrency: usize,
    pub token: CycleToken,
    pub tracker: &'a CycleTracker,
    pub settings: &'a AnalysisSettings,
    pub metrics: Option<&'a ResolutionMetrics>,
    pub now: DateTime<Utc>,
}

enum Outcome {
    Analyzed(TicketAnalysis),
    Omitted(String),
    Abandoned,
}

/// Fetches and analyzes tickets with at most `concurrency` requests in flight.
///
/// Failures only omit the affected ticket. Once `token` goes stale no further
/// fetches are started.
pub async fn run_batch<S>(source: &S, request: BatchRequest<'_>) -> AnalysisSnapshot
where
    S: HistorySource + ?Sized,
{
    let BatchRequest {
        tickets,
        concurrency,
        token,
        tracker,
        settings,
        metrics,
        now,
    } = request;

    tracing::info!(tickets = tickets.len(), concurrency, token = token.value(), "starting analysis batch");

    let outcomes: Vec<Outcome> = stream::iter(tickets)
        .map(|ticket| async move {
            if !tracker.is_current(token) {
                return Outcome::Abandoned;
            }
            match source.issue_history(&ticket.key).await {
                Ok(payload) => match analyze_payload(
                    &ticket.key,
                    payload,
                    ticket.status.as_deref(),
                    metrics,
                    now,
                    settings,
                ) {
                    Some(analysis) => Outcome::Analyzed(analysis),
                    None => {
                        tracing::warn!(ticket = %ticket.key, "history payload has no usable status");
                        Outcome::Omitted(ticket.key)
                    }
                },
                Err(err) => {
                    tracing::warn!(ticket = %ticket.key, error = %err, "failed to fetch history");
                    Outcome::Omitted(ticket.key)
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut snapshot = AnalysisSnapshot {
        token,
        generated_at: now,
        tickets: BTreeMap::new(),
        omitted: Vec::new(),
    };
    let mut abandoned = 0usize;

    for outcome in outcomes {
        match outcome {
            Outcome::Analyzed(analysis) => {
                snapshot.tickets.insert(analysis.key().to_string(), analysis);
            }
            Outcome::Omitted(key) => snapshot.omitted.push(key),
            Outcome::Abandoned => abandoned += 1,
        }
    }
    snapshot.omitted.sort();

    let unrecognized = snapshot.unrecognized_labels();
    if !unrecognized.is_empty() {
        tracing::warn!(labels = ?unrecognized, "statuses not mapped to a workflow category");
    }
    tracing::info!(
        analyzed = snapshot.tickets.len(),
        omitted = snapshot.omitted.len(),
        abandoned,
        aging = snapshot.aging_count(),
        churn = snapshot.churn_count(),
        "analysis batch finished"
    );

    snapshot
}
