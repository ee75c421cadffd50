use std::cmp::Ordering;
use std::fmt::Write;
use std::path::Path;

use clap::ValueEnum;
use serde::Serialize;

use crate::analysis::AnalysisSnapshot;
use crate::models::{RiskLevel, StageReport, StatusDuration, TicketAnalysis};
use crate::payload::ResolutionMetrics;

/// Human-friendly duration: minutes under an hour, hours under a day, else days.
pub fn format_duration(hours: f64) -> String {
    fn plural(value: f64, unit: &str) -> String {
        if value == 1.0 {
            format!("{value} {unit}")
        } else {
            format!("{value} {unit}s")
        }
    }

    if hours < 1.0 {
        plural((hours * 60.0).round(), "minute")
    } else if hours < 24.0 {
        plural((hours * 10.0).round() / 10.0, "hour")
    } else {
        plural((hours / 24.0 * 10.0).round() / 10.0, "day")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortKey {
    /// Highest risk first, longest in status breaking ties
    Risk,
    /// Highest churn score first
    Churn,
    /// Longest continuous time in the current status first
    Age,
    /// Ticket key
    Key,
}

fn hours_in_status(ticket: &TicketAnalysis) -> f64 {
    ticket
        .risk
        .as_ref()
        .and_then(|risk| risk.continuous_hours)
        .unwrap_or(-1.0)
}

fn by_age(a: &TicketAnalysis, b: &TicketAnalysis) -> Ordering {
    hours_in_status(b)
        .partial_cmp(&hours_in_status(a))
        .unwrap_or(Ordering::Equal)
}

pub fn sort_tickets(tickets: &mut [&TicketAnalysis], key: SortKey) {
    match key {
        SortKey::Risk => tickets.sort_by(|a, b| {
            b.risk_level()
                .cmp(&a.risk_level())
                .then_with(|| by_age(a, b))
                .then_with(|| a.key().cmp(b.key()))
        }),
        SortKey::Churn => tickets.sort_by(|a, b| {
            b.churn_score()
                .cmp(&a.churn_score())
                .then_with(|| a.key().cmp(b.key()))
        }),
        SortKey::Age => tickets.sort_by(|a, b| by_age(a, b).then_with(|| a.key().cmp(b.key()))),
        SortKey::Key => tickets.sort_by(|a, b| a.key().cmp(b.key())),
    }
}

fn risk_cell(ticket: &TicketAnalysis) -> String {
    match ticket.risk.as_ref() {
        None => "no data".to_string(),
        Some(risk) => match risk.continuous_hours {
            Some(hours) => format!("{} ({})", risk.risk_level, format_duration(hours)),
            None => risk.risk_level.to_string(),
        },
    }
}

fn churn_cell(ticket: &TicketAnalysis) -> String {
    match ticket.churn.as_ref() {
        None => "no data".to_string(),
        Some(churn) if churn.is_churn => format!("{} (churn)", churn.score),
        Some(churn) => churn.score.to_string(),
    }
}

pub fn render_table(tickets: &[&TicketAnalysis]) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{:<12} {:<20} {:<24} {:<8} SUMMARY",
        "KEY", "STATUS", "RISK", "CHURN"
    );
    for ticket in tickets {
        let _ = writeln!(
            output,
            "{:<12} {:<20} {:<24} {:<8} {}",
            ticket.key(),
            ticket.history.current_status,
            risk_cell(ticket),
            churn_cell(ticket),
            ticket.history.summary.as_deref().unwrap_or("")
        );
    }
    output
}

pub fn render_ticket_detail(ticket: &TicketAnalysis, timeline: &[StatusDuration]) -> String {
    let history = &ticket.history;
    let mut output = String::new();

    match history.summary.as_deref() {
        Some(summary) => {
            let _ = writeln!(output, "{}: {}", history.key, summary);
        }
        None => {
            let _ = writeln!(output, "Status timeline for {}", history.key);
        }
    }
    let _ = writeln!(output, "Current status: {}", history.current_status);
    let _ = writeln!(
        output,
        "Created: {}",
        history
            .created
            .map(|created| created.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string())
    );
    let _ = writeln!(
        output,
        "Resolved: {}",
        history
            .resolution_date
            .map(|resolved| resolved.to_rfc3339())
            .unwrap_or_else(|| "not resolved".to_string())
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "Aging");
    match ticket.risk.as_ref() {
        None => {
            let _ = writeln!(output, "- not monitored (no data for this status)");
        }
        Some(risk) => match (risk.continuous_hours, risk.threshold_hours) {
            (Some(hours), Some(threshold)) => {
                let _ = writeln!(
                    output,
                    "- {} for {} continuously (threshold {}), risk {}",
                    risk.matched_category,
                    format_duration(hours),
                    format_duration(threshold),
                    risk.risk_level
                );
            }
            _ => {
                let _ = writeln!(output, "- {} does not age", risk.matched_category);
            }
        },
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "Time in status");
    if timeline.is_empty() {
        let _ = writeln!(output, "- no status data available");
    }
    for entry in timeline {
        let current = entry
            .current_hours
            .map(|hours| format!(", current {}", format_duration(hours)))
            .unwrap_or_default();
        let _ = writeln!(
            output,
            "- {}: {} over {} visit(s){}",
            entry.status,
            format_duration(entry.total_hours),
            entry.visits,
            current
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "Transitions");
    if history.events.is_empty() {
        let _ = writeln!(output, "- none recorded");
    }
    for event in &history.events {
        let _ = writeln!(
            output,
            "- {} {} -> {}{}",
            event.timestamp.format("%Y-%m-%d %H:%M"),
            event.from_label.as_deref().unwrap_or("(created)"),
            event.to_label,
            event
                .author
                .as_deref()
                .map(|author| format!(" by {author}"))
                .unwrap_or_default()
        );
    }

    if let Some(churn) = ticket.churn.as_ref() {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "Churn score {}{}",
            churn.score,
            if churn.is_churn { " (problematic back-and-forth)" } else { "" }
        );
        for transition in &churn.transitions {
            let _ = writeln!(
                output,
                "- {} {} -> {}",
                transition.timestamp.format("%Y-%m-%d %H:%M"),
                transition.from,
                transition.to
            );
        }
        for (kind, count) in &churn.kinds {
            let _ = writeln!(output, "  {}: {}", kind.key(), count);
        }
    }

    if !ticket.unrecognized_labels.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "Unrecognized statuses: {}",
            ticket.unrecognized_labels.join(", ")
        );
    }

    output
}

/// Cycle times either from the proxy or computed from the fetched histories.
pub enum CycleTimes<'a> {
    Backend(&'a ResolutionMetrics),
    Local(&'a StageReport),
}

fn write_cycle_times(output: &mut String, cycle_times: &CycleTimes<'_>) {
    let _ = writeln!(output, "## Cycle Times");
    match cycle_times {
        CycleTimes::Backend(metrics) => {
            if let Some(total) = metrics.total_issues() {
                let _ = writeln!(output, "Computed by the proxy over {total} tickets.");
            }
            if metrics.stages().is_empty() {
                let _ = writeln!(output, "No cycle time data available.");
            }
            for (name, stage) in metrics.stages() {
                let _ = write!(
                    output,
                    "- {}: {} average across {} tickets, {} total",
                    name,
                    format_duration(stage.average_hours),
                    stage.count,
                    format_duration(stage.total_hours)
                );
                match stage.description.as_deref() {
                    Some(description) => {
                        let _ = writeln!(output, " ({description})");
                    }
                    None => {
                        let _ = writeln!(output);
                    }
                }
            }
            if let Some(churn) = metrics.churn() {
                let _ = writeln!(
                    output,
                    "Backward transitions: {} across {} tickets.",
                    churn.total_backward_transitions, churn.tickets_with_churn
                );
            }
        }
        CycleTimes::Local(report) => {
            let _ = writeln!(
                output,
                "Computed from {} fetched tickets ({} completed, {} in flight).",
                report.total_tickets, report.completed_tickets, report.in_flight_tickets
            );
            for stage in &report.stages {
                if stage.count == 0 {
                    let _ = writeln!(output, "- {}: no completed transitions", stage.name);
                } else {
                    let _ = writeln!(
                        output,
                        "- {}: {} average across {} tickets, {} total ({})",
                        stage.name,
                        format_duration(stage.average_hours),
                        stage.count,
                        format_duration(stage.total_hours),
                        stage.description
                    );
                }
            }
            let waiting: Vec<String> = report
                .partial_transitions
                .iter()
                .filter(|(_, count)| *count > 0)
                .map(|(name, count)| format!("{name} {count}"))
                .collect();
            if !waiting.is_empty() {
                let _ = writeln!(output, "Waiting to finish a stage: {}", waiting.join(", "));
            }
        }
    }
}

pub fn build_report(
    scope: &str,
    snapshot: &AnalysisSnapshot,
    cycle_times: &CycleTimes<'_>,
) -> String {
    let mut output = String::new();
    let mut tickets: Vec<&TicketAnalysis> = snapshot.tickets.values().collect();

    let _ = writeln!(output, "# Workflow Health Report");
    let _ = writeln!(
        output,
        "Generated for {} at {} ({} tickets analyzed)",
        scope,
        snapshot.generated_at.format("%Y-%m-%d %H:%M UTC"),
        snapshot.tickets.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Aging Tickets");

    sort_tickets(&mut tickets, SortKey::Risk);
    let aging: Vec<&&TicketAnalysis> = tickets.iter().filter(|t| t.is_aging()).collect();
    if aging.is_empty() {
        let _ = writeln!(output, "No tickets over their aging threshold.");
    } else {
        for ticket in aging {
            let _ = writeln!(
                output,
                "- {} [{}] {} in {}: {}",
                ticket.key(),
                ticket.risk_level(),
                format_duration(hours_in_status(ticket).max(0.0)),
                ticket.history.current_status,
                ticket.history.summary.as_deref().unwrap_or("")
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Churn");

    sort_tickets(&mut tickets, SortKey::Churn);
    let churning: Vec<&&TicketAnalysis> = tickets.iter().filter(|t| t.churn_score() > 0).collect();
    if churning.is_empty() {
        let _ = writeln!(output, "No backward transitions recorded.");
    } else {
        for ticket in churning.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} score {}{}",
                ticket.key(),
                ticket.churn_score(),
                if ticket.is_churn() { " (churn)" } else { "" }
            );
        }
    }

    let _ = writeln!(output);
    write_cycle_times(&mut output, cycle_times);

    let unrecognized = snapshot.unrecognized_labels();
    if !unrecognized.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Unrecognized Statuses");
        for (label, count) in unrecognized {
            let _ = writeln!(output, "- {label}: {count} tickets");
        }
    }

    if !snapshot.omitted.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Missing Data");
        let _ = writeln!(output, "No history available for: {}", snapshot.omitted.join(", "));
    }

    output
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    key: &'a str,
    summary: &'a str,
    status: &'a str,
    category: Option<&'static str>,
    hours_in_status: Option<f64>,
    threshold_hours: Option<f64>,
    risk_level: Option<RiskLevel>,
    is_aging: bool,
    churn_score: Option<u32>,
    is_churn: bool,
}

pub fn write_csv(path: &Path, tickets: &[&TicketAnalysis]) -> anyhow::Result<usize> {
    let mut writer = csv::Writer::from_path(path)?;
    for ticket in tickets {
        writer.serialize(CsvRow {
            key: ticket.key(),
            summary: ticket.history.summary.as_deref().unwrap_or(""),
            status: &ticket.history.current_status,
            category: ticket.risk.as_ref().map(|risk| risk.matched_category.key()),
            hours_in_status: ticket.risk.as_ref().and_then(|risk| risk.continuous_hours),
            threshold_hours: ticket.risk.as_ref().and_then(|risk| risk.threshold_hours),
            risk_level: ticket.risk.as_ref().map(|risk| risk.risk_level),
            is_aging: ticket.is_aging(),
            churn_score: ticket.churn.as_ref().map(|churn| churn.score),
            is_churn: ticket.is_churn(),
        })?;
    }
    writer.flush()?;
    Ok(tickets.len())
}
