use chrono::{DateTime, Utc};

use crate::models::{StatusDuration, TicketHistory};
use crate::risk::hours_between;

/// A stretch of time that started when the ticket entered `status`.
#[derive(Debug, Clone, PartialEq)]
pub struct Visit {
    pub status: String,
    pub start: DateTime<Utc>,
}

/// Chronological visits, starting from the status the ticket was created in.
pub fn visits(history: &TicketHistory) -> Vec<Visit> {
    let mut events: Vec<_> = history.events.iter().collect();
    events.sort_by_key(|event| event.timestamp);

    let mut visits = Vec::with_capacity(events.len() + 1);

    match (history.created, events.first()) {
        (Some(created), Some(first)) if created <= first.timestamp => {
            if let Some(initial) = first.from_label.as_ref() {
                visits.push(Visit {
                    status: initial.clone(),
                    start: created,
                });
            }
        }
        (Some(created), None) => visits.push(Visit {
            status: history.current_status.clone(),
            start: created,
        }),
        _ => {}
    }

    visits.extend(events.into_iter().map(|event| Visit {
        status: event.to_label.clone(),
        start: event.timestamp,
    }));
    visits
}

/// Time spent in each raw status, longest first.
pub fn status_timeline(history: &TicketHistory, now: DateTime<Utc>) -> Vec<StatusDuration> {
    let visits = visits(history);
    let mut durations: Vec<StatusDuration> = Vec::new();

    for (index, visit) in visits.iter().enumerate() {
        let end = visits.get(index + 1).map(|next| next.start).unwrap_or(now);
        let hours = hours_between(visit.start, end).max(0.0);
        let is_current = index + 1 == visits.len();

        let existing = durations.iter().position(|d| d.status == visit.status);
        let position = match existing {
            Some(position) => position,
            None => {
                durations.push(StatusDuration {
                    status: visit.status.clone(),
                    total_hours: 0.0,
                    visits: 0,
                    average_hours: 0.0,
                    current_hours: None,
                });
                durations.len() - 1
            }
        };
        let entry = &mut durations[position];

        entry.total_hours += hours;
        entry.visits += 1;
        entry.average_hours = entry.total_hours / entry.visits as f64;
        if is_current {
            entry.current_hours = Some(hours);
        }
    }

    durations.sort_by(|a, b| {
        b.total_hours
            .partial_cmp(&a.total_hours)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    durations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusChangeEvent;
    use chrono::{Duration, TimeZone};

    fn origin() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
    }

    fn change(hours: i64, from: &str, to: &str) -> StatusChangeEvent {
        StatusChangeEvent {
            timestamp: origin() + Duration::hours(hours),
            from_label: Some(from.to_string()),
            to_label: to.to_string(),
            author: Some("Avery Lee".to_string()),
        }
    }

    fn ticket() -> TicketHistory {
        let mut history = TicketHistory::new("OPS-7", "In Progress").with_events(vec![
            change(4, "To Do", "In Progress"),
            change(10, "In Progress", "In Review"),
            change(16, "In Review", "In Progress"),
        ]);
        history.created = Some(origin());
        history
    }

    #[test]
    fn visits_start_with_creation_status() {
        let visits = visits(&ticket());
        assert_eq!(visits.len(), 4);
        assert_eq!(visits[0].status, "To Do");
        assert_eq!(visits[0].start, origin());
        assert_eq!(visits[3].status, "In Progress");
    }

    #[test]
    fn totals_cover_every_visit() {
        let now = origin() + Duration::hours(20);
        let timeline = status_timeline(&ticket(), now);

        let in_progress = timeline.iter().find(|d| d.status == "In Progress").unwrap();
        assert_eq!(in_progress.total_hours, 10.0);
        assert_eq!(in_progress.visits, 2);
        assert_eq!(in_progress.average_hours, 5.0);
        assert_eq!(in_progress.current_hours, Some(4.0));

        let review = timeline.iter().find(|d| d.status == "In Review").unwrap();
        assert_eq!(review.total_hours, 6.0);
        assert_eq!(review.current_hours, None);

        assert_eq!(timeline[0].status, "In Progress");
        let total: f64 = timeline.iter().map(|d| d.total_hours).sum();
        assert_eq!(total, 20.0);
    }

    #[test]
    fn ticket_without_changes_sits_in_current_status() {
        let mut history = TicketHistory::new("OPS-8", "To Do");
        history.created = Some(origin());

        let timeline = status_timeline(&history, origin() + Duration::hours(3));
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].current_hours, Some(3.0));
    }

    #[test]
    fn empty_history_has_no_timeline() {
        let history = TicketHistory::new("OPS-9", "To Do");
        assert!(status_timeline(&history, origin()).is_empty());
    }
}
