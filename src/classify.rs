use crate::models::WorkflowCategory;

/// Known status aliases per category. Order is significant for the fuzzy pass.
pub const STATUS_ALIASES: [(WorkflowCategory, &[&str]); 5] = [
    (
        WorkflowCategory::ToDo,
        &["To Do", "TO DO", "Backlog", "Open", "New", "Product Backlog"],
    ),
    (
        WorkflowCategory::InProgress,
        &["In Progress", "IN PROGRESS", "Development", "Implementing", "Dev", "Coding"],
    ),
    (
        WorkflowCategory::InReview,
        &["In Review", "IN REVIEW", "Code Review", "Review", "Reviewing", "PR Review"],
    ),
    (
        WorkflowCategory::InQa,
        &["In QA", "IN QA", "QA", "Testing", "Validation", "Test"],
    ),
    (
        WorkflowCategory::Done,
        &["Done", "DONE", "Closed", "Resolved", "Completed", "Fixed", "Closed - Won't Do"],
    ),
];

/// Maps a raw tracker status onto a workflow category.
///
/// Exact aliases win over case-insensitive aliases, which win over a label
/// that merely contains an alias. Returns `None` for labels nothing matches.
pub fn classify(raw: &str) -> Option<WorkflowCategory> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for (category, aliases) in STATUS_ALIASES.iter() {
        if aliases.iter().any(|alias| *alias == raw) {
            return Some(*category);
        }
    }

    for (category, aliases) in STATUS_ALIASES.iter() {
        if aliases.iter().any(|alias| alias.eq_ignore_ascii_case(raw)) {
            return Some(*category);
        }
    }

    let lowered = raw.to_lowercase();
    for (category, aliases) in STATUS_ALIASES.iter() {
        if aliases
            .iter()
            .any(|alias| lowered.contains(&alias.to_lowercase()))
        {
            return Some(*category);
        }
    }

    None
}
