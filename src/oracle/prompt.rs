//! Scoring prompt construction

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{Task, MAX_PRIORITY};

const INSTRUCTIONS: &str = "\
You rank items on a personal to-do list. Read the task below and answer with a \
single priority score from 1 to 10, where 10 is the most pressing.

Guidelines:
- Reply with ONLY the number, nothing else.
- Give 1 to anything that is gibberish, has no meaningful words, or looks like spam.
- The task name matters more than its details.
- Score higher for close deadlines, words such as urgent, asap, critical or \
blocking, work that blocks other tasks, and clear actionable items.
- Score lower for vague wording, distant deadlines, and optional or \
nice-to-have work.";

const RUBRIC: &str = "\
Priority scale:
10: Critical, blocking, or urgent
8-9: High urgency, deadline is near
6-7: Important, has a deadline
4-5: Normal priority
2-3: Low priority, optional
1: Unclear, invalid, or gibberish";

/// Renders a timestamp the way the prompt presents dates
pub(crate) fn describe_time(time: DateTime<Utc>) -> String {
    time.format("%b %-d, %Y %-I:%M %p UTC").to_string()
}

fn describe_due(due: Option<DateTime<Utc>>) -> String {
    due.map(describe_time).unwrap_or_else(|| "Never".to_string())
}

fn describe_details(task: &Task) -> &str {
    task.details().unwrap_or("No details")
}

/// Builds the scoring prompt for `target`, using `peers` as comparative context
///
/// The target block always comes first and every task block starts with a
/// `- Name: ` line.
pub fn build_prompt(target: &Task, peers: &[Task]) -> String {
    let mut prompt = String::with_capacity(1024 + peers.len() * 160);

    // Writing into a String cannot fail.
    let _ = writeln!(prompt, "{}\n", INSTRUCTIONS);
    let _ = writeln!(prompt, "Task to score:");
    let _ = writeln!(prompt, "- Name: {}", target.name());
    let _ = writeln!(prompt, "- Details: {}", describe_details(target));
    let _ = writeln!(prompt, "- Due: {}", describe_due(target.due_date()));
    let _ = writeln!(prompt, "- Created: {}", describe_time(target.created()));
    let _ = writeln!(prompt);

    let _ = writeln!(prompt, "Other tasks on the list ({}):", peers.len());
    for peer in peers {
        let _ = writeln!(prompt, "- Name: {}", peer.name());
        let _ = writeln!(prompt, "  Details: {}", describe_details(peer));
        let _ = writeln!(prompt, "  Due: {}", describe_due(peer.due_date()));
        let _ = writeln!(
            prompt,
            "  Priority: {}/{}",
            peer.priority(),
            MAX_PRIORITY
        );
    }
    let _ = writeln!(prompt);

    let _ = writeln!(prompt, "{}\n", RUBRIC);
    let _ = write!(prompt, "Answer with a single number from 1 to 10.");
    prompt
}
