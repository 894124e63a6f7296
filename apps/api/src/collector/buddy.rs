//! Concern-keyword scan for buddy messages.

use crate::models::event::Severity;

/// Phrases in a buddy's message that indicate concern for the user.
/// Matching is case-insensitive substring matching; each phrase counts once.
const CONCERN_KEYWORDS: &[&str] = &[
    "hurt",
    "scared",
    "afraid",
    "hopeless",
    "worthless",
    "alone",
    "crisis",
    "give up",
    "can't go on",
    "self-harm",
    "suicide",
];

/// Grades a buddy concern message by how many distinct concern phrases it
/// contains: two or more is high, one is medium, none is low.
pub fn classify_message(message: &str) -> (Severity, Vec<&'static str>) {
    let lowered = message.to_lowercase();
    let matched: Vec<&'static str> = CONCERN_KEYWORDS
        .iter()
        .filter(|kw| lowered.contains(*kw))
        .copied()
        .collect();
    let severity = match matched.len() {
        0 => Severity::Low,
        1 => Severity::Medium,
        _ => Severity::High,
    };
    (severity, matched)
}
