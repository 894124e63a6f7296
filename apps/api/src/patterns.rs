//! Cross-System Pattern Detector.
//!
//! Runs per user over the recent event window and emits derived `pattern`
//! events when independent signals line up. Detection is pure and
//! deterministic over the ordered event list; the sweep wrapper handles
//! persistence and per-window deduplication. Pattern events are excluded
//! from the detector's own input, so derived events never cascade.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::collector;
use crate::config::PolicyConfig;
use crate::errors::AppError;
use crate::models::event::{RiskEvent, Severity, SourceType};
use crate::repo::Repository;

/// Multi-system stress needs signals from at least this many sources.
pub const MULTI_SYSTEM_MIN_SOURCES: usize = 3;
/// Multi-system stress needs at least this many events in the window.
pub const MULTI_SYSTEM_MIN_EVENTS: usize = 5;
const SEQUENCE_LEN: usize = 3;

const MULTI_SYSTEM_CONFIDENCE: f64 = 0.8;
const SEQUENCE_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    MultiSystemStress,
    RecurringSequence,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::MultiSystemStress => "multi_system_stress",
            PatternKind::RecurringSequence => "recurring_sequence",
        }
    }
}

/// One rule match, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedPattern {
    pub kind: PatternKind,
    pub severity: Severity,
    pub confidence: f64,
    pub detail: serde_json::Value,
}

/// Runs both rules over one user's window, oldest event first. Events
/// sourced from the detector itself are ignored.
pub fn detect_patterns(window: &[RiskEvent]) -> Vec<DetectedPattern> {
    let input: Vec<&RiskEvent> = window
        .iter()
        .filter(|e| e.source_type != SourceType::Pattern)
        .collect();
    let mut found = Vec::new();

    let sources: BTreeSet<SourceType> = input.iter().map(|e| e.source_type).collect();
    if sources.len() >= MULTI_SYSTEM_MIN_SOURCES && input.len() >= MULTI_SYSTEM_MIN_EVENTS {
        found.push(DetectedPattern {
            kind: PatternKind::MultiSystemStress,
            severity: Severity::High,
            confidence: MULTI_SYSTEM_CONFIDENCE,
            detail: json!({
                "distinct_sources": sources.len(),
                "event_count": input.len(),
                "sources": sources,
            }),
        });
    }

    let ordered: Vec<SourceType> = input.iter().map(|e| e.source_type).collect();
    if let Some(triple) = find_repeated_triple(&ordered) {
        found.push(DetectedPattern {
            kind: PatternKind::RecurringSequence,
            severity: Severity::Medium,
            confidence: SEQUENCE_CONFIDENCE,
            detail: json!({ "sequence": triple }),
        });
    }

    found
}

/// First contiguous source-type triple that repeats later in the list
/// without overlapping its first occurrence.
pub fn find_repeated_triple(sources: &[SourceType]) -> Option<[SourceType; 3]> {
    if sources.len() < SEQUENCE_LEN * 2 {
        return None;
    }
    for i in 0..=sources.len() - SEQUENCE_LEN * 2 {
        let needle = &sources[i..i + SEQUENCE_LEN];
        for j in (i + SEQUENCE_LEN)..=sources.len() - SEQUENCE_LEN {
            if &sources[j..j + SEQUENCE_LEN] == needle {
                return Some([needle[0], needle[1], needle[2]]);
            }
        }
    }
    None
}

/// Detects and persists new patterns for one user. A kind that already has
/// a pattern event inside the window is skipped, so repeated sweeps over
/// the same evidence emit each pattern once. Returns the events emitted.
pub async fn run_for_user(
    repo: &dyn Repository,
    policy: &PolicyConfig,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<RiskEvent>, AppError> {
    let since = now - Duration::hours(policy.pattern_window_hours);
    let window = repo.events_for_user_since(user_id, since).await?;

    let already_emitted: BTreeSet<&str> = window
        .iter()
        .filter(|e| e.source_type == SourceType::Pattern)
        .filter_map(|e| e.metadata["kind"].as_str())
        .collect();

    let mut emitted = Vec::new();
    for pattern in detect_patterns(&window) {
        if already_emitted.contains(pattern.kind.as_str()) {
            continue;
        }
        let mut metadata = json!({
            "kind": pattern.kind.as_str(),
            "confidence": pattern.confidence,
            "window_hours": policy.pattern_window_hours,
        });
        if let (Some(obj), Some(detail)) = (metadata.as_object_mut(), pattern.detail.as_object()) {
            for (k, v) in detail {
                obj.insert(k.clone(), v.clone());
            }
        }
        let event = RiskEvent::new(
            user_id,
            SourceType::Pattern,
            pattern.severity,
            pattern.confidence,
            false,
            metadata,
            now,
        );
        collector::record_event(repo, policy, &event, now).await?;
        emitted.push(event);
    }
    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::case::CaseTier;
    use crate::repo::MemoryRepository;

    fn event(user: Uuid, source: SourceType, at: DateTime<Utc>) -> RiskEvent {
        RiskEvent::new(user, source, Severity::Low, 0.2, false, json!({}), at)
    }

    fn spread(user: Uuid, sources: &[SourceType], start: DateTime<Utc>) -> Vec<RiskEvent> {
        sources
            .iter()
            .enumerate()
            .map(|(i, s)| event(user, *s, start + Duration::minutes(i as i64 * 10)))
            .collect()
    }

    #[test]
    fn test_multi_system_stress_thresholds() {
        let user = Uuid::new_v4();
        let t0 = Utc::now();

        // Five events but only two sources.
        let window = spread(
            user,
            &[
                SourceType::Mood,
                SourceType::Sensor,
                SourceType::Mood,
                SourceType::Sensor,
                SourceType::Mood,
            ],
            t0,
        );
        assert!(detect_patterns(&window).is_empty());

        // Three sources but only four events.
        let window = spread(
            user,
            &[
                SourceType::Mood,
                SourceType::Sensor,
                SourceType::Zone,
                SourceType::Mood,
            ],
            t0,
        );
        assert!(detect_patterns(&window).is_empty());

        // Both thresholds met.
        let window = spread(
            user,
            &[
                SourceType::Mood,
                SourceType::Sensor,
                SourceType::Zone,
                SourceType::Mood,
                SourceType::Sensor,
            ],
            t0,
        );
        let found = detect_patterns(&window);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, PatternKind::MultiSystemStress);
        assert_eq!(found[0].severity, Severity::High);
        assert_eq!(found[0].confidence, 0.8);
        assert_eq!(found[0].detail["distinct_sources"], 3);
        assert_eq!(found[0].detail["event_count"], 5);
    }

    #[test]
    fn test_repeated_triple_requires_non_overlap() {
        use SourceType::{Buddy, Mood, Sensor, Zone};

        assert_eq!(
            find_repeated_triple(&[Mood, Sensor, Zone, Mood, Sensor, Zone]),
            Some([Mood, Sensor, Zone])
        );
        // Second occurrence may start anywhere past the first.
        assert_eq!(
            find_repeated_triple(&[Mood, Sensor, Zone, Buddy, Mood, Sensor, Zone]),
            Some([Mood, Sensor, Zone])
        );
        // Shifted copies that overlap do not count.
        assert_eq!(find_repeated_triple(&[Mood, Mood, Mood, Mood, Mood]), None);
        assert_eq!(find_repeated_triple(&[Mood, Sensor, Zone, Mood, Sensor]), None);
    }

    #[test]
    fn test_recurring_sequence_detected() {
        let user = Uuid::new_v4();
        let window = spread(
            user,
            &[
                SourceType::Checkin,
                SourceType::Mood,
                SourceType::Checkin,
                SourceType::Checkin,
                SourceType::Mood,
                SourceType::Checkin,
            ],
            Utc::now(),
        );
        let found = detect_patterns(&window);
        let seq = found
            .iter()
            .find(|p| p.kind == PatternKind::RecurringSequence)
            .unwrap();
        assert_eq!(seq.severity, Severity::Medium);
        assert_eq!(seq.detail["sequence"], json!(["checkin", "mood", "checkin"]));
    }

    #[test]
    fn test_pattern_events_ignored_as_input() {
        let user = Uuid::new_v4();
        let t0 = Utc::now();
        let mut window = spread(
            user,
            &[
                SourceType::Mood,
                SourceType::Sensor,
                SourceType::Zone,
                SourceType::Mood,
            ],
            t0,
        );
        // A prior derived event must not tip the tally over the threshold.
        window.push(RiskEvent::new(
            user,
            SourceType::Pattern,
            Severity::High,
            0.8,
            false,
            json!({"kind": "multi_system_stress"}),
            t0 + Duration::hours(1),
        ));
        assert!(detect_patterns(&window).is_empty());
    }

    #[test]
    fn test_detection_is_deterministic() {
        let user = Uuid::new_v4();
        let window = spread(
            user,
            &[
                SourceType::Mood,
                SourceType::Sensor,
                SourceType::Zone,
                SourceType::Mood,
                SourceType::Sensor,
                SourceType::Zone,
            ],
            Utc::now(),
        );
        assert_eq!(detect_patterns(&window), detect_patterns(&window));
    }

    #[tokio::test]
    async fn test_run_for_user_emits_once_and_feeds_escalation() {
        let repo = MemoryRepository::new();
        let policy = PolicyConfig::default();
        let user = Uuid::new_v4();
        let now = Utc::now();

        for e in spread(
            user,
            &[
                SourceType::Mood,
                SourceType::Sensor,
                SourceType::Zone,
                SourceType::Mood,
                SourceType::Sensor,
            ],
            now - Duration::hours(2),
        ) {
            repo.insert_event(&e).await.unwrap();
        }

        let emitted = run_for_user(&repo, &policy, user, now).await.unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].source_type, SourceType::Pattern);
        assert_eq!(emitted[0].metadata["kind"], "multi_system_stress");

        // High derived events open a case like any primary event.
        let case = repo.open_case_for_user(user).await.unwrap().unwrap();
        assert_eq!(case.current_tier, CaseTier::Tier1Gentle);
        assert_eq!(case.trigger_event_id, emitted[0].id);

        // The same evidence does not emit again inside the window.
        let again = run_for_user(&repo, &policy, user, now + Duration::minutes(10))
            .await
            .unwrap();
        assert!(again.is_empty());
    }
}
