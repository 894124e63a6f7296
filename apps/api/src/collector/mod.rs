//! Risk Signal Collector.
//!
//! Every input channel lands here: raw signals are normalized into
//! `RiskEvent` rows, persisted append-only, and actionable ones are fed to
//! the escalation engine through `record_event`, the single write path. The
//! pattern detector and the geofence engine re-enter through the same path,
//! so derived events behave exactly like primary ones.

pub mod buddy;
pub mod handlers;
pub mod thresholds;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PolicyConfig;
use crate::errors::AppError;
use crate::escalation;
use crate::models::case::EscalationCase;
use crate::models::checkin::{CheckinRecord, CheckinStatus};
use crate::models::event::{RiskEvent, Severity, SourceType};
use crate::models::notification::{Destination, NotificationPriority};
use crate::repo::Repository;
use crate::scheduler::{self, NotificationDraft};
use crate::scorer::{RiskScorer, ScoreInput};
use thresholds::SensorMetric;

/// Confidence stamped into a mood event built from the fallback verdict.
/// The verdict itself claims 0.5 (confidence in the conservative call); the
/// event records how far the label itself can be trusted.
const FALLBACK_EVENT_CONFIDENCE: f64 = 0.3;

/// How much check-in history is read to measure a consecutive-miss run.
const MISS_HISTORY_LIMIT: i64 = 30;

/// Note keywords that turn a response into a call for help instead of an
/// all-clear.
const HELP_KEYWORDS: &[&str] = &["help", "sos", "emergency", "911"];

/// An ingested event plus the case it opened or merged into, if any.
#[derive(Debug)]
pub struct IngestOutcome {
    pub event: RiskEvent,
    pub case: Option<EscalationCase>,
}

/// Outcome of one check-in ingestion.
#[derive(Debug)]
pub struct CheckinResult {
    pub record: CheckinRecord,
    pub event: Option<RiskEvent>,
    pub case: Option<EscalationCase>,
    /// Length of the current miss run including this record; 0 on response.
    pub consecutive_misses: i64,
    /// Case closed because this check-in counted as a qualifying response.
    pub resolved: Option<EscalationCase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Safe,
    Acknowledge,
    Help,
}

/// Outcome of an explicit user response.
#[derive(Debug)]
pub struct ResponseResult {
    pub resolved: Option<EscalationCase>,
    /// Help responses ingest a critical event instead of resolving.
    pub event: Option<RiskEvent>,
    pub case: Option<EscalationCase>,
}

/// Persists one normalized event and feeds it to the escalation engine when
/// it is actionable. All event producers go through here.
pub async fn record_event(
    repo: &dyn Repository,
    policy: &PolicyConfig,
    event: &RiskEvent,
    now: DateTime<Utc>,
) -> Result<Option<EscalationCase>, AppError> {
    repo.insert_event(event).await?;
    if event.severity.is_actionable() {
        let case = escalation::feed_event(repo, policy, event, now).await?;
        return Ok(Some(case));
    }
    Ok(None)
}

/// Mood entries are graded by the scorer; the verdict's level and score are
/// copied onto the event. Mood alone never sets `requires_immediate`.
pub async fn ingest_mood(
    repo: &dyn Repository,
    scorer: &dyn RiskScorer,
    policy: &PolicyConfig,
    user_id: Uuid,
    mood: i32,
    note: Option<String>,
    now: DateTime<Utc>,
) -> Result<IngestOutcome, AppError> {
    let verdict = scorer
        .assess(&ScoreInput::mood(user_id, mood, note.clone()))
        .await;
    let confidence = if verdict.degraded {
        FALLBACK_EVENT_CONFIDENCE
    } else {
        verdict.confidence
    };
    let event = RiskEvent::new(
        user_id,
        SourceType::Mood,
        verdict.risk_level,
        verdict.risk_score,
        false,
        json!({
            "mood": mood,
            "note": note,
            "confidence": confidence,
            "degraded": verdict.degraded,
            "reasoning": verdict.reasoning,
        }),
        now,
    );
    let case = record_event(repo, policy, &event, now).await?;
    Ok(IngestOutcome { event, case })
}

/// Wearable readings are graded locally against the configured cut-offs; no
/// scorer round-trip.
pub async fn ingest_sensor(
    repo: &dyn Repository,
    policy: &PolicyConfig,
    user_id: Uuid,
    metric: SensorMetric,
    value: f64,
    recorded_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<IngestOutcome, AppError> {
    let (severity, immediate) = policy.thresholds.classify(metric, value, recorded_at);
    let event = RiskEvent::new(
        user_id,
        SourceType::Sensor,
        severity,
        severity.base_score(),
        immediate,
        json!({
            "metric": metric.to_string(),
            "value": value,
            "recorded_at": recorded_at,
        }),
        now,
    );
    let case = record_event(repo, policy, &event, now).await?;
    Ok(IngestOutcome { event, case })
}

/// Records a check-in window outcome. A response resolves the open case
/// (unless the note asks for help); a miss is graded by the length of the
/// consecutive-miss run it extends.
pub async fn ingest_checkin(
    repo: &dyn Repository,
    scorer: &dyn RiskScorer,
    policy: &PolicyConfig,
    user_id: Uuid,
    responded: bool,
    note: Option<String>,
    now: DateTime<Utc>,
) -> Result<CheckinResult, AppError> {
    let status = if responded {
        CheckinStatus::Responded
    } else {
        CheckinStatus::Missed
    };
    let record = CheckinRecord::new(user_id, status, note.clone(), now);
    repo.insert_checkin(&record).await?;

    if responded {
        if note.as_deref().is_some_and(contains_help_keyword) {
            let event = help_event(
                user_id,
                json!({ "source": "checkin_note", "note": note }),
                now,
            );
            let case = record_event(repo, policy, &event, now).await?;
            return Ok(CheckinResult {
                record,
                event: Some(event),
                case,
                consecutive_misses: 0,
                resolved: None,
            });
        }
        let resolved = escalation::resolve_for_user(repo, user_id, "response: check-in", now).await?;
        return Ok(CheckinResult {
            record,
            event: None,
            case: None,
            consecutive_misses: 0,
            resolved,
        });
    }

    let history = repo.recent_checkins(user_id, MISS_HISTORY_LIMIT).await?;
    let run = consecutive_miss_run(&history);
    let severity = match run {
        ..=1 => Severity::Low,
        2 => Severity::Medium,
        _ => Severity::High,
    };

    let mut metadata = json!({ "consecutive_misses": run });
    if run >= 3 {
        // Third miss in a row: ask the scorer to look at the streak and
        // carry its verdict as evidence on the event.
        let verdict = scorer
            .assess(&ScoreInput::missed_checkins(user_id, run))
            .await;
        metadata["scorer_verdict"] = json!({
            "risk_level": verdict.risk_level,
            "risk_score": verdict.risk_score,
            "confidence": verdict.confidence,
            "degraded": verdict.degraded,
        });
    }

    let event = RiskEvent::new(
        user_id,
        SourceType::Checkin,
        severity,
        severity.base_score(),
        false,
        metadata,
        now,
    );
    let case = record_event(repo, policy, &event, now).await?;

    if run >= 3 {
        notify_contacts_of_misses(repo, policy, user_id, case.as_ref(), run, now).await?;
    }

    Ok(CheckinResult {
        record,
        event: Some(event),
        case,
        consecutive_misses: run,
        resolved: None,
    })
}

/// Buddy messages are graded by concern-keyword count; the matched keywords
/// stay on the event for review.
pub async fn ingest_buddy(
    repo: &dyn Repository,
    policy: &PolicyConfig,
    user_id: Uuid,
    buddy_id: Uuid,
    message: &str,
    now: DateTime<Utc>,
) -> Result<IngestOutcome, AppError> {
    let (severity, matched) = buddy::classify_message(message);
    let event = RiskEvent::new(
        user_id,
        SourceType::Buddy,
        severity,
        severity.base_score(),
        false,
        json!({
            "buddy_id": buddy_id,
            "matched_keywords": matched,
            "message": message,
        }),
        now,
    );
    let case = record_event(repo, policy, &event, now).await?;
    Ok(IngestOutcome { event, case })
}

/// Upstream model predictions arrive pre-graded and are copied through
/// unchanged. Predictions never set `requires_immediate` on their own.
pub async fn ingest_prediction(
    repo: &dyn Repository,
    policy: &PolicyConfig,
    user_id: Uuid,
    risk_level: Severity,
    risk_score: f64,
    confidence: f64,
    model: Option<String>,
    horizon_hours: Option<i64>,
    now: DateTime<Utc>,
) -> Result<IngestOutcome, AppError> {
    let event = RiskEvent::new(
        user_id,
        SourceType::Prediction,
        risk_level,
        risk_score,
        false,
        json!({
            "confidence": confidence,
            "model": model,
            "horizon_hours": horizon_hours,
        }),
        now,
    );
    let case = record_event(repo, policy, &event, now).await?;
    Ok(IngestOutcome { event, case })
}

/// An explicit user response: `safe` and `acknowledge` close the open case,
/// `help` ingests a critical immediate event through the normal path.
pub async fn ingest_response(
    repo: &dyn Repository,
    policy: &PolicyConfig,
    user_id: Uuid,
    kind: ResponseKind,
    message: Option<String>,
    now: DateTime<Utc>,
) -> Result<ResponseResult, AppError> {
    match kind {
        ResponseKind::Safe | ResponseKind::Acknowledge => {
            let reason = match kind {
                ResponseKind::Safe => "response: safe",
                _ => "response: acknowledge",
            };
            let resolved = escalation::resolve_for_user(repo, user_id, reason, now).await?;
            if resolved.is_none() {
                info!("Response from user {user_id} with no open case; nothing to resolve");
            }
            Ok(ResponseResult {
                resolved,
                event: None,
                case: None,
            })
        }
        ResponseKind::Help => {
            let event = help_event(
                user_id,
                json!({ "source": "response", "message": message }),
                now,
            );
            let case = record_event(repo, policy, &event, now).await?;
            Ok(ResponseResult {
                resolved: None,
                event: Some(event),
                case,
            })
        }
    }
}

/// Length of the consecutive-miss run at the head of a newest-first
/// check-in history. A single response anywhere breaks the run.
pub fn consecutive_miss_run(newest_first: &[CheckinRecord]) -> i64 {
    newest_first
        .iter()
        .take_while(|c| c.status == CheckinStatus::Missed)
        .count() as i64
}

fn contains_help_keyword(note: &str) -> bool {
    let lowered = note.to_lowercase();
    HELP_KEYWORDS.iter().any(|k| lowered.contains(k))
}

fn help_event(user_id: Uuid, metadata: serde_json::Value, now: DateTime<Utc>) -> RiskEvent {
    RiskEvent::new(
        user_id,
        SourceType::Checkin,
        Severity::Critical,
        Severity::Critical.base_score(),
        true,
        metadata,
        now,
    )
}

async fn notify_contacts_of_misses(
    repo: &dyn Repository,
    policy: &PolicyConfig,
    user_id: Uuid,
    case: Option<&EscalationCase>,
    run: i64,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let contacts = repo.contacts_for_user(user_id).await?;
    if contacts.is_empty() {
        warn!("User {user_id} missed {run} check-ins but has no emergency contacts");
        return Ok(());
    }
    for contact in contacts.iter().take(2) {
        scheduler::admit(
            repo,
            &policy.rate,
            NotificationDraft {
                user_id,
                case_id: case.map(|c| c.id),
                destination: Destination::Contact {
                    name: contact.name.clone(),
                    address: contact.address.clone(),
                },
                delivery_method: contact.method,
                content: format!(
                    "Haven alert: the person who lists you as an emergency contact has \
                     missed {run} scheduled check-ins in a row. Please consider reaching out."
                ),
                priority: NotificationPriority::High,
                requires_immediate: false,
                not_before: None,
            },
            now,
        )
        .await?;
    }
    Ok(())
}
