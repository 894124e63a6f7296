use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collector::thresholds::SensorMetric;
use crate::collector::{
    ingest_buddy, ingest_checkin, ingest_mood, ingest_prediction, ingest_response, ingest_sensor,
    CheckinResult, IngestOutcome, ResponseKind,
};
use crate::errors::AppError;
use crate::models::case::CaseTier;
use crate::models::checkin::CheckinRecord;
use crate::models::event::{RiskEvent, Severity};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct MoodIngestRequest {
    pub user_id: Uuid,
    /// Self-reported 1 (worst) to 5 (best).
    pub mood: i32,
    pub note: Option<String>,
}

#[derive(Deserialize)]
pub struct SensorIngestRequest {
    pub user_id: Uuid,
    pub metric: SensorMetric,
    pub value: f64,
    /// When the wearable captured the reading; defaults to arrival time.
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct CheckinIngestRequest {
    pub user_id: Uuid,
    pub responded: bool,
    pub note: Option<String>,
}

#[derive(Deserialize)]
pub struct BuddyIngestRequest {
    pub user_id: Uuid,
    pub buddy_id: Uuid,
    pub message: String,
}

#[derive(Deserialize)]
pub struct PredictionIngestRequest {
    pub user_id: Uuid,
    pub risk_level: Severity,
    pub risk_score: f64,
    pub confidence: f64,
    pub model: Option<String>,
    pub horizon_hours: Option<i64>,
}

#[derive(Deserialize)]
pub struct UserResponseRequest {
    pub user_id: Uuid,
    pub kind: ResponseKind,
    pub message: Option<String>,
}

#[derive(Deserialize)]
pub struct EventsQuery {
    pub user_id: Uuid,
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_hours() -> i64 {
    24
}

#[derive(Serialize)]
pub struct IngestResponse {
    pub event: RiskEvent,
    pub case_tier: Option<CaseTier>,
}

impl From<IngestOutcome> for IngestResponse {
    fn from(outcome: IngestOutcome) -> Self {
        Self {
            event: outcome.event,
            case_tier: outcome.case.map(|c| c.current_tier),
        }
    }
}

#[derive(Serialize)]
pub struct CheckinResponse {
    pub record: CheckinRecord,
    pub event: Option<RiskEvent>,
    pub case_tier: Option<CaseTier>,
    pub consecutive_misses: i64,
    pub resolved: bool,
}

impl From<CheckinResult> for CheckinResponse {
    fn from(result: CheckinResult) -> Self {
        Self {
            record: result.record,
            event: result.event,
            case_tier: result.case.map(|c| c.current_tier),
            consecutive_misses: result.consecutive_misses,
            resolved: result.resolved.is_some(),
        }
    }
}

#[derive(Serialize)]
pub struct UserResponseResponse {
    pub resolved: bool,
    pub case_tier: Option<CaseTier>,
}

/// POST /api/v1/ingest/mood
pub async fn handle_ingest_mood(
    State(state): State<AppState>,
    Json(req): Json<MoodIngestRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    if !(1..=5).contains(&req.mood) {
        return Err(AppError::Validation(format!(
            "mood must be between 1 and 5, got {}",
            req.mood
        )));
    }
    let outcome = ingest_mood(
        state.repo.as_ref(),
        state.scorer.as_ref(),
        &state.config.policy,
        req.user_id,
        req.mood,
        req.note,
        Utc::now(),
    )
    .await?;
    Ok(Json(outcome.into()))
}

/// POST /api/v1/ingest/sensor
pub async fn handle_ingest_sensor(
    State(state): State<AppState>,
    Json(req): Json<SensorIngestRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    if !req.value.is_finite() {
        return Err(AppError::Validation(
            "sensor value must be a finite number".to_string(),
        ));
    }
    let now = Utc::now();
    let outcome = ingest_sensor(
        state.repo.as_ref(),
        &state.config.policy,
        req.user_id,
        req.metric,
        req.value,
        req.recorded_at.unwrap_or(now),
        now,
    )
    .await?;
    Ok(Json(outcome.into()))
}

/// POST /api/v1/ingest/checkin
pub async fn handle_ingest_checkin(
    State(state): State<AppState>,
    Json(req): Json<CheckinIngestRequest>,
) -> Result<Json<CheckinResponse>, AppError> {
    let result = ingest_checkin(
        state.repo.as_ref(),
        state.scorer.as_ref(),
        &state.config.policy,
        req.user_id,
        req.responded,
        req.note,
        Utc::now(),
    )
    .await?;
    Ok(Json(result.into()))
}

/// POST /api/v1/ingest/buddy
pub async fn handle_ingest_buddy(
    State(state): State<AppState>,
    Json(req): Json<BuddyIngestRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    if req.message.trim().is_empty() {
        return Err(AppError::Validation(
            "buddy message must not be empty".to_string(),
        ));
    }
    let outcome = ingest_buddy(
        state.repo.as_ref(),
        &state.config.policy,
        req.user_id,
        req.buddy_id,
        &req.message,
        Utc::now(),
    )
    .await?;
    Ok(Json(outcome.into()))
}

/// POST /api/v1/ingest/prediction
pub async fn handle_ingest_prediction(
    State(state): State<AppState>,
    Json(req): Json<PredictionIngestRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    for (name, value) in [("risk_score", req.risk_score), ("confidence", req.confidence)] {
        if !(0.0..=1.0).contains(&value) {
            return Err(AppError::Validation(format!(
                "{name} must be within [0.0, 1.0], got {value}"
            )));
        }
    }
    let outcome = ingest_prediction(
        state.repo.as_ref(),
        &state.config.policy,
        req.user_id,
        req.risk_level,
        req.risk_score,
        req.confidence,
        req.model,
        req.horizon_hours,
        Utc::now(),
    )
    .await?;
    Ok(Json(outcome.into()))
}

/// POST /api/v1/responses
pub async fn handle_response(
    State(state): State<AppState>,
    Json(req): Json<UserResponseRequest>,
) -> Result<Json<UserResponseResponse>, AppError> {
    let result = ingest_response(
        state.repo.as_ref(),
        &state.config.policy,
        req.user_id,
        req.kind,
        req.message,
        Utc::now(),
    )
    .await?;
    Ok(Json(UserResponseResponse {
        resolved: result.resolved.is_some(),
        case_tier: result
            .resolved
            .or(result.case)
            .map(|c| c.current_tier),
    }))
}

/// GET /api/v1/events
pub async fn handle_list_events(
    State(state): State<AppState>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<Vec<RiskEvent>>, AppError> {
    if !(1..=24 * 90).contains(&params.hours) {
        return Err(AppError::Validation(format!(
            "hours must be between 1 and {}, got {}",
            24 * 90,
            params.hours
        )));
    }
    let since = Utc::now() - chrono::Duration::hours(params.hours);
    let events = state
        .repo
        .events_for_user_since(params.user_id, since)
        .await?;
    Ok(Json(events))
}
