use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::geofence::{self, ZoneCrossing};
use crate::models::zone::{Zone, ZoneType};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct CreateZoneRequest {
    pub user_id: Uuid,
    pub label: String,
    pub lat: f64,
    pub lng: f64,
    pub radius_m: f64,
    pub zone_type: ZoneType,
}

#[derive(Deserialize)]
pub struct LocationUpdateRequest {
    pub user_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub accuracy_m: Option<f64>,
    /// When the device took the fix; defaults to arrival time.
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct LocationUpdateResponse {
    pub crossings: Vec<ZoneCrossing>,
}

/// POST /api/v1/zones
pub async fn handle_create_zone(
    State(state): State<AppState>,
    Json(req): Json<CreateZoneRequest>,
) -> Result<Json<Zone>, AppError> {
    let zone = geofence::create_zone(
        state.repo.as_ref(),
        req.user_id,
        req.label,
        req.lat,
        req.lng,
        req.radius_m,
        req.zone_type,
        Utc::now(),
    )
    .await?;
    Ok(Json(zone))
}

/// GET /api/v1/zones?user_id=...
pub async fn handle_list_zones(
    State(state): State<AppState>,
    Query(query): Query<UserIdQuery>,
) -> Result<Json<Vec<Zone>>, AppError> {
    let zones = state.repo.zones_for_user(query.user_id).await?;
    Ok(Json(zones))
}

/// POST /api/v1/ingest/location
pub async fn handle_ingest_location(
    State(state): State<AppState>,
    Json(req): Json<LocationUpdateRequest>,
) -> Result<Json<LocationUpdateResponse>, AppError> {
    geofence::validate_coordinates(req.lat, req.lng)?;
    if let Some(accuracy) = req.accuracy_m {
        if !accuracy.is_finite() || accuracy < 0.0 {
            return Err(AppError::Validation(format!(
                "accuracy_m must be a non-negative number, got {accuracy}"
            )));
        }
    }

    let now = Utc::now();
    let crossings = geofence::on_location_update(
        state.repo.as_ref(),
        &state.config.policy,
        req.user_id,
        req.lat,
        req.lng,
        req.accuracy_m,
        req.recorded_at.unwrap_or(now),
    )
    .await?;
    Ok(Json(LocationUpdateResponse { crossings }))
}
