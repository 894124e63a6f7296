//! Geofence Zone Engine.
//!
//! Location fixes are matched against the user's zones with a great-circle
//! distance check. Hysteresis is discrete: each zone remembers the type of
//! the last event it emitted, and a fix only produces an event when it flips
//! that state, so entry/exit strictly alternate no matter how often a fix
//! lands on the same side of the boundary.

pub mod handlers;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::collector;
use crate::config::PolicyConfig;
use crate::errors::AppError;
use crate::models::case::CaseTier;
use crate::models::event::{RiskEvent, Severity, SourceType};
use crate::models::notification::{DeliveryMethod, Destination, NotificationPriority};
use crate::models::zone::{LastZoneEvent, Zone, ZoneEvent, ZoneEventType, ZoneType};
use crate::repo::Repository;
use crate::scheduler::{self, NotificationDraft};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

const COPING_CONTENT: &str = "You're near a place you've marked as difficult. Take a moment; \
     your coping plan and resources are one tap away.";
const POST_EXIT_CONTENT: &str = "You left a place you've marked as difficult a little while \
     ago. How are you feeling now?";
const ENCOURAGE_RETURN_CONTENT: &str = "That was a short visit to one of your wellness places. \
     Even a few more minutes there can help.";

/// Great-circle (haversine) distance between two coordinates, in meters.
pub fn haversine_distance_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Follow-up triggered by a zone transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneAction {
    SendCopingResources,
    SchedulePostExitCheck,
    ReduceMonitoring,
    ResumeMonitoring,
    EncourageReturn,
}

/// Action set for one (zone type, transition) pair. `duration_secs` is the
/// completed visit length and only matters for wellness exits.
pub fn actions_for(
    zone_type: ZoneType,
    event_type: ZoneEventType,
    duration_secs: Option<i64>,
    policy: &PolicyConfig,
) -> Vec<ZoneAction> {
    match (zone_type, event_type) {
        (ZoneType::Trigger, ZoneEventType::Entry) => vec![ZoneAction::SendCopingResources],
        (ZoneType::Trigger, ZoneEventType::Exit) => vec![ZoneAction::SchedulePostExitCheck],
        (ZoneType::Safe, ZoneEventType::Entry) => vec![ZoneAction::ReduceMonitoring],
        (ZoneType::Safe, ZoneEventType::Exit) => vec![ZoneAction::ResumeMonitoring],
        (ZoneType::Wellness, ZoneEventType::Exit) => {
            let cutoff = policy.short_wellness_visit_minutes * 60;
            if duration_secs.is_some_and(|d| d < cutoff) {
                vec![ZoneAction::EncourageReturn]
            } else {
                vec![]
            }
        }
        _ => vec![],
    }
}

/// A boundary crossing decided from one fix, before it is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub event_type: ZoneEventType,
    /// Seconds since the matching entry; exits only.
    pub duration_secs: Option<i64>,
}

/// Decides whether a fix crosses this zone's boundary. Inside means the fix
/// is within `radius_m` of the center, boundary included.
pub fn evaluate(zone: &Zone, lat: f64, lng: f64, at: DateTime<Utc>) -> Option<Transition> {
    let distance = haversine_distance_m(lat, lng, zone.center_lat, zone.center_lng);
    let inside = distance <= zone.radius_m;
    match (inside, zone.last_event_type) {
        (true, LastZoneEvent::Entry) | (false, LastZoneEvent::None) | (false, LastZoneEvent::Exit) => {
            None
        }
        (true, _) => Some(Transition {
            event_type: ZoneEventType::Entry,
            duration_secs: None,
        }),
        (false, LastZoneEvent::Entry) => Some(Transition {
            event_type: ZoneEventType::Exit,
            duration_secs: zone.last_entry_at.map(|entered| (at - entered).num_seconds()),
        }),
    }
}

/// What one location update did to one zone.
#[derive(Debug, Serialize)]
pub struct ZoneCrossing {
    pub zone_id: Uuid,
    pub label: String,
    pub zone_type: ZoneType,
    pub event_type: ZoneEventType,
    pub duration_secs: Option<i64>,
    pub actions: Vec<ZoneAction>,
    pub case_tier: Option<CaseTier>,
}

/// Validates and persists a new zone.
pub async fn create_zone(
    repo: &dyn Repository,
    user_id: Uuid,
    label: String,
    lat: f64,
    lng: f64,
    radius_m: f64,
    zone_type: ZoneType,
    now: DateTime<Utc>,
) -> Result<Zone, AppError> {
    if label.trim().is_empty() {
        return Err(AppError::Validation("zone label must not be empty".to_string()));
    }
    validate_coordinates(lat, lng)?;
    if !radius_m.is_finite() || radius_m <= 0.0 {
        return Err(AppError::Validation(format!(
            "zone radius must be positive, got {radius_m}"
        )));
    }

    let zone = Zone {
        id: Uuid::new_v4(),
        user_id,
        label,
        center_lat: lat,
        center_lng: lng,
        radius_m,
        zone_type,
        last_event_type: LastZoneEvent::None,
        last_entry_at: None,
        entry_count: 0,
        active: true,
        created_at: now,
    };
    repo.insert_zone(&zone).await?;
    Ok(zone)
}

pub fn validate_coordinates(lat: f64, lng: f64) -> Result<(), AppError> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(AppError::Validation(format!(
            "latitude must be within [-90, 90], got {lat}"
        )));
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(AppError::Validation(format!(
            "longitude must be within [-180, 180], got {lng}"
        )));
    }
    Ok(())
}

/// Runs one location fix against every active zone of the user. Each
/// crossing updates the zone's hysteresis state, records a `ZoneEvent`,
/// emits a `zone` risk event through the collector path, and fires the
/// action set for the (zone type, transition) pair.
pub async fn on_location_update(
    repo: &dyn Repository,
    policy: &PolicyConfig,
    user_id: Uuid,
    lat: f64,
    lng: f64,
    accuracy_m: Option<f64>,
    at: DateTime<Utc>,
) -> Result<Vec<ZoneCrossing>, AppError> {
    let zones = repo.zones_for_user(user_id).await?;
    let mut crossings = Vec::new();

    for mut zone in zones.into_iter().filter(|z| z.active) {
        let Some(transition) = evaluate(&zone, lat, lng, at) else {
            continue;
        };

        match transition.event_type {
            ZoneEventType::Entry => {
                zone.last_event_type = LastZoneEvent::Entry;
                zone.last_entry_at = Some(at);
                zone.entry_count += 1;
            }
            ZoneEventType::Exit => {
                zone.last_event_type = LastZoneEvent::Exit;
                zone.last_entry_at = None;
            }
        }
        repo.update_zone(&zone).await?;

        repo.insert_zone_event(&ZoneEvent {
            id: Uuid::new_v4(),
            zone_id: zone.id,
            user_id,
            event_type: transition.event_type,
            occurred_at: at,
            duration_secs: transition.duration_secs,
        })
        .await?;

        let actions = actions_for(zone.zone_type, transition.event_type, transition.duration_secs, policy);

        // Entering a trigger zone is actionable evidence; every other
        // crossing is recorded at low severity.
        let severity = if zone.zone_type == ZoneType::Trigger
            && transition.event_type == ZoneEventType::Entry
        {
            Severity::High
        } else {
            Severity::Low
        };
        let event = RiskEvent::new(
            user_id,
            SourceType::Zone,
            severity,
            severity.base_score(),
            false,
            json!({
                "zone_id": zone.id,
                "zone_label": zone.label,
                "zone_type": zone.zone_type,
                "transition": transition.event_type,
                "duration_secs": transition.duration_secs,
                "accuracy_m": accuracy_m,
                "actions": actions,
            }),
            at,
        );
        let case = collector::record_event(repo, policy, &event, at).await?;

        for action in &actions {
            match action {
                ZoneAction::SendCopingResources => {
                    scheduler::admit(
                        repo,
                        &policy.rate,
                        NotificationDraft {
                            user_id,
                            case_id: case.as_ref().map(|c| c.id),
                            destination: Destination::User,
                            delivery_method: DeliveryMethod::Push,
                            content: COPING_CONTENT.to_string(),
                            priority: NotificationPriority::High,
                            requires_immediate: false,
                            not_before: None,
                        },
                        at,
                    )
                    .await?;
                }
                ZoneAction::SchedulePostExitCheck => {
                    scheduler::admit(
                        repo,
                        &policy.rate,
                        NotificationDraft {
                            user_id,
                            case_id: None,
                            destination: Destination::User,
                            delivery_method: DeliveryMethod::Push,
                            content: POST_EXIT_CONTENT.to_string(),
                            priority: NotificationPriority::Medium,
                            requires_immediate: false,
                            not_before: Some(
                                at + chrono::Duration::minutes(policy.post_exit_check_minutes),
                            ),
                        },
                        at,
                    )
                    .await?;
                }
                ZoneAction::EncourageReturn => {
                    scheduler::admit(
                        repo,
                        &policy.rate,
                        NotificationDraft {
                            user_id,
                            case_id: None,
                            destination: Destination::User,
                            delivery_method: DeliveryMethod::Push,
                            content: ENCOURAGE_RETURN_CONTENT.to_string(),
                            priority: NotificationPriority::Low,
                            requires_immediate: false,
                            not_before: None,
                        },
                        at,
                    )
                    .await?;
                }
                // Monitoring shifts are recorded on the event, nothing to send.
                ZoneAction::ReduceMonitoring | ZoneAction::ResumeMonitoring => {}
            }
        }

        crossings.push(ZoneCrossing {
            zone_id: zone.id,
            label: zone.label.clone(),
            zone_type: zone.zone_type,
            event_type: transition.event_type,
            duration_secs: transition.duration_secs,
            actions,
            case_tier: case.map(|c| c.current_tier),
        });
    }

    Ok(crossings)
}
