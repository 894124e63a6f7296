use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "zone_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Safe,
    Trigger,
    Neutral,
    Wellness,
}

impl std::fmt::Display for ZoneType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ZoneType::Safe => "safe",
            ZoneType::Trigger => "trigger",
            ZoneType::Neutral => "neutral",
            ZoneType::Wellness => "wellness",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "zone_event_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ZoneEventType {
    Entry,
    Exit,
}

impl std::fmt::Display for ZoneEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZoneEventType::Entry => write!(f, "entry"),
            ZoneEventType::Exit => write!(f, "exit"),
        }
    }
}

/// Discrete per-zone hysteresis state: the type of the last event emitted,
/// or `None` before the first transition. No event is emitted while the
/// state is unchanged, so same-type duplicates are impossible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "last_zone_event", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LastZoneEvent {
    #[default]
    None,
    Entry,
    Exit,
}

/// A circular geofence belonging to one user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Zone {
    pub id: Uuid,
    pub user_id: Uuid,
    pub label: String,
    pub center_lat: f64,
    pub center_lng: f64,
    /// Meters; creation rejects values <= 0.
    pub radius_m: f64,
    pub zone_type: ZoneType,
    pub last_event_type: LastZoneEvent,
    /// Timestamp of the open entry, used to compute exit duration.
    pub last_entry_at: Option<DateTime<Utc>>,
    pub entry_count: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// One boundary crossing for a zone. Events for a zone strictly alternate
/// entry, exit, entry, exit, …
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ZoneEvent {
    pub id: Uuid,
    pub zone_id: Uuid,
    pub user_id: Uuid,
    pub event_type: ZoneEventType,
    pub occurred_at: DateTime<Utc>,
    /// Seconds since the matching entry; set on exit events only.
    pub duration_secs: Option<i64>,
}
