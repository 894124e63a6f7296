use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "checkin_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CheckinStatus {
    Responded,
    Missed,
}

/// Outcome of one scheduled check-in window. The consecutive-miss run is
/// computed from this history, newest first, not from a trailing window count.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CheckinRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: CheckinStatus,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl CheckinRecord {
    pub fn new(
        user_id: Uuid,
        status: CheckinStatus,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            status,
            note,
            recorded_at: now,
        }
    }
}
