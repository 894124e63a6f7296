use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::notification::DeliveryMethod;

/// An emergency contact for a monitored user. Tier-3 alerts and the
/// third-consecutive-miss rule go to the lowest `rank` values first.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Contact {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    /// Phone number or email address, depending on `method`.
    pub address: String,
    pub method: DeliveryMethod,
    pub rank: i32,
    pub created_at: DateTime<Utc>,
}
