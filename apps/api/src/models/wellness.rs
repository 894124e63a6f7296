use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Term-by-term breakdown of a wellness score, kept for explainability.
/// Raw inputs are carried alongside the derived terms; an absent input
/// contributes 0.0 to its term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellnessComponents {
    pub avg_mood: Option<f64>,
    pub avg_activity_percent: Option<f64>,
    pub responded_checkins: i64,
    pub crisis_event_count: i64,
    pub mood_term: f64,
    pub activity_term: f64,
    pub checkin_term: f64,
    pub crisis_penalty: f64,
}

/// Composite, non-actionable rolling wellbeing indicator. Latest row per
/// user; never feeds back into escalation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WellnessScore {
    pub user_id: Uuid,
    /// Clamped to `[0, 100]`.
    pub value: f64,
    pub computed_at: DateTime<Utc>,
    #[sqlx(json)]
    pub components: WellnessComponents,
}
