use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Input channel a risk event was normalized from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, PartialOrd, Ord,
)]
#[sqlx(type_name = "source_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Mood,
    Sensor,
    Checkin,
    Zone,
    Buddy,
    Prediction,
    Pattern,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceType::Mood => "mood",
            SourceType::Sensor => "sensor",
            SourceType::Checkin => "checkin",
            SourceType::Zone => "zone",
            SourceType::Buddy => "buddy",
            SourceType::Prediction => "prediction",
            SourceType::Pattern => "pattern",
        };
        write!(f, "{s}")
    }
}

/// Severity grades are ordered: `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "severity", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// High and critical events are the ones that open or feed escalation cases.
    pub fn is_actionable(self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }

    /// Nominal risk score for events classified by rule rather than by the scorer.
    pub fn base_score(self) -> f64 {
        match self {
            Severity::Low => 0.2,
            Severity::Medium => 0.45,
            Severity::High => 0.7,
            Severity::Critical => 0.95,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Normalized unit of risk evidence from any input channel.
///
/// Append-only: rows are inserted by the collector (or the pattern detector)
/// and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RiskEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source_type: SourceType,
    pub severity: Severity,
    /// Normalized risk score in `[0.0, 1.0]`.
    pub score: f64,
    pub requires_immediate: bool,
    /// Source-specific payload (raw reading, scorer verdict, zone transition, …).
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl RiskEvent {
    pub fn new(
        user_id: Uuid,
        source_type: SourceType,
        severity: Severity,
        score: f64,
        requires_immediate: bool,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            source_type,
            severity,
            score: score.clamp(0.0, 1.0),
            requires_immediate,
            metadata,
            created_at: now,
        }
    }
}
