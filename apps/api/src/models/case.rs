use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::event::Severity;

/// Escalation tiers for a case. Tiers only move forward; `Resolved` and
/// `Expired` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "case_tier", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CaseTier {
    Idle,
    Tier1Gentle,
    Tier2Urgent,
    Tier3ContactAlert,
    Resolved,
    Expired,
}

impl CaseTier {
    /// Whether this tier ends the case (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, CaseTier::Resolved | CaseTier::Expired)
    }

    /// The tier reached when this one times out without a user response.
    pub fn on_timeout(self) -> Option<CaseTier> {
        match self {
            CaseTier::Tier1Gentle => Some(CaseTier::Tier2Urgent),
            CaseTier::Tier2Urgent => Some(CaseTier::Tier3ContactAlert),
            CaseTier::Tier3ContactAlert => Some(CaseTier::Expired),
            _ => None,
        }
    }

    /// Position in the escalation ladder, for monotonicity checks.
    /// Terminal tiers have no rank.
    pub fn rank(self) -> Option<u8> {
        match self {
            CaseTier::Idle => Some(0),
            CaseTier::Tier1Gentle => Some(1),
            CaseTier::Tier2Urgent => Some(2),
            CaseTier::Tier3ContactAlert => Some(3),
            CaseTier::Resolved | CaseTier::Expired => None,
        }
    }
}

impl std::fmt::Display for CaseTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CaseTier::Idle => "idle",
            CaseTier::Tier1Gentle => "tier1_gentle",
            CaseTier::Tier2Urgent => "tier2_urgent",
            CaseTier::Tier3ContactAlert => "tier3_contact_alert",
            CaseTier::Resolved => "resolved",
            CaseTier::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// One recorded tier entry, kept in order on the case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierRecord {
    pub tier: CaseTier,
    pub entered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Per-user state-machine instance tracking response to an unresolved risk.
///
/// Invariant: at most one non-terminal case per user. New actionable events
/// while a case is open are merged into it, never opened as a second case.
/// `version` backs the optimistic read-modify-write on the repository.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EscalationCase {
    pub id: Uuid,
    pub user_id: Uuid,
    pub trigger_event_id: Uuid,
    pub current_tier: CaseTier,
    /// Highest severity observed across the trigger and merged events.
    pub severity: Severity,
    /// Whether any contributing event carried `requires_immediate`.
    pub immediate: bool,
    pub opened_at: DateTime<Utc>,
    pub last_action_at: DateTime<Utc>,
    #[sqlx(json)]
    pub tier_history: Vec<TierRecord>,
    pub version: i64,
}

impl EscalationCase {
    /// Opens a new case at `Idle`; the engine advances it to its first
    /// active tier in the same decision.
    pub fn open(
        user_id: Uuid,
        trigger_event_id: Uuid,
        severity: Severity,
        immediate: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            trigger_event_id,
            current_tier: CaseTier::Idle,
            severity,
            immediate,
            opened_at: now,
            last_action_at: now,
            tier_history: vec![TierRecord {
                tier: CaseTier::Idle,
                entered_at: now,
                reason: None,
            }],
            version: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.current_tier.is_terminal()
    }

    /// When the current tier was entered, per the history (falls back to
    /// `opened_at`).
    pub fn current_tier_entered_at(&self) -> DateTime<Utc> {
        self.tier_history
            .iter()
            .rev()
            .find(|r| r.tier == self.current_tier)
            .map(|r| r.entered_at)
            .unwrap_or(self.opened_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_tiers() {
        assert!(CaseTier::Resolved.is_terminal());
        assert!(CaseTier::Expired.is_terminal());
        assert!(!CaseTier::Tier3ContactAlert.is_terminal());
        assert!(!CaseTier::Idle.is_terminal());
    }

    #[test]
    fn test_timeout_ladder() {
        assert_eq!(CaseTier::Tier1Gentle.on_timeout(), Some(CaseTier::Tier2Urgent));
        assert_eq!(CaseTier::Tier2Urgent.on_timeout(), Some(CaseTier::Tier3ContactAlert));
        assert_eq!(CaseTier::Tier3ContactAlert.on_timeout(), Some(CaseTier::Expired));
        assert_eq!(CaseTier::Resolved.on_timeout(), None);
    }

    #[test]
    fn test_open_case_starts_idle_with_history() {
        let now = Utc::now();
        let case = EscalationCase::open(Uuid::new_v4(), Uuid::new_v4(), Severity::High, false, now);
        assert_eq!(case.current_tier, CaseTier::Idle);
        assert_eq!(case.tier_history.len(), 1);
        assert_eq!(case.current_tier_entered_at(), now);
        assert!(case.is_open());
        assert_eq!(case.version, 0);
    }
}
