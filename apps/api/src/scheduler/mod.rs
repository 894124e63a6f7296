//! Notification Scheduler & Rate Limiter.
//!
//! `admit` is the single entry point for anything that wants the user
//! notified: it enforces the per-priority daily cap and minimum spacing,
//! answering send-now, deferred, or rejected. Contact-destined alerts and
//! internal `system` notifications bypass admission — fatigue protection
//! exists for the monitored user, not for emergency contacts or timers.

pub mod delivery;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::case::EscalationCase;
use crate::models::notification::{
    DeliveryMethod, Destination, NotificationPriority, NotificationStatus, ScheduledNotification,
};
use crate::repo::Repository;

/// Limits for one notification priority.
#[derive(Debug, Clone)]
pub struct RateRule {
    pub min_spacing_minutes: i64,
    pub daily_cap: i64,
    /// How long an escalation case may sit in `Tier2Urgent` at this
    /// priority before advancing to the contact alert.
    pub escalation_timeout_minutes: i64,
}

/// The per-priority policy table.
#[derive(Debug, Clone)]
pub struct RatePolicy {
    pub emergency: RateRule,
    pub critical: RateRule,
    pub high: RateRule,
    pub medium: RateRule,
    pub low: RateRule,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            emergency: RateRule {
                min_spacing_minutes: 5,
                daily_cap: 50,
                escalation_timeout_minutes: 15,
            },
            critical: RateRule {
                min_spacing_minutes: 15,
                daily_cap: 20,
                escalation_timeout_minutes: 30,
            },
            high: RateRule {
                min_spacing_minutes: 30,
                daily_cap: 10,
                escalation_timeout_minutes: 60,
            },
            medium: RateRule {
                min_spacing_minutes: 60,
                daily_cap: 5,
                escalation_timeout_minutes: 120,
            },
            low: RateRule {
                min_spacing_minutes: 120,
                daily_cap: 3,
                escalation_timeout_minutes: 240,
            },
        }
    }
}

impl RatePolicy {
    pub fn rule(&self, priority: NotificationPriority) -> &RateRule {
        match priority {
            NotificationPriority::Emergency => &self.emergency,
            NotificationPriority::Critical => &self.critical,
            NotificationPriority::High => &self.high,
            NotificationPriority::Medium => &self.medium,
            NotificationPriority::Low => &self.low,
        }
    }
}

/// What a caller wants delivered; admission decides when, or whether at all.
#[derive(Debug, Clone)]
pub struct NotificationDraft {
    pub user_id: Uuid,
    pub case_id: Option<Uuid>,
    pub destination: Destination,
    pub delivery_method: DeliveryMethod,
    pub content: String,
    pub priority: NotificationPriority,
    pub requires_immediate: bool,
    /// Earliest acceptable slot; `None` means as soon as spacing allows.
    pub not_before: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub enum AdmitOutcome {
    /// Scheduled at the requested slot.
    SendNow(ScheduledNotification),
    /// Spacing pushed the slot past the requested time.
    Deferred(ScheduledNotification),
    /// Daily cap reached; nothing was persisted.
    Rejected,
}

impl AdmitOutcome {
    pub fn notification(&self) -> Option<&ScheduledNotification> {
        match self {
            AdmitOutcome::SendNow(n) | AdmitOutcome::Deferred(n) => Some(n),
            AdmitOutcome::Rejected => None,
        }
    }
}

pub async fn admit(
    repo: &dyn Repository,
    policy: &RatePolicy,
    draft: NotificationDraft,
    now: DateTime<Utc>,
) -> Result<AdmitOutcome, AppError> {
    let earliest = draft.not_before.unwrap_or(now).max(now);

    if !draft.destination.is_user() || draft.delivery_method == DeliveryMethod::System {
        let notification = persist(repo, draft, earliest, now).await?;
        return Ok(AdmitOutcome::SendNow(notification));
    }

    let rule = policy.rule(draft.priority);

    let sent_today = repo
        .sent_count_since(draft.user_id, draft.priority, now - Duration::hours(24))
        .await?;
    if sent_today >= rule.daily_cap {
        if draft.requires_immediate {
            warn!(
                "Daily cap of {} {} notifications reached for user {}; bypassed by requires_immediate",
                rule.daily_cap, draft.priority, draft.user_id
            );
        } else {
            info!(
                "Rejected {} notification for user {}: daily cap of {} reached",
                draft.priority, draft.user_id, rule.daily_cap
            );
            return Ok(AdmitOutcome::Rejected);
        }
    }

    // Space from the latest occupied slot so a burst of admissions chains
    // one spacing interval apart instead of piling onto the same minute.
    let spacing = Duration::minutes(rule.min_spacing_minutes);
    let slot = match repo.latest_slot(draft.user_id, draft.priority).await? {
        Some(last) if last + spacing > earliest => last + spacing,
        _ => earliest,
    };

    let deferred = slot > earliest;
    let notification = persist(repo, draft, slot, now).await?;
    if deferred {
        Ok(AdmitOutcome::Deferred(notification))
    } else {
        Ok(AdmitOutcome::SendNow(notification))
    }
}

/// Escalation timers are notifications with `delivery_method = system`,
/// consumed by the sweep instead of delivered. Never rate-limited.
pub async fn schedule_tier_check(
    repo: &dyn Repository,
    case: &EscalationCase,
    deadline: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<ScheduledNotification, AppError> {
    let notification = ScheduledNotification {
        id: Uuid::new_v4(),
        user_id: case.user_id,
        case_id: Some(case.id),
        destination: Destination::User,
        delivery_method: DeliveryMethod::System,
        content: format!("tier check: {}", case.current_tier),
        scheduled_for: deadline.max(now),
        priority: NotificationPriority::from_severity(case.severity, case.immediate),
        status: NotificationStatus::Pending,
        created_at: now,
        sent_at: None,
    };
    repo.insert_notification(&notification).await?;
    Ok(notification)
}

async fn persist(
    repo: &dyn Repository,
    draft: NotificationDraft,
    scheduled_for: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<ScheduledNotification, AppError> {
    let notification = ScheduledNotification {
        id: Uuid::new_v4(),
        user_id: draft.user_id,
        case_id: draft.case_id,
        destination: draft.destination,
        delivery_method: draft.delivery_method,
        content: draft.content,
        scheduled_for,
        priority: draft.priority,
        status: NotificationStatus::Pending,
        created_at: now,
        sent_at: None,
    };
    repo.insert_notification(&notification).await?;
    Ok(notification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryRepository;

    fn draft(user_id: Uuid, priority: NotificationPriority) -> NotificationDraft {
        NotificationDraft {
            user_id,
            case_id: None,
            destination: Destination::User,
            delivery_method: DeliveryMethod::Push,
            content: "checking in".to_string(),
            priority,
            requires_immediate: false,
            not_before: None,
        }
    }

    async fn seed_sent(
        repo: &MemoryRepository,
        user_id: Uuid,
        priority: NotificationPriority,
        sent_at: DateTime<Utc>,
    ) {
        let n = ScheduledNotification {
            id: Uuid::new_v4(),
            user_id,
            case_id: None,
            destination: Destination::User,
            delivery_method: DeliveryMethod::Push,
            content: "earlier".to_string(),
            scheduled_for: sent_at,
            priority,
            status: NotificationStatus::Sent,
            created_at: sent_at,
            sent_at: Some(sent_at),
        };
        repo.insert_notification(&n).await.unwrap();
    }

    #[tokio::test]
    async fn test_eleventh_high_notification_is_rejected() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();
        let now = Utc::now();
        for i in 0..10 {
            seed_sent(&repo, user, NotificationPriority::High, now - Duration::hours(i)).await;
        }

        let outcome = admit(
            &repo,
            &RatePolicy::default(),
            draft(user, NotificationPriority::High),
            now,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, AdmitOutcome::Rejected));
    }

    #[tokio::test]
    async fn test_requires_immediate_bypasses_daily_cap() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();
        let now = Utc::now();
        for i in 0..10 {
            seed_sent(&repo, user, NotificationPriority::High, now - Duration::hours(i)).await;
        }

        let mut d = draft(user, NotificationPriority::High);
        d.requires_immediate = true;
        let outcome = admit(&repo, &RatePolicy::default(), d, now).await.unwrap();
        assert!(outcome.notification().is_some());
    }

    #[tokio::test]
    async fn test_cap_window_is_rolling_24h() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();
        let now = Utc::now();
        // All prior sends are older than 24h, so they no longer count.
        for i in 0..10 {
            seed_sent(
                &repo,
                user,
                NotificationPriority::High,
                now - Duration::hours(25 + i),
            )
            .await;
        }

        let outcome = admit(
            &repo,
            &RatePolicy::default(),
            draft(user, NotificationPriority::High),
            now,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, AdmitOutcome::SendNow(_)));
    }

    #[tokio::test]
    async fn test_spacing_defers_to_last_sent_plus_gap() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();
        let now = Utc::now();
        let last = now - Duration::minutes(10);
        seed_sent(&repo, user, NotificationPriority::High, last).await;

        let outcome = admit(
            &repo,
            &RatePolicy::default(),
            draft(user, NotificationPriority::High),
            now,
        )
        .await
        .unwrap();
        match outcome {
            AdmitOutcome::Deferred(n) => assert_eq!(n.scheduled_for, last + Duration::minutes(30)),
            other => panic!("expected deferral, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_burst_admissions_chain_one_spacing_apart() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();
        let now = Utc::now();
        let policy = RatePolicy::default();

        let first = admit(&repo, &policy, draft(user, NotificationPriority::High), now)
            .await
            .unwrap();
        let second = admit(&repo, &policy, draft(user, NotificationPriority::High), now)
            .await
            .unwrap();

        let first_slot = first.notification().unwrap().scheduled_for;
        let second_slot = second.notification().unwrap().scheduled_for;
        assert_eq!(first_slot, now);
        assert_eq!(second_slot, now + Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_contact_alerts_bypass_admission() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();
        let now = Utc::now();
        for i in 0..10 {
            seed_sent(&repo, user, NotificationPriority::High, now - Duration::hours(i)).await;
        }

        let mut d = draft(user, NotificationPriority::High);
        d.destination = Destination::Contact {
            name: "Ana".to_string(),
            address: "+15550001111".to_string(),
        };
        d.delivery_method = DeliveryMethod::Sms;
        let outcome = admit(&repo, &RatePolicy::default(), d, now).await.unwrap();
        assert!(matches!(outcome, AdmitOutcome::SendNow(_)));
    }

    #[tokio::test]
    async fn test_not_before_sets_the_slot() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();
        let now = Utc::now();
        let later = now + Duration::minutes(30);

        let mut d = draft(user, NotificationPriority::Medium);
        d.not_before = Some(later);
        let outcome = admit(&repo, &RatePolicy::default(), d, now).await.unwrap();
        match outcome {
            AdmitOutcome::SendNow(n) => {
                assert_eq!(n.scheduled_for, later);
                assert!(n.scheduled_for >= n.created_at);
            }
            other => panic!("expected immediate admission, got {other:?}"),
        }
    }
}
