//! Background sweep.
//!
//! One sweep visits every user with an open case, a due notification, or
//! recent events, and runs the full cycle for each: pattern detection, due
//! deliveries (tier checks included), an escalation-deadline safety net,
//! and a wellness recompute. Users are swept in parallel tasks; work for
//! one user is strictly sequential inside its task, and a panic or error
//! in one task never aborts the others.

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PolicyConfig;
use crate::errors::AppError;
use crate::escalation;
use crate::gateway::DeliveryGateway;
use crate::patterns;
use crate::registry::SubscriptionRegistry;
use crate::repo::Repository;
use crate::scheduler::delivery::{self, DeliveryStats};
use crate::state::AppState;
use crate::wellness;

/// Aggregate counters for one sweep run.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct SweepReport {
    pub users_considered: u64,
    pub users_failed: u64,
    pub patterns_emitted: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub notifications_deferred: u64,
    pub tier_checks_consumed: u64,
    /// Overdue cases advanced by the safety net rather than a tier check.
    pub deadline_advances: u64,
    pub wellness_updated: u64,
}

#[derive(Debug, Default)]
struct UserSweepOutcome {
    patterns_emitted: u64,
    delivery: DeliveryStats,
    deadline_advanced: bool,
}

/// Runs one full sweep at `now` and reports what it did.
pub async fn run_sweep(
    repo: Arc<dyn Repository>,
    gateway: Arc<dyn DeliveryGateway>,
    registry: Arc<SubscriptionRegistry>,
    policy: PolicyConfig,
    now: DateTime<Utc>,
) -> SweepReport {
    let events_since = now - Duration::hours(policy.pattern_window_hours);
    let users = match repo.sweep_candidates(now, events_since).await {
        Ok(users) => users,
        Err(err) => {
            warn!("Sweep could not list candidate users: {err}");
            return SweepReport::default();
        }
    };

    let mut report = SweepReport {
        users_considered: users.len() as u64,
        ..Default::default()
    };

    let mut handles = Vec::with_capacity(users.len());
    for user_id in users {
        let repo = Arc::clone(&repo);
        let gateway = Arc::clone(&gateway);
        let registry = Arc::clone(&registry);
        let policy = policy.clone();
        handles.push((
            user_id,
            tokio::spawn(async move {
                sweep_user(
                    repo.as_ref(),
                    gateway.as_ref(),
                    registry.as_ref(),
                    &policy,
                    user_id,
                    now,
                )
                .await
            }),
        ));
    }

    for (user_id, handle) in handles {
        match handle.await {
            Ok(Ok(outcome)) => {
                report.patterns_emitted += outcome.patterns_emitted;
                report.notifications_sent += outcome.delivery.sent;
                report.notifications_failed += outcome.delivery.failed;
                report.notifications_deferred += outcome.delivery.deferred;
                report.tier_checks_consumed += outcome.delivery.tier_checks;
                report.deadline_advances += u64::from(outcome.deadline_advanced);
                report.wellness_updated += 1;
            }
            Ok(Err(err)) => {
                report.users_failed += 1;
                warn!("Sweep for user {user_id} failed: {err}");
            }
            Err(err) => {
                report.users_failed += 1;
                warn!("Sweep task for user {user_id} panicked: {err}");
            }
        }
    }

    info!(
        "Sweep complete: {} users ({} failed), {} patterns, {} sent, {} deferred, \
         {} tier checks, {} deadline advances",
        report.users_considered,
        report.users_failed,
        report.patterns_emitted,
        report.notifications_sent,
        report.notifications_deferred,
        report.tier_checks_consumed,
        report.deadline_advances
    );
    report
}

async fn sweep_user(
    repo: &dyn Repository,
    gateway: &dyn DeliveryGateway,
    registry: &SubscriptionRegistry,
    policy: &PolicyConfig,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<UserSweepOutcome, AppError> {
    let mut outcome = UserSweepOutcome::default();

    outcome.patterns_emitted = patterns::run_for_user(repo, policy, user_id, now).await?.len() as u64;
    outcome.delivery =
        delivery::deliver_due_for_user(repo, gateway, registry, policy, user_id, now).await?;

    // Safety net: a tier check lost to contention or a crashed earlier sweep
    // must not leave an overdue case stuck in its tier.
    if let Some(case) = repo.open_case_for_user(user_id).await? {
        if escalation::check_deadline(repo, policy, case.id, now)
            .await?
            .is_some()
        {
            outcome.deadline_advanced = true;
        }
    }

    wellness::recompute_for_user(repo, policy, user_id, now).await?;
    Ok(outcome)
}

/// POST /api/v1/sweep
pub async fn handle_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    let report = run_sweep(
        Arc::clone(&state.repo),
        Arc::clone(&state.gateway),
        Arc::clone(&state.registry),
        state.config.policy.clone(),
        Utc::now(),
    )
    .await;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::RecordingGateway;
    use crate::models::case::CaseTier;
    use crate::models::event::{RiskEvent, Severity, SourceType};
    use crate::repo::MemoryRepository;
    use serde_json::json;

    struct Harness {
        repo: Arc<MemoryRepository>,
        gateway: Arc<RecordingGateway>,
        registry: Arc<SubscriptionRegistry>,
        policy: PolicyConfig,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                repo: Arc::new(MemoryRepository::new()),
                gateway: Arc::new(RecordingGateway::new()),
                registry: Arc::new(SubscriptionRegistry::new()),
                policy: PolicyConfig::default(),
            }
        }

        async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
            run_sweep(
                self.repo.clone(),
                self.gateway.clone(),
                self.registry.clone(),
                self.policy.clone(),
                now,
            )
            .await
        }
    }

    fn low_event(user: Uuid, source: SourceType, at: DateTime<Utc>) -> RiskEvent {
        RiskEvent::new(user, source, Severity::Low, 0.2, false, json!({}), at)
    }

    #[tokio::test]
    async fn test_sweep_detects_patterns_and_delivers() {
        let h = Harness::new();
        let user = Uuid::new_v4();
        let now = Utc::now();

        for source in [
            SourceType::Mood,
            SourceType::Sensor,
            SourceType::Zone,
            SourceType::Mood,
            SourceType::Sensor,
        ] {
            h.repo
                .insert_event(&low_event(user, source, now - Duration::hours(2)))
                .await
                .unwrap();
        }

        let report = h.sweep(now).await;

        assert_eq!(report.users_considered, 1);
        assert_eq!(report.users_failed, 0);
        assert_eq!(report.patterns_emitted, 1);
        // The derived high pattern opened a case whose tier-1 nudge was due
        // immediately and went out in the same sweep.
        assert_eq!(report.notifications_sent, 1);
        assert_eq!(report.wellness_updated, 1);

        let case = h.repo.open_case_for_user(user).await.unwrap().unwrap();
        assert_eq!(case.current_tier, CaseTier::Tier1Gentle);
        assert!(h.repo.latest_wellness(user).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_consumes_due_tier_check() {
        let h = Harness::new();
        let user = Uuid::new_v4();
        let t0 = Utc::now();

        let event = RiskEvent::new(
            user,
            SourceType::Checkin,
            Severity::High,
            0.7,
            false,
            json!({}),
            t0,
        );
        h.repo.insert_event(&event).await.unwrap();
        escalation::feed_event(h.repo.as_ref(), &h.policy, &event, t0)
            .await
            .unwrap();

        // Past the tier-1 deadline the pending check fires and advances.
        let later = t0 + Duration::minutes(h.policy.timeouts.tier1_minutes + 1);
        let report = h.sweep(later).await;

        assert_eq!(report.tier_checks_consumed, 1);
        assert_eq!(report.deadline_advances, 0);
        let case = h.repo.open_case_for_user(user).await.unwrap().unwrap();
        assert_eq!(case.current_tier, CaseTier::Tier2Urgent);
    }

    #[tokio::test]
    async fn test_sweep_safety_net_advances_without_tier_check() {
        let h = Harness::new();
        let user = Uuid::new_v4();
        let t0 = Utc::now();

        let event = RiskEvent::new(
            user,
            SourceType::Mood,
            Severity::High,
            0.7,
            false,
            json!({}),
            t0,
        );
        h.repo.insert_event(&event).await.unwrap();
        let case = escalation::feed_event(h.repo.as_ref(), &h.policy, &event, t0)
            .await
            .unwrap();
        // Simulate lost timers: every pending notification for the case is
        // gone, including its tier check.
        h.repo.cancel_pending_for_case(case.id).await.unwrap();

        let later = t0 + Duration::minutes(h.policy.timeouts.tier1_minutes + 60);
        let report = h.sweep(later).await;

        assert_eq!(report.tier_checks_consumed, 0);
        assert_eq!(report.deadline_advances, 1);
        let case = h.repo.open_case_for_user(user).await.unwrap().unwrap();
        assert_eq!(case.current_tier, CaseTier::Tier2Urgent);
    }

    #[tokio::test]
    async fn test_sweep_aggregates_across_users() {
        let h = Harness::new();
        let now = Utc::now();

        for _ in 0..2 {
            let user = Uuid::new_v4();
            h.repo
                .insert_event(&low_event(user, SourceType::Mood, now - Duration::hours(1)))
                .await
                .unwrap();
        }

        let report = h.sweep(now).await;
        assert_eq!(report.users_considered, 2);
        assert_eq!(report.users_failed, 0);
        assert_eq!(report.wellness_updated, 2);
    }
}
