//! Delivery of due notifications.
//!
//! The sweep calls this per user: `system` tier checks are consumed
//! internally, everything else is re-checked against the spacing floor and
//! pushed through the gateway. Failures stay retryable for a grace window,
//! then fall out of the due set.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PolicyConfig;
use crate::errors::AppError;
use crate::escalation;
use crate::gateway::DeliveryGateway;
use crate::models::notification::{DeliveryMethod, NotificationStatus};
use crate::registry::SubscriptionRegistry;
use crate::repo::Repository;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub sent: u64,
    pub failed: u64,
    pub deferred: u64,
    pub tier_checks: u64,
}

pub async fn deliver_due_for_user(
    repo: &dyn Repository,
    gateway: &dyn DeliveryGateway,
    registry: &SubscriptionRegistry,
    policy: &PolicyConfig,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<DeliveryStats, AppError> {
    let grace = Duration::minutes(policy.delivery_grace_minutes);
    let due = repo.due_notifications(user_id, now, grace).await?;
    let mut stats = DeliveryStats::default();

    for notification in due {
        if notification.delivery_method == DeliveryMethod::System {
            // Tier check: consumed here, never leaves the service. Marked
            // sent only once the deadline check itself went through, so a
            // contended check is retried next cycle.
            if let Some(case_id) = notification.case_id {
                if let Err(err) = escalation::check_deadline(repo, policy, case_id, now).await {
                    warn!("Tier check for case {case_id} did not complete: {err}");
                    continue;
                }
            }
            repo.mark_notification(notification.id, NotificationStatus::Sent, Some(now))
                .await?;
            stats.tier_checks += 1;
            continue;
        }

        // Spacing holds at send time too: an earlier delivery this cycle may
        // have moved the floor since this slot was computed.
        if notification.destination.is_user() {
            if let Some(last) = repo.last_sent_at(user_id, notification.priority).await? {
                let spacing =
                    Duration::minutes(policy.rate.rule(notification.priority).min_spacing_minutes);
                let floor = last + spacing;
                if now < floor {
                    repo.reschedule_notification(notification.id, floor).await?;
                    stats.deferred += 1;
                    continue;
                }
            }
        }

        match gateway.deliver(&notification).await {
            Ok(()) => {
                repo.mark_notification(notification.id, NotificationStatus::Sent, Some(now))
                    .await?;
                let mut delivered = notification.clone();
                delivered.status = NotificationStatus::Sent;
                delivered.sent_at = Some(now);
                registry.publish(&delivered);
                stats.sent += 1;
            }
            Err(err) => {
                warn!("Delivery of notification {} failed: {err}", notification.id);
                repo.mark_notification(notification.id, NotificationStatus::Failed, None)
                    .await?;
                stats.failed += 1;
            }
        }
    }

    if stats != DeliveryStats::default() {
        info!(
            "Delivery for user {user_id}: {} sent, {} failed, {} deferred, {} tier checks",
            stats.sent, stats.failed, stats.deferred, stats.tier_checks
        );
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::RecordingGateway;
    use crate::models::case::CaseTier;
    use crate::models::event::{RiskEvent, Severity, SourceType};
    use crate::models::notification::{
        Destination, NotificationPriority, ScheduledNotification,
    };
    use crate::repo::MemoryRepository;
    use serde_json::json;

    fn pending(
        user_id: Uuid,
        priority: NotificationPriority,
        scheduled_for: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> ScheduledNotification {
        ScheduledNotification {
            id: Uuid::new_v4(),
            user_id,
            case_id: None,
            destination: Destination::User,
            delivery_method: DeliveryMethod::Push,
            priority,
            content: "hello".to_string(),
            status: NotificationStatus::Pending,
            scheduled_for,
            created_at,
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn test_due_notification_is_sent_and_published() {
        let repo = MemoryRepository::new();
        let gateway = RecordingGateway::new();
        let registry = SubscriptionRegistry::new();
        let policy = PolicyConfig::default();
        let user = Uuid::new_v4();
        let now = Utc::now();

        let mut rx = registry.subscribe(user);
        let n = pending(user, NotificationPriority::High, now - Duration::minutes(1), now - Duration::minutes(1));
        repo.insert_notification(&n).await.unwrap();

        let stats = deliver_due_for_user(&repo, &gateway, &registry, &policy, user, now)
            .await
            .unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(gateway.sent().len(), 1);

        let live = rx.try_recv().unwrap();
        assert_eq!(live.id, n.id);
        assert_eq!(live.status, NotificationStatus::Sent);
        assert_eq!(live.sent_at, Some(now));
    }

    #[tokio::test]
    async fn test_gateway_failure_retries_within_grace() {
        let repo = MemoryRepository::new();
        let gateway = RecordingGateway::new();
        let registry = SubscriptionRegistry::new();
        let policy = PolicyConfig::default();
        let user = Uuid::new_v4();
        let now = Utc::now();

        let n = pending(user, NotificationPriority::High, now, now);
        repo.insert_notification(&n).await.unwrap();

        gateway.set_failing(true);
        let stats = deliver_due_for_user(&repo, &gateway, &registry, &policy, user, now)
            .await
            .unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.sent, 0);

        // Still inside the grace window, the failed notification comes back.
        gateway.set_failing(false);
        let retry_at = now + Duration::minutes(30);
        let stats = deliver_due_for_user(&repo, &gateway, &registry, &policy, user, retry_at)
            .await
            .unwrap();
        assert_eq!(stats.sent, 1);

        // Past the grace window nothing is due anymore.
        let late = now + Duration::minutes(policy.delivery_grace_minutes + 1);
        let n2 = pending(user, NotificationPriority::Low, now, now);
        repo.insert_notification(&n2).await.unwrap();
        gateway.set_failing(true);
        deliver_due_for_user(&repo, &gateway, &registry, &policy, user, now)
            .await
            .unwrap();
        gateway.set_failing(false);
        let stats = deliver_due_for_user(&repo, &gateway, &registry, &policy, user, late)
            .await
            .unwrap();
        assert_eq!(stats.sent, 0);
    }

    #[tokio::test]
    async fn test_tier_check_consumption_advances_case() {
        let repo = MemoryRepository::new();
        let gateway = RecordingGateway::new();
        let registry = SubscriptionRegistry::new();
        let policy = PolicyConfig::default();
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
        let case = escalation::feed_event(&repo, &policy, &event, t0).await.unwrap();
        assert_eq!(case.current_tier, CaseTier::Tier1Gentle);

        let deadline = t0 + Duration::minutes(policy.timeouts.tier1_minutes);
        let stats = deliver_due_for_user(&repo, &gateway, &registry, &policy, user, deadline)
            .await
            .unwrap();
        assert_eq!(stats.tier_checks, 1);

        let stored = repo.get_case(case.id).await.unwrap().unwrap();
        assert_eq!(stored.current_tier, CaseTier::Tier2Urgent);
    }

    #[tokio::test]
    async fn test_send_floor_defers_second_notification() {
        let repo = MemoryRepository::new();
        let gateway = RecordingGateway::new();
        let registry = SubscriptionRegistry::new();
        let policy = PolicyConfig::default();
        let user = Uuid::new_v4();
        let now = Utc::now();

        // Two slots that both claim the same instant; only one may go out.
        let first = pending(user, NotificationPriority::High, now, now - Duration::seconds(2));
        let second = pending(user, NotificationPriority::High, now, now - Duration::seconds(1));
        repo.insert_notification(&first).await.unwrap();
        repo.insert_notification(&second).await.unwrap();

        let stats = deliver_due_for_user(&repo, &gateway, &registry, &policy, user, now)
            .await
            .unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.deferred, 1);

        let sent_ids: Vec<Uuid> = gateway.sent().iter().map(|n| n.id).collect();
        assert_eq!(sent_ids, vec![first.id]);

        // The deferred one landed exactly one spacing after the send.
        let due_later = repo
            .due_notifications(
                user,
                now + Duration::minutes(policy.rate.high.min_spacing_minutes),
                Duration::zero(),
            )
            .await
            .unwrap();
        assert_eq!(due_later.len(), 1);
        assert_eq!(due_later[0].id, second.id);
    }

    #[tokio::test]
    async fn test_contact_notifications_skip_the_floor() {
        let repo = MemoryRepository::new();
        let gateway = RecordingGateway::new();
        let registry = SubscriptionRegistry::new();
        let policy = PolicyConfig::default();
        let user = Uuid::new_v4();
        let now = Utc::now();

        let mut to_user = pending(user, NotificationPriority::Emergency, now, now - Duration::seconds(2));
        to_user.delivery_method = DeliveryMethod::Push;
        let mut to_contact = pending(user, NotificationPriority::Emergency, now, now - Duration::seconds(1));
        to_contact.destination = Destination::Contact {
            name: "Ana".to_string(),
            address: "+15550001111".to_string(),
        };
        to_contact.delivery_method = DeliveryMethod::Sms;
        repo.insert_notification(&to_user).await.unwrap();
        repo.insert_notification(&to_contact).await.unwrap();

        let stats = deliver_due_for_user(&repo, &gateway, &registry, &policy, user, now)
            .await
            .unwrap();
        // The user send does not hold the contact alert back.
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.deferred, 0);
    }
}
