//! Live notification subscriptions.
//!
//! Delivered notifications are published here so connected app sessions see
//! them immediately. A subscription is a broadcast receiver whose lifetime
//! is the connection: dropping it unsubscribes, and a user's channel is
//! pruned on the next publish once no receiver is left.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::notification::ScheduledNotification;

/// Slow subscribers lag rather than block the sweep.
const CHANNEL_CAPACITY: usize = 32;

#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<ScheduledNotification>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, broadcast::Sender<ScheduledNotification>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Opens a subscription to one user's delivered notifications.
    pub fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<ScheduledNotification> {
        self.lock()
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publishes a delivered notification to live subscribers. A send with
    /// no receivers left removes the user's channel.
    pub fn publish(&self, notification: &ScheduledNotification) {
        let mut channels = self.lock();
        if let Some(tx) = channels.get(&notification.user_id) {
            if tx.send(notification.clone()).is_err() {
                channels.remove(&notification.user_id);
            }
        }
    }

    pub fn subscriber_count(&self, user_id: Uuid) -> usize {
        self.lock()
            .get(&user_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notification::{
        DeliveryMethod, Destination, NotificationPriority, NotificationStatus,
    };
    use chrono::Utc;

    fn notification(user_id: Uuid) -> ScheduledNotification {
        let now = Utc::now();
        ScheduledNotification {
            id: Uuid::new_v4(),
            user_id,
            case_id: None,
            destination: Destination::User,
            delivery_method: DeliveryMethod::Push,
            content: "checking in".to_string(),
            scheduled_for: now,
            priority: NotificationPriority::Low,
            status: NotificationStatus::Sent,
            created_at: now,
            sent_at: Some(now),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_notification() {
        let registry = SubscriptionRegistry::new();
        let user = Uuid::new_v4();

        let mut rx = registry.subscribe(user);
        let n = notification(user);
        registry.publish(&n);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, n.id);
        assert_eq!(registry.subscriber_count(user), 1);
    }

    #[tokio::test]
    async fn test_publish_prunes_channel_without_subscribers() {
        let registry = SubscriptionRegistry::new();
        let user = Uuid::new_v4();

        let rx = registry.subscribe(user);
        drop(rx);

        registry.publish(&notification(user));
        assert_eq!(registry.subscriber_count(user), 0);

        // Publishing to an unknown user is a no-op.
        registry.publish(&notification(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn test_publish_does_not_cross_users() {
        let registry = SubscriptionRegistry::new();
        let user_a = Uuid::new_v4();
        let user_b = Uuid::new_v4();

        let mut rx_a = registry.subscribe(user_a);
        let _rx_b = registry.subscribe(user_b);

        registry.publish(&notification(user_b));
        assert!(rx_a.try_recv().is_err());
    }
}
