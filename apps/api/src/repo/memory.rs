//! In-memory repository used by tests and local development
//! (`REPOSITORY=memory`). Plain mutex-guarded vectors; good enough for a
//! single process, never for production.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::case::EscalationCase;
use crate::models::checkin::{CheckinRecord, CheckinStatus};
use crate::models::contact::Contact;
use crate::models::event::RiskEvent;
use crate::models::notification::{
    DeliveryMethod, NotificationPriority, NotificationStatus, ScheduledNotification,
};
use crate::models::wellness::WellnessScore;
use crate::models::zone::{Zone, ZoneEvent};
use crate::repo::Repository;

#[derive(Default)]
struct Inner {
    events: Vec<RiskEvent>,
    cases: Vec<EscalationCase>,
    notifications: Vec<ScheduledNotification>,
    zones: Vec<Zone>,
    zone_events: Vec<ZoneEvent>,
    checkins: Vec<CheckinRecord>,
    contacts: Vec<Contact>,
    wellness: HashMap<Uuid, WellnessScore>,
}

#[derive(Default)]
pub struct MemoryRepository {
    inner: Mutex<Inner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State is plain data; a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn insert_event(&self, event: &RiskEvent) -> Result<()> {
        self.lock().events.push(event.clone());
        Ok(())
    }

    async fn events_for_user_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<RiskEvent>> {
        let mut events: Vec<_> = self
            .lock()
            .events
            .iter()
            .filter(|e| e.user_id == user_id && e.created_at >= since)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    async fn events_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<RiskEvent>> {
        let mut events: Vec<_> = self
            .lock()
            .events
            .iter()
            .filter(|e| e.created_at < cutoff)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }

    async fn delete_events(&self, ids: &[Uuid]) -> Result<u64> {
        let mut inner = self.lock();
        let before = inner.events.len();
        inner.events.retain(|e| !ids.contains(&e.id));
        Ok((before - inner.events.len()) as u64)
    }

    async fn insert_case(&self, case: &EscalationCase) -> Result<()> {
        self.lock().cases.push(case.clone());
        Ok(())
    }

    async fn get_case(&self, id: Uuid) -> Result<Option<EscalationCase>> {
        Ok(self.lock().cases.iter().find(|c| c.id == id).cloned())
    }

    async fn open_case_for_user(&self, user_id: Uuid) -> Result<Option<EscalationCase>> {
        Ok(self
            .lock()
            .cases
            .iter()
            .find(|c| c.user_id == user_id && c.is_open())
            .cloned())
    }

    async fn cases_for_user(&self, user_id: Uuid) -> Result<Vec<EscalationCase>> {
        let mut cases: Vec<_> = self
            .lock()
            .cases
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        cases.sort_by(|a, b| {
            a.current_tier
                .is_terminal()
                .cmp(&b.current_tier.is_terminal())
                .then(b.opened_at.cmp(&a.opened_at))
        });
        Ok(cases)
    }

    async fn update_case(&self, case: &EscalationCase, expected_version: i64) -> Result<bool> {
        let mut inner = self.lock();
        match inner.cases.iter_mut().find(|c| c.id == case.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = case.clone();
                stored.version = expected_version + 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_notification(&self, notification: &ScheduledNotification) -> Result<()> {
        self.lock().notifications.push(notification.clone());
        Ok(())
    }

    async fn due_notifications(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        failed_grace: Duration,
    ) -> Result<Vec<ScheduledNotification>> {
        let horizon = now - failed_grace;
        let mut due: Vec<_> = self
            .lock()
            .notifications
            .iter()
            .filter(|n| {
                n.user_id == user_id
                    && n.scheduled_for <= now
                    && match n.status {
                        NotificationStatus::Pending => true,
                        NotificationStatus::Failed => n.scheduled_for >= horizon,
                        _ => false,
                    }
            })
            .cloned()
            .collect();
        due.sort_by_key(|n| (n.scheduled_for, n.created_at));
        Ok(due)
    }

    async fn mark_notification(
        &self,
        id: Uuid,
        status: NotificationStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if let Some(n) = self.lock().notifications.iter_mut().find(|n| n.id == id) {
            n.status = status;
            if sent_at.is_some() {
                n.sent_at = sent_at;
            }
        }
        Ok(())
    }

    async fn reschedule_notification(&self, id: Uuid, scheduled_for: DateTime<Utc>) -> Result<()> {
        if let Some(n) = self.lock().notifications.iter_mut().find(|n| n.id == id) {
            n.scheduled_for = scheduled_for;
        }
        Ok(())
    }

    async fn cancel_pending_for_case(&self, case_id: Uuid) -> Result<u64> {
        let mut cancelled = 0;
        for n in self.lock().notifications.iter_mut() {
            if n.case_id == Some(case_id) && n.status == NotificationStatus::Pending {
                n.status = NotificationStatus::Cancelled;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn sent_count_since(
        &self,
        user_id: Uuid,
        priority: NotificationPriority,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        Ok(self
            .lock()
            .notifications
            .iter()
            .filter(|n| {
                n.user_id == user_id
                    && n.priority == priority
                    && n.destination.is_user()
                    && n.delivery_method != DeliveryMethod::System
                    && n.status == NotificationStatus::Sent
                    && n.sent_at.is_some_and(|t| t >= since)
            })
            .count() as i64)
    }

    async fn latest_slot(
        &self,
        user_id: Uuid,
        priority: NotificationPriority,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .lock()
            .notifications
            .iter()
            .filter(|n| {
                n.user_id == user_id
                    && n.priority == priority
                    && n.destination.is_user()
                    && n.delivery_method != DeliveryMethod::System
            })
            .filter_map(|n| match n.status {
                NotificationStatus::Sent => n.sent_at,
                NotificationStatus::Pending => Some(n.scheduled_for),
                _ => None,
            })
            .max())
    }

    async fn last_sent_at(
        &self,
        user_id: Uuid,
        priority: NotificationPriority,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .lock()
            .notifications
            .iter()
            .filter(|n| {
                n.user_id == user_id
                    && n.priority == priority
                    && n.destination.is_user()
                    && n.delivery_method != DeliveryMethod::System
                    && n.status == NotificationStatus::Sent
            })
            .filter_map(|n| n.sent_at)
            .max())
    }

    async fn insert_zone(&self, zone: &Zone) -> Result<()> {
        self.lock().zones.push(zone.clone());
        Ok(())
    }

    async fn zones_for_user(&self, user_id: Uuid) -> Result<Vec<Zone>> {
        Ok(self
            .lock()
            .zones
            .iter()
            .filter(|z| z.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_zone(&self, zone: &Zone) -> Result<()> {
        if let Some(stored) = self.lock().zones.iter_mut().find(|z| z.id == zone.id) {
            *stored = zone.clone();
        }
        Ok(())
    }

    async fn insert_zone_event(&self, event: &ZoneEvent) -> Result<()> {
        self.lock().zone_events.push(event.clone());
        Ok(())
    }

    async fn zone_events_for_zone(&self, zone_id: Uuid) -> Result<Vec<ZoneEvent>> {
        let mut events: Vec<_> = self
            .lock()
            .zone_events
            .iter()
            .filter(|e| e.zone_id == zone_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
    }

    async fn insert_checkin(&self, checkin: &CheckinRecord) -> Result<()> {
        self.lock().checkins.push(checkin.clone());
        Ok(())
    }

    async fn recent_checkins(&self, user_id: Uuid, limit: i64) -> Result<Vec<CheckinRecord>> {
        let mut checkins: Vec<_> = self
            .lock()
            .checkins
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        checkins.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        checkins.truncate(limit.max(0) as usize);
        Ok(checkins)
    }

    async fn responded_checkin_count(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .lock()
            .checkins
            .iter()
            .filter(|c| {
                c.user_id == user_id
                    && c.status == CheckinStatus::Responded
                    && c.recorded_at >= since
            })
            .count() as i64)
    }

    async fn insert_contact(&self, contact: &Contact) -> Result<()> {
        self.lock().contacts.push(contact.clone());
        Ok(())
    }

    async fn contacts_for_user(&self, user_id: Uuid) -> Result<Vec<Contact>> {
        let mut contacts: Vec<_> = self
            .lock()
            .contacts
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        contacts.sort_by_key(|c| c.rank);
        Ok(contacts)
    }

    async fn upsert_wellness(&self, score: &WellnessScore) -> Result<()> {
        self.lock().wellness.insert(score.user_id, score.clone());
        Ok(())
    }

    async fn latest_wellness(&self, user_id: Uuid) -> Result<Option<WellnessScore>> {
        Ok(self.lock().wellness.get(&user_id).cloned())
    }

    async fn sweep_candidates(
        &self,
        now: DateTime<Utc>,
        events_since: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let inner = self.lock();
        let mut users: Vec<Uuid> = inner
            .cases
            .iter()
            .filter(|c| c.is_open())
            .map(|c| c.user_id)
            .chain(
                inner
                    .notifications
                    .iter()
                    .filter(|n| n.status == NotificationStatus::Pending && n.scheduled_for <= now)
                    .map(|n| n.user_id),
            )
            .chain(
                inner
                    .events
                    .iter()
                    .filter(|e| e.created_at >= events_since)
                    .map(|e| e.user_id),
            )
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::case::CaseTier;
    use crate::models::event::Severity;
    use crate::models::notification::{DeliveryMethod, Destination};

    fn notification(
        user_id: Uuid,
        status: NotificationStatus,
        scheduled_for: DateTime<Utc>,
        sent_at: Option<DateTime<Utc>>,
    ) -> ScheduledNotification {
        ScheduledNotification {
            id: Uuid::new_v4(),
            user_id,
            case_id: None,
            destination: Destination::User,
            delivery_method: DeliveryMethod::Push,
            content: "hello".to_string(),
            scheduled_for,
            priority: NotificationPriority::High,
            status,
            created_at: scheduled_for,
            sent_at,
        }
    }

    #[tokio::test]
    async fn test_update_case_detects_version_conflict() {
        let repo = MemoryRepository::new();
        let now = Utc::now();
        let case = EscalationCase::open(Uuid::new_v4(), Uuid::new_v4(), Severity::High, false, now);
        repo.insert_case(&case).await.unwrap();

        let mut first = case.clone();
        first.current_tier = CaseTier::Tier1Gentle;
        assert!(repo.update_case(&first, 0).await.unwrap());

        // Second writer still holds version 0 and must lose.
        let mut second = case.clone();
        second.current_tier = CaseTier::Resolved;
        assert!(!repo.update_case(&second, 0).await.unwrap());

        let stored = repo.get_case(case.id).await.unwrap().unwrap();
        assert_eq!(stored.current_tier, CaseTier::Tier1Gentle);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_due_notifications_filters_status_and_grace() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();
        let now = Utc::now();
        let grace = Duration::minutes(60);

        let due = notification(user, NotificationStatus::Pending, now - Duration::minutes(5), None);
        let future = notification(user, NotificationStatus::Pending, now + Duration::minutes(5), None);
        let failed_recent =
            notification(user, NotificationStatus::Failed, now - Duration::minutes(30), None);
        let failed_stale =
            notification(user, NotificationStatus::Failed, now - Duration::minutes(90), None);
        let cancelled =
            notification(user, NotificationStatus::Cancelled, now - Duration::minutes(5), None);
        for n in [&due, &future, &failed_recent, &failed_stale, &cancelled] {
            repo.insert_notification(n).await.unwrap();
        }

        let ready = repo.due_notifications(user, now, grace).await.unwrap();
        let ids: Vec<Uuid> = ready.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![failed_recent.id, due.id]);
    }

    #[tokio::test]
    async fn test_latest_slot_ignores_contact_and_system_notifications() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();
        let now = Utc::now();

        let sent = notification(
            user,
            NotificationStatus::Sent,
            now - Duration::minutes(40),
            Some(now - Duration::minutes(40)),
        );
        let pending = notification(user, NotificationStatus::Pending, now + Duration::minutes(20), None);
        let mut contact = notification(user, NotificationStatus::Pending, now + Duration::hours(2), None);
        contact.destination = Destination::Contact {
            name: "Ana".to_string(),
            address: "+15550001111".to_string(),
        };
        // Tier checks ride the notification table but never occupy slots.
        let mut tier_check =
            notification(user, NotificationStatus::Pending, now + Duration::hours(4), None);
        tier_check.delivery_method = DeliveryMethod::System;
        for n in [&sent, &pending, &contact, &tier_check] {
            repo.insert_notification(n).await.unwrap();
        }

        let slot = repo
            .latest_slot(user, NotificationPriority::High)
            .await
            .unwrap();
        assert_eq!(slot, Some(pending.scheduled_for));
    }

    #[tokio::test]
    async fn test_cancel_pending_for_case_is_idempotent() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();
        let case_id = Uuid::new_v4();
        let now = Utc::now();

        let mut n = notification(user, NotificationStatus::Pending, now, None);
        n.case_id = Some(case_id);
        repo.insert_notification(&n).await.unwrap();

        assert_eq!(repo.cancel_pending_for_case(case_id).await.unwrap(), 1);
        assert_eq!(repo.cancel_pending_for_case(case_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recent_checkins_newest_first() {
        let repo = MemoryRepository::new();
        let user = Uuid::new_v4();
        let now = Utc::now();

        for (i, status) in [
            CheckinStatus::Responded,
            CheckinStatus::Missed,
            CheckinStatus::Missed,
        ]
        .into_iter()
        .enumerate()
        {
            let c = CheckinRecord::new(user, status, None, now - Duration::hours(24 - i as i64));
            repo.insert_checkin(&c).await.unwrap();
        }

        let recent = repo.recent_checkins(user, 10).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].status, CheckinStatus::Missed);
        assert_eq!(recent[2].status, CheckinStatus::Responded);
    }
}
