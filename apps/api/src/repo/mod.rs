//! Repository — the single persistence seam for the service.
//!
//! Every store access goes through the `Repository` trait so the escalation
//! engine, scheduler, and sweep can be exercised against `MemoryRepository`
//! while production runs on `PgRepository`.
//!
//! Carried in `AppState` as `Arc<dyn Repository>`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::case::EscalationCase;
use crate::models::checkin::CheckinRecord;
use crate::models::contact::Contact;
use crate::models::event::RiskEvent;
use crate::models::notification::{NotificationPriority, NotificationStatus, ScheduledNotification};
use crate::models::wellness::WellnessScore;
use crate::models::zone::{Zone, ZoneEvent};

pub mod memory;
pub mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

#[async_trait]
pub trait Repository: Send + Sync {
    // ── risk events ─────────────────────────────────────────────────────

    async fn insert_event(&self, event: &RiskEvent) -> Result<()>;

    /// Events for one user with `created_at >= since`, oldest first.
    async fn events_for_user_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<RiskEvent>>;

    /// Oldest events with `created_at < cutoff`, capped at `limit`.
    async fn events_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<RiskEvent>>;

    async fn delete_events(&self, ids: &[Uuid]) -> Result<u64>;

    // ── escalation cases ────────────────────────────────────────────────

    async fn insert_case(&self, case: &EscalationCase) -> Result<()>;

    async fn get_case(&self, id: Uuid) -> Result<Option<EscalationCase>>;

    /// The user's single non-terminal case, if any.
    async fn open_case_for_user(&self, user_id: Uuid) -> Result<Option<EscalationCase>>;

    /// All cases for a user, open first, then newest first.
    async fn cases_for_user(&self, user_id: Uuid) -> Result<Vec<EscalationCase>>;

    /// Compare-and-swap write: persists `case`'s fields only if the stored
    /// version still equals `expected_version`, bumping the stored version to
    /// `expected_version + 1`. Returns false on a version conflict; the caller
    /// re-reads and re-decides.
    async fn update_case(&self, case: &EscalationCase, expected_version: i64) -> Result<bool>;

    // ── scheduled notifications ─────────────────────────────────────────

    async fn insert_notification(&self, notification: &ScheduledNotification) -> Result<()>;

    /// Notifications for one user that are ready to deliver: `scheduled_for
    /// <= now` and either pending, or failed no longer ago than
    /// `failed_grace`. Ordered by scheduled slot, oldest first.
    async fn due_notifications(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        failed_grace: Duration,
    ) -> Result<Vec<ScheduledNotification>>;

    async fn mark_notification(
        &self,
        id: Uuid,
        status: NotificationStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn reschedule_notification(&self, id: Uuid, scheduled_for: DateTime<Utc>) -> Result<()>;

    /// Cancels every pending notification tied to the case. Idempotent.
    async fn cancel_pending_for_case(&self, case_id: Uuid) -> Result<u64>;

    /// Sent user-destined notifications of a priority since `since`; backs
    /// the rolling daily cap. Internal `system` notifications never count.
    async fn sent_count_since(
        &self,
        user_id: Uuid,
        priority: NotificationPriority,
        since: DateTime<Utc>,
    ) -> Result<i64>;

    /// The latest occupied delivery slot for (user, priority): the most
    /// recent send, or the furthest pending `scheduled_for`, whichever is
    /// later. User-destined, non-`system` notifications only; admission
    /// spaces from it.
    async fn latest_slot(
        &self,
        user_id: Uuid,
        priority: NotificationPriority,
    ) -> Result<Option<DateTime<Utc>>>;

    /// When the most recent user-destined, non-`system` notification of this
    /// priority was actually sent; the delivery step re-checks spacing
    /// against it.
    async fn last_sent_at(
        &self,
        user_id: Uuid,
        priority: NotificationPriority,
    ) -> Result<Option<DateTime<Utc>>>;

    // ── zones ───────────────────────────────────────────────────────────

    async fn insert_zone(&self, zone: &Zone) -> Result<()>;

    async fn zones_for_user(&self, user_id: Uuid) -> Result<Vec<Zone>>;

    /// Full-row update keyed by `zone.id` (hysteresis state, entry count).
    async fn update_zone(&self, zone: &Zone) -> Result<()>;

    async fn insert_zone_event(&self, event: &ZoneEvent) -> Result<()>;

    /// Crossings for one zone, oldest first.
    async fn zone_events_for_zone(&self, zone_id: Uuid) -> Result<Vec<ZoneEvent>>;

    // ── check-ins ───────────────────────────────────────────────────────

    async fn insert_checkin(&self, checkin: &CheckinRecord) -> Result<()>;

    /// Most recent check-ins, newest first; the consecutive-miss run is the
    /// length of the leading `missed` prefix.
    async fn recent_checkins(&self, user_id: Uuid, limit: i64) -> Result<Vec<CheckinRecord>>;

    async fn responded_checkin_count(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<i64>;

    // ── emergency contacts ──────────────────────────────────────────────

    async fn insert_contact(&self, contact: &Contact) -> Result<()>;

    /// Contacts ordered by rank ascending (rank 1 is alerted first).
    async fn contacts_for_user(&self, user_id: Uuid) -> Result<Vec<Contact>>;

    // ── wellness ────────────────────────────────────────────────────────

    /// Latest-score-wins upsert keyed by user.
    async fn upsert_wellness(&self, score: &WellnessScore) -> Result<()>;

    async fn latest_wellness(&self, user_id: Uuid) -> Result<Option<WellnessScore>>;

    // ── sweep support ───────────────────────────────────────────────────

    /// Users the sweep must visit: anyone with an open case, a notification
    /// due by `now`, or an event recorded since `events_since`.
    async fn sweep_candidates(
        &self,
        now: DateTime<Utc>,
        events_since: DateTime<Utc>,
    ) -> Result<Vec<Uuid>>;
}
