//! Postgres-backed repository. Plain `sqlx` queries against the service
//! schema; the schema itself is owned by the deployment, not this crate.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::models::case::EscalationCase;
use crate::models::checkin::CheckinRecord;
use crate::models::contact::Contact;
use crate::models::event::RiskEvent;
use crate::models::notification::{
    NotificationPriority, NotificationStatus, ScheduledNotification,
};
use crate::models::wellness::WellnessScore;
use crate::models::zone::{Zone, ZoneEvent};
use crate::repo::Repository;

pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a fresh pool and wraps it.
    pub async fn connect(database_url: &str) -> Result<Self> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        info!("Database connection established");
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn insert_event(&self, event: &RiskEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO risk_events
                (id, user_id, source_type, severity, score, requires_immediate, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(event.source_type)
        .bind(event.severity)
        .bind(event.score)
        .bind(event.requires_immediate)
        .bind(&event.metadata)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn events_for_user_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<RiskEvent>> {
        let events = sqlx::query_as::<_, RiskEvent>(
            r#"
            SELECT * FROM risk_events
            WHERE user_id = $1 AND created_at >= $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn events_before(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<RiskEvent>> {
        let events = sqlx::query_as::<_, RiskEvent>(
            r#"
            SELECT * FROM risk_events
            WHERE created_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn delete_events(&self, ids: &[Uuid]) -> Result<u64> {
        let result = sqlx::query("DELETE FROM risk_events WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_case(&self, case: &EscalationCase) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO escalation_cases
                (id, user_id, trigger_event_id, current_tier, severity, immediate,
                 opened_at, last_action_at, tier_history, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(case.id)
        .bind(case.user_id)
        .bind(case.trigger_event_id)
        .bind(case.current_tier)
        .bind(case.severity)
        .bind(case.immediate)
        .bind(case.opened_at)
        .bind(case.last_action_at)
        .bind(Json(&case.tier_history))
        .bind(case.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_case(&self, id: Uuid) -> Result<Option<EscalationCase>> {
        let case =
            sqlx::query_as::<_, EscalationCase>("SELECT * FROM escalation_cases WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(case)
    }

    async fn open_case_for_user(&self, user_id: Uuid) -> Result<Option<EscalationCase>> {
        let case = sqlx::query_as::<_, EscalationCase>(
            r#"
            SELECT * FROM escalation_cases
            WHERE user_id = $1 AND current_tier NOT IN ('resolved', 'expired')
            ORDER BY opened_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(case)
    }

    async fn cases_for_user(&self, user_id: Uuid) -> Result<Vec<EscalationCase>> {
        let cases = sqlx::query_as::<_, EscalationCase>(
            r#"
            SELECT * FROM escalation_cases
            WHERE user_id = $1
            ORDER BY current_tier IN ('resolved', 'expired') ASC, opened_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(cases)
    }

    async fn update_case(&self, case: &EscalationCase, expected_version: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE escalation_cases
            SET current_tier = $2, severity = $3, immediate = $4,
                last_action_at = $5, tier_history = $6, version = $7
            WHERE id = $1 AND version = $8
            "#,
        )
        .bind(case.id)
        .bind(case.current_tier)
        .bind(case.severity)
        .bind(case.immediate)
        .bind(case.last_action_at)
        .bind(Json(&case.tier_history))
        .bind(expected_version + 1)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_notification(&self, notification: &ScheduledNotification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_notifications
                (id, user_id, case_id, destination, delivery_method, content,
                 scheduled_for, priority, status, created_at, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(notification.case_id)
        .bind(Json(&notification.destination))
        .bind(notification.delivery_method)
        .bind(&notification.content)
        .bind(notification.scheduled_for)
        .bind(notification.priority)
        .bind(notification.status)
        .bind(notification.created_at)
        .bind(notification.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due_notifications(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        failed_grace: Duration,
    ) -> Result<Vec<ScheduledNotification>> {
        let notifications = sqlx::query_as::<_, ScheduledNotification>(
            r#"
            SELECT * FROM scheduled_notifications
            WHERE user_id = $1
              AND scheduled_for <= $2
              AND (status = 'pending' OR (status = 'failed' AND scheduled_for >= $3))
            ORDER BY scheduled_for ASC, created_at ASC
            "#,
        )
        .bind(user_id)
        .bind(now)
        .bind(now - failed_grace)
        .fetch_all(&self.pool)
        .await?;
        Ok(notifications)
    }

    async fn mark_notification(
        &self,
        id: Uuid,
        status: NotificationStatus,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_notifications
            SET status = $2, sent_at = COALESCE($3, sent_at)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reschedule_notification(&self, id: Uuid, scheduled_for: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE scheduled_notifications SET scheduled_for = $2 WHERE id = $1")
            .bind(id)
            .bind(scheduled_for)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cancel_pending_for_case(&self, case_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_notifications
            SET status = 'cancelled'
            WHERE case_id = $1 AND status = 'pending'
            "#,
        )
        .bind(case_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn sent_count_since(
        &self,
        user_id: Uuid,
        priority: NotificationPriority,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM scheduled_notifications
            WHERE user_id = $1 AND priority = $2
              AND destination->>'kind' = 'user'
              AND delivery_method <> 'system'
              AND status = 'sent' AND sent_at >= $3
            "#,
        )
        .bind(user_id)
        .bind(priority)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn latest_slot(
        &self,
        user_id: Uuid,
        priority: NotificationPriority,
    ) -> Result<Option<DateTime<Utc>>> {
        let slot: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MAX(slot) FROM (
                SELECT sent_at AS slot FROM scheduled_notifications
                WHERE user_id = $1 AND priority = $2
                  AND destination->>'kind' = 'user'
                  AND delivery_method <> 'system' AND status = 'sent'
                UNION ALL
                SELECT scheduled_for AS slot FROM scheduled_notifications
                WHERE user_id = $1 AND priority = $2
                  AND destination->>'kind' = 'user'
                  AND delivery_method <> 'system' AND status = 'pending'
            ) AS slots
            "#,
        )
        .bind(user_id)
        .bind(priority)
        .fetch_one(&self.pool)
        .await?;
        Ok(slot)
    }

    async fn last_sent_at(
        &self,
        user_id: Uuid,
        priority: NotificationPriority,
    ) -> Result<Option<DateTime<Utc>>> {
        let sent_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MAX(sent_at) FROM scheduled_notifications
            WHERE user_id = $1 AND priority = $2
              AND destination->>'kind' = 'user'
              AND delivery_method <> 'system' AND status = 'sent'
            "#,
        )
        .bind(user_id)
        .bind(priority)
        .fetch_one(&self.pool)
        .await?;
        Ok(sent_at)
    }

    async fn insert_zone(&self, zone: &Zone) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO zones
                (id, user_id, label, center_lat, center_lng, radius_m, zone_type,
                 last_event_type, last_entry_at, entry_count, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(zone.id)
        .bind(zone.user_id)
        .bind(&zone.label)
        .bind(zone.center_lat)
        .bind(zone.center_lng)
        .bind(zone.radius_m)
        .bind(zone.zone_type)
        .bind(zone.last_event_type)
        .bind(zone.last_entry_at)
        .bind(zone.entry_count)
        .bind(zone.active)
        .bind(zone.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn zones_for_user(&self, user_id: Uuid) -> Result<Vec<Zone>> {
        let zones = sqlx::query_as::<_, Zone>(
            "SELECT * FROM zones WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(zones)
    }

    async fn update_zone(&self, zone: &Zone) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE zones
            SET label = $2, center_lat = $3, center_lng = $4, radius_m = $5,
                zone_type = $6, last_event_type = $7, last_entry_at = $8,
                entry_count = $9, active = $10
            WHERE id = $1
            "#,
        )
        .bind(zone.id)
        .bind(&zone.label)
        .bind(zone.center_lat)
        .bind(zone.center_lng)
        .bind(zone.radius_m)
        .bind(zone.zone_type)
        .bind(zone.last_event_type)
        .bind(zone.last_entry_at)
        .bind(zone.entry_count)
        .bind(zone.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_zone_event(&self, event: &ZoneEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO zone_events (id, zone_id, user_id, event_type, occurred_at, duration_secs)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(event.zone_id)
        .bind(event.user_id)
        .bind(event.event_type)
        .bind(event.occurred_at)
        .bind(event.duration_secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn zone_events_for_zone(&self, zone_id: Uuid) -> Result<Vec<ZoneEvent>> {
        let events = sqlx::query_as::<_, ZoneEvent>(
            "SELECT * FROM zone_events WHERE zone_id = $1 ORDER BY occurred_at ASC",
        )
        .bind(zone_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn insert_checkin(&self, checkin: &CheckinRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checkins (id, user_id, status, note, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(checkin.id)
        .bind(checkin.user_id)
        .bind(checkin.status)
        .bind(&checkin.note)
        .bind(checkin.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_checkins(&self, user_id: Uuid, limit: i64) -> Result<Vec<CheckinRecord>> {
        let checkins = sqlx::query_as::<_, CheckinRecord>(
            r#"
            SELECT * FROM checkins
            WHERE user_id = $1
            ORDER BY recorded_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(checkins)
    }

    async fn responded_checkin_count(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM checkins
            WHERE user_id = $1 AND status = 'responded' AND recorded_at >= $2
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn insert_contact(&self, contact: &Contact) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO contacts (id, user_id, name, address, method, rank, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(contact.id)
        .bind(contact.user_id)
        .bind(&contact.name)
        .bind(&contact.address)
        .bind(contact.method)
        .bind(contact.rank)
        .bind(contact.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn contacts_for_user(&self, user_id: Uuid) -> Result<Vec<Contact>> {
        let contacts = sqlx::query_as::<_, Contact>(
            "SELECT * FROM contacts WHERE user_id = $1 ORDER BY rank ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(contacts)
    }

    async fn upsert_wellness(&self, score: &WellnessScore) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wellness_scores (user_id, value, computed_at, components)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET value = EXCLUDED.value,
                computed_at = EXCLUDED.computed_at,
                components = EXCLUDED.components
            "#,
        )
        .bind(score.user_id)
        .bind(score.value)
        .bind(score.computed_at)
        .bind(Json(&score.components))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_wellness(&self, user_id: Uuid) -> Result<Option<WellnessScore>> {
        let score = sqlx::query_as::<_, WellnessScore>(
            "SELECT * FROM wellness_scores WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(score)
    }

    async fn sweep_candidates(
        &self,
        now: DateTime<Utc>,
        events_since: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let users: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT user_id FROM (
                SELECT user_id FROM escalation_cases
                WHERE current_tier NOT IN ('resolved', 'expired')
                UNION
                SELECT user_id FROM scheduled_notifications
                WHERE status = 'pending' AND scheduled_for <= $1
                UNION
                SELECT user_id FROM risk_events WHERE created_at >= $2
            ) AS candidates
            "#,
        )
        .bind(now)
        .bind(events_since)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}
