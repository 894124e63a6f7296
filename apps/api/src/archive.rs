//! Retention archiver.
//!
//! Events older than the retention window are exported to S3 as JSONL and
//! pruned from the hot store. A batch is deleted only after every object it
//! produced is durably stored, so a failed upload leaves the rows in place
//! and the next run picks them up again.

use std::collections::BTreeMap;

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use axum::{extract::State, Json};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::event::RiskEvent;
use crate::repo::Repository;
use crate::state::AppState;

/// Events moved per page; keeps one pass bounded.
pub const ARCHIVE_BATCH: i64 = 500;

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ArchiveReport {
    pub events_archived: u64,
    pub objects_written: u64,
    pub batches: u64,
}

/// One JSON document per line, oldest event first.
pub fn render_events_jsonl(events: &[RiskEvent]) -> Result<String, AppError> {
    let mut out = String::new();
    for event in events {
        let line = serde_json::to_string(event).map_err(anyhow::Error::from)?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

fn archive_key(user_id: Uuid, first: &RiskEvent) -> String {
    format!(
        "archives/{user_id}/{}-{}.jsonl",
        first.created_at.format("%Y%m%d"),
        first.id
    )
}

/// Moves every event older than `retention_days` into S3, one object per
/// user per batch, then prunes the archived rows.
pub async fn archive_expired(
    repo: &dyn Repository,
    s3: &S3Client,
    bucket: &str,
    retention_days: i64,
    now: DateTime<Utc>,
) -> Result<ArchiveReport, AppError> {
    let cutoff = now - Duration::days(retention_days);
    let mut report = ArchiveReport::default();

    loop {
        let batch = repo.events_before(cutoff, ARCHIVE_BATCH).await?;
        if batch.is_empty() {
            break;
        }
        let last_page = (batch.len() as i64) < ARCHIVE_BATCH;

        let mut by_user: BTreeMap<Uuid, Vec<RiskEvent>> = BTreeMap::new();
        for event in batch {
            by_user.entry(event.user_id).or_default().push(event);
        }

        let mut ids = Vec::new();
        for (user_id, events) in &by_user {
            let key = archive_key(*user_id, &events[0]);
            let body = render_events_jsonl(events)?;
            s3.put_object()
                .bucket(bucket)
                .key(&key)
                .body(ByteStream::from(body.into_bytes()))
                .content_type("application/x-ndjson")
                .send()
                .await
                .map_err(|e| AppError::S3(format!("upload of {key} failed: {e}")))?;
            info!(
                "Archived {} events for user {user_id} to s3://{bucket}/{key}",
                events.len()
            );
            report.objects_written += 1;
            ids.extend(events.iter().map(|e| e.id));
        }

        // Prune only once the whole batch is in object storage.
        report.events_archived += repo.delete_events(&ids).await?;
        report.batches += 1;

        if last_page {
            break;
        }
    }

    Ok(report)
}

/// POST /api/v1/maintenance/archive
pub async fn handle_archive(State(state): State<AppState>) -> Result<Json<ArchiveReport>, AppError> {
    let report = archive_expired(
        state.repo.as_ref(),
        &state.s3,
        &state.config.s3_bucket,
        state.config.policy.retention_days,
        Utc::now(),
    )
    .await?;
    Ok(Json(report))
}
