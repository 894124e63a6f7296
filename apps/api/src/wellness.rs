//! Wellness Score Aggregator.
//!
//! Folds the recent window of mood, activity, check-in, and crisis data
//! into one 0..100 indicator with a stored term-by-term breakdown. The
//! score is informational only and never feeds back into escalation.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::PolicyConfig;
use crate::errors::AppError;
use crate::models::event::{Severity, SourceType};
use crate::models::wellness::{WellnessComponents, WellnessScore};
use crate::repo::Repository;
use crate::state::AppState;

const BASELINE: f64 = 50.0;
const CHECKIN_TERM_CAP: f64 = 20.0;

/// score = clamp(50 + 10*(avgMood-3) + 0.2*avgActivity
///               + min(5*respondedCheckins, 20) - 10*crisisEvents, 0, 100)
///
/// A missing input contributes 0 to its term, so a user with no data in
/// the window sits at the 50-point baseline.
pub fn compute_score(
    avg_mood: Option<f64>,
    avg_activity_percent: Option<f64>,
    responded_checkins: i64,
    crisis_event_count: i64,
) -> (f64, WellnessComponents) {
    let mood_term = avg_mood.map_or(0.0, |m| 10.0 * (m - 3.0));
    let activity_term = avg_activity_percent.map_or(0.0, |a| 0.2 * a);
    let checkin_term = (5.0 * responded_checkins as f64).min(CHECKIN_TERM_CAP);
    let crisis_penalty = 10.0 * crisis_event_count as f64;

    let value = (BASELINE + mood_term + activity_term + checkin_term - crisis_penalty)
        .clamp(0.0, 100.0);
    let components = WellnessComponents {
        avg_mood,
        avg_activity_percent,
        responded_checkins,
        crisis_event_count,
        mood_term,
        activity_term,
        checkin_term,
        crisis_penalty,
    };
    (value, components)
}

/// Recomputes and stores the latest score for one user from the rolling
/// window ending at `now`.
pub async fn recompute_for_user(
    repo: &dyn Repository,
    policy: &PolicyConfig,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<WellnessScore, AppError> {
    let since = now - Duration::days(policy.wellness_window_days);
    let events = repo.events_for_user_since(user_id, since).await?;

    let moods: Vec<f64> = events
        .iter()
        .filter(|e| e.source_type == SourceType::Mood)
        .filter_map(|e| e.metadata["mood"].as_f64())
        .collect();
    let activity: Vec<f64> = events
        .iter()
        .filter(|e| e.source_type == SourceType::Sensor)
        .filter(|e| e.metadata["metric"] == "activity_percent")
        .filter_map(|e| e.metadata["value"].as_f64())
        .collect();
    let responded = repo.responded_checkin_count(user_id, since).await?;
    let crisis = events.iter().filter(|e| e.severity == Severity::Critical).count() as i64;

    let (value, components) = compute_score(mean(&moods), mean(&activity), responded, crisis);
    let score = WellnessScore {
        user_id,
        value,
        computed_at: now,
        components,
    };
    repo.upsert_wellness(&score).await?;
    Ok(score)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

/// GET /api/v1/wellness?user_id=...
pub async fn handle_get_wellness(
    State(state): State<AppState>,
    Query(query): Query<UserIdQuery>,
) -> Result<Json<WellnessScore>, AppError> {
    state
        .repo
        .latest_wellness(query.user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no wellness score computed for this user".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::checkin::{CheckinRecord, CheckinStatus};
    use crate::models::event::RiskEvent;
    use crate::repo::MemoryRepository;
    use serde_json::json;

    #[test]
    fn test_compute_score_reference_inputs() {
        let (value, components) = compute_score(Some(4.2), Some(60.0), 2, 1);
        assert_eq!(value, 74.0);
        assert_eq!(components.activity_term, 12.0);
        assert_eq!(components.checkin_term, 10.0);
        assert_eq!(components.crisis_penalty, 10.0);
        assert!((components.mood_term - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_inputs_sit_at_baseline() {
        let (value, components) = compute_score(None, None, 0, 0);
        assert_eq!(value, 50.0);
        assert_eq!(components.mood_term, 0.0);
        assert_eq!(components.activity_term, 0.0);
    }

    #[test]
    fn test_checkin_term_caps_at_twenty() {
        let (with_four, _) = compute_score(None, None, 4, 0);
        let (with_ten, components) = compute_score(None, None, 10, 0);
        assert_eq!(with_four, 70.0);
        assert_eq!(with_ten, 70.0);
        assert_eq!(components.checkin_term, 20.0);
    }

    #[test]
    fn test_value_is_clamped() {
        let (floor, _) = compute_score(Some(1.0), None, 0, 8);
        assert_eq!(floor, 0.0);
        let (ceiling, _) = compute_score(Some(5.0), Some(100.0), 10, 0);
        assert_eq!(ceiling, 100.0);
    }

    #[tokio::test]
    async fn test_recompute_reads_window_and_upserts() {
        let repo = MemoryRepository::new();
        let policy = PolicyConfig::default();
        let user = Uuid::new_v4();
        let now = Utc::now();

        repo.insert_event(&RiskEvent::new(
            user,
            SourceType::Mood,
            Severity::Low,
            0.2,
            false,
            json!({"mood": 4}),
            now - Duration::hours(5),
        ))
        .await
        .unwrap();
        repo.insert_event(&RiskEvent::new(
            user,
            SourceType::Sensor,
            Severity::Low,
            0.2,
            false,
            json!({"metric": "activity_percent", "value": 60.0}),
            now - Duration::hours(4),
        ))
        .await
        .unwrap();
        // Heart-rate readings carry no activity data.
        repo.insert_event(&RiskEvent::new(
            user,
            SourceType::Sensor,
            Severity::Critical,
            0.95,
            true,
            json!({"metric": "heart_rate", "value": 150.0}),
            now - Duration::hours(3),
        ))
        .await
        .unwrap();
        // Outside the window, must not count.
        repo.insert_event(&RiskEvent::new(
            user,
            SourceType::Mood,
            Severity::Low,
            0.2,
            false,
            json!({"mood": 1}),
            now - Duration::days(policy.wellness_window_days + 1),
        ))
        .await
        .unwrap();
        repo.insert_checkin(&CheckinRecord::new(
            user,
            CheckinStatus::Responded,
            None,
            now - Duration::hours(2),
        ))
        .await
        .unwrap();

        let score = recompute_for_user(&repo, &policy, user, now).await.unwrap();
        // 50 + 10*(4-3) + 0.2*60 + 5*1 - 10*1 = 67
        assert_eq!(score.value, 67.0);
        assert_eq!(score.components.avg_mood, Some(4.0));
        assert_eq!(score.components.crisis_event_count, 1);

        let latest = repo.latest_wellness(user).await.unwrap().unwrap();
        assert_eq!(latest.value, 67.0);

        // Recompute replaces, not appends.
        recompute_for_user(&repo, &policy, user, now + Duration::hours(1))
            .await
            .unwrap();
        let latest = repo.latest_wellness(user).await.unwrap().unwrap();
        assert_eq!(latest.computed_at, now + Duration::hours(1));
    }
}
