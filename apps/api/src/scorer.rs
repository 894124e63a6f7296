//! Risk Scorer client — the single entry point for AI risk assessments.
//!
//! No other module may call the scorer service directly. One POST per
//! assessment with a hard timeout, no retry: ingestion must never block on
//! the scorer, so every failure degrades to the conservative fallback
//! verdict instead of erroring.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::event::Severity;

#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

/// What a caller asks the scorer to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    Mood,
    MissedCheckins,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreInput {
    pub user_id: Uuid,
    pub kind: ScoreKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consecutive_misses: Option<i64>,
}

impl ScoreInput {
    pub fn mood(user_id: Uuid, mood: i32, note: Option<String>) -> Self {
        Self {
            user_id,
            kind: ScoreKind::Mood,
            mood: Some(mood),
            note,
            consecutive_misses: None,
        }
    }

    pub fn missed_checkins(user_id: Uuid, consecutive_misses: i64) -> Self {
        Self {
            user_id,
            kind: ScoreKind::MissedCheckins,
            mood: None,
            note: None,
            consecutive_misses: Some(consecutive_misses),
        }
    }
}

/// Verdict returned by the scorer (or substituted locally on failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub risk_level: Severity,
    /// Normalized risk score in `[0.0, 1.0]`.
    pub risk_score: f64,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// True when this verdict is the local fallback, not a scorer answer.
    #[serde(default)]
    pub degraded: bool,
}

impl RiskVerdict {
    /// Conservative stand-in used whenever the scorer cannot be reached.
    pub fn fallback() -> Self {
        Self {
            risk_level: Severity::Low,
            risk_score: 0.1,
            confidence: 0.5,
            reasoning: None,
            degraded: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScorerErrorBody {
    error: Option<String>,
}

/// The scorer seam. Carried in `AppState` as `Arc<dyn RiskScorer>` so tests
/// swap in a canned verdict.
#[async_trait]
pub trait RiskScorer: Send + Sync {
    /// Never fails: implementations substitute `RiskVerdict::fallback()`
    /// when the scorer is unreachable or answers badly.
    async fn assess(&self, input: &ScoreInput) -> RiskVerdict;
}

#[derive(Clone)]
pub struct HttpRiskScorer {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpRiskScorer {
    pub fn new(base_url: String, api_key: String, timeout_secs: u64) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .expect("Failed to build HTTP client"),
            base_url,
            api_key,
        }
    }

    async fn try_assess(&self, input: &ScoreInput) -> Result<RiskVerdict, ScorerError> {
        let url = format!("{}/v1/assess", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(input)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ScorerErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(ScorerError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let verdict: RiskVerdict = response.json().await?;
        debug!(
            "Scorer verdict for user {}: {} ({:.2}, confidence {:.2})",
            input.user_id, verdict.risk_level, verdict.risk_score, verdict.confidence
        );
        Ok(verdict)
    }
}

#[async_trait]
impl RiskScorer for HttpRiskScorer {
    async fn assess(&self, input: &ScoreInput) -> RiskVerdict {
        match self.try_assess(input).await {
            Ok(mut verdict) => {
                verdict.risk_score = verdict.risk_score.clamp(0.0, 1.0);
                verdict.degraded = false;
                verdict
            }
            Err(e) => {
                warn!(
                    "Scorer unavailable for user {} ({e}); using fallback verdict",
                    input.user_id
                );
                RiskVerdict::fallback()
            }
        }
    }
}

/// Test scorer that always answers with a fixed verdict.
#[cfg(test)]
pub struct CannedScorer {
    pub verdict: RiskVerdict,
}

#[cfg(test)]
impl CannedScorer {
    pub fn with_verdict(risk_level: Severity, risk_score: f64, confidence: f64) -> Self {
        Self {
            verdict: RiskVerdict {
                risk_level,
                risk_score,
                confidence,
                reasoning: None,
                degraded: false,
            },
        }
    }

    pub fn unavailable() -> Self {
        Self {
            verdict: RiskVerdict::fallback(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl RiskScorer for CannedScorer {
    async fn assess(&self, _input: &ScoreInput) -> RiskVerdict {
        self.verdict.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_verdict_is_conservative() {
        let v = RiskVerdict::fallback();
        assert_eq!(v.risk_level, Severity::Low);
        assert_eq!(v.risk_score, 0.1);
        assert_eq!(v.confidence, 0.5);
        assert!(v.degraded);
    }

    #[test]
    fn test_score_input_omits_unused_fields() {
        let input = ScoreInput::missed_checkins(Uuid::new_v4(), 3);
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["kind"], "missed_checkins");
        assert_eq!(json["consecutive_misses"], 3);
        assert!(json.get("mood").is_none());
        assert!(json.get("note").is_none());
    }
}
