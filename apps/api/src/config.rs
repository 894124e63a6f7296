use anyhow::{bail, Context, Result};

use crate::collector::thresholds::SensorThresholds;
use crate::escalation::TierTimeouts;
use crate::scheduler::RatePolicy;

/// Which repository backend to wire at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryBackend {
    Postgres,
    Memory,
}

/// Application configuration loaded from environment variables.
/// Startup aborts with a descriptive error if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub repository: RepositoryBackend,
    /// Required unless `REPOSITORY=memory`.
    pub database_url: Option<String>,
    pub scorer_url: String,
    pub scorer_api_key: String,
    pub gateway_url: String,
    pub gateway_api_key: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub port: u16,
    pub rust_log: String,
    /// When set, an in-process ticker runs a sweep this often in addition to
    /// the external `POST /api/v1/sweep` trigger.
    pub sweep_interval_secs: Option<u64>,
    pub scorer_timeout_secs: u64,
    pub gateway_timeout_secs: u64,
    pub policy: PolicyConfig,
}

/// Tunable numeric policy, loaded with documented defaults and overridable
/// per knob. Thresholds are configuration, not constants.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub thresholds: SensorThresholds,
    pub timeouts: TierTimeouts,
    pub rate: RatePolicy,
    /// Events older than this are archived to S3 and pruned.
    pub retention_days: i64,
    /// Analysis window for the pattern detector.
    pub pattern_window_hours: i64,
    /// Analysis window for the wellness aggregator.
    pub wellness_window_days: i64,
    /// Post-exit check-in delay after leaving a trigger zone.
    pub post_exit_check_minutes: i64,
    /// Wellness-zone visits shorter than this prompt an encourage-return nudge.
    pub short_wellness_visit_minutes: i64,
    /// Failed sends are retried by later sweeps while still inside this window.
    pub delivery_grace_minutes: i64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            thresholds: SensorThresholds::default(),
            timeouts: TierTimeouts::default(),
            rate: RatePolicy::default(),
            retention_days: 90,
            pattern_window_hours: 24,
            wellness_window_days: 3,
            post_exit_check_minutes: 30,
            short_wellness_visit_minutes: 5,
            delivery_grace_minutes: 60,
        }
    }
}

impl PolicyConfig {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            thresholds: SensorThresholds {
                heart_rate_critical: env_parse("HEART_RATE_CRITICAL", 140.0)?,
                heart_rate_high: env_parse("HEART_RATE_HIGH", 120.0)?,
                stress_high_pct: env_parse("STRESS_HIGH_PCT", 85.0)?,
                stress_medium_pct: env_parse("STRESS_MEDIUM_PCT", 70.0)?,
                sleep_high_hours: env_parse("SLEEP_HIGH_HOURS", 3.0)?,
                sleep_medium_hours: env_parse("SLEEP_MEDIUM_HOURS", 5.0)?,
                activity_low_pct: env_parse("ACTIVITY_LOW_PCT", 10.0)?,
                daytime_start_hour: env_parse("DAYTIME_START_HOUR", 8)?,
                daytime_end_hour: env_parse("DAYTIME_END_HOUR", 20)?,
            },
            timeouts: TierTimeouts {
                tier1_minutes: env_parse("TIER1_TIMEOUT_MINUTES", 240)?,
                tier3_grace_minutes: env_parse("TIER3_GRACE_MINUTES", 30)?,
            },
            rate: defaults.rate,
            retention_days: env_parse("RETENTION_DAYS", 90)?,
            pattern_window_hours: env_parse("PATTERN_WINDOW_HOURS", 24)?,
            wellness_window_days: env_parse("WELLNESS_WINDOW_DAYS", 3)?,
            post_exit_check_minutes: env_parse("POST_EXIT_CHECK_MINUTES", 30)?,
            short_wellness_visit_minutes: env_parse("SHORT_WELLNESS_VISIT_MINUTES", 5)?,
            delivery_grace_minutes: env_parse("DELIVERY_GRACE_MINUTES", 60)?,
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let repository = match std::env::var("REPOSITORY").as_deref() {
            Ok("memory") => RepositoryBackend::Memory,
            Ok("postgres") | Err(_) => RepositoryBackend::Postgres,
            Ok(other) => bail!("REPOSITORY must be 'postgres' or 'memory', got '{other}'"),
        };

        let database_url = match repository {
            RepositoryBackend::Postgres => Some(require_env("DATABASE_URL")?),
            RepositoryBackend::Memory => std::env::var("DATABASE_URL").ok(),
        };

        Ok(Config {
            repository,
            database_url,
            scorer_url: require_env("SCORER_URL")?,
            scorer_api_key: require_env("SCORER_API_KEY")?,
            gateway_url: require_env("GATEWAY_URL")?,
            gateway_api_key: require_env("GATEWAY_API_KEY")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            port: env_parse("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            sweep_interval_secs: match std::env::var("SWEEP_INTERVAL_SECS") {
                Ok(v) => Some(
                    v.parse::<u64>()
                        .context("SWEEP_INTERVAL_SECS must be a positive integer")?,
                ),
                Err(_) => None,
            },
            scorer_timeout_secs: env_parse("SCORER_TIMEOUT_SECS", 5)?,
            gateway_timeout_secs: env_parse("GATEWAY_TIMEOUT_SECS", 10)?,
            policy: PolicyConfig::from_env()?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value")),
        Err(_) => Ok(default),
    }
}
