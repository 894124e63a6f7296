//! Sensor classification rules. All cut-offs live in config, not here.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::models::event::Severity;

/// Wearable metrics accepted by the sensor ingestion endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorMetric {
    HeartRate,
    StressPercent,
    SleepHours,
    ActivityPercent,
}

impl std::fmt::Display for SensorMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SensorMetric::HeartRate => "heart_rate",
            SensorMetric::StressPercent => "stress_percent",
            SensorMetric::SleepHours => "sleep_hours",
            SensorMetric::ActivityPercent => "activity_percent",
        };
        write!(f, "{s}")
    }
}

/// Classification cut-offs for wearable readings.
#[derive(Debug, Clone)]
pub struct SensorThresholds {
    pub heart_rate_critical: f64,
    pub heart_rate_high: f64,
    pub stress_high_pct: f64,
    pub stress_medium_pct: f64,
    pub sleep_high_hours: f64,
    pub sleep_medium_hours: f64,
    pub activity_low_pct: f64,
    /// UTC hour window in which low activity counts as a signal; outside of
    /// it (night) inactivity is expected.
    pub daytime_start_hour: u32,
    pub daytime_end_hour: u32,
}

impl Default for SensorThresholds {
    fn default() -> Self {
        Self {
            heart_rate_critical: 140.0,
            heart_rate_high: 120.0,
            stress_high_pct: 85.0,
            stress_medium_pct: 70.0,
            sleep_high_hours: 3.0,
            sleep_medium_hours: 5.0,
            activity_low_pct: 10.0,
            daytime_start_hour: 8,
            daytime_end_hour: 20,
        }
    }
}

impl SensorThresholds {
    /// Grades one reading. Sub-threshold readings come back `Low`: they are
    /// still recorded as evidence, they just never escalate.
    pub fn classify(
        &self,
        metric: SensorMetric,
        value: f64,
        recorded_at: DateTime<Utc>,
    ) -> (Severity, bool) {
        match metric {
            SensorMetric::HeartRate => {
                if value > self.heart_rate_critical {
                    (Severity::Critical, true)
                } else if value > self.heart_rate_high {
                    (Severity::High, false)
                } else {
                    (Severity::Low, false)
                }
            }
            SensorMetric::StressPercent => {
                if value > self.stress_high_pct {
                    (Severity::High, false)
                } else if value > self.stress_medium_pct {
                    (Severity::Medium, false)
                } else {
                    (Severity::Low, false)
                }
            }
            SensorMetric::SleepHours => {
                if value < self.sleep_high_hours {
                    (Severity::High, false)
                } else if value < self.sleep_medium_hours {
                    (Severity::Medium, false)
                } else {
                    (Severity::Low, false)
                }
            }
            SensorMetric::ActivityPercent => {
                if value < self.activity_low_pct && self.is_daytime(recorded_at) {
                    (Severity::Medium, false)
                } else {
                    (Severity::Low, false)
                }
            }
        }
    }

    fn is_daytime(&self, at: DateTime<Utc>) -> bool {
        let hour = at.hour();
        hour >= self.daytime_start_hour && hour < self.daytime_end_hour
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, hour, 30, 0).unwrap()
    }

    #[test]
    fn test_heart_rate_thresholds() {
        let t = SensorThresholds::default();
        let noon = at_hour(12);
        assert_eq!(
            t.classify(SensorMetric::HeartRate, 150.0, noon),
            (Severity::Critical, true)
        );
        assert_eq!(
            t.classify(SensorMetric::HeartRate, 130.0, noon),
            (Severity::High, false)
        );
        assert_eq!(
            t.classify(SensorMetric::HeartRate, 120.0, noon),
            (Severity::Low, false)
        );
    }

    #[test]
    fn test_stress_and_sleep_thresholds() {
        let t = SensorThresholds::default();
        let noon = at_hour(12);
        assert_eq!(
            t.classify(SensorMetric::StressPercent, 90.0, noon),
            (Severity::High, false)
        );
        assert_eq!(
            t.classify(SensorMetric::StressPercent, 75.0, noon),
            (Severity::Medium, false)
        );
        assert_eq!(
            t.classify(SensorMetric::SleepHours, 2.5, noon),
            (Severity::High, false)
        );
        assert_eq!(
            t.classify(SensorMetric::SleepHours, 4.0, noon),
            (Severity::Medium, false)
        );
        assert_eq!(
            t.classify(SensorMetric::SleepHours, 7.5, noon),
            (Severity::Low, false)
        );
    }

    #[test]
    fn test_low_activity_counts_only_in_daytime() {
        let t = SensorThresholds::default();
        assert_eq!(
            t.classify(SensorMetric::ActivityPercent, 4.0, at_hour(14)),
            (Severity::Medium, false)
        );
        // Same reading at 3am is unremarkable.
        assert_eq!(
            t.classify(SensorMetric::ActivityPercent, 4.0, at_hour(3)),
            (Severity::Low, false)
        );
    }
}
