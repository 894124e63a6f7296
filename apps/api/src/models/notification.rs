use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::event::Severity;

/// Who a notification is addressed to. Contact destinations carry the
/// resolved address so the delivery step never needs a second lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Destination {
    /// The monitored user themselves; the gateway routes by user id.
    User,
    /// An emergency contact.
    Contact { name: String, address: String },
}

impl Destination {
    pub fn is_user(&self) -> bool {
        matches!(self, Destination::User)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delivery_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Sms,
    Push,
    Email,
    /// Internal notifications (tier checks) consumed by the sweep, never
    /// handed to the gateway.
    System,
}

impl std::fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeliveryMethod::Sms => "sms",
            DeliveryMethod::Push => "push",
            DeliveryMethod::Email => "email",
            DeliveryMethod::System => "system",
        };
        write!(f, "{s}")
    }
}

/// Rate-limiting class of a notification. `Emergency` is a critical case that
/// carried the requires-immediate flag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "notification_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
    Critical,
    Emergency,
}

impl NotificationPriority {
    pub fn from_severity(severity: Severity, immediate: bool) -> Self {
        match (severity, immediate) {
            (Severity::Critical, true) => NotificationPriority::Emergency,
            (Severity::Critical, false) => NotificationPriority::Critical,
            (Severity::High, _) => NotificationPriority::High,
            (Severity::Medium, _) => NotificationPriority::Medium,
            (Severity::Low, _) => NotificationPriority::Low,
        }
    }
}

impl std::fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Medium => "medium",
            NotificationPriority::High => "high",
            NotificationPriority::Critical => "critical",
            NotificationPriority::Emergency => "emergency",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notification_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

/// A queued outbound (or internal) notification. Created by the scheduler,
/// mutated only by the delivery step (and by cancel-by-case).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduledNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Set when the notification belongs to an escalation case; pending
    /// notifications are cancelled by case id on a qualifying response.
    pub case_id: Option<Uuid>,
    #[sqlx(json)]
    pub destination: Destination,
    pub delivery_method: DeliveryMethod,
    pub content: String,
    /// Never earlier than `created_at`.
    pub scheduled_for: DateTime<Utc>,
    pub priority: NotificationPriority,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_from_severity() {
        assert_eq!(
            NotificationPriority::from_severity(Severity::Critical, true),
            NotificationPriority::Emergency
        );
        assert_eq!(
            NotificationPriority::from_severity(Severity::Critical, false),
            NotificationPriority::Critical
        );
        assert_eq!(
            NotificationPriority::from_severity(Severity::High, true),
            NotificationPriority::High
        );
        assert_eq!(
            NotificationPriority::from_severity(Severity::Low, false),
            NotificationPriority::Low
        );
    }

    #[test]
    fn test_destination_serde_tagged() {
        let d = Destination::Contact {
            name: "Ana".to_string(),
            address: "+15550001111".to_string(),
        };
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["kind"], "contact");
        let back: Destination = serde_json::from_value(json).unwrap();
        assert_eq!(back, d);
        assert!(!back.is_user());
    }
}
