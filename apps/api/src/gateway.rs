//! Message Delivery Gateway client — hands finished notifications to the
//! external transport service (SMS / push / email behind one API).
//!
//! One attempt per notification per sweep; the retry policy lives in the
//! sweep loop, not here.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::notification::{Destination, ScheduledNotification};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Serialize)]
struct DeliveryRequest<'a> {
    notification_id: uuid::Uuid,
    user_id: uuid::Uuid,
    destination: &'a Destination,
    method: &'a str,
    priority: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    error: Option<String>,
}

/// The delivery seam. Carried in `AppState` as `Arc<dyn DeliveryGateway>`;
/// tests swap in `RecordingGateway`.
#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    async fn deliver(&self, notification: &ScheduledNotification) -> Result<(), GatewayError>;
}

#[derive(Clone)]
pub struct HttpDeliveryGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpDeliveryGateway {
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
}

#[async_trait]
impl DeliveryGateway for HttpDeliveryGateway {
    async fn deliver(&self, notification: &ScheduledNotification) -> Result<(), GatewayError> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let request = DeliveryRequest {
            notification_id: notification.id,
            user_id: notification.user_id,
            destination: &notification.destination,
            method: &notification.delivery_method.to_string(),
            priority: &notification.priority.to_string(),
            content: &notification.content,
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<GatewayErrorBody>()
                .await
                .ok()
                .and_then(|b| b.error)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!(
            "Delivered notification {} ({}) for user {}",
            notification.id, notification.delivery_method, notification.user_id
        );
        Ok(())
    }
}

/// Test gateway that records deliveries instead of sending them, and can be
/// flipped into a failing mode.
#[cfg(test)]
pub struct RecordingGateway {
    sent: std::sync::Mutex<Vec<ScheduledNotification>>,
    failing: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingGateway {
    pub fn new() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            failing: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<ScheduledNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl DeliveryGateway for RecordingGateway {
    async fn deliver(&self, notification: &ScheduledNotification) -> Result<(), GatewayError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(GatewayError::Api {
                status: 503,
                message: "transport down".to_string(),
            });
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
