use std::sync::Arc;

use aws_sdk_s3::Client as S3Client;

use crate::config::Config;
use crate::gateway::DeliveryGateway;
use crate::registry::SubscriptionRegistry;
use crate::repo::Repository;
use crate::scorer::RiskScorer;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Persistence seam. Postgres in deployment, in-memory when running
    /// without a database.
    pub repo: Arc<dyn Repository>,
    /// Pluggable AI risk scorer. HTTP service in deployment; a scorer
    /// outage degrades mood scoring instead of failing ingestion.
    pub scorer: Arc<dyn RiskScorer>,
    /// Outbound message gateway for user and contact notifications.
    pub gateway: Arc<dyn DeliveryGateway>,
    /// Live per-user subscriptions fed as deliveries complete.
    pub registry: Arc<SubscriptionRegistry>,
    pub s3: S3Client,
    pub config: Config,
}
