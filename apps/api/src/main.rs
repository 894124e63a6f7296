mod archive;
mod collector;
mod config;
mod errors;
mod escalation;
mod gateway;
mod geofence;
mod models;
mod patterns;
mod registry;
mod repo;
mod routes;
mod scheduler;
mod scorer;
mod state;
mod sweep;
mod wellness;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use crate::config::{Config, RepositoryBackend};
use crate::gateway::HttpDeliveryGateway;
use crate::registry::SubscriptionRegistry;
use crate::repo::{MemoryRepository, PgRepository, Repository};
use crate::routes::build_router;
use crate::scorer::HttpRiskScorer;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (panics on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Haven API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize the repository backend
    let repo: Arc<dyn Repository> = match config.repository {
        RepositoryBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .expect("DATABASE_URL is required for the postgres backend");
            Arc::new(PgRepository::connect(url).await?)
        }
        RepositoryBackend::Memory => {
            warn!("Using the in-memory repository; all state is lost on restart");
            Arc::new(MemoryRepository::new())
        }
    };

    // Initialize S3 / MinIO for the retention archiver
    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized");

    // Initialize the external AI risk scorer
    let scorer = Arc::new(HttpRiskScorer::new(
        config.scorer_url.clone(),
        config.scorer_api_key.clone(),
        config.scorer_timeout_secs,
    ));
    info!("Risk scorer client initialized ({})", config.scorer_url);

    // Initialize the message delivery gateway
    let gateway = Arc::new(HttpDeliveryGateway::new(
        config.gateway_url.clone(),
        config.gateway_api_key.clone(),
        config.gateway_timeout_secs,
    ));
    info!("Delivery gateway client initialized ({})", config.gateway_url);

    let registry = Arc::new(SubscriptionRegistry::new());

    // Build app state
    let state = AppState {
        repo,
        scorer,
        gateway,
        registry,
        s3,
        config: config.clone(),
    };

    // Optional in-process sweep ticker; deployments can instead trigger
    // sweeps externally via POST /api/v1/sweep
    if let Some(interval_secs) = config.sweep_interval_secs {
        let repo = Arc::clone(&state.repo);
        let gateway = Arc::clone(&state.gateway);
        let registry = Arc::clone(&state.registry);
        let policy = config.policy.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sweep::run_sweep(
                    Arc::clone(&repo),
                    Arc::clone(&gateway),
                    Arc::clone(&registry),
                    policy.clone(),
                    chrono::Utc::now(),
                )
                .await;
            }
        });
        info!("Sweep ticker running every {interval_secs}s");
    }

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "haven-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
