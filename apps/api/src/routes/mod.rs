pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::archive;
use crate::collector::handlers as collector_handlers;
use crate::escalation::handlers as escalation_handlers;
use crate::geofence::handlers as geofence_handlers;
use crate::state::AppState;
use crate::sweep;
use crate::wellness;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Signal ingestion
        .route(
            "/api/v1/ingest/mood",
            post(collector_handlers::handle_ingest_mood),
        )
        .route(
            "/api/v1/ingest/sensor",
            post(collector_handlers::handle_ingest_sensor),
        )
        .route(
            "/api/v1/ingest/checkin",
            post(collector_handlers::handle_ingest_checkin),
        )
        .route(
            "/api/v1/ingest/buddy",
            post(collector_handlers::handle_ingest_buddy),
        )
        .route(
            "/api/v1/ingest/prediction",
            post(collector_handlers::handle_ingest_prediction),
        )
        .route(
            "/api/v1/ingest/location",
            post(geofence_handlers::handle_ingest_location),
        )
        // User responses (resolve or escalate the open case)
        .route(
            "/api/v1/responses",
            post(collector_handlers::handle_response),
        )
        .route(
            "/api/v1/events",
            get(collector_handlers::handle_list_events),
        )
        // Zones
        .route(
            "/api/v1/zones",
            post(geofence_handlers::handle_create_zone)
                .get(geofence_handlers::handle_list_zones),
        )
        // Escalation cases and emergency contacts
        .route(
            "/api/v1/cases",
            get(escalation_handlers::handle_list_cases),
        )
        .route(
            "/api/v1/contacts",
            post(escalation_handlers::handle_create_contact)
                .get(escalation_handlers::handle_list_contacts),
        )
        // Wellness
        .route("/api/v1/wellness", get(wellness::handle_get_wellness))
        // Background work triggers
        .route("/api/v1/sweep", post(sweep::handle_sweep))
        .route(
            "/api/v1/maintenance/archive",
            post(archive::handle_archive),
        )
        .with_state(state)
}
