use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::case::EscalationCase;
use crate::models::contact::Contact;
use crate::models::notification::DeliveryMethod;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct CreateContactRequest {
    pub user_id: Uuid,
    pub name: String,
    /// Phone number or email address, matching `method`.
    pub address: String,
    pub method: DeliveryMethod,
    /// 1 is alerted first; tier-3 alerts take the two lowest ranks.
    pub rank: i32,
}

/// GET /api/v1/cases
pub async fn handle_list_cases(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<Vec<EscalationCase>>, AppError> {
    let cases = state.repo.cases_for_user(params.user_id).await?;
    Ok(Json(cases))
}

/// POST /api/v1/contacts
pub async fn handle_create_contact(
    State(state): State<AppState>,
    Json(req): Json<CreateContactRequest>,
) -> Result<Json<Contact>, AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::Validation(
            "contact name must not be empty".to_string(),
        ));
    }
    if req.address.trim().is_empty() {
        return Err(AppError::Validation(
            "contact address must not be empty".to_string(),
        ));
    }
    if req.method == DeliveryMethod::System {
        return Err(AppError::Validation(
            "contacts cannot use the internal system channel".to_string(),
        ));
    }
    if req.rank < 1 {
        return Err(AppError::Validation(format!(
            "contact rank must be at least 1, got {}",
            req.rank
        )));
    }

    let contact = Contact {
        id: Uuid::new_v4(),
        user_id: req.user_id,
        name: req.name,
        address: req.address,
        method: req.method,
        rank: req.rank,
        created_at: Utc::now(),
    };
    state.repo.insert_contact(&contact).await?;
    Ok(Json(contact))
}

/// GET /api/v1/contacts
pub async fn handle_list_contacts(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<Vec<Contact>>, AppError> {
    let contacts = state.repo.contacts_for_user(params.user_id).await?;
    Ok(Json(contacts))
}
