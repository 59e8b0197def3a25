use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::auth::gate::AdminUser;
use crate::auth::handlers::is_valid_email;
use crate::error::ApiError;
use crate::state::AppState;

/// Subscribers live in a set, so re-subscribing is a no-op.
const SUBSCRIBERS_KEY: &str = "newsletter_subscribers";

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscribersResponse {
    pub subscribers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
}

pub fn newsletter_routes() -> Router<AppState> {
    Router::new().route(
        "/newsletter",
        get(list_subscribers).post(subscribe).delete(unsubscribe),
    )
}

#[instrument(skip(state, payload))]
pub async fn subscribe(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let email = payload
        .email
        .as_deref()
        .map(str::trim)
        .map(str::to_lowercase)
        .filter(|e| is_valid_email(e))
        .ok_or_else(|| ApiError::BadRequest("Invalid email".into()))?;

    state.kv.sadd(SUBSCRIBERS_KEY, &email).await?;
    info!(%email, "newsletter subscription");
    Ok(Json(OkResponse { success: true }))
}

#[instrument(skip(state))]
pub async fn list_subscribers(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<Json<SubscribersResponse>, ApiError> {
    let subscribers = state.kv.smembers(SUBSCRIBERS_KEY).await?;
    Ok(Json(SubscribersResponse { subscribers }))
}

#[instrument(skip(state, payload))]
pub async fn unsubscribe(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let Some(email) = payload.email.filter(|e| !e.is_empty()) else {
        return Err(ApiError::BadRequest("Email required".into()));
    };
    state.kv.srem(SUBSCRIBERS_KEY, &email).await?;
    info!(%email, "newsletter unsubscription");
    Ok(Json(OkResponse { success: true }))
}
