use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument};

use crate::auth::gate::AdminUser;
use crate::content::store;
use crate::error::ApiError;
use crate::state::AppState;

pub const PROJECTS: &str = "projects";
pub const SERVICES: &str = "services";
pub const ARTISTS: &str = "artists";
pub const TEAM: &str = "team";

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
}

pub fn content_routes() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_projects).put(save_projects))
        .route("/services", get(list_services).put(save_services))
        .route("/artists", get(list_artists).put(save_artists))
        .route("/team", get(list_team).put(save_team))
}

async fn load_collection(state: &AppState, collection: &str) -> Result<Json<Value>, ApiError> {
    let value = store::load(state.kv.as_ref(), collection).await?;
    Ok(Json(value))
}

async fn replace_collection(
    state: &AppState,
    collection: &str,
    value: Value,
) -> Result<Json<OkResponse>, ApiError> {
    if !value.is_array() {
        return Err(ApiError::BadRequest("Expected a JSON array".into()));
    }
    store::save(state.kv.as_ref(), collection, &value).await?;
    info!(collection, items = value.as_array().map(Vec::len).unwrap_or(0), "collection saved");
    Ok(Json(OkResponse { success: true }))
}

#[instrument(skip(state))]
pub async fn list_projects(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    load_collection(&state, PROJECTS).await
}

#[instrument(skip(state, value))]
pub async fn save_projects(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Json(value): Json<Value>,
) -> Result<Json<OkResponse>, ApiError> {
    replace_collection(&state, PROJECTS, value).await
}

#[instrument(skip(state))]
pub async fn list_services(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    load_collection(&state, SERVICES).await
}

#[instrument(skip(state, value))]
pub async fn save_services(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Json(value): Json<Value>,
) -> Result<Json<OkResponse>, ApiError> {
    replace_collection(&state, SERVICES, value).await
}

#[instrument(skip(state))]
pub async fn list_artists(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    load_collection(&state, ARTISTS).await
}

#[instrument(skip(state, value))]
pub async fn save_artists(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Json(value): Json<Value>,
) -> Result<Json<OkResponse>, ApiError> {
    replace_collection(&state, ARTISTS, value).await
}

#[instrument(skip(state))]
pub async fn list_team(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    load_collection(&state, TEAM).await
}

#[instrument(skip(state, value))]
pub async fn save_team(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Json(value): Json<Value>,
) -> Result<Json<OkResponse>, ApiError> {
    replace_collection(&state, TEAM, value).await
}
