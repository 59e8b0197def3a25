use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, put},
    Json, Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::gate::{bootstrap_open, require_admin};
use crate::auth::handlers::is_valid_email;
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::dto::{CreateUserRequest, OkResponse};
use crate::users::store::{NewUser, PublicUser, Role, UserPatch};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users).post(create_user))
        .route("/admin/users/:id", put(update_user).delete(delete_user))
}

/// Open during bootstrap so the setup screen can show the (empty) roster;
/// admin-only afterwards.
#[instrument(skip(state, headers))]
pub async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<PublicUser>>, ApiError> {
    if !bootstrap_open(&state).await {
        require_admin(&state, &headers).await?;
    }
    let users = state.users().list().await?;
    Ok(Json(users))
}

#[instrument(skip(state, headers, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<PublicUser>), ApiError> {
    let (Some(name), Some(email), Some(password)) =
        (payload.name, payload.email, payload.password)
    else {
        return Err(ApiError::BadRequest(
            "Required fields: name, email, password".into(),
        ));
    };
    let email = email.trim().to_lowercase();

    if !is_valid_email(&email) {
        return Err(ApiError::BadRequest("Invalid email".into()));
    }
    if password.len() < 8 {
        return Err(ApiError::BadRequest(
            "Password too short (min. 8 characters)".into(),
        ));
    }

    let bootstrap = bootstrap_open(&state).await;
    if !bootstrap {
        require_admin(&state, &headers).await?;
    }

    let created = state
        .users()
        .create(NewUser {
            name: name.trim().to_string(),
            email,
            // the first account ever created is forced to admin
            role: if bootstrap {
                Role::Admin
            } else {
                payload.role.unwrap_or(Role::Editor)
            },
            password,
            active: payload.active,
        })
        .await?;

    info!(email = %created.email, role = ?created.role, bootstrap, "user created");
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip(state, headers, patch))]
pub async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(patch): Json<UserPatch>,
) -> Result<Json<PublicUser>, ApiError> {
    if bootstrap_open(&state).await {
        return Err(ApiError::BadRequest(
            "Unavailable during initialization".into(),
        ));
    }
    require_admin(&state, &headers).await?;

    let updated = state.users().update(id, patch).await?;
    info!(%id, "user updated");
    Ok(Json(updated))
}

#[instrument(skip(state, headers))]
pub async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    require_admin(&state, &headers).await?;
    state.users().remove(id).await?;
    info!(%id, "user deleted");
    Ok(Json(OkResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_request(email: &str, role: Option<Role>) -> CreateUserRequest {
        CreateUserRequest {
            name: Some("Someone".into()),
            email: Some(email.into()),
            role,
            password: Some("long-enough-pw".into()),
            active: None,
        }
    }

    #[tokio::test]
    async fn bootstrap_forces_admin_role_then_closes() {
        let state = AppState::for_tests();

        // first creation: unauthenticated, editor requested, admin forced
        let (status, Json(created)) = create_user(
            State(state.clone()),
            HeaderMap::new(),
            Json(create_request("first@example.com", Some(Role::Editor))),
        )
        .await
        .expect("bootstrap create");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.role, Role::Admin);
        assert_eq!(state.users().count().await, 1);

        // second unauthenticated creation is rejected by the gate
        let err = create_user(
            State(state.clone()),
            HeaderMap::new(),
            Json(create_request("second@example.com", Some(Role::Editor))),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        assert_eq!(state.users().count().await, 1);
    }

    #[tokio::test]
    async fn update_is_unavailable_during_bootstrap() {
        let state = AppState::for_tests();
        let err = update_user(
            State(state),
            HeaderMap::new(),
            Path(Uuid::new_v4()),
            Json(UserPatch::default()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn listing_is_open_only_during_bootstrap() {
        let state = AppState::for_tests();
        let Json(users) = list_users(State(state.clone()), HeaderMap::new())
            .await
            .expect("open during bootstrap");
        assert!(users.is_empty());

        create_user(
            State(state.clone()),
            HeaderMap::new(),
            Json(create_request("first@example.com", None)),
        )
        .await
        .unwrap();

        let err = list_users(State(state), HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }
}
