use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use tracing::warn;

use crate::auth::cookies;
use crate::auth::tokens::AuthKeys;
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::store::{PublicUser, Role};

/// The single authorization checkpoint for privileged routes.
///
/// The live store lookup is deliberate: claims embedded in the token are
/// only trusted as a subject pointer, so a deactivated or demoted user is
/// rejected on their next request even while their token is still
/// cryptographically valid.
pub async fn require_admin(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<PublicUser, ApiError> {
    let token = cookie_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".into()))?;

    let keys = AuthKeys::from_ref(state);
    let claims = keys
        .verify_session(&token)
        .ok_or_else(|| ApiError::Unauthorized("Invalid session".into()))?;

    let user = state.users().find_by_email(&claims.sub).await?;

    match user {
        Some(u) if u.active && u.role == Role::Admin => Ok(u.to_public()),
        Some(u) => {
            warn!(email = %u.email, role = ?u.role, active = u.active, "admin access denied");
            Err(ApiError::Forbidden("Access denied".into()))
        }
        None => Err(ApiError::Forbidden("Access denied".into())),
    }
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    cookies::cookie_value(headers, cookies::SESSION_COOKIE).filter(|t| !t.is_empty())
}

/// Open exactly while the store holds zero users. A backend error counts as
/// zero so a store outage cannot permanently lock out all admin access.
pub async fn bootstrap_open(state: &AppState) -> bool {
    state.users().count().await == 0
}

/// Extractor form of [`require_admin`] for unconditionally gated routes.
pub struct AdminUser(pub PublicUser);

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = require_admin(state, &parts.headers).await?;
        Ok(AdminUser(user))
    }
}
