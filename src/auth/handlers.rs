use axum::{
    extract::{FromRef, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::auth::{
    cookies,
    dto::{
        ForgotRequest, InitRequest, LoginRequest, LoginResponse, MessageResponse, OkResponse,
        ResetRequest, SessionResponse, SessionUser, StatusResponse,
    },
    password,
    tokens::AuthKeys,
};
use crate::error::ApiError;
use crate::state::AppState;
use crate::users::store::{NewUser, Role, UserPatch};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout).delete(logout))
        .route("/auth/session", get(session))
        .route("/auth/status", get(status))
        .route("/auth/init", post(init))
        .route("/auth/forgot", post(forgot))
        .route("/auth/reset", post(reset))
}

#[instrument(skip(state, headers, payload))]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<(HeaderMap, Json<LoginResponse>), ApiError> {
    let (Some(email), Some(password)) = (payload.email, payload.password) else {
        return Err(ApiError::BadRequest("Missing required fields".into()));
    };
    let email = email.trim().to_lowercase();

    if !state
        .captcha
        .verify(payload.captcha_token.as_deref().unwrap_or(""))
        .await
    {
        warn!(%email, "login captcha failed");
        return Err(ApiError::BadRequest("Invalid captcha".into()));
    }

    let keys = AuthKeys::from_ref(&state);
    let store = state.users();

    let identity = match store.verify_password(&email, &password).await? {
        Some(user) if !user.active => {
            warn!(%email, "login attempt on inactive account");
            None
        }
        Some(user) => Some(SessionIdentity {
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            password_hash: user.password_hash,
        }),
        // The signed admin-record cookie preserves admin identity across a
        // store reset; it only applies while the store is empty.
        None => {
            if store.count().await == 0 {
                admin_record_fallback(&keys, &headers, &email, &password)
            } else {
                None
            }
        }
    };

    let Some(identity) = identity else {
        return Err(ApiError::Unauthorized("Invalid credentials".into()));
    };

    let token = keys.sign_session(&identity.email)?;
    let mut response_headers = HeaderMap::new();
    cookies::push_cookie(
        &mut response_headers,
        cookies::session_cookie(
            &token,
            state.config.auth.session_ttl_secs,
            state.config.production,
        ),
    );
    if identity.role == Role::Admin {
        let record = keys.sign_admin_record(&identity.email, &identity.password_hash)?;
        cookies::push_cookie(
            &mut response_headers,
            cookies::admin_record_cookie(&record, state.config.production),
        );
    }

    info!(email = %identity.email, role = ?identity.role, "user logged in");
    Ok((
        response_headers,
        Json(LoginResponse {
            success: true,
            user: SessionUser {
                email: identity.email,
                role: identity.role,
                name: identity.name,
            },
        }),
    ))
}

struct SessionIdentity {
    email: String,
    name: String,
    role: Role,
    password_hash: String,
}

fn admin_record_fallback(
    keys: &AuthKeys,
    headers: &HeaderMap,
    email: &str,
    password: &str,
) -> Option<SessionIdentity> {
    cookies::cookie_value(headers, cookies::ADMIN_RECORD_COOKIE)
        .and_then(|token| keys.verify_admin_record(&token))
        .filter(|record| record.email.to_lowercase() == email)
        .filter(|record| {
            password::verify_password(password, &record.password_hash).unwrap_or(false)
        })
        .map(|record| {
            info!(%email, "login via admin-record fallback");
            SessionIdentity {
                email: record.email.to_lowercase(),
                name: String::new(),
                role: Role::Admin,
                password_hash: record.password_hash,
            }
        })
}

#[instrument(skip(state))]
pub async fn logout(State(state): State<AppState>) -> (HeaderMap, Json<OkResponse>) {
    let mut headers = HeaderMap::new();
    cookies::push_cookie(
        &mut headers,
        cookies::clear_session_cookie(state.config.production),
    );
    (headers, Json(OkResponse { success: true }))
}

#[instrument(skip(state, headers))]
pub async fn session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, ApiError> {
    let keys = AuthKeys::from_ref(&state);
    let claims = cookies::cookie_value(&headers, cookies::SESSION_COOKIE)
        .and_then(|token| keys.verify_session(&token));

    let Some(claims) = claims else {
        return Ok(Json(SessionResponse {
            authenticated: false,
            user: None,
        }));
    };

    let user = state
        .users()
        .find_by_email(&claims.sub)
        .await?
        .filter(|u| u.active)
        .map(|u| SessionUser {
            email: u.email,
            role: u.role,
            name: u.name,
        });

    Ok(Json(SessionResponse {
        authenticated: true,
        user,
    }))
}

#[instrument(skip(state, headers))]
pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<StatusResponse> {
    let keys = AuthKeys::from_ref(&state);

    let mut exists = state.users().count().await > 0;
    if !exists {
        exists = cookies::cookie_value(&headers, cookies::ADMIN_RECORD_COOKIE)
            .and_then(|token| keys.verify_admin_record(&token))
            .is_some();
    }

    let claims = cookies::cookie_value(&headers, cookies::SESSION_COOKIE)
        .and_then(|token| keys.verify_session(&token));

    Json(StatusResponse {
        exists,
        authenticated: claims.is_some(),
        email: claims.map(|c| c.sub),
    })
}

#[instrument(skip(state, payload))]
pub async fn init(
    State(state): State<AppState>,
    Json(payload): Json<InitRequest>,
) -> Result<(HeaderMap, Json<OkResponse>), ApiError> {
    let (Some(name), Some(email), Some(password)) =
        (payload.name, payload.email, payload.password)
    else {
        return Err(ApiError::BadRequest("Missing required fields".into()));
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

    let store = state.users();
    if store.count().await > 0 {
        return Err(ApiError::BadRequest("System already initialized".into()));
    }

    if !state
        .captcha
        .verify(payload.captcha_token.as_deref().unwrap_or(""))
        .await
    {
        return Err(ApiError::BadRequest("Invalid captcha".into()));
    }

    // The very first account is always an admin.
    let created = store
        .create(NewUser {
            name: name.trim().to_string(),
            email: email.clone(),
            role: Role::Admin,
            password,
            active: Some(true),
        })
        .await?;

    let stored = store
        .find_by_email(&created.email)
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("bootstrap user vanished")))?;

    let keys = AuthKeys::from_ref(&state);
    let token = keys.sign_session(&created.email)?;
    let record = keys.sign_admin_record(&created.email, &stored.password_hash)?;

    let mut headers = HeaderMap::new();
    cookies::push_cookie(
        &mut headers,
        cookies::session_cookie(
            &token,
            state.config.auth.session_ttl_secs,
            state.config.production,
        ),
    );
    cookies::push_cookie(
        &mut headers,
        cookies::admin_record_cookie(&record, state.config.production),
    );

    info!(email = %created.email, "bootstrap admin created");
    Ok((headers, Json(OkResponse { success: true })))
}

#[instrument(skip(state, payload))]
pub async fn forgot(
    State(state): State<AppState>,
    Json(payload): Json<ForgotRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Some(email) = payload.email else {
        return Err(ApiError::BadRequest("Missing required fields".into()));
    };
    let email = email.trim().to_lowercase();

    if !state
        .captcha
        .verify(payload.captcha_token.as_deref().unwrap_or(""))
        .await
    {
        return Err(ApiError::BadRequest("Invalid captcha".into()));
    }

    // Same response whether or not the account exists.
    let generic = MessageResponse {
        success: true,
        message: "If an account exists, an email has been sent.".into(),
    };

    let Some(user) = state
        .users()
        .find_by_email(&email)
        .await?
        .filter(|u| u.active)
    else {
        return Ok(Json(generic));
    };

    let keys = AuthKeys::from_ref(&state);
    let token = keys.sign_reset(&user.email)?;
    let reset_url = format!("{}/admin/reset?token={}", state.config.public_url, token);

    state
        .mailer
        .send(
            &user.email,
            "Password reset",
            &format!(
                "<p>Hello {},</p>\
                 <p>To reset your password (link valid for 15 minutes):</p>\
                 <p><a href=\"{}\">Reset my password</a></p>\
                 <p>If you did not request this reset, you can ignore this email.</p>",
                user.name, reset_url
            ),
        )
        .await?;

    Ok(Json(generic))
}

#[instrument(skip(state, payload))]
pub async fn reset(
    State(state): State<AppState>,
    Json(payload): Json<ResetRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let (Some(token), Some(password)) = (payload.token, payload.password) else {
        return Err(ApiError::BadRequest("Missing required fields".into()));
    };
    if password.len() < 8 {
        return Err(ApiError::BadRequest(
            "Password too short (min. 8 characters)".into(),
        ));
    }

    if !state
        .captcha
        .verify(payload.captcha_token.as_deref().unwrap_or(""))
        .await
    {
        return Err(ApiError::BadRequest("Invalid captcha".into()));
    }

    let keys = AuthKeys::from_ref(&state);
    let email = keys
        .verify_reset(&token)
        .ok_or_else(|| ApiError::BadRequest("Invalid token".into()))?;

    let store = state.users();
    let user = store
        .find_by_email(&email)
        .await?
        .ok_or_else(|| ApiError::BadRequest("Account not found".into()))?;

    store
        .update(
            user.id,
            UserPatch {
                password: Some(password),
                ..Default::default()
            },
        )
        .await?;

    info!(%email, "password reset completed");
    Ok(Json(OkResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::gate::require_admin;
    use axum::http::{header::SET_COOKIE, HeaderValue};

    fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: Some(email.into()),
            password: Some(password.into()),
            captcha_token: None,
        }
    }

    async fn seed_admin(state: &AppState) {
        state
            .users()
            .create(NewUser {
                name: "Root".into(),
                email: "root@example.com".into(),
                role: Role::Admin,
                password: "hunter2hunter2".into(),
                active: None,
            })
            .await
            .unwrap();
    }

    fn cookie_from_response(headers: &HeaderMap, name: &str) -> Option<String> {
        headers.get_all(SET_COOKIE).iter().find_map(|v| {
            let raw = v.to_str().ok()?;
            let (cookie_name, rest) = raw.split_once('=')?;
            (cookie_name == name).then(|| rest.split(';').next().unwrap_or("").to_string())
        })
    }

    #[tokio::test]
    async fn login_issues_session_that_passes_the_gate() {
        let state = AppState::for_tests();
        seed_admin(&state).await;

        let (headers, Json(body)) = login(
            State(state.clone()),
            HeaderMap::new(),
            Json(login_request("Root@Example.com", "hunter2hunter2")),
        )
        .await
        .expect("login succeeds");
        assert!(body.success);
        assert_eq!(body.user.email, "root@example.com");

        let session = cookie_from_response(&headers, cookies::SESSION_COOKIE).unwrap();
        let record = cookie_from_response(&headers, cookies::ADMIN_RECORD_COOKIE);
        assert!(record.is_some(), "admin logins refresh the record cookie");

        let mut request_headers = HeaderMap::new();
        request_headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_str(&format!("av_session={session}")).unwrap(),
        );
        let user = require_admin(&state, &request_headers).await.unwrap();
        assert_eq!(user.email, "root@example.com");
    }

    #[tokio::test]
    async fn login_rejects_bad_password_and_inactive_account() {
        let state = AppState::for_tests();
        seed_admin(&state).await;

        let err = login(
            State(state.clone()),
            HeaderMap::new(),
            Json(login_request("root@example.com", "wrong")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let root = state
            .users()
            .find_by_email("root@example.com")
            .await
            .unwrap()
            .unwrap();
        state
            .users()
            .update(
                root.id,
                UserPatch {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = login(
            State(state),
            HeaderMap::new(),
            Json(login_request("root@example.com", "hunter2hunter2")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn admin_record_cookie_survives_a_store_reset() {
        let state = AppState::for_tests();
        seed_admin(&state).await;

        let (headers, _) = login(
            State(state.clone()),
            HeaderMap::new(),
            Json(login_request("root@example.com", "hunter2hunter2")),
        )
        .await
        .unwrap();
        let record = cookie_from_response(&headers, cookies::ADMIN_RECORD_COOKIE).unwrap();

        // fresh state = wiped store, same signing secret
        let reset_state = AppState::for_tests();
        assert_eq!(reset_state.users().count().await, 0);

        let mut request_headers = HeaderMap::new();
        request_headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_str(&format!("av_admin_record={record}")).unwrap(),
        );

        let (_, Json(body)) = login(
            State(reset_state.clone()),
            request_headers.clone(),
            Json(login_request("root@example.com", "hunter2hunter2")),
        )
        .await
        .expect("fallback login succeeds on an empty store");
        assert_eq!(body.user.role, Role::Admin);

        // wrong password still fails through the fallback
        let err = login(
            State(reset_state),
            request_headers,
            Json(login_request("root@example.com", "not-the-password")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn status_reports_existence_and_session() {
        let state = AppState::for_tests();
        let Json(before) = status(State(state.clone()), HeaderMap::new()).await;
        assert!(!before.exists);
        assert!(!before.authenticated);

        seed_admin(&state).await;
        let Json(after) = status(State(state), HeaderMap::new()).await;
        assert!(after.exists);
        assert!(!after.authenticated);
        assert_eq!(after.email, None);
    }

    #[tokio::test]
    async fn reset_flow_rotates_the_password() {
        let state = AppState::for_tests();
        seed_admin(&state).await;

        let keys = AuthKeys::from_ref(&state);
        let token = keys.sign_reset("root@example.com").unwrap();

        reset(
            State(state.clone()),
            Json(ResetRequest {
                token: Some(token),
                password: Some("brand-new-password".into()),
                captcha_token: None,
            }),
        )
        .await
        .expect("reset succeeds");

        assert!(state
            .users()
            .verify_password("root@example.com", "brand-new-password")
            .await
            .unwrap()
            .is_some());
        assert!(state
            .users()
            .verify_password("root@example.com", "hunter2hunter2")
            .await
            .unwrap()
            .is_none());

        // a session token is not a reset token
        let session = keys.sign_session("root@example.com").unwrap();
        let err = reset(
            State(state),
            Json(ResetRequest {
                token: Some(session),
                password: Some("yet-another-password".into()),
                captcha_token: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
