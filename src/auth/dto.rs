use serde::{Deserialize, Serialize};

use crate::users::store::Role;

/// Request body for login.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub captcha_token: Option<String>,
}

/// Request body for the one-time bootstrap account.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub captcha_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotRequest {
    pub email: Option<String>,
    #[serde(default)]
    pub captcha_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    pub token: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub captcha_token: Option<String>,
}

/// The identity slice returned to the client after login or introspection.
#[derive(Debug, Serialize)]
pub struct SessionUser {
    pub email: String,
    pub role: Role,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: SessionUser,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    pub user: Option<SessionUser>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub exists: bool,
    pub authenticated: bool,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}
