use serde::{Deserialize, Serialize};

use crate::users::store::Role;

/// Request body for user creation. The requested role is ignored while
/// bootstrap is open.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub password: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
}
