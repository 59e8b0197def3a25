use axum::Router;

use crate::state::AppState;

pub mod cookies;
mod dto;
pub mod gate;
pub mod handlers;
pub mod password;
pub mod tokens;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
