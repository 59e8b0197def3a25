use axum::Router;

use crate::state::AppState;

mod dto;
pub mod handlers;

pub fn router() -> Router<AppState> {
    handlers::quote_routes()
}
