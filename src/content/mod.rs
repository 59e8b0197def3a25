use axum::Router;

use crate::state::AppState;

pub mod handlers;
pub mod store;

pub fn router() -> Router<AppState> {
    handlers::content_routes()
}
