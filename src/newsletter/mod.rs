use axum::Router;

use crate::state::AppState;

pub mod handlers;

pub fn router() -> Router<AppState> {
    handlers::newsletter_routes()
}
