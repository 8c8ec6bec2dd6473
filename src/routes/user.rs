//! User route definitions

use axum::{routing::get, Router};

use crate::app_state::AppState;
use crate::handlers::user::{get_credit_history, get_me};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/api/users/me", get(get_me))
        .route("/api/users/:id/credit-history", get(get_credit_history))
}
