//! Route definitions for the PeerLend API

mod loan;
mod user;

pub use loan::loan_routes;
pub use user::user_routes;

use axum::{routing::get, Router};

use crate::app_state::AppState;
use crate::{middleware, websocket};

/// API routes and the event feed, with tracing and security headers applied
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket::ws_handler))
        .merge(loan_routes())
        .merge(user_routes())
        .with_state(state)
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(axum::middleware::from_fn(middleware::request_tracing))
}
