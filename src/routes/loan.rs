//! Loan route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::app_state::AppState;
use crate::handlers::loan::*;

pub fn loan_routes() -> Router<AppState> {
    Router::new()
        .route("/api/loans/request", post(create_loan_request))
        .route("/api/loans/pending", get(list_pending_requests))
        .route("/api/loans/my-requests", get(list_my_requests))
        .route("/api/loans/my-lending", get(list_my_lending))
        .route("/api/loans/:id", get(get_loan_details))
        .route("/api/loans/:id/accept", post(accept_loan_request))
        .route("/api/loans/:id/fulfill", post(mark_fulfilled))
        .route("/api/loans/:id/repayment", post(record_repayment))
        .route("/api/loans/:id/cancel", post(cancel_loan_request))
        .route("/api/loans/:id/rate", post(rate_counterparty))
        .route("/api/loans/:id/dispute", post(mark_disputed))
        .route("/api/loans/:id/default", post(mark_defaulted))
}
