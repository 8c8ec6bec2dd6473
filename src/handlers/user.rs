//! User reputation API handlers

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::AuthenticatedUser;
use crate::error::LendingResult;
use crate::loan::{CreditHistoryEntry, LoanService};
use crate::models::{ApiResponse, User};
use crate::services::ScoringService;

/// GET /api/users/me - own profile with freshly recomputed scores
pub async fn get_me(
    State(scoring): State<Arc<ScoringService>>,
    user: AuthenticatedUser,
) -> LendingResult<Json<ApiResponse<User>>> {
    let profile = scoring.profile(user.user_id).await?;
    Ok(Json(ApiResponse::ok(profile)))
}

/// GET /api/users/:id/credit-history
pub async fn get_credit_history(
    State(loans): State<Arc<LoanService>>,
    user: AuthenticatedUser,
    Path(borrower_id): Path<Uuid>,
) -> LendingResult<Json<ApiResponse<Vec<CreditHistoryEntry>>>> {
    let history = loans.credit_history(user.user_id, borrower_id).await?;
    Ok(Json(ApiResponse::ok(history)))
}
