//! Loan lifecycle API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::AuthenticatedUser;
use crate::error::LendingResult;
use crate::loan::{
    CreateLoanRequest, LoanDetails, LoanRequest, LoanService, MyLoansQuery, PendingLoansQuery,
    RateCounterpartyRequest, RecordRepaymentRequest, RepaymentReceipt,
};
use crate::models::{ApiResponse, PaginatedResponse};

/// POST /api/loans/request
pub async fn create_loan_request(
    State(loans): State<Arc<LoanService>>,
    user: AuthenticatedUser,
    Json(request): Json<CreateLoanRequest>,
) -> LendingResult<(StatusCode, Json<ApiResponse<LoanRequest>>)> {
    request.validate()?;
    let loan = loans.create_loan_request(user.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(loan))))
}

/// GET /api/loans/pending
pub async fn list_pending_requests(
    State(loans): State<Arc<LoanService>>,
    user: AuthenticatedUser,
    Query(query): Query<PendingLoansQuery>,
) -> LendingResult<Json<ApiResponse<PaginatedResponse<LoanRequest>>>> {
    let page = loans.pending_requests(user.user_id, query).await?;
    Ok(Json(ApiResponse::ok(page)))
}

/// GET /api/loans/my-requests
pub async fn list_my_requests(
    State(loans): State<Arc<LoanService>>,
    user: AuthenticatedUser,
    Query(query): Query<MyLoansQuery>,
) -> LendingResult<Json<ApiResponse<PaginatedResponse<LoanRequest>>>> {
    let page = loans.my_requests(user.user_id, query).await?;
    Ok(Json(ApiResponse::ok(page)))
}

/// GET /api/loans/my-lending
pub async fn list_my_lending(
    State(loans): State<Arc<LoanService>>,
    user: AuthenticatedUser,
    Query(query): Query<MyLoansQuery>,
) -> LendingResult<Json<ApiResponse<PaginatedResponse<LoanRequest>>>> {
    let page = loans.my_lending(user.user_id, query).await?;
    Ok(Json(ApiResponse::ok(page)))
}

/// GET /api/loans/:id
pub async fn get_loan_details(
    State(loans): State<Arc<LoanService>>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
) -> LendingResult<Json<ApiResponse<LoanDetails>>> {
    let details = loans.loan_details(user.user_id, loan_id).await?;
    Ok(Json(ApiResponse::ok(details)))
}

/// POST /api/loans/:id/accept
pub async fn accept_loan_request(
    State(loans): State<Arc<LoanService>>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
) -> LendingResult<Json<ApiResponse<LoanRequest>>> {
    let loan = loans.accept_loan_request(user.user_id, loan_id).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

/// POST /api/loans/:id/fulfill
pub async fn mark_fulfilled(
    State(loans): State<Arc<LoanService>>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
) -> LendingResult<Json<ApiResponse<LoanRequest>>> {
    let loan = loans.mark_fulfilled(user.user_id, loan_id).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

/// POST /api/loans/:id/repayment
pub async fn record_repayment(
    State(loans): State<Arc<LoanService>>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
    Json(request): Json<RecordRepaymentRequest>,
) -> LendingResult<Json<ApiResponse<RepaymentReceipt>>> {
    request.validate()?;
    let receipt = loans.record_repayment(user.user_id, loan_id, request).await?;
    Ok(Json(ApiResponse::ok(receipt)))
}

/// POST /api/loans/:id/cancel
pub async fn cancel_loan_request(
    State(loans): State<Arc<LoanService>>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
) -> LendingResult<Json<ApiResponse<LoanRequest>>> {
    let loan = loans.cancel_loan_request(user.user_id, loan_id).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

/// POST /api/loans/:id/rate
///
/// The rating range is checked by the service, after the loan and party checks.
pub async fn rate_counterparty(
    State(loans): State<Arc<LoanService>>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
    Json(request): Json<RateCounterpartyRequest>,
) -> LendingResult<Json<ApiResponse<LoanRequest>>> {
    let loan = loans.rate_counterparty(user.user_id, loan_id, request).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

/// POST /api/loans/:id/dispute
pub async fn mark_disputed(
    State(loans): State<Arc<LoanService>>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
) -> LendingResult<Json<ApiResponse<LoanRequest>>> {
    let loan = loans.mark_disputed(user.user_id, loan_id).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

/// POST /api/loans/:id/default
pub async fn mark_defaulted(
    State(loans): State<Arc<LoanService>>,
    user: AuthenticatedUser,
    Path(loan_id): Path<Uuid>,
) -> LendingResult<Json<ApiResponse<LoanRequest>>> {
    let loan = loans.mark_defaulted(user.user_id, loan_id).await?;
    Ok(Json(ApiResponse::ok(loan)))
}
