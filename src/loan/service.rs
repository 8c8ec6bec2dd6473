//! Loan service layer - lifecycle transitions and loan queries
//!
//! Each transition reads the loan, decides the new state and balance deltas
//! from that snapshot, and hands the whole decision to the store as one unit.
//! A unit that lost a race is re-decided from fresh state, never reapplied.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::model::{
    CreateLoanRequest, CreditHistoryEntry, LoanDetails, LoanEvent, LoanFilter, LoanRequest,
    LoanStatus, MyLoansQuery, PendingLoansQuery, RateCounterpartyRequest, RatingSide,
    RecordRepaymentRequest, Repayment, RepaymentReceipt, RepaymentStatus,
};
use super::terms;
use crate::config::PlatformSettings;
use crate::error::{LendingError, LendingResult};
use crate::models::{
    ActivityAction, ActivityEntry, PaginatedResponse, PaginationParams, PartySummary, User,
    UserRole,
};
use crate::services::rating;
use crate::services::ScoringService;
use crate::store::{BalanceChange, CommitOutcome, LedgerStore, LoanTransition};

/// Upper bound on re-decide rounds for one request before giving up with `Conflict`
const MAX_COMMIT_ATTEMPTS: usize = 5;

/// Exclusive upper bound on a loan's annual interest rate, in percent
const MAX_INTEREST_RATE: i64 = 1000;

const CANCELLED_BY_BORROWER: &str = "Cancelled by borrower";

/// Receives lifecycle events after a transition commits
///
/// Delivery is best-effort: implementations log their own failures.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: LoanEvent);
}

/// What a committed unit produced
enum Applied {
    Loan(LoanRequest),
    DuplicateRepayment,
}

/// Loan service for managing the loan lifecycle
#[derive(Clone)]
pub struct LoanService {
    store: Arc<dyn LedgerStore>,
    scoring: ScoringService,
    events: Arc<dyn EventSink>,
}

impl LoanService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        scoring: ScoringService,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            scoring,
            events,
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Create a pending loan request
    pub async fn create_loan_request(
        &self,
        borrower_id: Uuid,
        request: CreateLoanRequest,
    ) -> LendingResult<LoanRequest> {
        let borrower = self.load_user(borrower_id).await?;
        if borrower.role != UserRole::Borrower || !borrower.is_onboarded() {
            return Err(LendingError::Forbidden(
                "Only onboarded borrowers can request loans".to_string(),
            ));
        }

        let purpose = request.purpose.trim().to_string();
        if purpose.is_empty() {
            return Err(LendingError::Validation("Purpose is required".to_string()));
        }

        let settings = self.platform_settings().await?;

        let interest_rate = request
            .interest_rate
            .unwrap_or(settings.default_interest_rate);
        if interest_rate < Decimal::ZERO || interest_rate >= Decimal::from(MAX_INTEREST_RATE) {
            return Err(LendingError::Validation(format!(
                "Interest rate must be at least 0 and below {}",
                MAX_INTEREST_RATE
            )));
        }

        let amount = terms::round_money(request.amount);
        if !settings.amount_in_range(amount) {
            return Err(LendingError::Validation(format!(
                "Amount must be between {} and {}",
                settings.min_transaction_amount, settings.max_transaction_amount
            )));
        }

        if !settings.duration_in_range(request.duration) {
            return Err(LendingError::Validation(format!(
                "Duration must be between {} and {} days",
                settings.min_loan_duration_days, settings.max_loan_duration_days
            )));
        }

        let loan = LoanRequest::new_pending(
            borrower_id,
            amount,
            purpose,
            request.duration,
            interest_rate,
            Utc::now(),
        );
        self.store.insert_loan(&loan).await?;

        tracing::info!(
            loan_id = %loan.id,
            borrower_id = %borrower_id,
            amount = %loan.amount,
            duration = loan.duration,
            "Loan request created"
        );

        self.log_activity(
            borrower_id,
            ActivityAction::CreateLoanRequest,
            format!("Created loan request for {}", loan.amount),
            loan.id,
        )
        .await;
        self.events.publish(LoanEvent::Requested {
            loan_id: loan.id,
            borrower_id,
            amount: loan.amount,
        });

        Ok(loan)
    }

    /// Accept a pending request and commit the lender's funds
    pub async fn accept_loan_request(
        &self,
        lender_id: Uuid,
        loan_id: Uuid,
    ) -> LendingResult<LoanRequest> {
        let lender = self.load_user(lender_id).await?;
        if lender.role != UserRole::Lender || !lender.is_onboarded() {
            return Err(LendingError::Forbidden(
                "Only onboarded lenders can accept loan requests".to_string(),
            ));
        }

        let applied = self
            .commit_with_retry(loan_id, |mut loan| {
                if loan.status != LoanStatus::Pending {
                    return Err(LendingError::InvalidState(
                        "This loan request is no longer available".to_string(),
                    ));
                }
                if lender.available_balance < loan.amount {
                    return Err(insufficient_balance());
                }

                let now = Utc::now();
                let total = terms::total_repayable(loan.amount, loan.interest_rate, loan.duration);

                loan.lender_id = Some(lender_id);
                loan.status = LoanStatus::Accepted;
                loan.accepted_at = Some(now);
                loan.due_date = Some(terms::due_date(now, loan.duration));
                loan.total_repayable = Some(total);
                loan.remaining_amount = Some(total);
                loan.is_contact_shared = true;
                loan.contact_shared_at = Some(now);

                let debit = BalanceChange::DebitAvailable {
                    user_id: lender_id,
                    amount: loan.amount,
                };
                Ok(LoanTransition {
                    balance_changes: vec![debit],
                    ..LoanTransition::loan_only(loan)
                })
            })
            .await?;
        let loan = expect_loan(applied)?;

        tracing::info!(
            loan_id = %loan.id,
            lender_id = %lender_id,
            total_repayable = ?loan.total_repayable,
            "Loan request accepted"
        );

        self.log_activity(
            lender_id,
            ActivityAction::AcceptLoanRequest,
            format!("Accepted loan request for {}", loan.amount),
            loan.id,
        )
        .await;
        self.events.publish(LoanEvent::Accepted {
            loan_id: loan.id,
            borrower_id: loan.borrower_id,
            lender_id,
        });

        Ok(loan)
    }

    /// Borrower confirms the funds arrived
    pub async fn mark_fulfilled(
        &self,
        borrower_id: Uuid,
        loan_id: Uuid,
    ) -> LendingResult<LoanRequest> {
        let applied = self
            .commit_with_retry(loan_id, |mut loan| {
                if loan.borrower_id != borrower_id {
                    return Err(loan_not_found());
                }
                if loan.status != LoanStatus::Accepted {
                    return Err(LendingError::InvalidState(
                        "This loan request cannot be marked as fulfilled".to_string(),
                    ));
                }
                let lender_id = loan.lender_id.ok_or_else(missing_lender)?;

                loan.status = LoanStatus::InProgress;
                loan.fulfilled_at = Some(Utc::now());

                let balance_changes = vec![
                    BalanceChange::AddTotalBorrowed {
                        user_id: borrower_id,
                        amount: loan.amount,
                    },
                    BalanceChange::AddTotalLent {
                        user_id: lender_id,
                        amount: loan.amount,
                    },
                ];
                Ok(LoanTransition {
                    balance_changes,
                    ..LoanTransition::loan_only(loan)
                })
            })
            .await?;
        let loan = expect_loan(applied)?;
        let lender_id = loan.lender_id.ok_or_else(missing_lender)?;

        tracing::info!(loan_id = %loan.id, borrower_id = %borrower_id, "Loan marked as fulfilled");

        self.log_activity(
            borrower_id,
            ActivityAction::FulfillLoan,
            format!("Confirmed receipt of {}", loan.amount),
            loan.id,
        )
        .await;
        self.events.publish(LoanEvent::Fulfilled {
            loan_id: loan.id,
            lender_id,
        });

        Ok(loan)
    }

    /// Lender records a repayment received from the borrower
    ///
    /// A repeated `transaction_reference` returns the originally recorded
    /// repayment with `replayed` set and applies nothing.
    pub async fn record_repayment(
        &self,
        lender_id: Uuid,
        loan_id: Uuid,
        request: RecordRepaymentRequest,
    ) -> LendingResult<RepaymentReceipt> {
        if request.amount <= Decimal::ZERO {
            return Err(LendingError::Validation(
                "Repayment amount must be greater than zero".to_string(),
            ));
        }
        let amount = terms::round_money(request.amount);
        if amount > terms::MAX_MONEY {
            return Err(LendingError::Validation(format!(
                "Repayment amount must not exceed {}",
                terms::MAX_MONEY
            )));
        }
        let reference = request
            .transaction_reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        if let Some(reference) = reference.as_deref() {
            let loan = self.load_loan(loan_id).await?;
            if loan.lender_id != Some(lender_id) {
                return Err(loan_not_found());
            }
            if let Some(receipt) = self.replay_repayment(loan_id, reference).await? {
                return Ok(receipt);
            }
        }

        let mut recorded: Option<Repayment> = None;
        let outcome = self
            .commit_with_retry(loan_id, |mut loan| {
                if loan.lender_id != Some(lender_id) {
                    return Err(loan_not_found());
                }
                if loan.status != LoanStatus::InProgress {
                    return Err(LendingError::InvalidState(
                        "Loan request is not in progress".to_string(),
                    ));
                }
                let total = loan.total_repayable.ok_or_else(|| {
                    LendingError::Internal("In-progress loan has no repayable total".to_string())
                })?;
                let due = loan.due_date.ok_or_else(|| {
                    LendingError::Internal("In-progress loan has no due date".to_string())
                })?;

                let now = Utc::now();
                let lateness = terms::lateness(due, now);
                let repayment = Repayment {
                    id: Uuid::new_v4(),
                    loan_request_id: loan.id,
                    borrower_id: loan.borrower_id,
                    lender_id,
                    amount,
                    payment_date: now,
                    payment_method: request.payment_method,
                    transaction_reference: reference.clone(),
                    status: RepaymentStatus::Confirmed,
                    confirmed_by_lender: true,
                    confirmed_at: Some(now),
                    remarks: request.remarks.clone(),
                    is_late: lateness.is_late,
                    days_late: lateness.days_late,
                    created_at: now,
                };

                loan.amount_repaid = loan
                    .amount_repaid
                    .checked_add(amount)
                    .filter(|repaid| *repaid <= terms::MAX_MONEY)
                    .ok_or_else(|| {
                        LendingError::Validation(
                            "Repayment would exceed the largest recordable total".to_string(),
                        )
                    })?;
                let remaining = terms::remaining_after(total, loan.amount_repaid);
                loan.remaining_amount = Some(remaining);
                if request.remarks.is_some() {
                    loan.remarks = request.remarks.clone();
                }

                let mut balance_changes = Vec::new();
                if remaining.is_zero() {
                    loan.status = LoanStatus::Completed;
                    loan.completed_at = Some(now);
                    balance_changes.push(BalanceChange::CreditAvailable {
                        user_id: lender_id,
                        amount: total,
                    });
                }

                recorded = Some(repayment.clone());
                Ok(LoanTransition {
                    loan,
                    balance_changes,
                    repayment: Some(repayment),
                    rating: None,
                })
            })
            .await;

        let applied = match outcome {
            Ok(applied) => applied,
            Err(err) => {
                // The same reference may have completed the loan while we re-read it.
                if let Some(reference) = reference.as_deref() {
                    if let Some(receipt) = self.replay_repayment(loan_id, reference).await? {
                        return Ok(receipt);
                    }
                }
                return Err(err);
            }
        };

        let loan = match applied {
            Applied::Loan(loan) => loan,
            Applied::DuplicateRepayment => {
                // A concurrent request with the same reference won the race.
                let reference = reference.as_deref().unwrap_or_default();
                return self
                    .replay_repayment(loan_id, reference)
                    .await?
                    .ok_or_else(|| {
                        LendingError::Conflict("Repayment reference already used".to_string())
                    });
            }
        };
        let repayment = recorded.ok_or_else(|| {
            LendingError::Internal("Committed repayment was not captured".to_string())
        })?;
        let remaining = loan.remaining_amount.unwrap_or_default();

        tracing::info!(
            loan_id = %loan.id,
            repayment_id = %repayment.id,
            amount = %repayment.amount,
            remaining = %remaining,
            is_late = repayment.is_late,
            "Repayment recorded"
        );

        self.log_activity(
            lender_id,
            ActivityAction::RecordRepayment,
            format!("Recorded repayment of {}", repayment.amount),
            loan.id,
        )
        .await;
        self.events.publish(LoanEvent::PaymentRecorded {
            loan_id: loan.id,
            borrower_id: loan.borrower_id,
            amount: repayment.amount,
            remaining_amount: remaining,
        });

        if loan.status == LoanStatus::Completed {
            tracing::info!(loan_id = %loan.id, "Loan fully repaid");
            self.refresh_scores(loan.borrower_id).await;
            self.events.publish(LoanEvent::Completed {
                loan_id: loan.id,
                borrower_id: loan.borrower_id,
                lender_id,
            });
        }

        Ok(RepaymentReceipt {
            repayment,
            loan,
            replayed: false,
        })
    }

    /// Borrower withdraws a pending request
    pub async fn cancel_loan_request(
        &self,
        borrower_id: Uuid,
        loan_id: Uuid,
    ) -> LendingResult<LoanRequest> {
        let applied = self
            .commit_with_retry(loan_id, |mut loan| {
                if loan.borrower_id != borrower_id {
                    return Err(loan_not_found());
                }
                if loan.status != LoanStatus::Pending {
                    return Err(LendingError::InvalidState(
                        "Only pending loan requests can be cancelled".to_string(),
                    ));
                }
                loan.status = LoanStatus::Rejected;
                loan.remarks = Some(CANCELLED_BY_BORROWER.to_string());
                Ok(LoanTransition::loan_only(loan))
            })
            .await?;
        let loan = expect_loan(applied)?;

        tracing::info!(loan_id = %loan.id, borrower_id = %borrower_id, "Loan request cancelled");

        self.log_activity(
            borrower_id,
            ActivityAction::CancelLoanRequest,
            "Cancelled loan request".to_string(),
            loan.id,
        )
        .await;
        self.events.publish(LoanEvent::Cancelled { loan_id: loan.id });

        Ok(loan)
    }

    /// Rate the counterparty of a completed loan, once per side
    pub async fn rate_counterparty(
        &self,
        user_id: Uuid,
        loan_id: Uuid,
        request: RateCounterpartyRequest,
    ) -> LendingResult<LoanRequest> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let mut loan = self.load_loan(loan_id).await?;
            if loan.status != LoanStatus::Completed {
                return Err(LendingError::InvalidState(
                    "Can only rate completed loans".to_string(),
                ));
            }

            let side = if loan.borrower_id == user_id {
                RatingSide::Lender
            } else if loan.lender_id == Some(user_id) {
                RatingSide::Borrower
            } else {
                return Err(LendingError::Forbidden(
                    "You are not part of this loan".to_string(),
                ));
            };

            let (existing, target_id) = match side {
                RatingSide::Lender => (loan.lender_rating, loan.lender_id.ok_or_else(missing_lender)?),
                RatingSide::Borrower => (loan.borrower_rating, loan.borrower_id),
            };
            if existing.is_some() {
                return Err(LendingError::AlreadyRated(format!(
                    "You have already rated this {}",
                    match side {
                        RatingSide::Lender => "lender",
                        RatingSide::Borrower => "borrower",
                    }
                )));
            }

            if !(1..=5).contains(&request.rating) {
                return Err(LendingError::Validation(
                    "Rating must be between 1 and 5".to_string(),
                ));
            }

            match side {
                RatingSide::Lender => {
                    loan.lender_rating = Some(request.rating);
                    loan.lender_review = request.review.clone();
                }
                RatingSide::Borrower => {
                    loan.borrower_rating = Some(request.rating);
                    loan.borrower_review = request.review.clone();
                }
            }

            let target = self.load_user(target_id).await?;
            let change = rating::aggregate_change(&target, request.rating);
            let transition = LoanTransition {
                rating: Some(change),
                ..LoanTransition::loan_only(loan)
            };

            match self.store.commit_transition(transition).await? {
                CommitOutcome::Committed(loan) => {
                    tracing::info!(
                        loan_id = %loan.id,
                        target_user_id = %target_id,
                        rating = request.rating,
                        average_rating = %change.average_rating,
                        "Counterparty rated"
                    );

                    if let Err(e) = self.scoring.recompute_trust_score(target_id).await {
                        tracing::warn!(user_id = %target_id, error = %e, "Trust score refresh failed");
                    }
                    self.log_activity(
                        user_id,
                        ActivityAction::RateUser,
                        format!("Rated user {} stars", request.rating),
                        loan.id,
                    )
                    .await;
                    self.events.publish(LoanEvent::Rated {
                        loan_id: loan.id,
                        target_user_id: target_id,
                        rating: request.rating,
                    });
                    return Ok(loan);
                }
                CommitOutcome::StaleLoan | CommitOutcome::StaleRating => {
                    tracing::debug!(loan_id = %loan_id, attempt, "Rating lost a race, re-reading");
                }
                other => {
                    return Err(LendingError::Internal(format!(
                        "Unexpected outcome for rating: {:?}",
                        other
                    )))
                }
            }
        }

        Err(retries_exhausted(loan_id))
    }

    /// Either party flags an active loan as disputed
    pub async fn mark_disputed(&self, user_id: Uuid, loan_id: Uuid) -> LendingResult<LoanRequest> {
        let applied = self
            .commit_with_retry(loan_id, |mut loan| {
                if !loan.is_party(user_id) {
                    return Err(LendingError::Forbidden(
                        "You are not part of this loan".to_string(),
                    ));
                }
                if !loan.status.can_transition_to(LoanStatus::Disputed) {
                    return Err(LendingError::InvalidState(format!(
                        "A {} loan cannot be disputed",
                        loan.status
                    )));
                }
                loan.status = LoanStatus::Disputed;
                Ok(LoanTransition::loan_only(loan))
            })
            .await?;
        let loan = expect_loan(applied)?;

        tracing::info!(loan_id = %loan.id, raised_by = %user_id, "Loan marked as disputed");

        self.log_activity(
            user_id,
            ActivityAction::DisputeLoan,
            "Raised a dispute".to_string(),
            loan.id,
        )
        .await;
        self.events.publish(LoanEvent::StatusChanged {
            loan_id: loan.id,
            status: loan.status,
        });

        Ok(loan)
    }

    /// Administrator marks an in-progress loan as defaulted
    pub async fn mark_defaulted(&self, admin_id: Uuid, loan_id: Uuid) -> LendingResult<LoanRequest> {
        let admin = self.load_user(admin_id).await?;
        if admin.role != UserRole::Admin {
            return Err(LendingError::Forbidden(
                "Only administrators can mark loans as defaulted".to_string(),
            ));
        }

        let applied = self
            .commit_with_retry(loan_id, |mut loan| {
                if loan.status != LoanStatus::InProgress {
                    return Err(LendingError::InvalidState(format!(
                        "A {} loan cannot be marked as defaulted",
                        loan.status
                    )));
                }
                loan.status = LoanStatus::Defaulted;
                Ok(LoanTransition::loan_only(loan))
            })
            .await?;
        let loan = expect_loan(applied)?;

        tracing::warn!(loan_id = %loan.id, borrower_id = %loan.borrower_id, "Loan marked as defaulted");

        self.refresh_scores(loan.borrower_id).await;
        self.log_activity(
            admin_id,
            ActivityAction::DefaultLoan,
            "Marked loan as defaulted".to_string(),
            loan.id,
        )
        .await;
        self.events.publish(LoanEvent::StatusChanged {
            loan_id: loan.id,
            status: loan.status,
        });

        Ok(loan)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Loan with repayments and party summaries
    ///
    /// Contact details appear only once shared, and only to the parties or an admin.
    pub async fn loan_details(&self, viewer_id: Uuid, loan_id: Uuid) -> LendingResult<LoanDetails> {
        let loan = self.load_loan(loan_id).await?;
        let viewer = self.load_user(viewer_id).await?;

        let show_contacts = loan.is_contact_shared
            && (loan.is_party(viewer_id) || viewer.role == UserRole::Admin);

        let borrower = self
            .store
            .fetch_user(loan.borrower_id)
            .await?
            .map(|u| PartySummary::from_user(&u, show_contacts));
        let lender = match loan.lender_id {
            Some(id) => self
                .store
                .fetch_user(id)
                .await?
                .map(|u| PartySummary::from_user(&u, show_contacts)),
            None => None,
        };
        let repayments = self.store.list_repayments(loan.id).await?;

        Ok(LoanDetails {
            loan,
            borrower,
            lender,
            repayments,
        })
    }

    /// Marketplace listing of visible pending requests
    pub async fn pending_requests(
        &self,
        lender_id: Uuid,
        query: PendingLoansQuery,
    ) -> LendingResult<PaginatedResponse<LoanRequest>> {
        let lender = self.load_user(lender_id).await?;
        if lender.role != UserRole::Lender || !lender.is_onboarded() {
            return Err(LendingError::Forbidden(
                "Only onboarded lenders can browse loan requests".to_string(),
            ));
        }

        let (page, limit) = PaginationParams {
            page: query.page,
            limit: query.limit,
        }
        .resolve();
        let filter = LoanFilter {
            status: Some(LoanStatus::Pending),
            visible_only: true,
            min_amount: query.min_amount,
            max_amount: query.max_amount,
            offset: PaginationParams::offset(page, limit),
            limit,
            ..Default::default()
        };
        let (loans, total) = self.store.list_loans(&filter).await?;

        Ok(PaginatedResponse::new(loans, total, page, limit))
    }

    /// A borrower's own requests
    pub async fn my_requests(
        &self,
        borrower_id: Uuid,
        query: MyLoansQuery,
    ) -> LendingResult<PaginatedResponse<LoanRequest>> {
        self.require_role(borrower_id, UserRole::Borrower).await?;
        let filter = LoanFilter {
            borrower_id: Some(borrower_id),
            ..Default::default()
        };
        self.list_own(filter, query).await
    }

    /// Loans a lender has funded
    pub async fn my_lending(
        &self,
        lender_id: Uuid,
        query: MyLoansQuery,
    ) -> LendingResult<PaginatedResponse<LoanRequest>> {
        self.require_role(lender_id, UserRole::Lender).await?;
        let filter = LoanFilter {
            lender_id: Some(lender_id),
            ..Default::default()
        };
        self.list_own(filter, query).await
    }

    /// Per-loan repayment history of a borrower, newest first
    ///
    /// Visible to the borrower, to lenders and to admins.
    pub async fn credit_history(
        &self,
        viewer_id: Uuid,
        borrower_id: Uuid,
    ) -> LendingResult<Vec<CreditHistoryEntry>> {
        let viewer = self.load_user(viewer_id).await?;
        if viewer_id != borrower_id && viewer.role == UserRole::Borrower {
            return Err(LendingError::Forbidden(
                "Borrowers can only view their own credit history".to_string(),
            ));
        }
        self.load_user(borrower_id).await?;

        let filter = LoanFilter {
            borrower_id: Some(borrower_id),
            limit: i64::MAX,
            ..Default::default()
        };
        let (loans, _) = self.store.list_loans(&filter).await?;

        let mut history = Vec::with_capacity(loans.len());
        for loan in loans {
            let repayments = self.store.list_repayments(loan.id).await?;
            history.push(CreditHistoryEntry {
                loan_id: loan.id,
                amount: loan.amount,
                status: loan.status,
                lender_id: loan.lender_id,
                created_at: loan.created_at,
                completed_at: loan.completed_at,
                total_repaid: repayments.iter().map(|r| r.amount).sum(),
                late_payments: repayments.iter().filter(|r| r.is_late).count() as i64,
            });
        }

        Ok(history)
    }

    /// Current platform tunables
    pub async fn platform_settings(&self) -> LendingResult<PlatformSettings> {
        let entries = self.store.load_settings().await?;
        Ok(PlatformSettings::from_entries(&entries))
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn list_own(
        &self,
        mut filter: LoanFilter,
        query: MyLoansQuery,
    ) -> LendingResult<PaginatedResponse<LoanRequest>> {
        let (page, limit) = PaginationParams {
            page: query.page,
            limit: query.limit,
        }
        .resolve();
        filter.status = query.status;
        filter.offset = PaginationParams::offset(page, limit);
        filter.limit = limit;

        let (loans, total) = self.store.list_loans(&filter).await?;
        Ok(PaginatedResponse::new(loans, total, page, limit))
    }

    async fn require_role(&self, user_id: Uuid, role: UserRole) -> LendingResult<User> {
        let user = self.load_user(user_id).await?;
        if user.role != role {
            return Err(LendingError::Forbidden(format!(
                "This action requires the {} role",
                role.as_str()
            )));
        }
        Ok(user)
    }

    async fn load_user(&self, user_id: Uuid) -> LendingResult<User> {
        self.store
            .fetch_user(user_id)
            .await?
            .ok_or_else(|| LendingError::NotFound("User not found".to_string()))
    }

    async fn load_loan(&self, loan_id: Uuid) -> LendingResult<LoanRequest> {
        self.store
            .fetch_loan(loan_id)
            .await?
            .ok_or_else(loan_not_found)
    }

    async fn replay_repayment(
        &self,
        loan_id: Uuid,
        reference: &str,
    ) -> LendingResult<Option<RepaymentReceipt>> {
        let Some(repayment) = self
            .store
            .find_repayment_by_reference(loan_id, reference)
            .await?
        else {
            return Ok(None);
        };
        let loan = self.load_loan(loan_id).await?;

        tracing::info!(
            loan_id = %loan_id,
            repayment_id = %repayment.id,
            "Repayment reference already recorded, returning original"
        );

        Ok(Some(RepaymentReceipt {
            repayment,
            loan,
            replayed: true,
        }))
    }

    /// Read, decide, commit; re-decide from fresh state when the unit went stale
    async fn commit_with_retry<F>(&self, loan_id: Uuid, mut decide: F) -> LendingResult<Applied>
    where
        F: FnMut(LoanRequest) -> LendingResult<LoanTransition>,
    {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let loan = self.load_loan(loan_id).await?;
            let transition = decide(loan)?;

            match self.store.commit_transition(transition).await? {
                CommitOutcome::Committed(loan) => return Ok(Applied::Loan(loan)),
                CommitOutcome::DuplicateRepayment => return Ok(Applied::DuplicateRepayment),
                CommitOutcome::InsufficientFunds { user_id } => {
                    tracing::debug!(loan_id = %loan_id, user_id = %user_id, "Guarded debit refused");
                    return Err(insufficient_balance());
                }
                CommitOutcome::StaleLoan | CommitOutcome::StaleRating => {
                    tracing::debug!(loan_id = %loan_id, attempt, "Stale transition, re-reading");
                }
            }
        }

        Err(retries_exhausted(loan_id))
    }

    async fn log_activity(
        &self,
        user_id: Uuid,
        action: ActivityAction,
        description: String,
        entity_id: Uuid,
    ) {
        let entry = ActivityEntry {
            user_id,
            action,
            description,
            entity_id,
        };
        if let Err(e) = self.store.record_activity(&entry).await {
            tracing::warn!(user_id = %user_id, action = ?action, error = %e, "Failed to record activity");
        }
    }

    async fn refresh_scores(&self, user_id: Uuid) {
        if let Err(e) = self.scoring.recompute_scores(user_id).await {
            tracing::warn!(user_id = %user_id, error = %e, "Score recomputation failed");
        }
    }
}

fn expect_loan(applied: Applied) -> LendingResult<LoanRequest> {
    match applied {
        Applied::Loan(loan) => Ok(loan),
        Applied::DuplicateRepayment => Err(LendingError::Internal(
            "Unexpected duplicate repayment outcome".to_string(),
        )),
    }
}

fn loan_not_found() -> LendingError {
    LendingError::NotFound("Loan request not found".to_string())
}

fn missing_lender() -> LendingError {
    LendingError::Internal("Funded loan has no lender".to_string())
}

fn insufficient_balance() -> LendingError {
    LendingError::InsufficientFunds("Insufficient lending balance".to_string())
}

fn retries_exhausted(loan_id: Uuid) -> LendingError {
    tracing::warn!(loan_id = %loan_id, attempts = MAX_COMMIT_ATTEMPTS, "Giving up after repeated conflicts");
    LendingError::Conflict("Loan request was modified concurrently, please retry".to_string())
}
