//! Ledger storage abstraction
//!
//! The lifecycle manager decides *what* changes; the store applies a decided
//! change as one atomic unit. Every unit is guarded by the loan's `version`
//! (compare-and-swap), by a balance floor for each debit, and optionally by
//! the rated user's `total_ratings`. If any guard fails nothing is written and
//! the caller is told which guard tripped so it can re-read and re-decide.

mod memory;
mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::loan::{LoanFilter, LoanRequest, LoanStatus, Repayment};
use crate::models::{ActivityEntry, User, UserRole};

/// Storage failures. Guard failures are not errors; see [`CommitOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("record already exists")]
    Conflict,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Query(err.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A balance field mutation applied inside a transition unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChange {
    /// `available_balance -= amount`, only if `available_balance >= amount`
    DebitAvailable { user_id: Uuid, amount: Decimal },
    /// `available_balance += amount`
    CreditAvailable { user_id: Uuid, amount: Decimal },
    /// `total_lent += amount`
    AddTotalLent { user_id: Uuid, amount: Decimal },
    /// `total_borrowed += amount`
    AddTotalBorrowed { user_id: Uuid, amount: Decimal },
}

impl BalanceChange {
    pub fn user_id(&self) -> Uuid {
        match self {
            BalanceChange::DebitAvailable { user_id, .. }
            | BalanceChange::CreditAvailable { user_id, .. }
            | BalanceChange::AddTotalLent { user_id, .. }
            | BalanceChange::AddTotalBorrowed { user_id, .. } => *user_id,
        }
    }
}

/// New rating aggregate for a user, guarded by the count it was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingAggregateChange {
    pub user_id: Uuid,
    pub expected_total_ratings: i32,
    pub total_ratings: i32,
    pub average_rating: Decimal,
}

/// Everything one lifecycle transition writes
#[derive(Debug, Clone)]
pub struct LoanTransition {
    /// The loan's new state. `loan.version` is the version it was derived from.
    pub loan: LoanRequest,
    pub balance_changes: Vec<BalanceChange>,
    pub repayment: Option<Repayment>,
    pub rating: Option<RatingAggregateChange>,
}

impl LoanTransition {
    pub fn loan_only(loan: LoanRequest) -> Self {
        Self {
            loan,
            balance_changes: Vec::new(),
            repayment: None,
            rating: None,
        }
    }
}

/// Result of attempting a transition unit
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Applied; carries the loan as stored (version bumped)
    Committed(LoanRequest),
    /// The loan changed since it was read
    StaleLoan,
    /// A guarded debit would take the balance below zero
    InsufficientFunds { user_id: Uuid },
    /// The repayment's transaction reference was already recorded for this loan
    DuplicateRepayment,
    /// The rated user's aggregate changed since it was read
    StaleRating,
}

/// Loan counts by status for one borrower
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BorrowerLoanCounts {
    pub completed: i64,
    pub in_progress: i64,
    pub defaulted: i64,
}

/// Timing facts of one repayment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepaymentTiming {
    pub is_late: bool,
    pub days_late: i32,
}

/// Storage backend for the lending engine
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn fetch_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    async fn fetch_loan(&self, id: Uuid) -> StoreResult<Option<LoanRequest>>;

    /// Loans matching `filter`, newest first, plus the unpaginated total
    async fn list_loans(&self, filter: &LoanFilter) -> StoreResult<(Vec<LoanRequest>, i64)>;

    /// Repayments of a loan, newest first
    async fn list_repayments(&self, loan_id: Uuid) -> StoreResult<Vec<Repayment>>;

    async fn find_repayment_by_reference(
        &self,
        loan_id: Uuid,
        reference: &str,
    ) -> StoreResult<Option<Repayment>>;

    async fn insert_loan(&self, loan: &LoanRequest) -> StoreResult<()>;

    /// Apply a transition unit atomically, or nothing at all
    async fn commit_transition(&self, transition: LoanTransition) -> StoreResult<CommitOutcome>;

    /// Completed loans where the user acted in `role`
    async fn count_completed_loans(&self, user_id: Uuid, role: UserRole) -> StoreResult<i64>;

    async fn borrower_loan_counts(&self, borrower_id: Uuid) -> StoreResult<BorrowerLoanCounts>;

    async fn repayment_timings(&self, borrower_id: Uuid) -> StoreResult<Vec<RepaymentTiming>>;

    async fn save_scores(
        &self,
        user_id: Uuid,
        trust_score: i32,
        repayment_score: Option<i32>,
    ) -> StoreResult<()>;

    /// Raw platform settings as key/value pairs
    async fn load_settings(&self) -> StoreResult<HashMap<String, String>>;

    async fn record_activity(&self, entry: &ActivityEntry) -> StoreResult<()>;
}

/// Loan statuses counted towards repayment history
pub const SCORED_BORROWER_STATUSES: [LoanStatus; 3] = [
    LoanStatus::Completed,
    LoanStatus::InProgress,
    LoanStatus::Defaulted,
];
