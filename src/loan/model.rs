//! Loan models and data structures

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::models::PartySummary;

/// Loan request status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "loan_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,    // Created, visible to lenders
    Accepted,   // A lender committed funds
    Rejected,   // Cancelled by the borrower while pending
    Fulfilled,  // Legacy schema value, never produced by a transition
    InProgress, // Borrower confirmed receipt, repayments open
    Completed,  // Fully repaid
    Defaulted,  // Administratively marked as defaulted
    Disputed,   // Under dispute
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Accepted => "accepted",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Fulfilled => "fulfilled",
            LoanStatus::InProgress => "in_progress",
            LoanStatus::Completed => "completed",
            LoanStatus::Defaulted => "defaulted",
            LoanStatus::Disputed => "disputed",
        }
    }

    /// Whether the lifecycle permits moving from `self` to `next`
    pub fn can_transition_to(&self, next: LoanStatus) -> bool {
        use LoanStatus::*;
        match self {
            Pending => matches!(next, Accepted | Rejected),
            Accepted => matches!(next, InProgress | Disputed),
            InProgress => matches!(next, InProgress | Completed | Disputed | Defaulted),
            Fulfilled | Rejected | Completed | Defaulted | Disputed => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoanStatus::Rejected
                | LoanStatus::Completed
                | LoanStatus::Defaulted
                | LoanStatus::Disputed
        )
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loan request model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct LoanRequest {
    pub id: Uuid,
    pub borrower_id: Uuid,
    pub lender_id: Option<Uuid>,
    pub amount: Decimal,
    pub purpose: String,
    pub duration: i32, // days
    pub interest_rate: Decimal, // percent per annum
    pub status: LoanStatus,
    pub accepted_at: Option<DateTime<Utc>>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub total_repayable: Option<Decimal>,
    pub amount_repaid: Decimal,
    pub remaining_amount: Option<Decimal>,
    pub is_contact_shared: bool,
    pub contact_shared_at: Option<DateTime<Utc>>,
    pub borrower_rating: Option<i32>,
    pub borrower_review: Option<String>,
    pub lender_rating: Option<i32>,
    pub lender_review: Option<String>,
    pub remarks: Option<String>,
    pub is_visible: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoanRequest {
    /// Build a fresh pending request
    pub fn new_pending(
        borrower_id: Uuid,
        amount: Decimal,
        purpose: String,
        duration: i32,
        interest_rate: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            borrower_id,
            lender_id: None,
            amount,
            purpose,
            duration,
            interest_rate,
            status: LoanStatus::Pending,
            accepted_at: None,
            fulfilled_at: None,
            completed_at: None,
            due_date: None,
            total_repayable: None,
            amount_repaid: Decimal::ZERO,
            remaining_amount: None,
            is_contact_shared: false,
            contact_shared_at: None,
            borrower_rating: None,
            borrower_review: None,
            lender_rating: None,
            lender_review: None,
            remarks: None,
            is_visible: true,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.borrower_id == user_id || self.lender_id == Some(user_id)
    }
}

/// Payment method recorded with a repayment
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Upi,
    Cheque,
    Other,
}

/// Repayment confirmation status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "repayment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RepaymentStatus {
    Pending,
    Confirmed,
    Disputed,
}

/// Repayment model (append-only)
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct Repayment {
    pub id: Uuid,
    pub loan_request_id: Uuid,
    pub borrower_id: Uuid,
    pub lender_id: Uuid,
    pub amount: Decimal,
    pub payment_date: DateTime<Utc>,
    pub payment_method: Option<PaymentMethod>,
    pub transaction_reference: Option<String>,
    pub status: RepaymentStatus,
    pub confirmed_by_lender: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub remarks: Option<String>,
    pub is_late: bool,
    pub days_late: i32,
    pub created_at: DateTime<Utc>,
}

/// Which side of a loan a rating is about
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RatingSide {
    /// Lender rates the borrower
    Borrower,
    /// Borrower rates the lender
    Lender,
}

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Request to create a new loan request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateLoanRequest {
    pub amount: Decimal,
    #[validate(length(min = 1, message = "Purpose is required"))]
    pub purpose: String,
    pub duration: i32,
    pub interest_rate: Option<Decimal>,
}

/// Request to record a repayment
#[derive(Debug, Deserialize, Validate)]
pub struct RecordRepaymentRequest {
    pub amount: Decimal,
    pub payment_method: Option<PaymentMethod>,
    #[validate(length(max = 255))]
    pub transaction_reference: Option<String>,
    pub remarks: Option<String>,
}

/// Request to rate the counterparty of a completed loan
///
/// The 1..=5 range is enforced by the service after the party checks.
#[derive(Debug, Deserialize)]
pub struct RateCounterpartyRequest {
    pub rating: i32,
    pub review: Option<String>,
}

/// Result of recording a repayment
#[derive(Debug, Serialize, Clone)]
pub struct RepaymentReceipt {
    pub repayment: Repayment,
    pub loan: LoanRequest,
    /// True when the same transaction reference had already been recorded
    pub replayed: bool,
}

/// Query for the pending marketplace listing
#[derive(Debug, Deserialize, Default)]
pub struct PendingLoansQuery {
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Query for a party's own loans
#[derive(Debug, Deserialize, Default)]
pub struct MyLoansQuery {
    pub status: Option<LoanStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Store-level filter for listing loans
#[derive(Debug, Clone, Default)]
pub struct LoanFilter {
    pub borrower_id: Option<Uuid>,
    pub lender_id: Option<Uuid>,
    pub status: Option<LoanStatus>,
    pub visible_only: bool,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub offset: i64,
    pub limit: i64,
}

/// Loan with repayments and party summaries
#[derive(Debug, Serialize)]
pub struct LoanDetails {
    #[serde(flatten)]
    pub loan: LoanRequest,
    pub borrower: Option<PartySummary>,
    pub lender: Option<PartySummary>,
    pub repayments: Vec<Repayment>,
}

/// One row of a borrower's credit history
#[derive(Debug, Serialize, Clone)]
pub struct CreditHistoryEntry {
    pub loan_id: Uuid,
    pub amount: Decimal,
    pub status: LoanStatus,
    pub lender_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_repaid: Decimal,
    pub late_payments: i64,
}

/// Derived scores after recomputation
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ScoreSnapshot {
    pub trust_score: i32,
    pub repayment_score: i32,
}

/// Loan lifecycle events for real-time updates
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum LoanEvent {
    Requested {
        loan_id: Uuid,
        borrower_id: Uuid,
        amount: Decimal,
    },
    Accepted {
        loan_id: Uuid,
        borrower_id: Uuid,
        lender_id: Uuid,
    },
    Fulfilled {
        loan_id: Uuid,
        lender_id: Uuid,
    },
    PaymentRecorded {
        loan_id: Uuid,
        borrower_id: Uuid,
        amount: Decimal,
        remaining_amount: Decimal,
    },
    Completed {
        loan_id: Uuid,
        borrower_id: Uuid,
        lender_id: Uuid,
    },
    Cancelled {
        loan_id: Uuid,
    },
    Rated {
        loan_id: Uuid,
        target_user_id: Uuid,
        rating: i32,
    },
    StatusChanged {
        loan_id: Uuid,
        status: LoanStatus,
    },
}

impl LoanEvent {
    pub fn loan_id(&self) -> Uuid {
        match self {
            LoanEvent::Requested { loan_id, .. }
            | LoanEvent::Accepted { loan_id, .. }
            | LoanEvent::Fulfilled { loan_id, .. }
            | LoanEvent::PaymentRecorded { loan_id, .. }
            | LoanEvent::Completed { loan_id, .. }
            | LoanEvent::Cancelled { loan_id }
            | LoanEvent::Rated { loan_id, .. }
            | LoanEvent::StatusChanged { loan_id, .. } => *loan_id,
        }
    }
}
