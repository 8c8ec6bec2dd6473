//! Data models shared across the lending engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

/// User model
///
/// Identity fields belong to the identity subsystem. The lending engine only
/// ever writes the balance, score and rating columns.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct User {
    pub id: Uuid,
    pub role: UserRole,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_id_verified: bool,
    pub is_face_verified: bool,
    pub is_onboarding_complete: bool,
    pub available_balance: Decimal,
    pub lending_limit: Decimal,
    pub total_lent: Decimal,
    pub total_borrowed: Decimal,
    pub trust_score: i32,
    pub repayment_score: i32,
    pub total_ratings: i32,
    pub average_rating: Decimal,
    pub report_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_onboarded(&self) -> bool {
        self.is_onboarding_complete
    }
}

/// User roles
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Lender,
    Borrower,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Lender => "lender",
            UserRole::Borrower => "borrower",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(UserRole::Admin),
            "lender" => Some(UserRole::Lender),
            "borrower" => Some(UserRole::Borrower),
            _ => None,
        }
    }
}

/// Public view of a loan party, with contact details only when shared
#[derive(Debug, Serialize, Clone)]
pub struct PartySummary {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub trust_score: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repayment_score: Option<i32>,
    pub average_rating: Decimal,
    pub total_ratings: i32,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl PartySummary {
    pub fn from_user(user: &User, contact_shared: bool) -> Self {
        let repayment_score = match user.role {
            UserRole::Borrower => Some(user.repayment_score),
            _ => None,
        };
        Self {
            id: user.id,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            trust_score: user.trust_score,
            repayment_score,
            average_rating: user.average_rating,
            total_ratings: user.total_ratings,
            email: if contact_shared { user.email.clone() } else { None },
            phone: if contact_shared { user.phone.clone() } else { None },
        }
    }
}

/// Activity log actions written after committed transitions
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "activity_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    CreateLoanRequest,
    AcceptLoanRequest,
    FulfillLoan,
    RecordRepayment,
    CancelLoanRequest,
    RateUser,
    DisputeLoan,
    DefaultLoan,
}

/// Activity log entry
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ActivityEntry {
    pub user_id: Uuid,
    pub action: ActivityAction,
    pub description: String,
    pub entity_id: Uuid,
}

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Pagination parameters
#[derive(Debug, Deserialize, Default, Clone, Copy)]
pub struct PaginationParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PaginationParams {
    /// Resolve to (page, limit) with the same clamping the listing queries use
    pub fn resolve(&self) -> (i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(20).clamp(1, 100);
        (page, limit)
    }

    /// Row offset of a resolved page, saturating for absurd page numbers
    pub fn offset(page: i64, limit: i64) -> i64 {
        page.saturating_sub(1).saturating_mul(limit)
    }
}

/// Paginated response
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, page: i64, limit: i64) -> Self {
        let total_pages = if limit > 0 { (total + limit - 1) / limit } else { 0 };
        Self {
            data,
            total,
            page,
            limit,
            total_pages,
        }
    }
}
