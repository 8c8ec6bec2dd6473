//! PostgreSQL ledger store
//!
//! A transition unit is one transaction of conditional UPDATEs. A guard that
//! matches zero rows rolls the transaction back.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use super::{
    BalanceChange, BorrowerLoanCounts, CommitOutcome, LedgerStore, LoanTransition,
    RatingAggregateChange, RepaymentTiming, StoreError, StoreResult,
};
use crate::loan::{LoanFilter, LoanRequest, Repayment};
use crate::models::{ActivityEntry, User, UserRole};

/// Ledger store backed by a sqlx Postgres pool
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &LoanFilter) {
    builder.push(" WHERE TRUE");
    if let Some(borrower_id) = filter.borrower_id {
        builder.push(" AND borrower_id = ").push_bind(borrower_id);
    }
    if let Some(lender_id) = filter.lender_id {
        builder.push(" AND lender_id = ").push_bind(lender_id);
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status);
    }
    if filter.visible_only {
        builder.push(" AND is_visible = TRUE");
    }
    if let Some(min) = filter.min_amount {
        builder.push(" AND amount >= ").push_bind(min);
    }
    if let Some(max) = filter.max_amount {
        builder.push(" AND amount <= ").push_bind(max);
    }
}

async fn update_loan(
    tx: &mut Transaction<'_, Postgres>,
    loan: &LoanRequest,
) -> Result<Option<LoanRequest>, sqlx::Error> {
    sqlx::query_as::<_, LoanRequest>(
        r#"
        UPDATE loan_requests SET
            lender_id = $1, status = $2, accepted_at = $3, fulfilled_at = $4,
            completed_at = $5, due_date = $6, total_repayable = $7,
            amount_repaid = $8, remaining_amount = $9, is_contact_shared = $10,
            contact_shared_at = $11, borrower_rating = $12, borrower_review = $13,
            lender_rating = $14, lender_review = $15, remarks = $16,
            is_visible = $17, version = version + 1, updated_at = $18
        WHERE id = $19 AND version = $20
        RETURNING *
        "#,
    )
    .bind(loan.lender_id)
    .bind(loan.status)
    .bind(loan.accepted_at)
    .bind(loan.fulfilled_at)
    .bind(loan.completed_at)
    .bind(loan.due_date)
    .bind(loan.total_repayable)
    .bind(loan.amount_repaid)
    .bind(loan.remaining_amount)
    .bind(loan.is_contact_shared)
    .bind(loan.contact_shared_at)
    .bind(loan.borrower_rating)
    .bind(&loan.borrower_review)
    .bind(loan.lender_rating)
    .bind(&loan.lender_review)
    .bind(&loan.remarks)
    .bind(loan.is_visible)
    .bind(Utc::now())
    .bind(loan.id)
    .bind(loan.version)
    .fetch_optional(&mut **tx)
    .await
}

/// Returns false when a guarded debit matched no row
async fn apply_balance_change(
    tx: &mut Transaction<'_, Postgres>,
    change: &BalanceChange,
) -> Result<bool, sqlx::Error> {
    let (sql, amount) = match change {
        BalanceChange::DebitAvailable { amount, .. } => (
            "UPDATE users SET available_balance = available_balance - $1, updated_at = NOW() \
             WHERE id = $2 AND available_balance >= $1",
            amount,
        ),
        BalanceChange::CreditAvailable { amount, .. } => (
            "UPDATE users SET available_balance = available_balance + $1, updated_at = NOW() \
             WHERE id = $2",
            amount,
        ),
        BalanceChange::AddTotalLent { amount, .. } => (
            "UPDATE users SET total_lent = total_lent + $1, updated_at = NOW() WHERE id = $2",
            amount,
        ),
        BalanceChange::AddTotalBorrowed { amount, .. } => (
            "UPDATE users SET total_borrowed = total_borrowed + $1, updated_at = NOW() \
             WHERE id = $2",
            amount,
        ),
    };

    let result = sqlx::query(sql)
        .bind(*amount)
        .bind(change.user_id())
        .execute(&mut **tx)
        .await?;

    Ok(result.rows_affected() > 0 || !matches!(change, BalanceChange::DebitAvailable { .. }))
}

/// Returns false when the reference was already recorded for the loan
async fn insert_repayment(
    tx: &mut Transaction<'_, Postgres>,
    repayment: &Repayment,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO repayments (
            id, loan_request_id, borrower_id, lender_id, amount, payment_date,
            payment_method, transaction_reference, status, confirmed_by_lender,
            confirmed_at, remarks, is_late, days_late, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(repayment.id)
    .bind(repayment.loan_request_id)
    .bind(repayment.borrower_id)
    .bind(repayment.lender_id)
    .bind(repayment.amount)
    .bind(repayment.payment_date)
    .bind(repayment.payment_method)
    .bind(&repayment.transaction_reference)
    .bind(repayment.status)
    .bind(repayment.confirmed_by_lender)
    .bind(repayment.confirmed_at)
    .bind(&repayment.remarks)
    .bind(repayment.is_late)
    .bind(repayment.days_late)
    .bind(repayment.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn apply_rating(
    tx: &mut Transaction<'_, Postgres>,
    change: &RatingAggregateChange,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE users SET total_ratings = $1, average_rating = $2, updated_at = NOW() \
         WHERE id = $3 AND total_ratings = $4",
    )
    .bind(change.total_ratings)
    .bind(change.average_rating)
    .bind(change.user_id)
    .bind(change.expected_total_ratings)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn fetch_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn fetch_loan(&self, id: Uuid) -> StoreResult<Option<LoanRequest>> {
        let loan = sqlx::query_as::<_, LoanRequest>("SELECT * FROM loan_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(loan)
    }

    async fn list_loans(&self, filter: &LoanFilter) -> StoreResult<(Vec<LoanRequest>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM loan_requests");
        push_filters(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut page = QueryBuilder::<Postgres>::new("SELECT * FROM loan_requests");
        push_filters(&mut page, filter);
        page.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);
        let loans = page
            .build_query_as::<LoanRequest>()
            .fetch_all(&self.pool)
            .await?;

        Ok((loans, total))
    }

    async fn list_repayments(&self, loan_id: Uuid) -> StoreResult<Vec<Repayment>> {
        let repayments = sqlx::query_as::<_, Repayment>(
            "SELECT * FROM repayments WHERE loan_request_id = $1 ORDER BY created_at DESC",
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(repayments)
    }

    async fn find_repayment_by_reference(
        &self,
        loan_id: Uuid,
        reference: &str,
    ) -> StoreResult<Option<Repayment>> {
        let repayment = sqlx::query_as::<_, Repayment>(
            "SELECT * FROM repayments WHERE loan_request_id = $1 AND transaction_reference = $2",
        )
        .bind(loan_id)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        Ok(repayment)
    }

    async fn insert_loan(&self, loan: &LoanRequest) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO loan_requests (
                id, borrower_id, amount, purpose, duration, interest_rate, status,
                amount_repaid, is_contact_shared, is_visible, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(loan.id)
        .bind(loan.borrower_id)
        .bind(loan.amount)
        .bind(&loan.purpose)
        .bind(loan.duration)
        .bind(loan.interest_rate)
        .bind(loan.status)
        .bind(loan.amount_repaid)
        .bind(loan.is_contact_shared)
        .bind(loan.is_visible)
        .bind(loan.version)
        .bind(loan.created_at)
        .bind(loan.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(())
    }

    async fn commit_transition(&self, transition: LoanTransition) -> StoreResult<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        let Some(stored) = update_loan(&mut tx, &transition.loan).await? else {
            tx.rollback().await?;
            return Ok(CommitOutcome::StaleLoan);
        };

        for change in &transition.balance_changes {
            if !apply_balance_change(&mut tx, change).await? {
                tx.rollback().await?;
                return Ok(CommitOutcome::InsufficientFunds {
                    user_id: change.user_id(),
                });
            }
        }

        if let Some(repayment) = &transition.repayment {
            if !insert_repayment(&mut tx, repayment).await? {
                tx.rollback().await?;
                return Ok(CommitOutcome::DuplicateRepayment);
            }
        }

        if let Some(change) = &transition.rating {
            if !apply_rating(&mut tx, change).await? {
                tx.rollback().await?;
                return Ok(CommitOutcome::StaleRating);
            }
        }

        tx.commit().await?;
        tracing::debug!(loan_id = %stored.id, version = stored.version, "Transition committed");

        Ok(CommitOutcome::Committed(stored))
    }

    async fn count_completed_loans(&self, user_id: Uuid, role: UserRole) -> StoreResult<i64> {
        let sql = match role {
            UserRole::Borrower => {
                "SELECT COUNT(*) FROM loan_requests WHERE borrower_id = $1 AND status = 'completed'"
            }
            UserRole::Lender => {
                "SELECT COUNT(*) FROM loan_requests WHERE lender_id = $1 AND status = 'completed'"
            }
            UserRole::Admin => return Ok(0),
        };
        let count: i64 = sqlx::query_scalar(sql)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn borrower_loan_counts(&self, borrower_id: Uuid) -> StoreResult<BorrowerLoanCounts> {
        let (completed, in_progress, defaulted) = sqlx::query_as::<_, (i64, i64, i64)>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'in_progress'),
                COUNT(*) FILTER (WHERE status = 'defaulted')
            FROM loan_requests
            WHERE borrower_id = $1
            "#,
        )
        .bind(borrower_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(BorrowerLoanCounts {
            completed,
            in_progress,
            defaulted,
        })
    }

    async fn repayment_timings(&self, borrower_id: Uuid) -> StoreResult<Vec<RepaymentTiming>> {
        let rows = sqlx::query_as::<_, (bool, i32)>(
            "SELECT is_late, days_late FROM repayments WHERE borrower_id = $1",
        )
        .bind(borrower_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(is_late, days_late)| RepaymentTiming { is_late, days_late })
            .collect())
    }

    async fn save_scores(
        &self,
        user_id: Uuid,
        trust_score: i32,
        repayment_score: Option<i32>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE users SET trust_score = $1, \
             repayment_score = COALESCE($2, repayment_score), updated_at = NOW() \
             WHERE id = $3",
        )
        .bind(trust_score)
        .bind(repayment_score)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_settings(&self) -> StoreResult<HashMap<String, String>> {
        let rows = sqlx::query_as::<_, (String, String)>("SELECT key, value FROM settings WHERE is_active")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn record_activity(&self, entry: &ActivityEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO activity_logs (id, user_id, action, description, entity_id, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.user_id)
        .bind(entry.action)
        .bind(&entry.description)
        .bind(entry.entity_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
