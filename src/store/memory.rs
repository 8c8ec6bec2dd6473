//! In-memory ledger store
//!
//! All state lives behind one mutex, so a transition unit observes and writes
//! a consistent snapshot. Guards are checked before the first write.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    BalanceChange, BorrowerLoanCounts, CommitOutcome, LedgerStore, LoanTransition,
    RepaymentTiming, StoreResult, SCORED_BORROWER_STATUSES,
};
use crate::loan::{LoanFilter, LoanRequest, LoanStatus, Repayment};
use crate::models::{ActivityEntry, User, UserRole};

#[derive(Default)]
struct Ledger {
    users: HashMap<Uuid, User>,
    loans: HashMap<Uuid, LoanRequest>,
    repayments: Vec<Repayment>,
    settings: HashMap<String, String>,
    activity: Vec<ActivityEntry>,
}

/// Ledger store backed by process memory
#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<Ledger>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or replace a user record
    pub async fn put_user(&self, user: User) {
        self.inner.lock().await.users.insert(user.id, user);
    }

    /// Seed or replace a settings entry
    pub async fn put_setting(&self, key: &str, value: &str) {
        self.inner
            .lock()
            .await
            .settings
            .insert(key.to_string(), value.to_string());
    }

    /// Seed a loan in an arbitrary state
    pub async fn put_loan(&self, loan: LoanRequest) {
        self.inner.lock().await.loans.insert(loan.id, loan);
    }

    /// Seed a historical repayment
    pub async fn put_repayment(&self, repayment: Repayment) {
        self.inner.lock().await.repayments.push(repayment);
    }

    pub async fn activity(&self) -> Vec<ActivityEntry> {
        self.inner.lock().await.activity.clone()
    }

    pub async fn repayment_count(&self, loan_id: Uuid) -> usize {
        self.inner
            .lock()
            .await
            .repayments
            .iter()
            .filter(|r| r.loan_request_id == loan_id)
            .count()
    }
}

fn matches_filter(loan: &LoanRequest, filter: &LoanFilter) -> bool {
    if let Some(borrower_id) = filter.borrower_id {
        if loan.borrower_id != borrower_id {
            return false;
        }
    }
    if let Some(lender_id) = filter.lender_id {
        if loan.lender_id != Some(lender_id) {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if loan.status != status {
            return false;
        }
    }
    if filter.visible_only && !loan.is_visible {
        return false;
    }
    if let Some(min) = filter.min_amount {
        if loan.amount < min {
            return false;
        }
    }
    if let Some(max) = filter.max_amount {
        if loan.amount > max {
            return false;
        }
    }
    true
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn fetch_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn fetch_loan(&self, id: Uuid) -> StoreResult<Option<LoanRequest>> {
        Ok(self.inner.lock().await.loans.get(&id).cloned())
    }

    async fn list_loans(&self, filter: &LoanFilter) -> StoreResult<(Vec<LoanRequest>, i64)> {
        let ledger = self.inner.lock().await;
        let mut loans: Vec<LoanRequest> = ledger
            .loans
            .values()
            .filter(|loan| matches_filter(loan, filter))
            .cloned()
            .collect();
        loans.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = loans.len() as i64;
        let page = loans
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn list_repayments(&self, loan_id: Uuid) -> StoreResult<Vec<Repayment>> {
        let ledger = self.inner.lock().await;
        let mut repayments: Vec<Repayment> = ledger
            .repayments
            .iter()
            .filter(|r| r.loan_request_id == loan_id)
            .cloned()
            .collect();
        repayments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(repayments)
    }

    async fn find_repayment_by_reference(
        &self,
        loan_id: Uuid,
        reference: &str,
    ) -> StoreResult<Option<Repayment>> {
        let ledger = self.inner.lock().await;
        Ok(ledger
            .repayments
            .iter()
            .find(|r| {
                r.loan_request_id == loan_id
                    && r.transaction_reference.as_deref() == Some(reference)
            })
            .cloned())
    }

    async fn insert_loan(&self, loan: &LoanRequest) -> StoreResult<()> {
        let mut ledger = self.inner.lock().await;
        if ledger.loans.contains_key(&loan.id) {
            return Err(super::StoreError::Conflict);
        }
        ledger.loans.insert(loan.id, loan.clone());
        Ok(())
    }

    async fn commit_transition(&self, transition: LoanTransition) -> StoreResult<CommitOutcome> {
        let mut ledger = self.inner.lock().await;
        let LoanTransition {
            mut loan,
            balance_changes,
            repayment,
            rating,
        } = transition;

        // Guards first; nothing below this block may fail.
        match ledger.loans.get(&loan.id) {
            Some(current) if current.version == loan.version => {}
            _ => return Ok(CommitOutcome::StaleLoan),
        }

        for change in &balance_changes {
            if let BalanceChange::DebitAvailable { user_id, amount } = change {
                let sufficient = ledger
                    .users
                    .get(user_id)
                    .map(|u| u.available_balance >= *amount)
                    .unwrap_or(false);
                if !sufficient {
                    return Ok(CommitOutcome::InsufficientFunds { user_id: *user_id });
                }
            }
        }

        if let Some(repayment) = &repayment {
            if let Some(reference) = repayment.transaction_reference.as_deref() {
                let duplicate = ledger.repayments.iter().any(|r| {
                    r.loan_request_id == repayment.loan_request_id
                        && r.transaction_reference.as_deref() == Some(reference)
                });
                if duplicate {
                    return Ok(CommitOutcome::DuplicateRepayment);
                }
            }
        }

        if let Some(change) = &rating {
            let current = ledger.users.get(&change.user_id).map(|u| u.total_ratings);
            if current != Some(change.expected_total_ratings) {
                return Ok(CommitOutcome::StaleRating);
            }
        }

        let now = Utc::now();

        for change in balance_changes {
            if let Some(user) = ledger.users.get_mut(&change.user_id()) {
                match change {
                    BalanceChange::DebitAvailable { amount, .. } => {
                        user.available_balance -= amount
                    }
                    BalanceChange::CreditAvailable { amount, .. } => {
                        user.available_balance += amount
                    }
                    BalanceChange::AddTotalLent { amount, .. } => user.total_lent += amount,
                    BalanceChange::AddTotalBorrowed { amount, .. } => {
                        user.total_borrowed += amount
                    }
                }
                user.updated_at = now;
            }
        }

        if let Some(repayment) = repayment {
            ledger.repayments.push(repayment);
        }

        if let Some(change) = rating {
            if let Some(user) = ledger.users.get_mut(&change.user_id) {
                user.total_ratings = change.total_ratings;
                user.average_rating = change.average_rating;
                user.updated_at = now;
            }
        }

        loan.version += 1;
        loan.updated_at = now;
        ledger.loans.insert(loan.id, loan.clone());

        Ok(CommitOutcome::Committed(loan))
    }

    async fn count_completed_loans(&self, user_id: Uuid, role: UserRole) -> StoreResult<i64> {
        let ledger = self.inner.lock().await;
        let count = ledger
            .loans
            .values()
            .filter(|loan| loan.status == LoanStatus::Completed)
            .filter(|loan| match role {
                UserRole::Borrower => loan.borrower_id == user_id,
                UserRole::Lender => loan.lender_id == Some(user_id),
                UserRole::Admin => false,
            })
            .count();
        Ok(count as i64)
    }

    async fn borrower_loan_counts(&self, borrower_id: Uuid) -> StoreResult<BorrowerLoanCounts> {
        let ledger = self.inner.lock().await;
        let mut counts = BorrowerLoanCounts::default();
        for loan in ledger
            .loans
            .values()
            .filter(|loan| loan.borrower_id == borrower_id)
            .filter(|loan| SCORED_BORROWER_STATUSES.contains(&loan.status))
        {
            match loan.status {
                LoanStatus::Completed => counts.completed += 1,
                LoanStatus::InProgress => counts.in_progress += 1,
                LoanStatus::Defaulted => counts.defaulted += 1,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn repayment_timings(&self, borrower_id: Uuid) -> StoreResult<Vec<RepaymentTiming>> {
        let ledger = self.inner.lock().await;
        Ok(ledger
            .repayments
            .iter()
            .filter(|r| r.borrower_id == borrower_id)
            .map(|r| RepaymentTiming {
                is_late: r.is_late,
                days_late: r.days_late,
            })
            .collect())
    }

    async fn save_scores(
        &self,
        user_id: Uuid,
        trust_score: i32,
        repayment_score: Option<i32>,
    ) -> StoreResult<()> {
        let mut ledger = self.inner.lock().await;
        if let Some(user) = ledger.users.get_mut(&user_id) {
            user.trust_score = trust_score;
            if let Some(score) = repayment_score {
                user.repayment_score = score;
            }
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn load_settings(&self) -> StoreResult<HashMap<String, String>> {
        Ok(self.inner.lock().await.settings.clone())
    }

    async fn record_activity(&self, entry: &ActivityEntry) -> StoreResult<()> {
        self.inner.lock().await.activity.push(entry.clone());
        Ok(())
    }
}
