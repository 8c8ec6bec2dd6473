//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::str::FromStr;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use peerlend_server::loan::{
    EventSink, LoanEvent, LoanFilter, LoanRequest, LoanService, LoanStatus, Repayment,
};
use peerlend_server::models::{ActivityEntry, User, UserRole};
use peerlend_server::services::ScoringService;
use peerlend_server::store::{
    BorrowerLoanCounts, CommitOutcome, LedgerStore, LoanTransition, MemoryLedgerStore,
    RepaymentTiming, StoreResult,
};

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Event sink that keeps everything it is given
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<LoanEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<LoanEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: LoanEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Memory store that yields to the scheduler after every loan read, so
/// requests joined on one task interleave between read and commit
#[derive(Default)]
pub struct YieldingStore {
    inner: MemoryLedgerStore,
    stale_commits: AtomicUsize,
    duplicate_commits: AtomicUsize,
}

impl YieldingStore {
    pub fn stale_commits(&self) -> usize {
        self.stale_commits.load(Ordering::SeqCst)
    }

    pub fn duplicate_commits(&self) -> usize {
        self.duplicate_commits.load(Ordering::SeqCst)
    }
}

/// Access to the seeding helpers of the underlying memory store
pub trait Seeded {
    fn memory(&self) -> &MemoryLedgerStore;
}

impl Seeded for MemoryLedgerStore {
    fn memory(&self) -> &MemoryLedgerStore {
        self
    }
}

impl Seeded for YieldingStore {
    fn memory(&self) -> &MemoryLedgerStore {
        &self.inner
    }
}

impl std::ops::Deref for YieldingStore {
    type Target = MemoryLedgerStore;

    fn deref(&self) -> &MemoryLedgerStore {
        &self.inner
    }
}

#[async_trait]
impl LedgerStore for YieldingStore {
    async fn fetch_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.inner.fetch_user(id).await
    }

    async fn fetch_loan(&self, id: Uuid) -> StoreResult<Option<LoanRequest>> {
        let loan = self.inner.fetch_loan(id).await;
        tokio::task::yield_now().await;
        loan
    }

    async fn list_loans(&self, filter: &LoanFilter) -> StoreResult<(Vec<LoanRequest>, i64)> {
        self.inner.list_loans(filter).await
    }

    async fn list_repayments(&self, loan_id: Uuid) -> StoreResult<Vec<Repayment>> {
        self.inner.list_repayments(loan_id).await
    }

    async fn find_repayment_by_reference(
        &self,
        loan_id: Uuid,
        reference: &str,
    ) -> StoreResult<Option<Repayment>> {
        self.inner.find_repayment_by_reference(loan_id, reference).await
    }

    async fn insert_loan(&self, loan: &LoanRequest) -> StoreResult<()> {
        self.inner.insert_loan(loan).await
    }

    async fn commit_transition(&self, transition: LoanTransition) -> StoreResult<CommitOutcome> {
        let outcome = self.inner.commit_transition(transition).await?;
        match outcome {
            CommitOutcome::StaleLoan => {
                self.stale_commits.fetch_add(1, Ordering::SeqCst);
            }
            CommitOutcome::DuplicateRepayment => {
                self.duplicate_commits.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
        Ok(outcome)
    }

    async fn count_completed_loans(&self, user_id: Uuid, role: UserRole) -> StoreResult<i64> {
        self.inner.count_completed_loans(user_id, role).await
    }

    async fn borrower_loan_counts(&self, borrower_id: Uuid) -> StoreResult<BorrowerLoanCounts> {
        self.inner.borrower_loan_counts(borrower_id).await
    }

    async fn repayment_timings(&self, borrower_id: Uuid) -> StoreResult<Vec<RepaymentTiming>> {
        self.inner.repayment_timings(borrower_id).await
    }

    async fn save_scores(
        &self,
        user_id: Uuid,
        trust_score: i32,
        repayment_score: Option<i32>,
    ) -> StoreResult<()> {
        self.inner
            .save_scores(user_id, trust_score, repayment_score)
            .await
    }

    async fn load_settings(&self) -> StoreResult<HashMap<String, String>> {
        self.inner.load_settings().await
    }

    async fn record_activity(&self, entry: &ActivityEntry) -> StoreResult<()> {
        self.inner.record_activity(entry).await
    }
}

pub struct Harness<S = MemoryLedgerStore> {
    pub store: Arc<S>,
    pub sink: Arc<RecordingSink>,
    pub loans: LoanService,
    pub scoring: ScoringService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(MemoryLedgerStore::new())
    }
}

impl Harness<YieldingStore> {
    /// Harness whose loan reads yield, for racing requests on one task
    pub fn interleaved() -> Self {
        Self::with_store(YieldingStore::default())
    }
}

impl<S> Harness<S>
where
    S: LedgerStore + Seeded + 'static,
{
    fn with_store(store: S) -> Self {
        let store = Arc::new(store);
        let sink = Arc::new(RecordingSink::default());
        let dyn_store: Arc<dyn LedgerStore> = store.clone();
        let scoring = ScoringService::new(dyn_store.clone());
        let loans = LoanService::new(dyn_store, scoring.clone(), sink.clone());
        Self {
            store,
            sink,
            loans,
            scoring,
        }
    }

    pub async fn user(&self, role: UserRole, balance: &str) -> User {
        let user = make_user(role, dec(balance));
        self.store.memory().put_user(user.clone()).await;
        user
    }

    pub async fn fetch_user(&self, id: Uuid) -> User {
        self.store.fetch_user(id).await.unwrap().unwrap()
    }

    pub async fn fetch_loan(&self, id: Uuid) -> LoanRequest {
        self.store.fetch_loan(id).await.unwrap().unwrap()
    }

    /// Seed a completed loan between two users
    pub async fn completed_loan(&self, borrower: &User, lender: &User) -> LoanRequest {
        let now = Utc::now();
        let mut loan = LoanRequest::new_pending(
            borrower.id,
            dec("1000"),
            "Stock for shop".to_string(),
            30,
            dec("10"),
            now - Duration::days(40),
        );
        loan.lender_id = Some(lender.id);
        loan.status = LoanStatus::Completed;
        loan.accepted_at = Some(now - Duration::days(39));
        loan.due_date = Some(now - Duration::days(9));
        loan.total_repayable = Some(dec("1008.22"));
        loan.amount_repaid = dec("1008.22");
        loan.remaining_amount = Some(Decimal::ZERO);
        loan.completed_at = Some(now - Duration::days(10));
        loan.is_contact_shared = true;
        self.store.memory().put_loan(loan.clone()).await;
        loan
    }
}

pub fn make_user(role: UserRole, balance: Decimal) -> User {
    let now = Utc::now();
    let id = Uuid::new_v4();
    User {
        id,
        role,
        first_name: "Test".to_string(),
        last_name: role.as_str().to_string(),
        email: Some(format!("{}@example.com", id)),
        phone: Some("+15550100".to_string()),
        is_id_verified: false,
        is_face_verified: false,
        is_onboarding_complete: true,
        available_balance: balance,
        lending_limit: balance,
        total_lent: Decimal::ZERO,
        total_borrowed: Decimal::ZERO,
        trust_score: 50,
        repayment_score: 50,
        total_ratings: 0,
        average_rating: Decimal::ZERO,
        report_count: 0,
        created_at: now,
        updated_at: now,
    }
}
