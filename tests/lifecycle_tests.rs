//! Loan lifecycle tests against the in-memory ledger

mod common;

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::common::{dec, Harness};
    use peerlend_server::error::LendingError;
    use peerlend_server::loan::{
        CreateLoanRequest, LoanEvent, LoanStatus, MyLoansQuery, PendingLoansQuery,
        RecordRepaymentRequest,
    };
    use peerlend_server::models::UserRole;

    fn request(amount: &str, duration: i32, rate: Option<&str>) -> CreateLoanRequest {
        CreateLoanRequest {
            amount: dec(amount),
            purpose: "Sewing machine".to_string(),
            duration,
            interest_rate: rate.map(dec),
        }
    }

    fn repayment(amount: &str, reference: Option<&str>) -> RecordRepaymentRequest {
        RecordRepaymentRequest {
            amount: dec(amount),
            payment_method: None,
            transaction_reference: reference.map(str::to_string),
            remarks: None,
        }
    }

    #[tokio::test]
    async fn test_full_lifecycle_settles_balances_once() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower, "0").await;
        let lender = h.user(UserRole::Lender, "50000").await;

        let loan = h
            .loans
            .create_loan_request(borrower.id, request("10000", 30, Some("12")))
            .await
            .unwrap();
        assert_eq!(loan.status, LoanStatus::Pending);

        let loan = h.loans.accept_loan_request(lender.id, loan.id).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Accepted);
        assert_eq!(loan.total_repayable, Some(dec("10098.63")));
        assert_eq!(loan.remaining_amount, Some(dec("10098.63")));
        assert!(loan.is_contact_shared);
        assert_eq!(
            loan.due_date.unwrap() - loan.accepted_at.unwrap(),
            chrono::Duration::days(30)
        );
        assert_eq!(h.fetch_user(lender.id).await.available_balance, dec("40000"));

        let loan = h.loans.mark_fulfilled(borrower.id, loan.id).await.unwrap();
        assert_eq!(loan.status, LoanStatus::InProgress);
        assert_eq!(h.fetch_user(borrower.id).await.total_borrowed, dec("10000"));
        assert_eq!(h.fetch_user(lender.id).await.total_lent, dec("10000"));

        let receipt = h
            .loans
            .record_repayment(lender.id, loan.id, repayment("5000", None))
            .await
            .unwrap();
        assert!(!receipt.replayed);
        assert!(!receipt.repayment.is_late);
        assert_eq!(receipt.loan.status, LoanStatus::InProgress);
        assert_eq!(receipt.loan.remaining_amount, Some(dec("5098.63")));

        // Over-repayment clamps the remainder at zero
        let receipt = h
            .loans
            .record_repayment(lender.id, loan.id, repayment("6000", None))
            .await
            .unwrap();
        assert_eq!(receipt.loan.status, LoanStatus::Completed);
        assert_eq!(receipt.loan.remaining_amount, Some(Decimal::ZERO));
        assert_eq!(receipt.loan.amount_repaid, dec("11000"));
        assert!(receipt.loan.completed_at.is_some());
        assert_eq!(
            h.fetch_user(lender.id).await.available_balance,
            dec("50098.63")
        );

        // A completed loan takes no further payments and credits nothing
        let err = h
            .loans
            .record_repayment(lender.id, loan.id, repayment("100", None))
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::InvalidState(_)));
        assert_eq!(
            h.fetch_user(lender.id).await.available_balance,
            dec("50098.63")
        );

        // Completion refreshed the borrower's scores: two on-time payments, one completed loan
        let borrower = h.fetch_user(borrower.id).await;
        assert_eq!(borrower.repayment_score, 90);
        assert_eq!(borrower.trust_score, 55);

        let events = h.sink.events();
        assert!(matches!(events.first(), Some(LoanEvent::Requested { .. })));
        assert!(matches!(events.last(), Some(LoanEvent::Completed { .. })));
        assert_eq!(h.store.activity().await.len(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_accepts_commit_exactly_once() {
        let h = Harness::interleaved();
        let borrower = h.user(UserRole::Borrower, "0").await;
        let first = h.user(UserRole::Lender, "20000").await;
        let second = h.user(UserRole::Lender, "20000").await;

        let loan = h
            .loans
            .create_loan_request(borrower.id, request("10000", 30, None))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            h.loans.accept_loan_request(first.id, loan.id),
            h.loans.accept_loan_request(second.id, loan.id)
        );

        // Both read the pending loan before either committed
        assert_eq!(h.store.stale_commits(), 1);

        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
        let failure = if a.is_ok() { b.unwrap_err() } else { a.unwrap_err() };
        assert!(matches!(failure, LendingError::InvalidState(_)));

        let balances = h.fetch_user(first.id).await.available_balance
            + h.fetch_user(second.id).await.available_balance;
        assert_eq!(balances, dec("30000"));

        let stored = h.fetch_loan(loan.id).await;
        assert_eq!(stored.status, LoanStatus::Accepted);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_same_lender_double_accept_debits_once() {
        let h = Harness::interleaved();
        let borrower = h.user(UserRole::Borrower, "0").await;
        let lender = h.user(UserRole::Lender, "25000").await;

        let loan = h
            .loans
            .create_loan_request(borrower.id, request("10000", 30, None))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            h.loans.accept_loan_request(lender.id, loan.id),
            h.loans.accept_loan_request(lender.id, loan.id)
        );
        assert_eq!(h.store.stale_commits(), 1);
        assert!(a.is_ok() != b.is_ok());
        assert_eq!(h.fetch_user(lender.id).await.available_balance, dec("15000"));
    }

    #[tokio::test]
    async fn test_racing_partial_repayments_with_one_reference_record_once() {
        let h = Harness::interleaved();
        let borrower = h.user(UserRole::Borrower, "0").await;
        let lender = h.user(UserRole::Lender, "5000").await;

        let loan = h
            .loans
            .create_loan_request(borrower.id, request("2000", 30, Some("0")))
            .await
            .unwrap();
        h.loans.accept_loan_request(lender.id, loan.id).await.unwrap();
        h.loans.mark_fulfilled(borrower.id, loan.id).await.unwrap();
        let stale_before = h.store.stale_commits();

        let (a, b) = tokio::join!(
            h.loans
                .record_repayment(lender.id, loan.id, repayment("500", Some("TX-9"))),
            h.loans
                .record_repayment(lender.id, loan.id, repayment("500", Some("TX-9")))
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(h.store.stale_commits() - stale_before, 1);
        assert_eq!(h.store.duplicate_commits(), 1);
        assert!(a.replayed != b.replayed);
        assert_eq!(a.repayment.id, b.repayment.id);
        assert_eq!(h.store.repayment_count(loan.id).await, 1);

        let stored = h.fetch_loan(loan.id).await;
        assert_eq!(stored.amount_repaid, dec("500"));
        assert_eq!(stored.status, LoanStatus::InProgress);
    }

    #[tokio::test]
    async fn test_racing_final_repayments_with_one_reference_credit_once() {
        let h = Harness::interleaved();
        let borrower = h.user(UserRole::Borrower, "0").await;
        let lender = h.user(UserRole::Lender, "5000").await;

        let loan = h
            .loans
            .create_loan_request(borrower.id, request("1000", 30, Some("0")))
            .await
            .unwrap();
        h.loans.accept_loan_request(lender.id, loan.id).await.unwrap();
        h.loans.mark_fulfilled(borrower.id, loan.id).await.unwrap();

        let (a, b) = tokio::join!(
            h.loans
                .record_repayment(lender.id, loan.id, repayment("1000", Some("TX-FULL"))),
            h.loans
                .record_repayment(lender.id, loan.id, repayment("1000", Some("TX-FULL")))
        );
        // The loser re-reads a completed loan and falls back to the recorded payment
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.replayed != b.replayed);
        assert_eq!(a.repayment.id, b.repayment.id);
        assert_eq!(h.store.repayment_count(loan.id).await, 1);

        assert_eq!(h.fetch_loan(loan.id).await.status, LoanStatus::Completed);
        assert_eq!(h.fetch_user(lender.id).await.available_balance, dec("5000"));
    }

    #[tokio::test]
    async fn test_oversized_repayment_is_rejected() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower, "0").await;
        let lender = h.user(UserRole::Lender, "5000").await;

        let loan = h
            .loans
            .create_loan_request(borrower.id, request("1000", 30, None))
            .await
            .unwrap();
        h.loans.accept_loan_request(lender.id, loan.id).await.unwrap();
        h.loans.mark_fulfilled(borrower.id, loan.id).await.unwrap();
        h.loans
            .record_repayment(lender.id, loan.id, repayment("1", None))
            .await
            .unwrap();

        let huge = RecordRepaymentRequest {
            amount: Decimal::MAX,
            ..repayment("1", None)
        };
        let err = h
            .loans
            .record_repayment(lender.id, loan.id, huge)
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Validation(_)));

        // Within the column range on its own, but not on top of what is already repaid
        let err = h
            .loans
            .record_repayment(lender.id, loan.id, repayment("9999999999.99", None))
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Validation(_)));

        let stored = h.fetch_loan(loan.id).await;
        assert_eq!(stored.amount_repaid, dec("1"));
        assert_eq!(stored.status, LoanStatus::InProgress);
        assert_eq!(h.store.repayment_count(loan.id).await, 1);
    }

    #[tokio::test]
    async fn test_far_page_is_empty() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower, "0").await;
        let lender = h.user(UserRole::Lender, "0").await;
        h.loans
            .create_loan_request(borrower.id, request("1000", 30, None))
            .await
            .unwrap();

        let page = h
            .loans
            .my_requests(
                borrower.id,
                MyLoansQuery {
                    page: Some(i64::MAX),
                    limit: Some(50),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.total, 1);

        let page = h
            .loans
            .pending_requests(
                lender.id,
                PendingLoansQuery {
                    page: Some(i64::MAX),
                    limit: Some(100),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_amount_is_rounded_before_range_check() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower, "0").await;

        let loan = h
            .loans
            .create_loan_request(borrower.id, request("100000.004", 30, None))
            .await
            .unwrap();
        assert_eq!(loan.amount, dec("100000.00"));

        let err = h
            .loans
            .create_loan_request(borrower.id, request("499.994", 30, None))
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Validation(_)));
    }

    #[tokio::test]
    async fn test_accept_with_insufficient_balance_changes_nothing() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower, "0").await;
        let lender = h.user(UserRole::Lender, "5000").await;

        let loan = h
            .loans
            .create_loan_request(borrower.id, request("10000", 30, None))
            .await
            .unwrap();

        let err = h
            .loans
            .accept_loan_request(lender.id, loan.id)
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::InsufficientFunds(_)));

        let stored = h.fetch_loan(loan.id).await;
        assert_eq!(stored.status, LoanStatus::Pending);
        assert!(stored.lender_id.is_none());
        assert_eq!(h.fetch_user(lender.id).await.available_balance, dec("5000"));
    }

    #[tokio::test]
    async fn test_cancel_only_while_pending() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower, "0").await;
        let lender = h.user(UserRole::Lender, "50000").await;

        let pending = h
            .loans
            .create_loan_request(borrower.id, request("1000", 14, None))
            .await
            .unwrap();
        let cancelled = h
            .loans
            .cancel_loan_request(borrower.id, pending.id)
            .await
            .unwrap();
        assert_eq!(cancelled.status, LoanStatus::Rejected);
        assert_eq!(cancelled.remarks.as_deref(), Some("Cancelled by borrower"));

        let accepted = h
            .loans
            .create_loan_request(borrower.id, request("1000", 14, None))
            .await
            .unwrap();
        h.loans
            .accept_loan_request(lender.id, accepted.id)
            .await
            .unwrap();
        let before = h.fetch_loan(accepted.id).await;

        let err = h
            .loans
            .cancel_loan_request(borrower.id, accepted.id)
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::InvalidState(_)));
        assert_eq!(h.fetch_loan(accepted.id).await, before);
    }

    #[tokio::test]
    async fn test_cancel_by_other_borrower_is_not_found() {
        let h = Harness::new();
        let owner = h.user(UserRole::Borrower, "0").await;
        let stranger = h.user(UserRole::Borrower, "0").await;

        let loan = h
            .loans
            .create_loan_request(owner.id, request("1000", 14, None))
            .await
            .unwrap();

        let err = h
            .loans
            .cancel_loan_request(stranger.id, loan.id)
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::NotFound(_)));
        assert_eq!(h.fetch_loan(loan.id).await.status, LoanStatus::Pending);
    }

    #[tokio::test]
    async fn test_duplicate_transaction_reference_is_replayed() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower, "0").await;
        let lender = h.user(UserRole::Lender, "50000").await;

        let loan = h
            .loans
            .create_loan_request(borrower.id, request("2000", 30, Some("0")))
            .await
            .unwrap();
        h.loans.accept_loan_request(lender.id, loan.id).await.unwrap();
        h.loans.mark_fulfilled(borrower.id, loan.id).await.unwrap();

        let first = h
            .loans
            .record_repayment(lender.id, loan.id, repayment("500", Some("TX-001")))
            .await
            .unwrap();
        let second = h
            .loans
            .record_repayment(lender.id, loan.id, repayment("500", Some("TX-001")))
            .await
            .unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(second.repayment.id, first.repayment.id);
        assert_eq!(h.store.repayment_count(loan.id).await, 1);
        assert_eq!(h.fetch_loan(loan.id).await.amount_repaid, dec("500"));
    }

    #[tokio::test]
    async fn test_create_rejects_out_of_range_terms() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower, "0").await;

        for bad in [
            request("100", 30, None),
            request("200000", 30, None),
            request("1000", 3, None),
            request("1000", 400, None),
            request("1000", 30, Some("-1")),
            request("1000", 30, Some("1000")),
        ] {
            let err = h
                .loans
                .create_loan_request(borrower.id, bad)
                .await
                .unwrap_err();
            assert!(matches!(err, LendingError::Validation(_)), "{:?}", err);
        }

        // Bounds are inclusive
        h.loans
            .create_loan_request(borrower.id, request("500", 7, None))
            .await
            .unwrap();
        h.loans
            .create_loan_request(borrower.id, request("100000", 365, None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_uses_default_rate_and_requires_borrower() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower, "0").await;
        let lender = h.user(UserRole::Lender, "1000").await;

        let loan = h
            .loans
            .create_loan_request(borrower.id, request("1000", 30, None))
            .await
            .unwrap();
        assert_eq!(loan.interest_rate, dec("10"));

        let err = h
            .loans
            .create_loan_request(lender.id, request("1000", 30, None))
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_settings_are_read_per_request() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower, "0").await;
        h.store.put_setting("max_transaction_amount", "20000").await;
        h.store.put_setting("min_transaction_amount", "not-a-number").await;

        let err = h
            .loans
            .create_loan_request(borrower.id, request("30000", 30, None))
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Validation(_)));

        // Malformed minimum falls back to 500
        let err = h
            .loans
            .create_loan_request(borrower.id, request("499", 30, None))
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Validation(_)));
        h.loans
            .create_loan_request(borrower.id, request("500", 30, None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_only_the_borrower_confirms_receipt() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower, "0").await;
        let lender = h.user(UserRole::Lender, "5000").await;

        let loan = h
            .loans
            .create_loan_request(borrower.id, request("1000", 30, None))
            .await
            .unwrap();

        let err = h.loans.mark_fulfilled(borrower.id, loan.id).await.unwrap_err();
        assert!(matches!(err, LendingError::InvalidState(_)));

        h.loans.accept_loan_request(lender.id, loan.id).await.unwrap();
        let err = h.loans.mark_fulfilled(lender.id, loan.id).await.unwrap_err();
        assert!(matches!(err, LendingError::NotFound(_)));

        let err = h
            .loans
            .record_repayment(lender.id, loan.id, repayment("100", None))
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_dispute_and_default() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower, "0").await;
        let lender = h.user(UserRole::Lender, "50000").await;
        let admin = h.user(UserRole::Admin, "0").await;
        let outsider = h.user(UserRole::Lender, "0").await;

        let disputed = h
            .loans
            .create_loan_request(borrower.id, request("1000", 30, None))
            .await
            .unwrap();
        let err = h.loans.mark_disputed(borrower.id, disputed.id).await.unwrap_err();
        assert!(matches!(err, LendingError::InvalidState(_)));

        h.loans
            .accept_loan_request(lender.id, disputed.id)
            .await
            .unwrap();
        let err = h.loans.mark_disputed(outsider.id, disputed.id).await.unwrap_err();
        assert!(matches!(err, LendingError::Forbidden(_)));
        let loan = h.loans.mark_disputed(borrower.id, disputed.id).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Disputed);

        let defaulted = h
            .loans
            .create_loan_request(borrower.id, request("1000", 30, None))
            .await
            .unwrap();
        h.loans
            .accept_loan_request(lender.id, defaulted.id)
            .await
            .unwrap();
        h.loans
            .mark_fulfilled(borrower.id, defaulted.id)
            .await
            .unwrap();

        let err = h
            .loans
            .mark_defaulted(lender.id, defaulted.id)
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Forbidden(_)));

        let loan = h.loans.mark_defaulted(admin.id, defaulted.id).await.unwrap();
        assert_eq!(loan.status, LoanStatus::Defaulted);

        // One defaulted loan out of one scored: 50 - 10
        assert_eq!(h.fetch_user(borrower.id).await.repayment_score, 40);
    }

    #[tokio::test]
    async fn test_contacts_visible_only_to_parties_once_shared() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower, "0").await;
        let lender = h.user(UserRole::Lender, "5000").await;
        let other = h.user(UserRole::Lender, "5000").await;

        let loan = h
            .loans
            .create_loan_request(borrower.id, request("1000", 30, None))
            .await
            .unwrap();

        let details = h.loans.loan_details(lender.id, loan.id).await.unwrap();
        assert!(details.borrower.unwrap().email.is_none());
        assert!(details.lender.is_none());

        h.loans.accept_loan_request(lender.id, loan.id).await.unwrap();

        let details = h.loans.loan_details(lender.id, loan.id).await.unwrap();
        assert_eq!(details.borrower.unwrap().email, borrower.email);

        let details = h.loans.loan_details(other.id, loan.id).await.unwrap();
        assert!(details.borrower.unwrap().email.is_none());
        assert!(details.lender.unwrap().phone.is_none());

        let err = h
            .loans
            .loan_details(lender.id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_listings() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower, "0").await;
        let lender = h.user(UserRole::Lender, "50000").await;

        let small = h
            .loans
            .create_loan_request(borrower.id, request("1000", 30, None))
            .await
            .unwrap();
        let large = h
            .loans
            .create_loan_request(borrower.id, request("20000", 30, None))
            .await
            .unwrap();

        let page = h
            .loans
            .pending_requests(
                lender.id,
                PendingLoansQuery {
                    min_amount: Some(dec("5000")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.data[0].id, large.id);

        h.loans.accept_loan_request(lender.id, small.id).await.unwrap();

        let mine = h
            .loans
            .my_requests(borrower.id, MyLoansQuery::default())
            .await
            .unwrap();
        assert_eq!(mine.total, 2);

        let lending = h
            .loans
            .my_lending(lender.id, MyLoansQuery::default())
            .await
            .unwrap();
        assert_eq!(lending.total, 1);
        assert_eq!(lending.data[0].id, small.id);

        let err = h
            .loans
            .pending_requests(borrower.id, PendingLoansQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_credit_history_visibility() {
        let h = Harness::new();
        let borrower = h.user(UserRole::Borrower, "0").await;
        let other_borrower = h.user(UserRole::Borrower, "0").await;
        let lender = h.user(UserRole::Lender, "0").await;
        h.completed_loan(&borrower, &lender).await;

        let own = h.loans.credit_history(borrower.id, borrower.id).await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].status, LoanStatus::Completed);

        let seen_by_lender = h.loans.credit_history(lender.id, borrower.id).await.unwrap();
        assert_eq!(seen_by_lender.len(), 1);

        let err = h
            .loans
            .credit_history(other_borrower.id, borrower.id)
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Forbidden(_)));
    }
}
