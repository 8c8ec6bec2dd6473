//! Trust & repayment scoring
//!
//! Both scores live on a 0-100 scale and are derived from a snapshot of the
//! user's ledger history. The arithmetic is pure; [`ScoringService`] loads the
//! snapshot from the store and persists the result.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::error::{LendingError, LendingResult};
use crate::loan::ScoreSnapshot;
use crate::models::{User, UserRole};
use crate::store::{BorrowerLoanCounts, LedgerStore, RepaymentTiming};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Starting point for both scores, and the value for users with no history
pub const NEUTRAL_SCORE: i32 = 50;

const MIN_SCORE: i32 = 0;
const MAX_SCORE: i32 = 100;

const ID_VERIFIED_BONUS: i32 = 5;
const FACE_VERIFIED_BONUS: i32 = 5;

/// (minimum account age in days, exclusive; bonus)
const ACCOUNT_AGE_BRACKETS: [(i64, i32); 4] = [(365, 10), (180, 7), (90, 5), (30, 3)];

/// (minimum completed loans, inclusive; bonus)
const COMPLETED_LOAN_BRACKETS: [(i64, i32); 4] = [(20, 20), (10, 15), (5, 10), (1, 5)];

const PENALTY_PER_REPORT: i64 = 4;
const MAX_REPORT_PENALTY: i64 = 20;

/// Rating at which the rating adjustment is zero
const NEUTRAL_RATING: i64 = 3;
const POINTS_PER_RATING_STEP: i64 = 5;

const ON_TIME_WEIGHT: i64 = 25;
const COMPLETION_WEIGHT: i64 = 15;
const PENALTY_PER_DEFAULT: i64 = 10;
const MAX_DEFAULT_PENALTY: i64 = 30;
const MAX_LATENESS_PENALTY: i64 = 10;
const SEASONED_BORROWER_LOANS: i64 = 5;
const SEASONED_BORROWER_BONUS: i32 = 10;
const REPEAT_BORROWER_LOANS: i64 = 2;
const REPEAT_BORROWER_BONUS: i32 = 5;

// ============================================================================
// Data Models
// ============================================================================

/// Inputs to the trust score
#[derive(Debug, Clone)]
pub struct TrustProfile {
    pub is_id_verified: bool,
    pub is_face_verified: bool,
    pub account_age: Duration,
    /// Completed loans in the user's own role
    pub completed_loans: i64,
    pub report_count: i32,
    pub total_ratings: i32,
    pub average_rating: Decimal,
}

impl TrustProfile {
    pub fn from_user(user: &User, completed_loans: i64, now: DateTime<Utc>) -> Self {
        Self {
            is_id_verified: user.is_id_verified,
            is_face_verified: user.is_face_verified,
            account_age: now - user.created_at,
            completed_loans,
            report_count: user.report_count,
            total_ratings: user.total_ratings,
            average_rating: user.average_rating,
        }
    }
}

/// Inputs to a borrower's repayment score
#[derive(Debug, Clone, Default)]
pub struct RepaymentProfile {
    pub loans: BorrowerLoanCounts,
    pub repayments: Vec<RepaymentTiming>,
    pub total_borrowed: Decimal,
}

// ============================================================================
// Scoring
// ============================================================================

/// Round half-up to an integer
fn round_half_up(value: Decimal) -> i64 {
    let rounded = value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    rounded.to_i64().unwrap_or(if value.is_sign_negative() {
        i64::MIN
    } else {
        i64::MAX
    })
}

fn clamp_score(value: Decimal) -> i32 {
    round_half_up(value).clamp(i64::from(MIN_SCORE), i64::from(MAX_SCORE)) as i32
}

fn account_age_bonus(age: Duration) -> i32 {
    ACCOUNT_AGE_BRACKETS
        .iter()
        .find(|(days, _)| age > Duration::days(*days))
        .map(|(_, bonus)| *bonus)
        .unwrap_or(0)
}

fn completed_loans_bonus(completed: i64) -> i32 {
    COMPLETED_LOAN_BRACKETS
        .iter()
        .find(|(min, _)| completed >= *min)
        .map(|(_, bonus)| *bonus)
        .unwrap_or(0)
}

/// Trust score for a non-admin user
pub fn trust_score(profile: &TrustProfile) -> i32 {
    let mut score = Decimal::from(NEUTRAL_SCORE);

    if profile.is_id_verified {
        score += Decimal::from(ID_VERIFIED_BONUS);
    }
    if profile.is_face_verified {
        score += Decimal::from(FACE_VERIFIED_BONUS);
    }

    score += Decimal::from(account_age_bonus(profile.account_age));
    score += Decimal::from(completed_loans_bonus(profile.completed_loans));

    let reports = i64::from(profile.report_count.max(0));
    score -= Decimal::from((reports * PENALTY_PER_REPORT).min(MAX_REPORT_PENALTY));

    if profile.total_ratings > 0 {
        score += (profile.average_rating - Decimal::from(NEUTRAL_RATING))
            * Decimal::from(POINTS_PER_RATING_STEP);
    }

    clamp_score(score)
}

/// Repayment score for a borrower
pub fn repayment_score(profile: &RepaymentProfile) -> i32 {
    let loans = &profile.loans;
    let scored_loans = loans.completed + loans.in_progress + loans.defaulted;
    if scored_loans == 0 {
        return NEUTRAL_SCORE;
    }

    let mut score = i64::from(NEUTRAL_SCORE);

    let total_payments = profile.repayments.len() as i64;
    if total_payments > 0 {
        let on_time = profile.repayments.iter().filter(|r| !r.is_late).count() as i64;
        score += round_half_up(
            Decimal::from(on_time * ON_TIME_WEIGHT) / Decimal::from(total_payments),
        );
    }

    score += round_half_up(
        Decimal::from(loans.completed * COMPLETION_WEIGHT) / Decimal::from(scored_loans),
    );

    score -= (loans.defaulted * PENALTY_PER_DEFAULT).min(MAX_DEFAULT_PENALTY);

    let late: Vec<&RepaymentTiming> = profile.repayments.iter().filter(|r| r.is_late).collect();
    if !late.is_empty() {
        let days: i64 = late.iter().map(|r| i64::from(r.days_late)).sum();
        let average = round_half_up(Decimal::from(days) / Decimal::from(late.len() as i64));
        score -= average.min(MAX_LATENESS_PENALTY);
    }

    if loans.completed >= SEASONED_BORROWER_LOANS && profile.total_borrowed > Decimal::ZERO {
        score += i64::from(SEASONED_BORROWER_BONUS);
    } else if loans.completed >= REPEAT_BORROWER_LOANS {
        score += i64::from(REPEAT_BORROWER_BONUS);
    }

    clamp_score(Decimal::from(score))
}

// ============================================================================
// Service
// ============================================================================

/// Loads scoring snapshots from the store and persists derived scores
#[derive(Clone)]
pub struct ScoringService {
    store: Arc<dyn LedgerStore>,
}

impl ScoringService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    async fn load_user(&self, user_id: Uuid) -> LendingResult<User> {
        self.store
            .fetch_user(user_id)
            .await?
            .ok_or_else(|| LendingError::NotFound("User not found".to_string()))
    }

    async fn compute_trust(&self, user: &User) -> LendingResult<i32> {
        if user.role == UserRole::Admin {
            return Ok(user.trust_score);
        }
        let completed = self.store.count_completed_loans(user.id, user.role).await?;
        Ok(trust_score(&TrustProfile::from_user(
            user,
            completed,
            Utc::now(),
        )))
    }

    async fn compute_repayment(&self, user: &User) -> LendingResult<i32> {
        let profile = RepaymentProfile {
            loans: self.store.borrower_loan_counts(user.id).await?,
            repayments: self.store.repayment_timings(user.id).await?,
            total_borrowed: user.total_borrowed,
        };
        Ok(repayment_score(&profile))
    }

    /// Recompute and persist both scores, repayment first for borrowers
    pub async fn recompute_scores(&self, user_id: Uuid) -> LendingResult<ScoreSnapshot> {
        let user = self.load_user(user_id).await?;

        let repayment = if user.role == UserRole::Borrower {
            Some(self.compute_repayment(&user).await?)
        } else {
            None
        };
        let trust = self.compute_trust(&user).await?;

        self.store.save_scores(user.id, trust, repayment).await?;

        tracing::debug!(
            user_id = %user.id,
            trust_score = trust,
            repayment_score = ?repayment,
            "Scores recomputed"
        );

        Ok(ScoreSnapshot {
            trust_score: trust,
            repayment_score: repayment.unwrap_or(NEUTRAL_SCORE),
        })
    }

    /// The user's own record with freshly recomputed scores
    pub async fn profile(&self, user_id: Uuid) -> LendingResult<User> {
        self.recompute_scores(user_id).await?;
        self.load_user(user_id).await
    }

    /// Recompute and persist the trust score only
    pub async fn recompute_trust_score(&self, user_id: Uuid) -> LendingResult<i32> {
        let user = self.load_user(user_id).await?;
        let trust = self.compute_trust(&user).await?;
        self.store.save_scores(user.id, trust, None).await?;
        Ok(trust)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn fresh_profile() -> TrustProfile {
        TrustProfile {
            is_id_verified: false,
            is_face_verified: false,
            account_age: Duration::days(1),
            completed_loans: 0,
            report_count: 0,
            total_ratings: 0,
            average_rating: Decimal::ZERO,
        }
    }

    fn timing(is_late: bool, days_late: i32) -> RepaymentTiming {
        RepaymentTiming { is_late, days_late }
    }

    #[test]
    fn test_fresh_user_is_neutral() {
        assert_eq!(trust_score(&fresh_profile()), 50);
    }

    #[test]
    fn test_fully_qualified_borrower_caps_at_100() {
        let profile = TrustProfile {
            is_id_verified: true,
            is_face_verified: true,
            account_age: Duration::days(400),
            completed_loans: 20,
            report_count: 0,
            total_ratings: 10,
            average_rating: dec("5.00"),
        };
        assert_eq!(trust_score(&profile), 100);
    }

    #[test]
    fn test_account_age_brackets_are_exclusive() {
        let mut profile = fresh_profile();
        profile.account_age = Duration::days(30);
        assert_eq!(trust_score(&profile), 50);
        profile.account_age = Duration::days(30) + Duration::hours(1);
        assert_eq!(trust_score(&profile), 53);
        profile.account_age = Duration::days(91);
        assert_eq!(trust_score(&profile), 55);
        profile.account_age = Duration::days(181);
        assert_eq!(trust_score(&profile), 57);
        profile.account_age = Duration::days(366);
        assert_eq!(trust_score(&profile), 60);
    }

    #[test]
    fn test_completed_loan_brackets() {
        let mut profile = fresh_profile();
        for (completed, expected) in [(1, 55), (4, 55), (5, 60), (10, 65), (19, 65), (20, 70)] {
            profile.completed_loans = completed;
            assert_eq!(trust_score(&profile), expected, "completed = {}", completed);
        }
    }

    #[test]
    fn test_report_penalty_is_capped() {
        let mut profile = fresh_profile();
        profile.report_count = 2;
        assert_eq!(trust_score(&profile), 42);
        profile.report_count = 9;
        assert_eq!(trust_score(&profile), 30);
    }

    #[test]
    fn test_rating_adjustment_rounds_half_up() {
        let mut profile = fresh_profile();
        profile.total_ratings = 2;
        profile.average_rating = dec("3.50");
        // 50 + 2.5
        assert_eq!(trust_score(&profile), 53);
        profile.average_rating = dec("1.00");
        assert_eq!(trust_score(&profile), 40);
    }

    #[test]
    fn test_rating_ignored_without_ratings() {
        let mut profile = fresh_profile();
        profile.average_rating = dec("1.00");
        assert_eq!(trust_score(&profile), 50);
    }

    #[test]
    fn test_penalties_stack() {
        let mut profile = fresh_profile();
        profile.report_count = 10;
        profile.total_ratings = 5;
        profile.average_rating = Decimal::ZERO;
        // 50 - 20 - 15
        assert_eq!(trust_score(&profile), 15);
    }

    #[test]
    fn test_repayment_neutral_without_scored_loans() {
        let profile = RepaymentProfile {
            repayments: vec![timing(true, 9)],
            ..Default::default()
        };
        assert_eq!(repayment_score(&profile), 50);
    }

    #[test]
    fn test_repayment_first_loan_in_progress_no_payments() {
        let profile = RepaymentProfile {
            loans: BorrowerLoanCounts {
                in_progress: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(repayment_score(&profile), 50);
    }

    #[test]
    fn test_repayment_on_time_completion() {
        let profile = RepaymentProfile {
            loans: BorrowerLoanCounts {
                completed: 1,
                ..Default::default()
            },
            repayments: vec![timing(false, 0), timing(false, 0)],
            total_borrowed: dec("1000"),
        };
        // 50 + 25 + 15
        assert_eq!(repayment_score(&profile), 90);
    }

    #[test]
    fn test_repayment_penalises_defaults_and_lateness() {
        let profile = RepaymentProfile {
            loans: BorrowerLoanCounts {
                completed: 1,
                in_progress: 0,
                defaulted: 1,
            },
            repayments: vec![timing(false, 0), timing(true, 2), timing(true, 3)],
            total_borrowed: dec("2000"),
        };
        // 50 + round(8.33) + round(7.5) - 10 - round(2.5)
        assert_eq!(repayment_score(&profile), 50 + 8 + 8 - 10 - 3);
    }

    #[test]
    fn test_repayment_penalties_are_capped() {
        let profile = RepaymentProfile {
            loans: BorrowerLoanCounts {
                completed: 0,
                in_progress: 0,
                defaulted: 5,
            },
            repayments: vec![timing(true, 40)],
            total_borrowed: dec("5000"),
        };
        // 50 + 0 + 0 - 30 - 10
        assert_eq!(repayment_score(&profile), 10);
    }

    #[test]
    fn test_repeat_and_seasoned_borrower_bonus() {
        let mut profile = RepaymentProfile {
            loans: BorrowerLoanCounts {
                completed: 2,
                ..Default::default()
            },
            repayments: vec![timing(false, 0)],
            total_borrowed: dec("1000"),
        };
        // 50 + 25 + 15 + 5
        assert_eq!(repayment_score(&profile), 95);

        profile.loans.completed = 5;
        profile.loans.in_progress = 1;
        // 50 + 25 + round(12.5) + 10
        assert_eq!(repayment_score(&profile), 98);

        profile.total_borrowed = Decimal::ZERO;
        // seasoned bonus needs a borrowed total; falls through to the repeat bonus
        assert_eq!(repayment_score(&profile), 93);
    }
}
