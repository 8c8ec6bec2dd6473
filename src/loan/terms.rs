//! Loan terms: simple interest, due dates and lateness

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

const DAYS_PER_YEAR: i64 = 365;
const MILLIS_PER_DAY: i64 = 86_400_000;

/// Largest value a NUMERIC(12, 2) money column holds
pub const MAX_MONEY: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

/// Round a monetary value to 2 decimal places, half away from zero
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Simple interest for the full term, unrounded
///
/// `amount × rate × duration / (365 × 100)`
pub fn simple_interest(amount: Decimal, interest_rate: Decimal, duration_days: i32) -> Decimal {
    amount * interest_rate * Decimal::from(duration_days) / Decimal::from(DAYS_PER_YEAR * 100)
}

/// Principal plus interest, rounded to cents
pub fn total_repayable(amount: Decimal, interest_rate: Decimal, duration_days: i32) -> Decimal {
    round_money(amount + simple_interest(amount, interest_rate, duration_days))
}

pub fn due_date(accepted_at: DateTime<Utc>, duration_days: i32) -> DateTime<Utc> {
    accepted_at + Duration::days(i64::from(duration_days))
}

/// Outstanding balance after `repaid`, never negative
pub fn remaining_after(total_repayable: Decimal, repaid: Decimal) -> Decimal {
    (total_repayable - repaid).max(Decimal::ZERO)
}

/// Lateness of a payment made at `paid_at` against `due`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lateness {
    pub is_late: bool,
    pub days_late: i32,
}

/// A payment is late when strictly after the due date; partial days count as a full day.
pub fn lateness(due: DateTime<Utc>, paid_at: DateTime<Utc>) -> Lateness {
    if paid_at <= due {
        return Lateness {
            is_late: false,
            days_late: 0,
        };
    }

    let overdue_ms = (paid_at - due).num_milliseconds();
    let days = (overdue_ms + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY;

    Lateness {
        is_late: true,
        days_late: i32::try_from(days).unwrap_or(i32::MAX),
    }
}
