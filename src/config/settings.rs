//! Platform settings
//!
//! Typed view over the key/value `settings` table. Values are stored as text
//! and parsed on read; a missing or malformed value falls back to its default.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;

pub const MIN_TRANSACTION_AMOUNT: &str = "min_transaction_amount";
pub const MAX_TRANSACTION_AMOUNT: &str = "max_transaction_amount";
pub const MIN_LOAN_DURATION_DAYS: &str = "min_loan_duration_days";
pub const MAX_LOAN_DURATION_DAYS: &str = "max_loan_duration_days";
pub const DEFAULT_INTEREST_RATE: &str = "default_interest_rate";
pub const AUTO_BLOCK_REPORT_THRESHOLD: &str = "auto_block_report_threshold";

/// Tunables consumed by the lending engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformSettings {
    pub min_transaction_amount: Decimal,
    pub max_transaction_amount: Decimal,
    pub min_loan_duration_days: i32,
    pub max_loan_duration_days: i32,
    /// Percent per annum applied when a request carries no rate
    pub default_interest_rate: Decimal,
    /// Read by the reporting collaborator
    pub auto_block_report_threshold: i32,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            min_transaction_amount: Decimal::new(500, 0),
            max_transaction_amount: Decimal::new(100_000, 0),
            min_loan_duration_days: 7,
            max_loan_duration_days: 365,
            default_interest_rate: Decimal::new(10, 0),
            auto_block_report_threshold: 5,
        }
    }
}

impl PlatformSettings {
    /// Build from raw key/value pairs, defaulting anything absent or unparseable
    pub fn from_entries(entries: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            min_transaction_amount: parse_or(
                entries,
                MIN_TRANSACTION_AMOUNT,
                defaults.min_transaction_amount,
            ),
            max_transaction_amount: parse_or(
                entries,
                MAX_TRANSACTION_AMOUNT,
                defaults.max_transaction_amount,
            ),
            min_loan_duration_days: parse_or(
                entries,
                MIN_LOAN_DURATION_DAYS,
                defaults.min_loan_duration_days,
            ),
            max_loan_duration_days: parse_or(
                entries,
                MAX_LOAN_DURATION_DAYS,
                defaults.max_loan_duration_days,
            ),
            default_interest_rate: parse_or(
                entries,
                DEFAULT_INTEREST_RATE,
                defaults.default_interest_rate,
            ),
            auto_block_report_threshold: parse_or(
                entries,
                AUTO_BLOCK_REPORT_THRESHOLD,
                defaults.auto_block_report_threshold,
            ),
        }
    }

    pub fn amount_in_range(&self, amount: Decimal) -> bool {
        amount >= self.min_transaction_amount && amount <= self.max_transaction_amount
    }

    pub fn duration_in_range(&self, days: i32) -> bool {
        days >= self.min_loan_duration_days && days <= self.max_loan_duration_days
    }
}

fn parse_or<T: FromStr + Copy>(entries: &HashMap<String, String>, key: &str, default: T) -> T {
    match entries.get(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Malformed platform setting, using default");
                default
            }
        },
    }
}
