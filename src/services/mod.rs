//! Reputation services: trust/repayment scoring and rating aggregation

pub mod rating;
pub mod scoring;

pub use scoring::ScoringService;
