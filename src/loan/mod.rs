//! Loan lifecycle: models, repayment terms and the transition service

pub mod model;
mod service;
pub mod terms;

pub use model::*;
pub use service::{EventSink, LoanService};
