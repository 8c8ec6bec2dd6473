//! HTTP handlers
//!
//! Thin adapters: extract the caller and inputs, call a service, wrap the
//! result in [`ApiResponse`](crate::models::ApiResponse).

pub mod loan;
pub mod user;

pub use crate::middleware::auth::AuthenticatedUser;
