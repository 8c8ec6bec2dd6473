//! PeerLend Backend Library
//!
//! Loan lifecycle and trust-scoring engine for a peer-to-peer lending
//! platform, plus the HTTP surface that exposes it.

pub mod app_state;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod loan;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
pub mod websocket;
