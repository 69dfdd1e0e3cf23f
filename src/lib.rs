//! Student fee ledger and payment reconciliation service.
//!
//! Tracks per-student, per-term fee ledgers (items, fines, discounts,
//! derived totals), records and allocates payments with yearly receipt
//! sequences, drives Razorpay EMI subscriptions from signed webhooks, and
//! coordinates semester promotions with compensating rollback.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

pub use startup::{build_router, AppState, Application};
