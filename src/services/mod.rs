//! Domain services.
//!
//! Each service owns one slice of the fee domain and is wired together in
//! [`crate::startup`]: ledger mutations, payment recording, the gateway
//! subscription engine and semester promotion. All of them talk to the
//! store through [`store::FeeStore`] and to students through
//! [`notifier::Notifier`].

pub mod ledger;
pub mod metrics;
pub mod notifier;
pub mod payments;
pub mod razorpay;
pub mod store;
pub mod subscriptions;
pub mod upgrades;

/// Optimistic-lock saves reload and retry this many times before giving up
/// with a conflict.
pub(crate) const CAS_MAX_ATTEMPTS: u32 = 3;
