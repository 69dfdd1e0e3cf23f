//! Persistence boundary.
//!
//! Every component takes a [`FeeStore`] by injection; nothing reaches for a
//! global database handle. `MongoStore` is the production backend,
//! `MemoryStore` backs tests. Compare-and-swap saves carry the optimistic
//! locking described in the concurrency model; `claim_event` is the webhook
//! idempotency table; `next_receipt_seq` is the atomic per-year receipt
//! counter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    FeeLedger, FeeTemplate, NotificationEvent, Payment, SemesterUpgradeLog, Student, Subscription,
};

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[async_trait]
pub trait FeeStore: Send + Sync {
    // --- students ---
    async fn insert_student(&self, student: &Student) -> Result<(), AppError>;
    async fn get_student(&self, id: Uuid) -> Result<Option<Student>, AppError>;
    async fn update_student(&self, student: &Student) -> Result<(), AppError>;
    /// Active students of one (course, semester) cohort.
    async fn list_active_students_in_cohort(
        &self,
        course: &str,
        semester: u32,
    ) -> Result<Vec<Student>, AppError>;

    // --- fee templates ---
    async fn insert_template(&self, template: &FeeTemplate) -> Result<(), AppError>;
    async fn get_template(&self, id: Uuid) -> Result<Option<FeeTemplate>, AppError>;
    async fn find_active_template(
        &self,
        course: &str,
        semester: u32,
        academic_year: &str,
    ) -> Result<Option<FeeTemplate>, AppError>;
    async fn list_active_templates(&self) -> Result<Vec<FeeTemplate>, AppError>;

    // --- ledgers ---
    /// Insert a new ledger; a ledger already covering the same
    /// (student, semester, academic year) term is a conflict.
    async fn insert_ledger(&self, ledger: &FeeLedger) -> Result<(), AppError>;
    async fn get_ledger(&self, id: Uuid) -> Result<Option<FeeLedger>, AppError>;
    async fn find_ledger_for_term(
        &self,
        student_id: Uuid,
        semester: u32,
        academic_year: &str,
    ) -> Result<Option<FeeLedger>, AppError>;
    async fn list_ledgers_for_student(&self, student_id: Uuid)
        -> Result<Vec<FeeLedger>, AppError>;
    /// Ledgers whose stored status is anything but `paid`.
    async fn list_unpaid_ledgers(&self) -> Result<Vec<FeeLedger>, AppError>;
    /// Compare-and-swap save: the write only lands if the stored version
    /// still equals `expected_version` (conflict otherwise).
    async fn save_ledger(&self, ledger: &FeeLedger, expected_version: i64)
        -> Result<(), AppError>;
    async fn delete_ledger(&self, id: Uuid) -> Result<(), AppError>;

    // --- payments ---
    async fn insert_payment(&self, payment: &Payment) -> Result<(), AppError>;
    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, AppError>;
    async fn update_payment(&self, payment: &Payment) -> Result<(), AppError>;
    async fn list_payments_for_ledger(&self, ledger_id: Uuid) -> Result<Vec<Payment>, AppError>;
    async fn find_payment_by_gateway_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<Payment>, AppError>;
    /// Next value of the per-calendar-year receipt counter (starts at 1).
    async fn next_receipt_seq(&self, year: i32) -> Result<u64, AppError>;

    // --- subscriptions ---
    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), AppError>;
    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, AppError>;
    async fn find_subscription_by_gateway_id(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<Subscription>, AppError>;
    /// The non-terminal subscription bound to a ledger, if any.
    async fn find_open_subscription_for_ledger(
        &self,
        ledger_id: Uuid,
    ) -> Result<Option<Subscription>, AppError>;
    async fn save_subscription(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> Result<(), AppError>;
    async fn list_due_subscriptions(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, AppError>;

    // --- webhook idempotency ---
    /// Claim an event key. Returns true on first claim, false when the key
    /// was already processed.
    async fn claim_event(&self, key: &str) -> Result<bool, AppError>;

    // --- upgrade logs ---
    async fn insert_upgrade_log(&self, log: &SemesterUpgradeLog) -> Result<(), AppError>;
    async fn get_upgrade_log(&self, id: Uuid) -> Result<Option<SemesterUpgradeLog>, AppError>;
    async fn update_upgrade_log(&self, log: &SemesterUpgradeLog) -> Result<(), AppError>;
    async fn list_upgrade_logs(
        &self,
        batch_id: Option<Uuid>,
    ) -> Result<Vec<SemesterUpgradeLog>, AppError>;

    // --- notifications ---
    async fn insert_notification(&self, event: &NotificationEvent) -> Result<(), AppError>;
    async fn list_notifications_for_recipient(
        &self,
        recipient_id: Uuid,
    ) -> Result<Vec<NotificationEvent>, AppError>;
}
