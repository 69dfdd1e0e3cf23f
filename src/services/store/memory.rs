//! In-memory `FeeStore` used by tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    FeeLedger, FeeTemplate, NotificationEvent, Payment, SemesterUpgradeLog, Student, Subscription,
};
use crate::services::store::FeeStore;

#[derive(Default)]
struct Inner {
    students: HashMap<Uuid, Student>,
    templates: HashMap<Uuid, FeeTemplate>,
    ledgers: HashMap<Uuid, FeeLedger>,
    payments: HashMap<Uuid, Payment>,
    subscriptions: HashMap<Uuid, Subscription>,
    upgrade_logs: HashMap<Uuid, SemesterUpgradeLog>,
    notifications: Vec<NotificationEvent>,
    processed_events: HashSet<String>,
    receipt_counters: HashMap<i32, u64>,
}

/// Hash-map backed store with the same conflict semantics as the Mongo
/// backend.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeeStore for MemoryStore {
    async fn insert_student(&self, student: &Student) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if inner.students.contains_key(&student.id) {
            return Err(AppError::Conflict(anyhow!(
                "student {} already exists",
                student.id
            )));
        }
        inner.students.insert(student.id, student.clone());
        Ok(())
    }

    async fn get_student(&self, id: Uuid) -> Result<Option<Student>, AppError> {
        Ok(self.inner.read().await.students.get(&id).cloned())
    }

    async fn update_student(&self, student: &Student) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if !inner.students.contains_key(&student.id) {
            return Err(AppError::NotFound(anyhow!(
                "student {} not found",
                student.id
            )));
        }
        inner.students.insert(student.id, student.clone());
        Ok(())
    }

    async fn list_active_students_in_cohort(
        &self,
        course: &str,
        semester: u32,
    ) -> Result<Vec<Student>, AppError> {
        let inner = self.inner.read().await;
        let mut students: Vec<Student> = inner
            .students
            .values()
            .filter(|s| {
                s.course == course
                    && s.current_semester == semester
                    && s.academic_status == crate::models::AcademicStatus::Active
            })
            .cloned()
            .collect();
        students.sort_by_key(|s| s.created_at);
        Ok(students)
    }

    async fn insert_template(&self, template: &FeeTemplate) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        inner.templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<FeeTemplate>, AppError> {
        Ok(self.inner.read().await.templates.get(&id).cloned())
    }

    async fn find_active_template(
        &self,
        course: &str,
        semester: u32,
        academic_year: &str,
    ) -> Result<Option<FeeTemplate>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .templates
            .values()
            .find(|t| {
                t.is_active
                    && t.course == course
                    && t.semester == semester
                    && t.academic_year == academic_year
            })
            .cloned())
    }

    async fn list_active_templates(&self) -> Result<Vec<FeeTemplate>, AppError> {
        let inner = self.inner.read().await;
        let mut templates: Vec<FeeTemplate> =
            inner.templates.values().filter(|t| t.is_active).cloned().collect();
        templates.sort_by_key(|t| t.created_at);
        Ok(templates)
    }

    async fn insert_ledger(&self, ledger: &FeeLedger) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let duplicate = inner.ledgers.values().any(|l| {
            l.student_id == ledger.student_id
                && l.semester == ledger.semester
                && l.academic_year == ledger.academic_year
        });
        if duplicate {
            return Err(AppError::Conflict(anyhow!(
                "a ledger already exists for student {} semester {} year {}",
                ledger.student_id,
                ledger.semester,
                ledger.academic_year
            )));
        }
        inner.ledgers.insert(ledger.id, ledger.clone());
        Ok(())
    }

    async fn get_ledger(&self, id: Uuid) -> Result<Option<FeeLedger>, AppError> {
        Ok(self.inner.read().await.ledgers.get(&id).cloned())
    }

    async fn find_ledger_for_term(
        &self,
        student_id: Uuid,
        semester: u32,
        academic_year: &str,
    ) -> Result<Option<FeeLedger>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .ledgers
            .values()
            .find(|l| {
                l.student_id == student_id
                    && l.semester == semester
                    && l.academic_year == academic_year
            })
            .cloned())
    }

    async fn list_ledgers_for_student(
        &self,
        student_id: Uuid,
    ) -> Result<Vec<FeeLedger>, AppError> {
        let inner = self.inner.read().await;
        let mut ledgers: Vec<FeeLedger> = inner
            .ledgers
            .values()
            .filter(|l| l.student_id == student_id)
            .cloned()
            .collect();
        ledgers.sort_by_key(|l| (l.academic_year.clone(), l.semester));
        Ok(ledgers)
    }

    async fn list_unpaid_ledgers(&self) -> Result<Vec<FeeLedger>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .ledgers
            .values()
            .filter(|l| l.status != crate::models::LedgerStatus::Paid)
            .cloned()
            .collect())
    }

    async fn save_ledger(
        &self,
        ledger: &FeeLedger,
        expected_version: i64,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        match inner.ledgers.get(&ledger.id) {
            Some(existing) if existing.version == expected_version => {
                inner.ledgers.insert(ledger.id, ledger.clone());
                Ok(())
            }
            Some(existing) => Err(AppError::Conflict(anyhow!(
                "ledger {} is at version {}, expected {}",
                ledger.id,
                existing.version,
                expected_version
            ))),
            None => Err(AppError::NotFound(anyhow!("ledger {} not found", ledger.id))),
        }
    }

    async fn delete_ledger(&self, id: Uuid) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        inner
            .ledgers
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(anyhow!("ledger {} not found", id)))
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        inner.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, AppError> {
        Ok(self.inner.read().await.payments.get(&id).cloned())
    }

    async fn update_payment(&self, payment: &Payment) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if !inner.payments.contains_key(&payment.id) {
            return Err(AppError::NotFound(anyhow!(
                "payment {} not found",
                payment.id
            )));
        }
        inner.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn list_payments_for_ledger(&self, ledger_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let inner = self.inner.read().await;
        let mut payments: Vec<Payment> = inner
            .payments
            .values()
            .filter(|p| p.ledger_id == ledger_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn find_payment_by_gateway_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<Payment>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .payments
            .values()
            .find(|p| {
                p.gateway
                    .as_ref()
                    .map(|g| g.payment_id == gateway_payment_id)
                    .unwrap_or(false)
            })
            .cloned())
    }

    async fn next_receipt_seq(&self, year: i32) -> Result<u64, AppError> {
        let mut inner = self.inner.write().await;
        let counter = inner.receipt_counters.entry(year).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        inner.subscriptions.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, AppError> {
        Ok(self.inner.read().await.subscriptions.get(&id).cloned())
    }

    async fn find_subscription_by_gateway_id(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<Subscription>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .subscriptions
            .values()
            .find(|s| {
                s.gateway_subscription_id.as_deref() == Some(gateway_subscription_id)
            })
            .cloned())
    }

    async fn find_open_subscription_for_ledger(
        &self,
        ledger_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .subscriptions
            .values()
            .find(|s| s.ledger_id == ledger_id && !s.status.is_terminal())
            .cloned())
    }

    async fn save_subscription(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        match inner.subscriptions.get(&subscription.id) {
            Some(existing) if existing.version == expected_version => {
                inner
                    .subscriptions
                    .insert(subscription.id, subscription.clone());
                Ok(())
            }
            Some(existing) => Err(AppError::Conflict(anyhow!(
                "subscription {} is at version {}, expected {}",
                subscription.id,
                existing.version,
                expected_version
            ))),
            None => Err(AppError::NotFound(anyhow!(
                "subscription {} not found",
                subscription.id
            ))),
        }
    }

    async fn list_due_subscriptions(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, AppError> {
        let inner = self.inner.read().await;
        let mut due: Vec<Subscription> = inner
            .subscriptions
            .values()
            .filter(|s| s.is_due(as_of))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_charge_at);
        Ok(due)
    }

    async fn claim_event(&self, key: &str) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        Ok(inner.processed_events.insert(key.to_string()))
    }

    async fn insert_upgrade_log(&self, log: &SemesterUpgradeLog) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        inner.upgrade_logs.insert(log.id, log.clone());
        Ok(())
    }

    async fn get_upgrade_log(&self, id: Uuid) -> Result<Option<SemesterUpgradeLog>, AppError> {
        Ok(self.inner.read().await.upgrade_logs.get(&id).cloned())
    }

    async fn update_upgrade_log(&self, log: &SemesterUpgradeLog) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if !inner.upgrade_logs.contains_key(&log.id) {
            return Err(AppError::NotFound(anyhow!(
                "upgrade log {} not found",
                log.id
            )));
        }
        inner.upgrade_logs.insert(log.id, log.clone());
        Ok(())
    }

    async fn list_upgrade_logs(
        &self,
        batch_id: Option<Uuid>,
    ) -> Result<Vec<SemesterUpgradeLog>, AppError> {
        let inner = self.inner.read().await;
        let mut logs: Vec<SemesterUpgradeLog> = inner
            .upgrade_logs
            .values()
            .filter(|l| batch_id.map(|b| l.batch_id == Some(b)).unwrap_or(true))
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.created_at);
        Ok(logs)
    }

    async fn insert_notification(&self, event: &NotificationEvent) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        inner.notifications.push(event.clone());
        Ok(())
    }

    async fn list_notifications_for_recipient(
        &self,
        recipient_id: Uuid,
    ) -> Result<Vec<NotificationEvent>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect())
    }
}
