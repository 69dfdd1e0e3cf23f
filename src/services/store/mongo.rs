//! MongoDB-backed `FeeStore`.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    AcademicStatus, FeeLedger, FeeTemplate, LedgerStatus, NotificationEvent, Payment,
    SemesterUpgradeLog, Student, Subscription, SubscriptionStatus,
};
use crate::services::store::FeeStore;

/// Typed collection handles over a single database.
#[derive(Clone)]
pub struct MongoStore {
    students: Collection<Student>,
    templates: Collection<FeeTemplate>,
    ledgers: Collection<FeeLedger>,
    payments: Collection<Payment>,
    subscriptions: Collection<Subscription>,
    upgrade_logs: Collection<SemesterUpgradeLog>,
    notifications: Collection<NotificationEvent>,
    processed_events: Collection<Document>,
    counters: Collection<Document>,
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref write_err)) if write_err.code == 11000
    )
}

fn to_bson<T: serde::Serialize>(value: &T) -> Result<mongodb::bson::Bson, AppError> {
    mongodb::bson::to_bson(value).map_err(|e| AppError::DatabaseError(anyhow!(e)))
}

impl MongoStore {
    pub fn new(db: &Database) -> Self {
        Self {
            students: db.collection("students"),
            templates: db.collection("fee_templates"),
            ledgers: db.collection("fee_ledgers"),
            payments: db.collection("payments"),
            subscriptions: db.collection("subscriptions"),
            upgrade_logs: db.collection("semester_upgrade_logs"),
            notifications: db.collection("notifications"),
            processed_events: db.collection("processed_events"),
            counters: db.collection("receipt_counters"),
        }
    }

    /// Initialize indexes. The unique term index is what turns a concurrent
    /// double-create of the same ledger into a clean conflict.
    pub async fn init_indexes(&self) -> Result<(), AppError> {
        let term_index = IndexModel::builder()
            .keys(doc! { "student_id": 1, "semester": 1, "academic_year": 1 })
            .options(
                IndexOptions::builder()
                    .name("ledger_term_unique_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        let ledger_status_index = IndexModel::builder()
            .keys(doc! { "status": 1 })
            .options(
                IndexOptions::builder()
                    .name("ledger_status_idx".to_string())
                    .build(),
            )
            .build();
        self.ledgers
            .create_indexes([term_index, ledger_status_index], None)
            .await?;

        let receipt_index = IndexModel::builder()
            .keys(doc! { "receipt_no": 1 })
            .options(
                IndexOptions::builder()
                    .name("payment_receipt_unique_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        let gateway_payment_index = IndexModel::builder()
            .keys(doc! { "gateway.payment_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("payment_gateway_id_idx".to_string())
                    .build(),
            )
            .build();
        let ledger_payment_index = IndexModel::builder()
            .keys(doc! { "ledger_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("payment_ledger_idx".to_string())
                    .build(),
            )
            .build();
        self.payments
            .create_indexes(
                [receipt_index, gateway_payment_index, ledger_payment_index],
                None,
            )
            .await?;

        let gateway_sub_index = IndexModel::builder()
            .keys(doc! { "gateway_subscription_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("subscription_gateway_id_idx".to_string())
                    .build(),
            )
            .build();
        let charge_due_index = IndexModel::builder()
            .keys(doc! { "status": 1, "next_charge_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("subscription_charge_due_idx".to_string())
                    .build(),
            )
            .build();
        self.subscriptions
            .create_indexes([gateway_sub_index, charge_due_index], None)
            .await?;

        let cohort_index = IndexModel::builder()
            .keys(doc! { "course": 1, "current_semester": 1, "academic_status": 1 })
            .options(
                IndexOptions::builder()
                    .name("student_cohort_idx".to_string())
                    .build(),
            )
            .build();
        self.students.create_indexes([cohort_index], None).await?;

        let template_lookup_index = IndexModel::builder()
            .keys(doc! { "course": 1, "semester": 1, "academic_year": 1, "is_active": 1 })
            .options(
                IndexOptions::builder()
                    .name("template_lookup_idx".to_string())
                    .build(),
            )
            .build();
        self.templates
            .create_indexes([template_lookup_index], None)
            .await?;

        let batch_index = IndexModel::builder()
            .keys(doc! { "batch_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("upgrade_batch_idx".to_string())
                    .build(),
            )
            .build();
        self.upgrade_logs.create_indexes([batch_index], None).await?;

        let recipient_index = IndexModel::builder()
            .keys(doc! { "recipient_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("notification_recipient_idx".to_string())
                    .build(),
            )
            .build();
        self.notifications
            .create_indexes([recipient_index], None)
            .await?;

        tracing::info!("Fee service indexes initialized");
        Ok(())
    }
}

#[async_trait]
impl FeeStore for MongoStore {
    async fn insert_student(&self, student: &Student) -> Result<(), AppError> {
        self.students.insert_one(student, None).await.map_err(|e| {
            if is_duplicate_key(&e) {
                AppError::Conflict(anyhow!("student {} already exists", student.id))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn get_student(&self, id: Uuid) -> Result<Option<Student>, AppError> {
        let student = self
            .students
            .find_one(doc! { "_id": id.to_string() }, None)
            .await?;
        Ok(student)
    }

    async fn update_student(&self, student: &Student) -> Result<(), AppError> {
        let result = self
            .students
            .replace_one(doc! { "_id": student.id.to_string() }, student, None)
            .await?;
        if result.matched_count == 0 {
            return Err(AppError::NotFound(anyhow!(
                "student {} not found",
                student.id
            )));
        }
        Ok(())
    }

    async fn list_active_students_in_cohort(
        &self,
        course: &str,
        semester: u32,
    ) -> Result<Vec<Student>, AppError> {
        let filter = doc! {
            "course": course,
            "current_semester": semester as i64,
            "academic_status": to_bson(&AcademicStatus::Active)?,
        };
        let options = FindOptions::builder().sort(doc! { "created_at": 1 }).build();
        let cursor = self.students.find(filter, Some(options)).await?;
        let students = cursor.try_collect().await?;
        Ok(students)
    }

    async fn insert_template(&self, template: &FeeTemplate) -> Result<(), AppError> {
        self.templates.insert_one(template, None).await?;
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<FeeTemplate>, AppError> {
        let template = self
            .templates
            .find_one(doc! { "_id": id.to_string() }, None)
            .await?;
        Ok(template)
    }

    async fn find_active_template(
        &self,
        course: &str,
        semester: u32,
        academic_year: &str,
    ) -> Result<Option<FeeTemplate>, AppError> {
        let filter = doc! {
            "course": course,
            "semester": semester as i64,
            "academic_year": academic_year,
            "is_active": true,
        };
        let template = self.templates.find_one(filter, None).await?;
        Ok(template)
    }

    async fn list_active_templates(&self) -> Result<Vec<FeeTemplate>, AppError> {
        let options = FindOptions::builder().sort(doc! { "created_at": 1 }).build();
        let cursor = self
            .templates
            .find(doc! { "is_active": true }, Some(options))
            .await?;
        let templates = cursor.try_collect().await?;
        Ok(templates)
    }

    async fn insert_ledger(&self, ledger: &FeeLedger) -> Result<(), AppError> {
        self.ledgers.insert_one(ledger, None).await.map_err(|e| {
            if is_duplicate_key(&e) {
                AppError::Conflict(anyhow!(
                    "a ledger already exists for student {} semester {} year {}",
                    ledger.student_id,
                    ledger.semester,
                    ledger.academic_year
                ))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn get_ledger(&self, id: Uuid) -> Result<Option<FeeLedger>, AppError> {
        let ledger = self
            .ledgers
            .find_one(doc! { "_id": id.to_string() }, None)
            .await?;
        Ok(ledger)
    }

    async fn find_ledger_for_term(
        &self,
        student_id: Uuid,
        semester: u32,
        academic_year: &str,
    ) -> Result<Option<FeeLedger>, AppError> {
        let filter = doc! {
            "student_id": student_id.to_string(),
            "semester": semester as i64,
            "academic_year": academic_year,
        };
        let ledger = self.ledgers.find_one(filter, None).await?;
        Ok(ledger)
    }

    async fn list_ledgers_for_student(
        &self,
        student_id: Uuid,
    ) -> Result<Vec<FeeLedger>, AppError> {
        let options = FindOptions::builder()
            .sort(doc! { "academic_year": 1, "semester": 1 })
            .build();
        let cursor = self
            .ledgers
            .find(doc! { "student_id": student_id.to_string() }, Some(options))
            .await?;
        let ledgers = cursor.try_collect().await?;
        Ok(ledgers)
    }

    async fn list_unpaid_ledgers(&self) -> Result<Vec<FeeLedger>, AppError> {
        let filter = doc! { "status": { "$ne": to_bson(&LedgerStatus::Paid)? } };
        let cursor = self.ledgers.find(filter, None).await?;
        let ledgers = cursor.try_collect().await?;
        Ok(ledgers)
    }

    async fn save_ledger(
        &self,
        ledger: &FeeLedger,
        expected_version: i64,
    ) -> Result<(), AppError> {
        let filter = doc! {
            "_id": ledger.id.to_string(),
            "version": expected_version,
        };
        let result = self.ledgers.replace_one(filter, ledger, None).await?;
        if result.matched_count == 0 {
            return match self.get_ledger(ledger.id).await? {
                Some(current) => Err(AppError::Conflict(anyhow!(
                    "ledger {} is at version {}, expected {}",
                    ledger.id,
                    current.version,
                    expected_version
                ))),
                None => Err(AppError::NotFound(anyhow!("ledger {} not found", ledger.id))),
            };
        }
        Ok(())
    }

    async fn delete_ledger(&self, id: Uuid) -> Result<(), AppError> {
        let result = self
            .ledgers
            .delete_one(doc! { "_id": id.to_string() }, None)
            .await?;
        if result.deleted_count == 0 {
            return Err(AppError::NotFound(anyhow!("ledger {} not found", id)));
        }
        Ok(())
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), AppError> {
        self.payments.insert_one(payment, None).await.map_err(|e| {
            if is_duplicate_key(&e) {
                AppError::Conflict(anyhow!(
                    "receipt {} has already been issued",
                    payment.receipt_no
                ))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, AppError> {
        let payment = self
            .payments
            .find_one(doc! { "_id": id.to_string() }, None)
            .await?;
        Ok(payment)
    }

    async fn update_payment(&self, payment: &Payment) -> Result<(), AppError> {
        let result = self
            .payments
            .replace_one(doc! { "_id": payment.id.to_string() }, payment, None)
            .await?;
        if result.matched_count == 0 {
            return Err(AppError::NotFound(anyhow!(
                "payment {} not found",
                payment.id
            )));
        }
        Ok(())
    }

    async fn list_payments_for_ledger(&self, ledger_id: Uuid) -> Result<Vec<Payment>, AppError> {
        let options = FindOptions::builder().sort(doc! { "created_at": 1 }).build();
        let cursor = self
            .payments
            .find(doc! { "ledger_id": ledger_id.to_string() }, Some(options))
            .await?;
        let payments = cursor.try_collect().await?;
        Ok(payments)
    }

    async fn find_payment_by_gateway_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<Payment>, AppError> {
        let payment = self
            .payments
            .find_one(doc! { "gateway.payment_id": gateway_payment_id }, None)
            .await?;
        Ok(payment)
    }

    async fn next_receipt_seq(&self, year: i32) -> Result<u64, AppError> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();
        let counter = self
            .counters
            .find_one_and_update(
                doc! { "_id": year },
                doc! { "$inc": { "seq": 1_i64 } },
                options,
            )
            .await?
            .ok_or_else(|| {
                AppError::DatabaseError(anyhow!("receipt counter upsert returned no document"))
            })?;
        let seq = counter.get_i64("seq").map_err(|e| {
            AppError::DatabaseError(anyhow!("receipt counter for {} is malformed: {}", year, e))
        })?;
        Ok(seq as u64)
    }

    async fn insert_subscription(&self, subscription: &Subscription) -> Result<(), AppError> {
        self.subscriptions.insert_one(subscription, None).await?;
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, AppError> {
        let subscription = self
            .subscriptions
            .find_one(doc! { "_id": id.to_string() }, None)
            .await?;
        Ok(subscription)
    }

    async fn find_subscription_by_gateway_id(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<Subscription>, AppError> {
        let subscription = self
            .subscriptions
            .find_one(
                doc! { "gateway_subscription_id": gateway_subscription_id },
                None,
            )
            .await?;
        Ok(subscription)
    }

    async fn find_open_subscription_for_ledger(
        &self,
        ledger_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let terminal = [
            to_bson(&SubscriptionStatus::Cancelled)?,
            to_bson(&SubscriptionStatus::Completed)?,
            to_bson(&SubscriptionStatus::Expired)?,
        ];
        let filter = doc! {
            "ledger_id": ledger_id.to_string(),
            "status": { "$nin": terminal.to_vec() },
        };
        let subscription = self.subscriptions.find_one(filter, None).await?;
        Ok(subscription)
    }

    async fn save_subscription(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> Result<(), AppError> {
        let filter = doc! {
            "_id": subscription.id.to_string(),
            "version": expected_version,
        };
        let result = self
            .subscriptions
            .replace_one(filter, subscription, None)
            .await?;
        if result.matched_count == 0 {
            return match self.get_subscription(subscription.id).await? {
                Some(current) => Err(AppError::Conflict(anyhow!(
                    "subscription {} is at version {}, expected {}",
                    subscription.id,
                    current.version,
                    expected_version
                ))),
                None => Err(AppError::NotFound(anyhow!(
                    "subscription {} not found",
                    subscription.id
                ))),
            };
        }
        Ok(())
    }

    async fn list_due_subscriptions(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, AppError> {
        // Dates are serialized as RFC 3339 strings, so the cutoff is applied
        // after the status-narrowed fetch.
        let filter = doc! { "status": to_bson(&SubscriptionStatus::Active)? };
        let cursor = self.subscriptions.find(filter, None).await?;
        let active: Vec<Subscription> = cursor.try_collect().await?;
        let mut due: Vec<Subscription> = active.into_iter().filter(|s| s.is_due(as_of)).collect();
        due.sort_by_key(|s| s.next_charge_at);
        Ok(due)
    }

    async fn claim_event(&self, key: &str) -> Result<bool, AppError> {
        let record = doc! {
            "_id": key,
            "claimed_at": mongodb::bson::DateTime::now(),
        };
        match self.processed_events.insert_one(record, None).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_upgrade_log(&self, log: &SemesterUpgradeLog) -> Result<(), AppError> {
        self.upgrade_logs.insert_one(log, None).await?;
        Ok(())
    }

    async fn get_upgrade_log(&self, id: Uuid) -> Result<Option<SemesterUpgradeLog>, AppError> {
        let log = self
            .upgrade_logs
            .find_one(doc! { "_id": id.to_string() }, None)
            .await?;
        Ok(log)
    }

    async fn update_upgrade_log(&self, log: &SemesterUpgradeLog) -> Result<(), AppError> {
        let result = self
            .upgrade_logs
            .replace_one(doc! { "_id": log.id.to_string() }, log, None)
            .await?;
        if result.matched_count == 0 {
            return Err(AppError::NotFound(anyhow!(
                "upgrade log {} not found",
                log.id
            )));
        }
        Ok(())
    }

    async fn list_upgrade_logs(
        &self,
        batch_id: Option<Uuid>,
    ) -> Result<Vec<SemesterUpgradeLog>, AppError> {
        let filter = match batch_id {
            Some(batch) => doc! { "batch_id": batch.to_string() },
            None => doc! {},
        };
        let options = FindOptions::builder().sort(doc! { "created_at": 1 }).build();
        let cursor = self.upgrade_logs.find(filter, Some(options)).await?;
        let logs = cursor.try_collect().await?;
        Ok(logs)
    }

    async fn insert_notification(&self, event: &NotificationEvent) -> Result<(), AppError> {
        self.notifications.insert_one(event, None).await?;
        Ok(())
    }

    async fn list_notifications_for_recipient(
        &self,
        recipient_id: Uuid,
    ) -> Result<Vec<NotificationEvent>, AppError> {
        let options = FindOptions::builder().sort(doc! { "created_at": 1 }).build();
        let cursor = self
            .notifications
            .find(doc! { "recipient_id": recipient_id.to_string() }, Some(options))
            .await?;
        let events = cursor.try_collect().await?;
        Ok(events)
    }
}
