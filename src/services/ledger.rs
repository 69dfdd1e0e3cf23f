//! Ledger operations: creation, mutations, queries and template propagation.
//!
//! Every mutation goes through [`LedgerService::mutate`], which reloads the
//! ledger, applies the change, recomputes the derived fields and saves with
//! compare-and-swap on `version`. A lost race reloads and retries up to
//! [`CAS_MAX_ATTEMPTS`] times; after that the caller gets a conflict.
//!
//! Status derivation (`overdue` in particular) is also applied on read, so
//! a ledger whose due date passed since the last write reads correctly
//! without a write.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    CategoryMeta, DiscountType, FeeLedger, FeeTemplate, LedgerStatus, NotificationEvent,
    NotificationKind, Student,
};
use crate::services::metrics::LEDGER_SAVES_TOTAL;
use crate::services::notifier::Notifier;
use crate::services::store::FeeStore;
use crate::services::CAS_MAX_ATTEMPTS;

/// Input for `POST /ledgers`: from a template when `template_id` is set,
/// bare otherwise (then `semester` and `academic_year` are required).
#[derive(Debug, Clone)]
pub struct CreateLedgerCommand {
    pub student_id: Uuid,
    pub template_id: Option<Uuid>,
    pub semester: Option<u32>,
    pub academic_year: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

/// One term row of a student's fee summary.
#[derive(Debug, Clone, Serialize)]
pub struct FeeSummaryRow {
    pub ledger_id: Uuid,
    pub semester: u32,
    pub academic_year: String,
    pub total_due: Decimal,
    pub total_fines: Decimal,
    pub total_discounts: Decimal,
    pub net_amount: Decimal,
    pub total_paid: Decimal,
    pub balance: Decimal,
    pub status: LedgerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

/// All terms of one student plus grand totals.
#[derive(Debug, Clone, Serialize)]
pub struct FeeSummary {
    pub student_id: Uuid,
    pub terms: Vec<FeeSummaryRow>,
    pub total_net: Decimal,
    pub total_paid: Decimal,
    pub total_outstanding: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropagationFailure {
    pub student_id: Uuid,
    pub error: String,
}

/// Outcome of propagating one template across its cohort.
#[derive(Debug, Clone, Serialize)]
pub struct PropagationReport {
    pub template_id: Uuid,
    pub total_assigned: u32,
    pub total_skipped: u32,
    pub errors: Vec<PropagationFailure>,
}

pub struct LedgerService {
    store: Arc<dyn FeeStore>,
    notifier: Arc<dyn Notifier>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn FeeStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Create a ledger for a student, from a template or bare.
    ///
    /// The (student, semester, academic year) term must not already hold a
    /// ledger; the store's unique index backs the pre-check up.
    pub async fn create(&self, cmd: CreateLedgerCommand) -> Result<FeeLedger, AppError> {
        let student = self.require_student(cmd.student_id).await?;

        let ledger = match cmd.template_id {
            Some(template_id) => {
                let template = self
                    .store
                    .get_template(template_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(anyhow!("fee template {} not found", template_id))
                    })?;
                self.ensure_term_free(&student, template.semester, &template.academic_year)
                    .await?;
                FeeLedger::create(template.clone_for_student(&student), cmd.due_date)
            }
            None => {
                let semester = cmd.semester.ok_or_else(|| {
                    AppError::BadRequest(anyhow!("semester is required for a bare ledger"))
                })?;
                let academic_year = cmd.academic_year.clone().ok_or_else(|| {
                    AppError::BadRequest(anyhow!("academic_year is required for a bare ledger"))
                })?;
                self.ensure_term_free(&student, semester, &academic_year).await?;
                FeeLedger::bare(
                    student.id,
                    Some(student.course.clone()),
                    semester,
                    academic_year,
                    cmd.due_date,
                )
            }
        };

        self.store.insert_ledger(&ledger).await?;
        tracing::info!(
            ledger_id = %ledger.id,
            student_id = %student.id,
            semester = ledger.semester,
            academic_year = %ledger.academic_year,
            net_amount = %ledger.net_amount,
            "Created fee ledger"
        );
        self.notify_assigned(&ledger).await;
        Ok(ledger)
    }

    /// Fetch with the status derivation applied as of now.
    pub async fn get(&self, ledger_id: Uuid) -> Result<FeeLedger, AppError> {
        let mut ledger = self.require_ledger(ledger_id).await?;
        ledger.recompute(Utc::now());
        Ok(ledger)
    }

    pub async fn list_for_student(&self, student_id: Uuid) -> Result<Vec<FeeLedger>, AppError> {
        self.require_student(student_id).await?;
        let now = Utc::now();
        let mut ledgers = self.store.list_ledgers_for_student(student_id).await?;
        for ledger in &mut ledgers {
            ledger.recompute(now);
        }
        Ok(ledgers)
    }

    /// Unpaid ledgers whose due date has passed.
    pub async fn list_overdue(&self) -> Result<Vec<FeeLedger>, AppError> {
        let now = Utc::now();
        let mut overdue = self.store.list_unpaid_ledgers().await?;
        for ledger in &mut overdue {
            ledger.recompute(now);
        }
        overdue.retain(|ledger| ledger.status == LedgerStatus::Overdue);
        Ok(overdue)
    }

    /// Per-term rows plus grand totals across all of a student's ledgers.
    pub async fn fee_summary(&self, student_id: Uuid) -> Result<FeeSummary, AppError> {
        let ledgers = self.list_for_student(student_id).await?;
        let mut terms = Vec::with_capacity(ledgers.len());
        let mut total_net = Decimal::ZERO;
        let mut total_paid = Decimal::ZERO;
        for ledger in ledgers {
            let balance = (ledger.net_amount - ledger.total_paid).max(Decimal::ZERO);
            total_net += ledger.net_amount;
            total_paid += ledger.total_paid;
            terms.push(FeeSummaryRow {
                ledger_id: ledger.id,
                semester: ledger.semester,
                academic_year: ledger.academic_year,
                total_due: ledger.total_due,
                total_fines: ledger.total_fines,
                total_discounts: ledger.total_discounts,
                net_amount: ledger.net_amount,
                total_paid: ledger.total_paid,
                balance,
                status: ledger.status,
                due_date: ledger.due_date,
            });
        }
        Ok(FeeSummary {
            student_id,
            terms,
            total_net,
            total_paid,
            total_outstanding: (total_net - total_paid).max(Decimal::ZERO),
        })
    }

    pub async fn add_custom_item(
        &self,
        ledger_id: Uuid,
        category_id: Uuid,
        name: String,
        amount: Decimal,
        meta: CategoryMeta,
    ) -> Result<(FeeLedger, Uuid), AppError> {
        self.mutate(ledger_id, |ledger, _now| {
            ledger.add_custom_item(category_id, name.clone(), amount, meta.clone())
        })
        .await
    }

    pub async fn add_fine(
        &self,
        ledger_id: Uuid,
        name: String,
        amount: Decimal,
        reason: String,
        imposed_by: String,
    ) -> Result<(FeeLedger, Uuid), AppError> {
        let (ledger, fine_id) = self
            .mutate(ledger_id, |ledger, now| {
                ledger.add_fine(name.clone(), amount, reason.clone(), imposed_by.clone(), now)
            })
            .await?;
        tracing::info!(
            ledger_id = %ledger.id,
            fine_id = %fine_id,
            amount = %amount,
            "Imposed fine"
        );
        self.notifier
            .notify(NotificationEvent::new(
                ledger.student_id,
                NotificationKind::FineAdded,
                "Fine imposed",
                format!("A fine of {} ({}) was added to your fee ledger", amount, name),
                "fee_ledger",
                ledger.id,
            ))
            .await;
        Ok((ledger, fine_id))
    }

    pub async fn settle_fine(&self, ledger_id: Uuid, fine_id: Uuid) -> Result<FeeLedger, AppError> {
        let (ledger, _) = self
            .mutate(ledger_id, |ledger, _now| ledger.settle_fine(fine_id))
            .await?;
        Ok(ledger)
    }

    pub async fn add_discount(
        &self,
        ledger_id: Uuid,
        name: String,
        value: Decimal,
        discount_type: DiscountType,
        reason: String,
        approved_by: String,
    ) -> Result<(FeeLedger, Uuid), AppError> {
        self.mutate(ledger_id, |ledger, now| {
            ledger.add_discount(
                name.clone(),
                value,
                discount_type,
                reason.clone(),
                approved_by.clone(),
                now,
            )
        })
        .await
    }

    pub async fn set_item_inclusion(
        &self,
        ledger_id: Uuid,
        item_id: Uuid,
        included: bool,
    ) -> Result<FeeLedger, AppError> {
        let (ledger, _) = self
            .mutate(ledger_id, |ledger, _now| {
                ledger.set_item_inclusion(item_id, included)
            })
            .await?;
        Ok(ledger)
    }

    /// Propagate a template across its (course, semester) cohort.
    ///
    /// Students already holding a ledger for the term are skipped; one
    /// student's failure never aborts the rest.
    pub async fn assign_to_eligible(
        &self,
        template_id: Uuid,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<PropagationReport, AppError> {
        let template = self
            .store
            .get_template(template_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("fee template {} not found", template_id)))?;
        if !template.is_active {
            return Err(AppError::BadRequest(anyhow!(
                "fee template {} is not active",
                template_id
            )));
        }

        let students = self
            .store
            .list_active_students_in_cohort(&template.course, template.semester)
            .await?;
        tracing::info!(
            template_id = %template.id,
            course = %template.course,
            semester = template.semester,
            cohort_size = students.len(),
            "Propagating fee template"
        );

        let mut report = PropagationReport {
            template_id: template.id,
            total_assigned: 0,
            total_skipped: 0,
            errors: Vec::new(),
        };
        for student in students {
            match self.assign_one(&template, &student, due_date).await {
                Ok(true) => report.total_assigned += 1,
                Ok(false) => report.total_skipped += 1,
                Err(e) => {
                    tracing::warn!(
                        template_id = %template.id,
                        student_id = %student.id,
                        error = %e,
                        "Failed to assign fee template"
                    );
                    report.errors.push(PropagationFailure {
                        student_id: student.id,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Returns true when a ledger was created, false when the term was
    /// already covered.
    async fn assign_one(
        &self,
        template: &FeeTemplate,
        student: &Student,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError> {
        let existing = self
            .store
            .find_ledger_for_term(student.id, template.semester, &template.academic_year)
            .await?;
        if existing.is_some() {
            return Ok(false);
        }
        let ledger = FeeLedger::create(template.clone_for_student(student), due_date);
        match self.store.insert_ledger(&ledger).await {
            Ok(()) => {
                self.notify_assigned(&ledger).await;
                Ok(true)
            }
            // Lost a race with a concurrent creation for the same term.
            Err(AppError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Reload-mutate-save with CAS retries. The closure runs once per
    /// attempt against a fresh copy, so it must not hold side effects.
    async fn mutate<T, F>(&self, ledger_id: Uuid, mut op: F) -> Result<(FeeLedger, T), AppError>
    where
        F: FnMut(&mut FeeLedger, DateTime<Utc>) -> Result<T, AppError>,
    {
        for attempt in 1..=CAS_MAX_ATTEMPTS {
            let now = Utc::now();
            let mut ledger = self.require_ledger(ledger_id).await?;
            let expected = ledger.version;
            let out = op(&mut ledger, now)?;
            ledger.recompute(now);
            ledger.bump_version(now);
            match self.store.save_ledger(&ledger, expected).await {
                Ok(()) => {
                    LEDGER_SAVES_TOTAL.with_label_values(&["ok"]).inc();
                    return Ok((ledger, out));
                }
                Err(AppError::Conflict(_)) if attempt < CAS_MAX_ATTEMPTS => {
                    LEDGER_SAVES_TOTAL.with_label_values(&["conflict"]).inc();
                    tracing::debug!(
                        ledger_id = %ledger_id,
                        attempt,
                        "Ledger version moved underneath us, retrying"
                    );
                }
                Err(e) => {
                    if matches!(e, AppError::Conflict(_)) {
                        LEDGER_SAVES_TOTAL.with_label_values(&["conflict"]).inc();
                    }
                    return Err(e);
                }
            }
        }
        Err(AppError::Conflict(anyhow!(
            "fee ledger {} is being modified concurrently, retry the request",
            ledger_id
        )))
    }

    async fn require_student(&self, student_id: Uuid) -> Result<Student, AppError> {
        self.store
            .get_student(student_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("student {} not found", student_id)))
    }

    async fn require_ledger(&self, ledger_id: Uuid) -> Result<FeeLedger, AppError> {
        self.store
            .get_ledger(ledger_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("fee ledger {} not found", ledger_id)))
    }

    async fn ensure_term_free(
        &self,
        student: &Student,
        semester: u32,
        academic_year: &str,
    ) -> Result<(), AppError> {
        let existing = self
            .store
            .find_ledger_for_term(student.id, semester, academic_year)
            .await?;
        if existing.is_some() {
            return Err(AppError::Conflict(anyhow!(
                "student {} already has a ledger for semester {} of {}",
                student.id,
                semester,
                academic_year
            )));
        }
        Ok(())
    }

    async fn notify_assigned(&self, ledger: &FeeLedger) {
        self.notifier
            .notify(NotificationEvent::new(
                ledger.student_id,
                NotificationKind::FeeAssigned,
                "Fees assigned",
                format!(
                    "Fees for semester {} ({}) have been assigned, amount due {}",
                    ledger.semester, ledger.academic_year, ledger.net_amount
                ),
                "fee_ledger",
                ledger.id,
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AcademicStatus, CategoryMeta, NotificationKind, ServicesOpted, TemplateItem,
    };
    use crate::services::notifier::StoreNotifier;
    use crate::services::store::MemoryStore;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn service() -> (Arc<MemoryStore>, LedgerService) {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(StoreNotifier::new(store.clone()));
        (store.clone(), LedgerService::new(store, notifier))
    }

    fn student(course: &str, semester: u32) -> Student {
        Student::new(
            "Asha Rao".to_string(),
            "asha@example.edu".to_string(),
            course.to_string(),
            semester,
            6,
            ServicesOpted::default(),
        )
    }

    fn template(course: &str, semester: u32) -> FeeTemplate {
        FeeTemplate::new(
            format!("{course} sem {semester}"),
            course.to_string(),
            semester,
            "2025-26".to_string(),
            vec![TemplateItem {
                category_id: Uuid::new_v4(),
                name: "Tuition".to_string(),
                amount: dec!(10000),
                meta: CategoryMeta::custom(),
                is_optional: false,
            }],
        )
    }

    #[tokio::test]
    async fn create_from_template_rejects_duplicate_term() {
        let (store, svc) = service();
        let student = student("BSc", 3);
        let template = template("BSc", 3);
        store.insert_student(&student).await.unwrap();
        store.insert_template(&template).await.unwrap();

        let cmd = CreateLedgerCommand {
            student_id: student.id,
            template_id: Some(template.id),
            semester: None,
            academic_year: None,
            due_date: None,
        };
        let ledger = svc.create(cmd.clone()).await.unwrap();
        assert_eq!(ledger.net_amount, dec!(10000));

        let err = svc.create(cmd).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn bare_creation_requires_the_term() {
        let (store, svc) = service();
        let student = student("BSc", 1);
        store.insert_student(&student).await.unwrap();

        let err = svc
            .create(CreateLedgerCommand {
                student_id: student.id,
                template_id: None,
                semester: None,
                academic_year: Some("2025-26".to_string()),
                due_date: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn add_fine_recomputes_and_notifies() {
        let (store, svc) = service();
        let student = student("BSc", 1);
        store.insert_student(&student).await.unwrap();
        let ledger = svc
            .create(CreateLedgerCommand {
                student_id: student.id,
                template_id: None,
                semester: Some(1),
                academic_year: Some("2025-26".to_string()),
                due_date: None,
            })
            .await
            .unwrap();

        let (updated, _) = svc
            .add_fine(
                ledger.id,
                "Late submission".to_string(),
                dec!(500),
                "Library book overdue".to_string(),
                "admin@example.edu".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(updated.total_fines, dec!(500));
        assert_eq!(updated.net_amount, dec!(500));
        assert_eq!(updated.version, ledger.version + 1);

        let events = store
            .list_notifications_for_recipient(student.id)
            .await
            .unwrap();
        assert!(events
            .iter()
            .any(|e| e.kind == NotificationKind::FineAdded));
    }

    #[tokio::test]
    async fn settled_fine_leaves_the_balance() {
        let (store, svc) = service();
        let student = student("BSc", 1);
        store.insert_student(&student).await.unwrap();
        let ledger = svc
            .create(CreateLedgerCommand {
                student_id: student.id,
                template_id: None,
                semester: Some(1),
                academic_year: Some("2025-26".to_string()),
                due_date: None,
            })
            .await
            .unwrap();
        let (_, fine_id) = svc
            .add_fine(
                ledger.id,
                "Damage".to_string(),
                dec!(750),
                "Broken equipment".to_string(),
                "admin@example.edu".to_string(),
            )
            .await
            .unwrap();

        let settled = svc.settle_fine(ledger.id, fine_id).await.unwrap();
        assert_eq!(settled.total_fines, Decimal::ZERO);
        assert_eq!(settled.net_amount, Decimal::ZERO);

        let err = svc.settle_fine(ledger.id, fine_id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn overdue_is_derived_on_read() {
        let (store, svc) = service();
        let student = student("BSc", 1);
        store.insert_student(&student).await.unwrap();

        // Stored before its due date passed: status on disk says unpaid.
        let mut ledger = FeeLedger::bare(
            student.id,
            Some("BSc".to_string()),
            1,
            "2025-26".to_string(),
            None,
        );
        ledger
            .add_custom_item(
                Uuid::new_v4(),
                "Tuition".to_string(),
                dec!(5000),
                CategoryMeta::custom(),
            )
            .unwrap();
        ledger.recompute(Utc::now());
        ledger.due_date = Some(Utc::now() - Duration::days(3));
        store.insert_ledger(&ledger).await.unwrap();
        assert_eq!(ledger.status, LedgerStatus::Unpaid);

        let got = svc.get(ledger.id).await.unwrap();
        assert_eq!(got.status, LedgerStatus::Overdue);

        let overdue = svc.list_overdue().await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, ledger.id);
    }

    #[tokio::test]
    async fn fee_summary_totals_across_terms() {
        let (store, svc) = service();
        let student = student("BSc", 2);
        store.insert_student(&student).await.unwrap();

        let first = svc
            .create(CreateLedgerCommand {
                student_id: student.id,
                template_id: None,
                semester: Some(1),
                academic_year: Some("2024-25".to_string()),
                due_date: None,
            })
            .await
            .unwrap();
        svc.add_custom_item(
            first.id,
            Uuid::new_v4(),
            "Tuition".to_string(),
            dec!(8000),
            CategoryMeta::custom(),
        )
        .await
        .unwrap();
        let second = svc
            .create(CreateLedgerCommand {
                student_id: student.id,
                template_id: None,
                semester: Some(2),
                academic_year: Some("2025-26".to_string()),
                due_date: None,
            })
            .await
            .unwrap();
        svc.add_custom_item(
            second.id,
            Uuid::new_v4(),
            "Tuition".to_string(),
            dec!(9000),
            CategoryMeta::custom(),
        )
        .await
        .unwrap();

        let summary = svc.fee_summary(student.id).await.unwrap();
        assert_eq!(summary.terms.len(), 2);
        assert_eq!(summary.total_net, dec!(17000));
        assert_eq!(summary.total_outstanding, dec!(17000));
    }

    #[tokio::test]
    async fn propagation_skips_covered_terms_and_is_idempotent() {
        let (store, svc) = service();
        let template = template("BSc", 3);
        store.insert_template(&template).await.unwrap();

        let covered = student("BSc", 3);
        let fresh = student("BSc", 3);
        let other_course = student("BA", 3);
        let mut suspended = student("BSc", 3);
        suspended.academic_status = AcademicStatus::Suspended;
        for s in [&covered, &fresh, &other_course, &suspended] {
            store.insert_student(s).await.unwrap();
        }
        svc.create(CreateLedgerCommand {
            student_id: covered.id,
            template_id: Some(template.id),
            semester: None,
            academic_year: None,
            due_date: None,
        })
        .await
        .unwrap();

        let report = svc.assign_to_eligible(template.id, None).await.unwrap();
        assert_eq!(report.total_assigned, 1);
        assert_eq!(report.total_skipped, 1);
        assert!(report.errors.is_empty());

        let again = svc.assign_to_eligible(template.id, None).await.unwrap();
        assert_eq!(again.total_assigned, 0);
        assert_eq!(again.total_skipped, 2);
    }

    #[tokio::test]
    async fn excluding_a_paid_item_is_a_conflict() {
        let (store, svc) = service();
        let mut opted = student("BSc", 3);
        opted.services_opted.hostel = true;
        store.insert_student(&opted).await.unwrap();

        let mut template = template("BSc", 3);
        template.items.push(TemplateItem {
            category_id: Uuid::new_v4(),
            name: "Hostel".to_string(),
            amount: dec!(4000),
            meta: CategoryMeta::Hostel { room_type: None },
            is_optional: true,
        });
        store.insert_template(&template).await.unwrap();

        let ledger = svc
            .create(CreateLedgerCommand {
                student_id: opted.id,
                template_id: Some(template.id),
                semester: None,
                academic_year: None,
                due_date: None,
            })
            .await
            .unwrap();
        let hostel_item = ledger
            .items
            .iter()
            .find(|item| item.name == "Hostel")
            .unwrap()
            .id;

        // Pay part of the hostel item, then try to opt out of it.
        let mut paid = store.get_ledger(ledger.id).await.unwrap().unwrap();
        let allocations = paid.plan_allocation(dec!(1000), &[hostel_item]).unwrap();
        paid.apply_allocations(&allocations);
        paid.recompute(Utc::now());
        let expected = paid.version;
        paid.bump_version(Utc::now());
        store.save_ledger(&paid, expected).await.unwrap();

        let err = svc
            .set_item_inclusion(ledger.id, hostel_item, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
