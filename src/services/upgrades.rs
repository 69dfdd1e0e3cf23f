//! Semester promotion coordinator.
//!
//! An upgrade is one unit of work per student: apply service changes,
//! advance the semester, provision the new term's ledger from the active
//! template, write the audit log. Any failure compensates in reverse order
//! and leaves a `failed` log behind; a completed upgrade can later be
//! compensated once via `rollback`.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    AcademicStatus, FeeLedger, NotificationEvent, NotificationKind, RollbackInfo,
    SemesterUpgradeLog, ServiceChanges, ServicesOpted, Student, UpgradeStatus,
};
use crate::services::metrics::UPGRADES_TOTAL;
use crate::services::notifier::Notifier;
use crate::services::store::FeeStore;

#[derive(Debug, Clone)]
pub struct UpgradeCommand {
    pub actor: String,
    pub reason: String,
    pub academic_year: String,
    pub service_changes: Option<ServiceChanges>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct BulkUpgradeCommand {
    pub student_ids: Vec<Uuid>,
    pub actor: String,
    pub reason: String,
    pub academic_year: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkUpgradeRow {
    pub student_id: Uuid,
    pub log_id: Uuid,
    pub to_semester: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkUpgradeFailure {
    pub student_id: Uuid,
    pub error: String,
}

/// Per-student outcome of a batch promotion.
#[derive(Debug, Clone, Serialize)]
pub struct BulkUpgradeReport {
    pub batch_id: Uuid,
    pub total_upgraded: u32,
    pub total_failed: u32,
    pub upgraded: Vec<BulkUpgradeRow>,
    pub failed: Vec<BulkUpgradeFailure>,
}

pub struct UpgradeCoordinator {
    store: Arc<dyn FeeStore>,
    notifier: Arc<dyn Notifier>,
}

impl UpgradeCoordinator {
    pub fn new(store: Arc<dyn FeeStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn upgrade_one(
        &self,
        student_id: Uuid,
        cmd: UpgradeCommand,
    ) -> Result<SemesterUpgradeLog, AppError> {
        self.upgrade_inner(student_id, &cmd, None).await
    }

    /// Promote a batch under one batch id. Failures are collected, never
    /// propagated, so one bad student cannot sink the rest.
    pub async fn upgrade_bulk(&self, cmd: BulkUpgradeCommand) -> Result<BulkUpgradeReport, AppError> {
        let batch_id = Uuid::new_v4();
        let per_student = UpgradeCommand {
            actor: cmd.actor.clone(),
            reason: cmd.reason.clone(),
            academic_year: cmd.academic_year.clone(),
            service_changes: None,
            due_date: None,
        };
        tracing::info!(
            batch_id = %batch_id,
            students = cmd.student_ids.len(),
            academic_year = %cmd.academic_year,
            "Starting bulk semester upgrade"
        );

        let mut report = BulkUpgradeReport {
            batch_id,
            total_upgraded: 0,
            total_failed: 0,
            upgraded: Vec::new(),
            failed: Vec::new(),
        };
        let mut seen = HashSet::new();
        for student_id in cmd.student_ids {
            if !seen.insert(student_id) {
                continue;
            }
            match self.upgrade_inner(student_id, &per_student, Some(batch_id)).await {
                Ok(log) => {
                    report.total_upgraded += 1;
                    report.upgraded.push(BulkUpgradeRow {
                        student_id,
                        log_id: log.id,
                        to_semester: log.to_semester,
                    });
                }
                Err(e) => {
                    report.total_failed += 1;
                    report.failed.push(BulkUpgradeFailure {
                        student_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        tracing::info!(
            batch_id = %batch_id,
            upgraded = report.total_upgraded,
            failed = report.total_failed,
            "Finished bulk semester upgrade"
        );
        Ok(report)
    }

    /// Compensate a completed upgrade. Permitted once; payments against the
    /// generated ledger do not block it but are flagged.
    pub async fn rollback(
        &self,
        log_id: Uuid,
        actor: String,
        reason: String,
    ) -> Result<SemesterUpgradeLog, AppError> {
        let mut log = self
            .store
            .get_upgrade_log(log_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("upgrade log {} not found", log_id)))?;
        if log.is_rolled_back() {
            return Err(AppError::Conflict(anyhow!(
                "upgrade {} was already rolled back",
                log_id
            )));
        }
        if log.status != UpgradeStatus::Completed {
            return Err(AppError::Conflict(anyhow!(
                "upgrade {} is {} and cannot be rolled back",
                log_id,
                log.status.as_str()
            )));
        }
        let mut student = self.require_student(log.student_id).await?;

        let had_payments = match log.generated_ledger_id {
            Some(ledger_id) => !self
                .store
                .list_payments_for_ledger(ledger_id)
                .await?
                .is_empty(),
            None => false,
        };
        if had_payments {
            tracing::warn!(
                log_id = %log.id,
                ledger_id = ?log.generated_ledger_id,
                "Rolling back an upgrade whose ledger has payments; money movement is not undone"
            );
        }

        let now = Utc::now();
        student.current_semester = log.from_semester;
        student.services_opted = log.services_before;
        student.updated_at = now;
        self.store.update_student(&student).await?;

        if let Some(ledger_id) = log.generated_ledger_id {
            match self.store.delete_ledger(ledger_id).await {
                Ok(()) => {}
                Err(AppError::NotFound(_)) => {
                    tracing::warn!(
                        log_id = %log.id,
                        ledger_id = %ledger_id,
                        "Generated ledger already gone during rollback"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        log.status = UpgradeStatus::RolledBack;
        log.rollback = Some(RollbackInfo {
            actor: actor.clone(),
            reason,
            rolled_back_at: now,
            had_payments,
        });
        self.store.update_upgrade_log(&log).await?;

        UPGRADES_TOTAL.with_label_values(&["rolled_back"]).inc();
        tracing::info!(
            log_id = %log.id,
            student_id = %log.student_id,
            restored_semester = log.from_semester,
            had_payments,
            "Rolled back semester upgrade"
        );
        self.notifier
            .notify(NotificationEvent::new(
                log.student_id,
                NotificationKind::SemesterUpgrade,
                "Semester upgrade rolled back",
                format!(
                    "Your promotion to semester {} was rolled back, you are in semester {}",
                    log.to_semester, log.from_semester
                ),
                "semester_upgrade",
                log.id,
            ))
            .await;
        Ok(log)
    }

    pub async fn get_log(&self, log_id: Uuid) -> Result<SemesterUpgradeLog, AppError> {
        self.store
            .get_upgrade_log(log_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("upgrade log {} not found", log_id)))
    }

    pub async fn list_logs(
        &self,
        batch_id: Option<Uuid>,
    ) -> Result<Vec<SemesterUpgradeLog>, AppError> {
        self.store.list_upgrade_logs(batch_id).await
    }

    async fn upgrade_inner(
        &self,
        student_id: Uuid,
        cmd: &UpgradeCommand,
        batch_id: Option<Uuid>,
    ) -> Result<SemesterUpgradeLog, AppError> {
        let snapshot = self.require_student(student_id).await?;
        let to_semester = snapshot.current_semester + 1;

        if let Err(e) = check_eligibility(&snapshot) {
            return Err(self
                .fail(&snapshot, cmd, batch_id, to_semester, snapshot.services_opted, e)
                .await);
        }

        let now = Utc::now();
        let mut student = snapshot.clone();
        if let Some(changes) = &cmd.service_changes {
            student.services_opted.apply(changes);
        }
        student.current_semester = to_semester;
        student.updated_at = now;
        if let Err(e) = self.store.update_student(&student).await {
            return Err(self
                .fail(&snapshot, cmd, batch_id, to_semester, student.services_opted, e)
                .await);
        }

        // The student is promoted; everything from here on compensates by
        // restoring the snapshot.
        let ledger = match self.provision_term(&student, cmd).await {
            Ok(ledger) => ledger,
            Err(e) => {
                self.restore_student(&snapshot).await;
                return Err(self
                    .fail(&snapshot, cmd, batch_id, to_semester, student.services_opted, e)
                    .await);
            }
        };

        let log = SemesterUpgradeLog {
            id: Uuid::new_v4(),
            batch_id,
            student_id: student.id,
            course: student.course.clone(),
            from_semester: snapshot.current_semester,
            to_semester,
            academic_year: cmd.academic_year.clone(),
            reason: cmd.reason.clone(),
            actor: cmd.actor.clone(),
            services_before: snapshot.services_opted,
            services_after: student.services_opted,
            generated_ledger_id: Some(ledger.id),
            generated_ledger_amount: Some(ledger.net_amount),
            status: UpgradeStatus::Completed,
            error: None,
            rollback: None,
            created_at: now,
        };
        if let Err(e) = self.store.insert_upgrade_log(&log).await {
            // Reverse order: the ledger came last, it goes first.
            if let Err(del) = self.store.delete_ledger(ledger.id).await {
                tracing::error!(
                    ledger_id = %ledger.id,
                    error = %del,
                    "Failed to delete ledger during upgrade compensation"
                );
            }
            self.restore_student(&snapshot).await;
            UPGRADES_TOTAL.with_label_values(&["failed"]).inc();
            return Err(e);
        }

        UPGRADES_TOTAL.with_label_values(&["completed"]).inc();
        tracing::info!(
            student_id = %student.id,
            from_semester = log.from_semester,
            to_semester = log.to_semester,
            ledger_id = %ledger.id,
            net_amount = %ledger.net_amount,
            "Promoted student"
        );
        self.notifier
            .notify(NotificationEvent::new(
                student.id,
                NotificationKind::SemesterUpgrade,
                "Semester upgraded",
                format!(
                    "You have been promoted to semester {} ({}), new term fees {}",
                    to_semester, cmd.academic_year, ledger.net_amount
                ),
                "semester_upgrade",
                log.id,
            ))
            .await;
        Ok(log)
    }

    /// Look the new term's template up and create its ledger. A missing
    /// template fails the upgrade.
    async fn provision_term(
        &self,
        student: &Student,
        cmd: &UpgradeCommand,
    ) -> Result<FeeLedger, AppError> {
        let template = self
            .store
            .find_active_template(&student.course, student.current_semester, &cmd.academic_year)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow!(
                    "no active fee template for {} semester {} ({})",
                    student.course,
                    student.current_semester,
                    cmd.academic_year
                ))
            })?;
        if self
            .store
            .find_ledger_for_term(student.id, student.current_semester, &cmd.academic_year)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(anyhow!(
                "student {} already has a ledger for semester {} of {}",
                student.id,
                student.current_semester,
                cmd.academic_year
            )));
        }
        let ledger = FeeLedger::create(template.clone_for_student(student), cmd.due_date);
        self.store.insert_ledger(&ledger).await?;
        Ok(ledger)
    }

    /// Count the failure, write the audit log for it and hand the error
    /// back for the caller to return.
    async fn fail(
        &self,
        snapshot: &Student,
        cmd: &UpgradeCommand,
        batch_id: Option<Uuid>,
        to_semester: u32,
        services_after: ServicesOpted,
        error: AppError,
    ) -> AppError {
        UPGRADES_TOTAL.with_label_values(&["failed"]).inc();
        tracing::warn!(
            student_id = %snapshot.id,
            to_semester,
            error = %error,
            "Semester upgrade failed"
        );
        let log = SemesterUpgradeLog {
            id: Uuid::new_v4(),
            batch_id,
            student_id: snapshot.id,
            course: snapshot.course.clone(),
            from_semester: snapshot.current_semester,
            to_semester,
            academic_year: cmd.academic_year.clone(),
            reason: cmd.reason.clone(),
            actor: cmd.actor.clone(),
            services_before: snapshot.services_opted,
            services_after,
            generated_ledger_id: None,
            generated_ledger_amount: None,
            status: UpgradeStatus::Failed,
            error: Some(error.to_string()),
            rollback: None,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.insert_upgrade_log(&log).await {
            tracing::error!(
                student_id = %snapshot.id,
                error = %e,
                "Failed to write the upgrade failure log"
            );
        }
        error
    }

    async fn restore_student(&self, snapshot: &Student) {
        if let Err(e) = self.store.update_student(snapshot).await {
            tracing::error!(
                student_id = %snapshot.id,
                error = %e,
                "Failed to restore student during upgrade compensation"
            );
        }
    }

    async fn require_student(&self, student_id: Uuid) -> Result<Student, AppError> {
        self.store
            .get_student(student_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("student {} not found", student_id)))
    }
}

fn check_eligibility(student: &Student) -> Result<(), AppError> {
    if !student.is_upgrade_eligible {
        return Err(AppError::BadRequest(anyhow!(
            "student {} is not eligible for promotion",
            student.id
        )));
    }
    if student.academic_status != AcademicStatus::Active {
        return Err(AppError::BadRequest(anyhow!(
            "student {} is {} and cannot be promoted",
            student.id,
            student.academic_status.as_str()
        )));
    }
    if student.current_semester >= student.total_semesters {
        return Err(AppError::BadRequest(anyhow!(
            "student {} is already in the final semester",
            student.id
        )));
    }
    Ok(())
}
