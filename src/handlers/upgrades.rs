//! Semester promotion handlers.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::models::{RollbackInfo, SemesterUpgradeLog, ServiceChanges, ServicesOpted, UpgradeStatus};
use crate::services::upgrades::{BulkUpgradeCommand, BulkUpgradeReport, UpgradeCommand};
use crate::startup::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct UpgradeStudentRequest {
    #[validate(length(min = 1, max = 100))]
    pub actor: String,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    #[validate(length(min = 4, max = 16))]
    pub academic_year: String,
    pub service_changes: Option<ServiceChanges>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkUpgradeRequest {
    #[validate(length(min = 1, max = 500))]
    pub student_ids: Vec<Uuid>,
    #[validate(length(min = 1, max = 100))]
    pub actor: String,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    #[validate(length(min = 4, max = 16))]
    pub academic_year: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RollbackUpgradeRequest {
    #[validate(length(min = 1, max = 100))]
    pub actor: String,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub batch_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UpgradeLogResponse {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    pub student_id: Uuid,
    pub course: String,
    pub from_semester: u32,
    pub to_semester: u32,
    pub academic_year: String,
    pub reason: String,
    pub actor: String,
    pub services_before: ServicesOpted,
    pub services_after: ServicesOpted,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_ledger_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_ledger_amount: Option<Decimal>,
    pub status: UpgradeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackInfo>,
    pub created_at: DateTime<Utc>,
}

impl From<SemesterUpgradeLog> for UpgradeLogResponse {
    fn from(log: SemesterUpgradeLog) -> Self {
        Self {
            id: log.id,
            batch_id: log.batch_id,
            student_id: log.student_id,
            course: log.course,
            from_semester: log.from_semester,
            to_semester: log.to_semester,
            academic_year: log.academic_year,
            reason: log.reason,
            actor: log.actor,
            services_before: log.services_before,
            services_after: log.services_after,
            generated_ledger_id: log.generated_ledger_id,
            generated_ledger_amount: log.generated_ledger_amount,
            status: log.status,
            error: log.error,
            rollback: log.rollback,
            created_at: log.created_at,
        }
    }
}

/// Promote one student to the next semester and provision the term ledger.
///
/// POST /upgrades/students/:id
#[tracing::instrument(skip(state, payload))]
pub async fn upgrade_student(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpgradeStudentRequest>,
) -> Result<(StatusCode, Json<UpgradeLogResponse>), AppError> {
    payload.validate()?;
    let log = state
        .upgrades
        .upgrade_one(
            id,
            UpgradeCommand {
                actor: payload.actor,
                reason: payload.reason,
                academic_year: payload.academic_year,
                service_changes: payload.service_changes,
                due_date: payload.due_date,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(log.into())))
}

/// Promote a batch; per-student failures land in the report, not the status.
///
/// POST /upgrades/bulk
pub async fn bulk_upgrade(
    State(state): State<AppState>,
    Json(payload): Json<BulkUpgradeRequest>,
) -> Result<Json<BulkUpgradeReport>, AppError> {
    payload.validate()?;
    let report = state
        .upgrades
        .upgrade_bulk(BulkUpgradeCommand {
            student_ids: payload.student_ids,
            actor: payload.actor,
            reason: payload.reason,
            academic_year: payload.academic_year,
        })
        .await?;
    Ok(Json(report))
}

/// Compensate a completed promotion.
///
/// POST /upgrades/logs/:id/rollback
pub async fn rollback_upgrade(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RollbackUpgradeRequest>,
) -> Result<Json<UpgradeLogResponse>, AppError> {
    payload.validate()?;
    let log = state
        .upgrades
        .rollback(id, payload.actor, payload.reason)
        .await?;
    Ok(Json(log.into()))
}

/// Upgrade history, optionally narrowed to one batch.
///
/// GET /upgrades/logs?batch_id=...
pub async fn list_upgrade_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<UpgradeLogResponse>>, AppError> {
    let logs = state.upgrades.list_logs(query.batch_id).await?;
    Ok(Json(logs.into_iter().map(Into::into).collect()))
}
