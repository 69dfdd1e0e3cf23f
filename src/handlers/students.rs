//! Student registry handlers.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::handlers::ledgers::LedgerResponse;
use crate::models::{AcademicStatus, ServicesOpted, Student};
use crate::services::ledger::FeeSummary;
use crate::startup::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateStudentRequest {
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 100))]
    pub course: String,
    #[validate(range(min = 1, max = 12))]
    pub current_semester: u32,
    #[validate(range(min = 1, max = 12))]
    pub total_semesters: u32,
    #[serde(default)]
    pub services_opted: ServicesOpted,
}

#[derive(Debug, Serialize)]
pub struct StudentResponse {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub course: String,
    pub current_semester: u32,
    pub total_semesters: u32,
    pub academic_status: AcademicStatus,
    pub services_opted: ServicesOpted,
    pub is_upgrade_eligible: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Student> for StudentResponse {
    fn from(student: Student) -> Self {
        Self {
            id: student.id,
            full_name: student.full_name,
            email: student.email,
            course: student.course,
            current_semester: student.current_semester,
            total_semesters: student.total_semesters,
            academic_status: student.academic_status,
            services_opted: student.services_opted,
            is_upgrade_eligible: student.is_upgrade_eligible,
            created_at: student.created_at,
            updated_at: student.updated_at,
        }
    }
}

/// Register a student.
///
/// POST /students
pub async fn create_student(
    State(state): State<AppState>,
    Json(payload): Json<CreateStudentRequest>,
) -> Result<(StatusCode, Json<StudentResponse>), AppError> {
    payload.validate()?;
    if payload.current_semester > payload.total_semesters {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "current semester {} exceeds the course length of {}",
            payload.current_semester,
            payload.total_semesters
        )));
    }

    let student = Student::new(
        payload.full_name,
        payload.email,
        payload.course,
        payload.current_semester,
        payload.total_semesters,
        payload.services_opted,
    );
    state.store.insert_student(&student).await?;

    tracing::info!(
        student_id = %student.id,
        course = %student.course,
        semester = student.current_semester,
        "Registered student"
    );
    Ok((StatusCode::CREATED, Json(student.into())))
}

/// GET /students/:id
pub async fn get_student(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StudentResponse>, AppError> {
    let student = state
        .store
        .get_student(id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("student {} not found", id)))?;
    Ok(Json(student.into()))
}

/// All fee ledgers of one student, newest term first.
///
/// GET /students/:id/ledgers
pub async fn list_student_ledgers(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LedgerResponse>>, AppError> {
    let ledgers = state.ledgers.list_for_student(id).await?;
    Ok(Json(ledgers.into_iter().map(Into::into).collect()))
}

/// Cross-term totals for one student.
///
/// GET /students/:id/fee-summary
pub async fn fee_summary(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FeeSummary>, AppError> {
    let summary = state.ledgers.fee_summary(id).await?;
    Ok(Json(summary))
}
