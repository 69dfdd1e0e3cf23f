//! Fee template catalog handlers.
//!
//! Templates are admin input: they describe what a (course, semester) cohort
//! owes for an academic year. Instantiation onto students happens through
//! `POST /templates/:id/assign` or individual ledger creation.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::models::{CategoryMeta, FeeTemplate, TemplateItem};
use crate::services::ledger::PropagationReport;
use crate::startup::AppState;

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct TemplateItemRequest {
    pub category_id: Uuid,
    pub name: String,
    pub amount: Decimal,
    #[serde(default)]
    pub meta: CategoryMeta,
    #[serde(default)]
    pub is_optional: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTemplateRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub course: String,
    #[validate(range(min = 1, max = 12))]
    pub semester: u32,
    #[validate(length(min = 4, max = 16))]
    pub academic_year: String,
    #[validate(length(min = 1))]
    pub items: Vec<TemplateItemRequest>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AssignTemplateRequest {
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct TemplateResponse {
    pub id: Uuid,
    pub name: String,
    pub course: String,
    pub semester: u32,
    pub academic_year: String,
    pub items: Vec<TemplateItem>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<FeeTemplate> for TemplateResponse {
    fn from(template: FeeTemplate) -> Self {
        Self {
            id: template.id,
            name: template.name,
            course: template.course,
            semester: template.semester,
            academic_year: template.academic_year,
            items: template.items,
            is_active: template.is_active,
            created_at: template.created_at,
            updated_at: template.updated_at,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a fee template.
///
/// POST /templates
pub async fn create_template(
    State(state): State<AppState>,
    Json(payload): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<TemplateResponse>), AppError> {
    payload.validate()?;
    for item in &payload.items {
        if item.name.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "template item name must not be empty"
            )));
        }
        if item.amount < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "template item amount must not be negative"
            )));
        }
    }

    let items: Vec<TemplateItem> = payload
        .items
        .into_iter()
        .map(|item| TemplateItem {
            category_id: item.category_id,
            name: item.name,
            amount: item.amount,
            meta: item.meta,
            is_optional: item.is_optional,
        })
        .collect();
    let template = FeeTemplate::new(
        payload.name,
        payload.course,
        payload.semester,
        payload.academic_year,
        items,
    );
    state.store.insert_template(&template).await?;

    tracing::info!(
        template_id = %template.id,
        course = %template.course,
        semester = template.semester,
        "Created fee template"
    );
    Ok((StatusCode::CREATED, Json(template.into())))
}

/// Fetch one template.
///
/// GET /templates/:id
pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TemplateResponse>, AppError> {
    let template = state
        .store
        .get_template(id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("fee template {} not found", id)))?;
    Ok(Json(template.into()))
}

/// List active templates.
///
/// GET /templates
pub async fn list_templates(
    State(state): State<AppState>,
) -> Result<Json<Vec<TemplateResponse>>, AppError> {
    let templates = state.store.list_active_templates().await?;
    Ok(Json(templates.into_iter().map(Into::into).collect()))
}

/// Propagate a template across its cohort.
///
/// POST /templates/:id/assign
#[tracing::instrument(skip(state, payload))]
pub async fn assign_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignTemplateRequest>,
) -> Result<Json<PropagationReport>, AppError> {
    let report = state.ledgers.assign_to_eligible(id, payload.due_date).await?;
    Ok(Json(report))
}
