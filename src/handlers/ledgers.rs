//! Fee ledger handlers.
//!
//! A ledger is one student's account for one term. Mutations run through
//! `LedgerService`, which owns the recompute-and-save cycle; handlers never
//! touch totals directly.

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
use crate::models::{
    CategoryMeta, Discount, DiscountType, FeeItem, FeeLedger, Fine, LedgerStatus,
};
use crate::services::ledger::CreateLedgerCommand;
use crate::startup::AppState;

// ============================================================================
// Request/Response DTOs
// ============================================================================

/// Body for `POST /ledgers`. With `template_id` the ledger is seeded from the
/// template; without it `semester` and `academic_year` are required.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateLedgerRequest {
    pub student_id: Uuid,
    pub template_id: Option<Uuid>,
    #[validate(range(min = 1, max = 12))]
    pub semester: Option<u32>,
    #[validate(length(min = 4, max = 16))]
    pub academic_year: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    pub category_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub amount: Decimal,
    #[serde(default)]
    pub meta: CategoryMeta,
}

#[derive(Debug, Deserialize)]
pub struct SetInclusionRequest {
    pub included: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddFineRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub amount: Decimal,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    #[validate(length(min = 1, max = 100))]
    pub imposed_by: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddDiscountRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub value: Decimal,
    pub discount_type: DiscountType,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    #[validate(length(min = 1, max = 100))]
    pub approved_by: String,
}

#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    pub id: Uuid,
    pub student_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    pub semester: u32,
    pub academic_year: String,
    pub items: Vec<FeeItem>,
    pub fines: Vec<Fine>,
    pub discounts: Vec<Discount>,
    pub total_due: Decimal,
    pub total_paid: Decimal,
    pub total_fines: Decimal,
    pub total_discounts: Decimal,
    pub net_amount: Decimal,
    pub status: LedgerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<FeeLedger> for LedgerResponse {
    fn from(ledger: FeeLedger) -> Self {
        Self {
            id: ledger.id,
            student_id: ledger.student_id,
            course: ledger.course,
            semester: ledger.semester,
            academic_year: ledger.academic_year,
            items: ledger.items,
            fines: ledger.fines,
            discounts: ledger.discounts,
            total_due: ledger.total_due,
            total_paid: ledger.total_paid,
            total_fines: ledger.total_fines,
            total_discounts: ledger.total_discounts,
            net_amount: ledger.net_amount,
            status: ledger.status,
            due_date: ledger.due_date,
            version: ledger.version,
            created_at: ledger.created_at,
            updated_at: ledger.updated_at,
        }
    }
}

/// A ledger entry was appended; `id` is the new item/fine/discount.
#[derive(Debug, Serialize)]
pub struct EntryAddedResponse {
    pub id: Uuid,
    pub ledger: LedgerResponse,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a ledger from a template or bare.
///
/// POST /ledgers
pub async fn create_ledger(
    State(state): State<AppState>,
    Json(payload): Json<CreateLedgerRequest>,
) -> Result<(StatusCode, Json<LedgerResponse>), AppError> {
    payload.validate()?;
    let ledger = state
        .ledgers
        .create(CreateLedgerCommand {
            student_id: payload.student_id,
            template_id: payload.template_id,
            semester: payload.semester,
            academic_year: payload.academic_year,
            due_date: payload.due_date,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(ledger.into())))
}

/// GET /ledgers/:id
pub async fn get_ledger(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<LedgerResponse>, AppError> {
    let ledger = state.ledgers.get(id).await?;
    Ok(Json(ledger.into()))
}

/// Ledgers past their due date with money still owed.
///
/// GET /ledgers/overdue
pub async fn list_overdue(
    State(state): State<AppState>,
) -> Result<Json<Vec<LedgerResponse>>, AppError> {
    let ledgers = state.ledgers.list_overdue().await?;
    Ok(Json(ledgers.into_iter().map(Into::into).collect()))
}

/// Append an ad-hoc fee item.
///
/// POST /ledgers/:id/items
pub async fn add_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<EntryAddedResponse>), AppError> {
    payload.validate()?;
    let (ledger, item_id) = state
        .ledgers
        .add_custom_item(id, payload.category_id, payload.name, payload.amount, payload.meta)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(EntryAddedResponse {
            id: item_id,
            ledger: ledger.into(),
        }),
    ))
}

/// Opt a student in or out of an optional item.
///
/// PATCH /ledgers/:id/items/:item_id
pub async fn set_item_inclusion(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<SetInclusionRequest>,
) -> Result<Json<LedgerResponse>, AppError> {
    let ledger = state
        .ledgers
        .set_item_inclusion(id, item_id, payload.included)
        .await?;
    Ok(Json(ledger.into()))
}

/// Impose a fine.
///
/// POST /ledgers/:id/fines
pub async fn add_fine(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddFineRequest>,
) -> Result<(StatusCode, Json<EntryAddedResponse>), AppError> {
    payload.validate()?;
    let (ledger, fine_id) = state
        .ledgers
        .add_fine(id, payload.name, payload.amount, payload.reason, payload.imposed_by)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(EntryAddedResponse {
            id: fine_id,
            ledger: ledger.into(),
        }),
    ))
}

/// Mark a fine settled; it stops counting toward the balance.
///
/// POST /ledgers/:id/fines/:fine_id/settle
pub async fn settle_fine(
    State(state): State<AppState>,
    Path((id, fine_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<LedgerResponse>, AppError> {
    let ledger = state.ledgers.settle_fine(id, fine_id).await?;
    Ok(Json(ledger.into()))
}

/// Grant a discount.
///
/// POST /ledgers/:id/discounts
pub async fn add_discount(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddDiscountRequest>,
) -> Result<(StatusCode, Json<EntryAddedResponse>), AppError> {
    payload.validate()?;
    let (ledger, discount_id) = state
        .ledgers
        .add_discount(
            id,
            payload.name,
            payload.value,
            payload.discount_type,
            payload.reason,
            payload.approved_by,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(EntryAddedResponse {
            id: discount_id,
            ledger: ledger.into(),
        }),
    ))
}
