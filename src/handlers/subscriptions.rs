//! EMI subscription handlers.

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
use crate::models::{
    CancellationInfo, FailedAttempt, InstallmentRecord, PlanType, Subscription,
    SubscriptionStatus,
};
use crate::services::subscriptions::CreateSubscriptionCommand;
use crate::startup::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubscriptionRequest {
    pub student_id: Uuid,
    pub ledger_id: Uuid,
    pub plan_type: PlanType,
    pub total_amount: Decimal,
    pub installment_amount: Decimal,
    #[validate(range(min = 1, max = 60))]
    pub total_installments: u32,
    /// Defaults to now; the first charge lands one period later.
    pub start_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifySubscriptionRequest {
    pub subscription_id: Uuid,
    #[validate(length(min = 1))]
    pub razorpay_payment_id: String,
    #[validate(length(min = 1))]
    pub razorpay_signature: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CancelSubscriptionRequest {
    #[validate(length(min = 1, max = 100))]
    pub cancelled_by: String,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct DueQuery {
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub student_id: Uuid,
    pub ledger_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_plan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_customer_id: Option<String>,
    pub plan_type: PlanType,
    pub total_amount: Decimal,
    pub installment_amount: Decimal,
    pub total_installments: u32,
    pub completed_installments: u32,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_charge_at: Option<DateTime<Utc>>,
    pub installments: Vec<InstallmentRecord>,
    pub failed_attempts: Vec<FailedAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<CancellationInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(sub: Subscription) -> Self {
        Self {
            id: sub.id,
            student_id: sub.student_id,
            ledger_id: sub.ledger_id,
            gateway_subscription_id: sub.gateway_subscription_id,
            gateway_plan_id: sub.gateway_plan_id,
            gateway_customer_id: sub.gateway_customer_id,
            plan_type: sub.plan_type,
            total_amount: sub.total_amount,
            installment_amount: sub.installment_amount,
            total_installments: sub.total_installments,
            completed_installments: sub.completed_installments,
            status: sub.status,
            start_date: sub.start_date,
            end_date: sub.end_date,
            next_charge_at: sub.next_charge_at,
            installments: sub.installments,
            failed_attempts: sub.failed_attempts,
            cancellation: sub.cancellation,
            created_at: sub.created_at,
            updated_at: sub.updated_at,
        }
    }
}

/// Register an EMI mandate with the gateway.
///
/// POST /subscriptions
#[tracing::instrument(skip(state, payload))]
pub async fn create_subscription(
    State(state): State<AppState>,
    Json(payload): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<SubscriptionResponse>), AppError> {
    payload.validate()?;
    let subscription = state
        .subscriptions
        .create(CreateSubscriptionCommand {
            student_id: payload.student_id,
            ledger_id: payload.ledger_id,
            plan_type: payload.plan_type,
            total_amount: payload.total_amount,
            installment_amount: payload.installment_amount,
            total_installments: payload.total_installments,
            start_date: payload.start_date.unwrap_or_else(Utc::now),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(subscription.into())))
}

/// GET /subscriptions/:id
pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let subscription = state.subscriptions.get(id).await?;
    Ok(Json(subscription.into()))
}

/// Confirm the checkout authentication signature for a mandate.
///
/// POST /subscriptions/verify
pub async fn verify_subscription(
    State(state): State<AppState>,
    Json(payload): Json<VerifySubscriptionRequest>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    payload.validate()?;
    let subscription = state
        .subscriptions
        .verify_checkout(
            payload.subscription_id,
            &payload.razorpay_payment_id,
            &payload.razorpay_signature,
        )
        .await?;
    Ok(Json(subscription.into()))
}

/// POST /subscriptions/:id/cancel
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelSubscriptionRequest>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    payload.validate()?;
    let subscription = state
        .subscriptions
        .cancel(id, payload.cancelled_by, payload.reason)
        .await?;
    Ok(Json(subscription.into()))
}

/// Active subscriptions whose next charge date has passed.
///
/// GET /subscriptions/due?as_of=RFC3339
pub async fn list_due_subscriptions(
    State(state): State<AppState>,
    Query(query): Query<DueQuery>,
) -> Result<Json<Vec<SubscriptionResponse>>, AppError> {
    let as_of = query.as_of.unwrap_or_else(Utc::now);
    let due = state.subscriptions.due_for_charge(as_of).await?;
    Ok(Json(due.into_iter().map(Into::into).collect()))
}
