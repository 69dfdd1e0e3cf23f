//! Payment handlers: offline recording, verification, refunds and the
//! Razorpay checkout pair (order bootstrap + callback).

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
    Allocation, GatewayRefs, Payment, PaymentMethod, PaymentMode, PaymentStatus, RefundInfo,
    VerificationInfo,
};
use crate::services::payments::{CheckoutOrder, RecordPaymentCommand, VerifyOnlineCommand};
use crate::startup::AppState;

// ============================================================================
// Request/Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GatewayRefsRequest {
    pub order_id: Option<String>,
    pub payment_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordPaymentRequest {
    pub ledger_id: Uuid,
    pub amount: Decimal,
    /// Fee item and fine ids the money is for; empty targets everything
    /// unpaid in ledger order.
    #[serde(default)]
    pub paid_for: Vec<Uuid>,
    pub mode: PaymentMode,
    pub method: PaymentMethod,
    #[validate(length(min = 1, max = 100))]
    pub recorded_by: String,
    pub gateway: Option<GatewayRefsRequest>,
    pub installment_no: Option<u32>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
    pub requires_verification: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyPaymentRequest {
    pub approved: bool,
    #[validate(length(min = 1, max = 100))]
    pub verified_by: String,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefundPaymentRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    #[validate(length(min = 1, max = 100))]
    pub refunded_by: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub ledger_id: Uuid,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyOnlineRequest {
    #[validate(length(min = 1))]
    pub razorpay_order_id: String,
    #[validate(length(min = 1))]
    pub razorpay_payment_id: String,
    #[validate(length(min = 1))]
    pub razorpay_signature: String,
    pub ledger_id: Uuid,
    #[serde(default)]
    pub paid_for: Vec<Uuid>,
    pub recorded_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub receipt_no: String,
    pub display_receipt: String,
    pub student_id: Uuid,
    pub ledger_id: Uuid,
    pub amount: Decimal,
    pub mode: PaymentMode,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub allocations: Vec<Allocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayRefs>,
    pub requires_verification: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund: Option<RefundInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installment_no: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub recorded_by: String,
    pub created_at: DateTime<Utc>,
}

impl PaymentResponse {
    fn new(payment: Payment, receipt_prefix: &str) -> Self {
        let display_receipt = payment.display_receipt(receipt_prefix);
        Self {
            id: payment.id,
            receipt_no: payment.receipt_no,
            display_receipt,
            student_id: payment.student_id,
            ledger_id: payment.ledger_id,
            amount: payment.amount,
            mode: payment.mode,
            method: payment.method,
            status: payment.status,
            allocations: payment.allocations,
            gateway: payment.gateway,
            requires_verification: payment.requires_verification,
            verification: payment.verification,
            refund: payment.refund,
            installment_no: payment.installment_no,
            notes: payment.notes,
            recorded_by: payment.recorded_by,
            created_at: payment.created_at,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Record a payment against a ledger.
///
/// POST /payments
#[tracing::instrument(skip(state, payload))]
pub async fn record_payment(
    State(state): State<AppState>,
    Json(payload): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), AppError> {
    payload.validate()?;
    // Manually submitted gateway references are never signature-verified.
    let gateway = payload.gateway.map(|refs| GatewayRefs {
        order_id: refs.order_id,
        payment_id: refs.payment_id,
        signature_verified: false,
    });
    let payment = state
        .payments
        .record(RecordPaymentCommand {
            ledger_id: payload.ledger_id,
            amount: payload.amount,
            paid_for: payload.paid_for,
            mode: payload.mode,
            method: payload.method,
            recorded_by: payload.recorded_by,
            gateway,
            installment_no: payload.installment_no,
            notes: payload.notes,
            requires_verification: payload.requires_verification,
        })
        .await?;
    let response = PaymentResponse::new(payment, state.payments.receipt_prefix());
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /payments/:id
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, AppError> {
    let payment = state.payments.get(id).await?;
    Ok(Json(PaymentResponse::new(
        payment,
        state.payments.receipt_prefix(),
    )))
}

/// Payment history of one ledger, newest first.
///
/// GET /ledgers/:id/payments
pub async fn list_ledger_payments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<PaymentResponse>>, AppError> {
    let prefix = state.payments.receipt_prefix().to_string();
    let payments = state.payments.list_for_ledger(id).await?;
    Ok(Json(
        payments
            .into_iter()
            .map(|payment| PaymentResponse::new(payment, &prefix))
            .collect(),
    ))
}

/// Approve or reject a pending cheque/DD payment.
///
/// POST /payments/:id/verify
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<Json<PaymentResponse>, AppError> {
    payload.validate()?;
    let payment = state
        .payments
        .verify(id, payload.approved, payload.verified_by, payload.notes)
        .await?;
    Ok(Json(PaymentResponse::new(
        payment,
        state.payments.receipt_prefix(),
    )))
}

/// Refund a settled payment in full.
///
/// POST /payments/:id/refund
pub async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RefundPaymentRequest>,
) -> Result<Json<PaymentResponse>, AppError> {
    payload.validate()?;
    let payment = state
        .payments
        .refund(id, payload.reason, payload.refunded_by)
        .await?;
    Ok(Json(PaymentResponse::new(
        payment,
        state.payments.receipt_prefix(),
    )))
}

/// Open a Razorpay order for the checkout widget.
///
/// POST /payments/orders
pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CheckoutOrder>), AppError> {
    let order = state
        .payments
        .create_order(payload.ledger_id, payload.amount)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// Checkout callback: signature triple in, verified payment out.
///
/// POST /payments/verify-online
pub async fn verify_online(
    State(state): State<AppState>,
    Json(payload): Json<VerifyOnlineRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), AppError> {
    payload.validate()?;
    let payment = state
        .payments
        .verify_online(VerifyOnlineCommand {
            order_id: payload.razorpay_order_id,
            payment_id: payload.razorpay_payment_id,
            signature: payload.razorpay_signature,
            ledger_id: payload.ledger_id,
            paid_for: payload.paid_for,
            recorded_by: payload
                .recorded_by
                .unwrap_or_else(|| "online-checkout".to_string()),
        })
        .await?;
    let response = PaymentResponse::new(payment, state.payments.receipt_prefix());
    Ok((StatusCode::CREATED, Json(response)))
}
