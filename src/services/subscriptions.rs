//! EMI subscription engine.
//!
//! Registers mandates with the gateway and then follows the gateway's view
//! of the world through webhooks. Deliveries are verified, claimed in the
//! idempotency table and only then dispatched; transitions the state
//! machine does not allow are logged and acknowledged, never errors, since
//! redelivery and reordering are normal webhook behaviour.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ReconciliationConfig;
use crate::error::AppError;
use crate::models::{
    CancellationInfo, GatewayRefs, InstallmentRecord, NotificationEvent, NotificationKind,
    PaymentMethod, PaymentMode, PlanType, Student, Subscription, SubscriptionStatus,
};
use crate::services::metrics::WEBHOOK_EVENTS_TOTAL;
use crate::services::notifier::Notifier;
use crate::services::payments::{PaymentRecorder, RecordPaymentCommand};
use crate::services::razorpay::{parse_webhook_event, PaymentGateway, WebhookEvent};
use crate::services::store::FeeStore;
use crate::services::CAS_MAX_ATTEMPTS;

/// Label the gateway charge records carry in `recorded_by`.
const WEBHOOK_ACTOR: &str = "razorpay-webhook";

#[derive(Debug, Clone)]
pub struct CreateSubscriptionCommand {
    pub student_id: Uuid,
    pub ledger_id: Uuid,
    pub plan_type: PlanType,
    pub total_amount: rust_decimal::Decimal,
    pub installment_amount: rust_decimal::Decimal,
    pub total_installments: u32,
    pub start_date: DateTime<Utc>,
}

/// How a webhook delivery was handled. Everything here is a 200 to the
/// gateway; rejections surface as errors instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    Duplicate,
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

pub struct SubscriptionEngine {
    store: Arc<dyn FeeStore>,
    gateway: Arc<dyn PaymentGateway>,
    payments: Arc<PaymentRecorder>,
    notifier: Arc<dyn Notifier>,
    config: ReconciliationConfig,
}

impl SubscriptionEngine {
    pub fn new(
        store: Arc<dyn FeeStore>,
        gateway: Arc<dyn PaymentGateway>,
        payments: Arc<PaymentRecorder>,
        notifier: Arc<dyn Notifier>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            payments,
            notifier,
            config,
        }
    }

    /// Register an EMI mandate: plan, customer and subscription at the
    /// gateway, then the local record in `created`.
    pub async fn create(&self, cmd: CreateSubscriptionCommand) -> Result<Subscription, AppError> {
        Subscription::validate_terms(
            cmd.total_amount,
            cmd.installment_amount,
            cmd.total_installments,
        )?;
        let student = self.require_student(cmd.student_id).await?;
        let ledger = self
            .store
            .get_ledger(cmd.ledger_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("fee ledger {} not found", cmd.ledger_id)))?;
        if ledger.student_id != student.id {
            return Err(AppError::BadRequest(anyhow!(
                "fee ledger {} does not belong to student {}",
                ledger.id,
                student.id
            )));
        }
        if let Some(open) = self
            .store
            .find_open_subscription_for_ledger(cmd.ledger_id)
            .await?
        {
            return Err(AppError::Conflict(anyhow!(
                "ledger {} already has an open subscription {}",
                cmd.ledger_id,
                open.id
            )));
        }

        let description = format!(
            "Fee EMI, {} x {} ({})",
            cmd.total_installments,
            cmd.installment_amount,
            cmd.plan_type.as_str()
        );
        let plan = self
            .gateway
            .create_plan(cmd.plan_type, cmd.installment_amount, &description)
            .await?;
        let customer = self
            .gateway
            .create_customer(&student.full_name, &student.email)
            .await?;
        let gateway_subscription = self
            .gateway
            .create_subscription(&plan.id, &customer.id, cmd.total_installments, cmd.start_date)
            .await?;

        let mut subscription = Subscription::new(
            cmd.student_id,
            cmd.ledger_id,
            cmd.plan_type,
            cmd.total_amount,
            cmd.installment_amount,
            cmd.total_installments,
            cmd.start_date,
        );
        subscription.gateway_plan_id = Some(plan.id);
        subscription.gateway_customer_id = Some(customer.id);
        subscription.gateway_subscription_id = Some(gateway_subscription.id);
        self.store.insert_subscription(&subscription).await?;
        tracing::info!(
            subscription_id = %subscription.id,
            ledger_id = %subscription.ledger_id,
            gateway_subscription_id = ?subscription.gateway_subscription_id,
            installments = subscription.total_installments,
            "Registered EMI subscription"
        );
        Ok(subscription)
    }

    pub async fn get(&self, subscription_id: Uuid) -> Result<Subscription, AppError> {
        self.require_subscription(subscription_id).await
    }

    /// Checkout callback after the student authorizes the mandate.
    pub async fn verify_checkout(
        &self,
        subscription_id: Uuid,
        gateway_payment_id: &str,
        signature: &str,
    ) -> Result<Subscription, AppError> {
        let subscription = self.require_subscription(subscription_id).await?;
        let gateway_id = subscription.gateway_subscription_id.clone().ok_or_else(|| {
            AppError::BadRequest(anyhow!(
                "subscription {} has no gateway registration",
                subscription_id
            ))
        })?;
        let valid = self.gateway.verify_subscription_signature(
            gateway_payment_id,
            &gateway_id,
            signature,
        )?;
        if !valid {
            return Err(AppError::SignatureInvalid(format!(
                "subscription checkout signature mismatch for {}",
                subscription_id
            )));
        }
        match self
            .transition(subscription.id, SubscriptionStatus::Authenticated)
            .await?
        {
            Some(updated) => Ok(updated),
            // Replayed callback or the activated webhook got here first.
            None => {
                let current = self.require_subscription(subscription_id).await?;
                if matches!(
                    current.status,
                    SubscriptionStatus::Authenticated | SubscriptionStatus::Active
                ) {
                    Ok(current)
                } else {
                    Err(AppError::Conflict(anyhow!(
                        "subscription {} is {} and cannot be authenticated",
                        subscription_id,
                        current.status.as_str()
                    )))
                }
            }
        }
    }

    /// One webhook delivery, end to end: signature, parse, claim, dispatch.
    pub async fn on_webhook_event(
        &self,
        signature: Option<&str>,
        event_id: Option<&str>,
        body: &str,
    ) -> Result<WebhookOutcome, AppError> {
        let signature = signature.ok_or_else(|| {
            WEBHOOK_EVENTS_TOTAL
                .with_label_values(&["invalid", "rejected"])
                .inc();
            AppError::SignatureInvalid("missing webhook signature header".to_string())
        })?;
        if !self.gateway.verify_webhook_signature(body, signature)? {
            WEBHOOK_EVENTS_TOTAL
                .with_label_values(&["invalid", "rejected"])
                .inc();
            return Err(AppError::SignatureInvalid(
                "webhook signature mismatch".to_string(),
            ));
        }

        let event = parse_webhook_event(body)?;
        let claim_key = match event_id {
            Some(id) => format!("event:{id}"),
            // No event-id header: fall back to a digest of the body.
            None => format!("event:sha256:{}", hex::encode(Sha256::digest(body.as_bytes()))),
        };
        if !self.store.claim_event(&claim_key).await? {
            tracing::info!(event = %event.event, claim_key = %claim_key, "Duplicate webhook delivery");
            WEBHOOK_EVENTS_TOTAL
                .with_label_values(&[event.event.as_str(), "duplicate"])
                .inc();
            return Ok(WebhookOutcome::Duplicate);
        }

        let outcome = self.dispatch(&event).await?;
        WEBHOOK_EVENTS_TOTAL
            .with_label_values(&[event.event.as_str(), outcome.as_str()])
            .inc();
        Ok(outcome)
    }

    async fn dispatch(&self, event: &WebhookEvent) -> Result<WebhookOutcome, AppError> {
        use SubscriptionStatus::*;
        match event.event.as_str() {
            "subscription.charged" => self.handle_charged(event).await,
            "subscription.authenticated" => self.handle_transition(event, Authenticated).await,
            "subscription.activated" => self.handle_transition(event, Active).await,
            "subscription.resumed" => self.handle_transition(event, Active).await,
            "subscription.paused" => self.handle_transition(event, Paused).await,
            "subscription.halted" => self.handle_transition(event, Halted).await,
            "subscription.cancelled" => self.handle_transition(event, Cancelled).await,
            "subscription.completed" => self.handle_transition(event, Completed).await,
            "subscription.pending" | "payment.failed" => self.handle_failure(event).await,
            other => {
                tracing::info!(event = other, "Ignoring unhandled webhook event");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    /// A successful installment charge: record the payment against the
    /// ledger, book the installment and advance the schedule.
    async fn handle_charged(&self, event: &WebhookEvent) -> Result<WebhookOutcome, AppError> {
        let Some(gateway_subscription_id) = event.subscription_id() else {
            tracing::warn!("Charged webhook without a subscription entity");
            return Ok(WebhookOutcome::Ignored);
        };
        let Some(gateway_payment) = event.payment() else {
            tracing::warn!(
                gateway_subscription_id,
                "Charged webhook without a payment entity"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        // Second idempotency layer: one gateway payment books one charge,
        // whatever envelope it arrives in.
        if !self
            .store
            .claim_event(&format!("charge:{}", gateway_payment.id))
            .await?
        {
            tracing::info!(
                gateway_payment_id = %gateway_payment.id,
                "Charge already booked, skipping"
            );
            return Ok(WebhookOutcome::Duplicate);
        }
        if self
            .store
            .find_payment_by_gateway_id(&gateway_payment.id)
            .await?
            .is_some()
        {
            return Ok(WebhookOutcome::Duplicate);
        }

        let Some(subscription) = self
            .store
            .find_subscription_by_gateway_id(gateway_subscription_id)
            .await?
        else {
            tracing::warn!(
                gateway_subscription_id,
                "Charged webhook for an unknown subscription"
            );
            return Ok(WebhookOutcome::Ignored);
        };
        if subscription.status.is_terminal() {
            tracing::warn!(
                subscription_id = %subscription.id,
                status = subscription.status.as_str(),
                "Charged webhook for a closed subscription, ignoring"
            );
            return Ok(WebhookOutcome::Ignored);
        }

        let installment_no = subscription.completed_installments + 1;
        let payment = self
            .payments
            .record(RecordPaymentCommand {
                ledger_id: subscription.ledger_id,
                amount: subscription.installment_amount,
                paid_for: Vec::new(),
                mode: PaymentMode::Online,
                method: PaymentMethod::Subscription,
                recorded_by: WEBHOOK_ACTOR.to_string(),
                gateway: Some(GatewayRefs {
                    order_id: gateway_payment.order_id.clone(),
                    payment_id: gateway_payment.id.clone(),
                    signature_verified: true,
                }),
                installment_no: Some(installment_no),
                notes: None,
                requires_verification: Some(false),
            })
            .await?;

        let record = InstallmentRecord {
            installment_no,
            payment_id: payment.id,
            gateway_payment_id: gateway_payment.id.clone(),
            amount: subscription.installment_amount,
            charged_at: Utc::now(),
        };
        let before = subscription.status;
        let (updated, booked) = self
            .mutate(subscription.id, |sub, now| {
                // A charge arriving before the activated event implies the
                // activation; from halted it is the gateway recovering.
                if sub.status != SubscriptionStatus::Active {
                    sub.try_transition(SubscriptionStatus::Active);
                }
                Ok(sub.record_charge(record.clone(), now))
            })
            .await?;
        if !booked {
            tracing::warn!(
                subscription_id = %updated.id,
                "Charge arrived for an already complete subscription"
            );
        }
        tracing::info!(
            subscription_id = %updated.id,
            installment_no,
            completed = updated.completed_installments,
            total = updated.total_installments,
            status = updated.status.as_str(),
            "Booked installment charge"
        );
        if updated.status != before {
            self.notify_status(&updated).await;
        }
        Ok(WebhookOutcome::Processed)
    }

    /// Map a lifecycle webhook onto the state machine.
    async fn handle_transition(
        &self,
        event: &WebhookEvent,
        to: SubscriptionStatus,
    ) -> Result<WebhookOutcome, AppError> {
        let Some(gateway_subscription_id) = event.subscription_id() else {
            tracing::warn!(event = %event.event, "Webhook without a subscription entity");
            return Ok(WebhookOutcome::Ignored);
        };
        let Some(subscription) = self
            .store
            .find_subscription_by_gateway_id(gateway_subscription_id)
            .await?
        else {
            tracing::warn!(
                gateway_subscription_id,
                event = %event.event,
                "Webhook for an unknown subscription"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        match self.transition(subscription.id, to).await? {
            Some(updated) => {
                tracing::info!(
                    subscription_id = %updated.id,
                    status = updated.status.as_str(),
                    "Subscription moved by webhook"
                );
                self.notify_status(&updated).await;
                Ok(WebhookOutcome::Processed)
            }
            None => {
                tracing::info!(
                    subscription_id = %subscription.id,
                    from = subscription.status.as_str(),
                    to = to.as_str(),
                    "Webhook transition does not apply, ignoring"
                );
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn handle_failure(&self, event: &WebhookEvent) -> Result<WebhookOutcome, AppError> {
        let Some(gateway_subscription_id) = event.subscription_id() else {
            tracing::warn!(event = %event.event, "Failure webhook without a subscription entity");
            return Ok(WebhookOutcome::Ignored);
        };
        let reason = event
            .payment()
            .and_then(|p| p.error_description.clone())
            .unwrap_or_else(|| "charge failed".to_string());
        self.on_charge_failure(gateway_subscription_id, &reason)
            .await
    }

    /// Register a failed charge attempt; halts the subscription at the
    /// retry ceiling.
    pub async fn on_charge_failure(
        &self,
        gateway_subscription_id: &str,
        reason: &str,
    ) -> Result<WebhookOutcome, AppError> {
        let Some(subscription) = self
            .store
            .find_subscription_by_gateway_id(gateway_subscription_id)
            .await?
        else {
            tracing::warn!(
                gateway_subscription_id,
                "Charge failure for an unknown subscription"
            );
            return Ok(WebhookOutcome::Ignored);
        };
        if subscription.status.is_terminal() {
            return Ok(WebhookOutcome::Ignored);
        }

        let backoff_hours = self.config.retry_backoff_hours;
        let max_retries = self.config.max_charge_retries;
        let (updated, halted) = self
            .mutate(subscription.id, |sub, now| {
                Ok(sub.register_failure(reason, now, backoff_hours, max_retries))
            })
            .await?;
        let attempt = updated
            .failed_attempts
            .iter()
            .find(|a| a.installment_no == updated.completed_installments + 1)
            .map(|a| a.retry_count)
            .unwrap_or(0);
        tracing::warn!(
            subscription_id = %updated.id,
            installment_no = updated.completed_installments + 1,
            retry_count = attempt,
            halted,
            reason,
            "Installment charge failed"
        );
        if halted {
            self.notifier
                .notify(NotificationEvent::new(
                    updated.student_id,
                    NotificationKind::SubscriptionStatusChange,
                    "Subscription halted",
                    format!(
                        "Your fee subscription was halted after {} failed charge attempts",
                        attempt
                    ),
                    "subscription",
                    updated.id,
                ))
                .await;
        }
        Ok(WebhookOutcome::Processed)
    }

    /// Cancel a mandate: gateway first, then the local terminal transition.
    pub async fn cancel(
        &self,
        subscription_id: Uuid,
        actor: String,
        reason: String,
    ) -> Result<Subscription, AppError> {
        let subscription = self.require_subscription(subscription_id).await?;
        if subscription.status.is_terminal() {
            return Err(AppError::Conflict(anyhow!(
                "subscription {} is already {}",
                subscription_id,
                subscription.status.as_str()
            )));
        }
        if let Some(gateway_id) = &subscription.gateway_subscription_id {
            self.gateway.cancel_subscription(gateway_id).await?;
        }

        let (updated, _) = self
            .mutate(subscription_id, |sub, now| {
                if !sub.try_transition(SubscriptionStatus::Cancelled) {
                    return Err(AppError::Conflict(anyhow!(
                        "subscription {} is already {}",
                        sub.id,
                        sub.status.as_str()
                    )));
                }
                sub.next_charge_at = None;
                sub.cancellation = Some(CancellationInfo {
                    cancelled_by: actor.clone(),
                    reason: reason.clone(),
                    cancelled_at: now,
                });
                Ok(())
            })
            .await?;
        tracing::info!(
            subscription_id = %updated.id,
            cancelled_by = %actor,
            "Cancelled subscription"
        );
        self.notify_status(&updated).await;
        Ok(updated)
    }

    /// Active subscriptions whose next charge is due; consumed by the
    /// external charge scheduler.
    pub async fn due_for_charge(&self, as_of: DateTime<Utc>) -> Result<Vec<Subscription>, AppError> {
        self.store.list_due_subscriptions(as_of).await
    }

    /// Lattice-checked transition with a CAS save. `None` means the
    /// transition did not apply and nothing was written.
    async fn transition(
        &self,
        subscription_id: Uuid,
        to: SubscriptionStatus,
    ) -> Result<Option<Subscription>, AppError> {
        for attempt in 1..=CAS_MAX_ATTEMPTS {
            let now = Utc::now();
            let mut sub = self.require_subscription(subscription_id).await?;
            let expected = sub.version;
            if !sub.try_transition(to) {
                return Ok(None);
            }
            if sub.status.is_terminal() {
                sub.next_charge_at = None;
            }
            sub.bump_version(now);
            match self.store.save_subscription(&sub, expected).await {
                Ok(()) => return Ok(Some(sub)),
                Err(AppError::Conflict(_)) if attempt < CAS_MAX_ATTEMPTS => {
                    tracing::debug!(
                        subscription_id = %subscription_id,
                        attempt,
                        "Subscription version moved, retrying transition"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(AppError::Conflict(anyhow!(
            "subscription {} is being modified concurrently, retry the request",
            subscription_id
        )))
    }

    /// Reload-mutate-save with CAS retries, like the ledger path.
    async fn mutate<T, F>(
        &self,
        subscription_id: Uuid,
        mut op: F,
    ) -> Result<(Subscription, T), AppError>
    where
        F: FnMut(&mut Subscription, DateTime<Utc>) -> Result<T, AppError>,
    {
        for attempt in 1..=CAS_MAX_ATTEMPTS {
            let now = Utc::now();
            let mut sub = self.require_subscription(subscription_id).await?;
            let expected = sub.version;
            let out = op(&mut sub, now)?;
            sub.bump_version(now);
            match self.store.save_subscription(&sub, expected).await {
                Ok(()) => return Ok((sub, out)),
                Err(AppError::Conflict(_)) if attempt < CAS_MAX_ATTEMPTS => {
                    tracing::debug!(
                        subscription_id = %subscription_id,
                        attempt,
                        "Subscription version moved, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(AppError::Conflict(anyhow!(
            "subscription {} is being modified concurrently, retry the request",
            subscription_id
        )))
    }

    async fn notify_status(&self, subscription: &Subscription) {
        self.notifier
            .notify(NotificationEvent::new(
                subscription.student_id,
                NotificationKind::SubscriptionStatusChange,
                "Subscription update",
                format!(
                    "Your fee subscription is now {}",
                    subscription.status.as_str()
                ),
                "subscription",
                subscription.id,
            ))
            .await;
    }

    async fn require_student(&self, student_id: Uuid) -> Result<Student, AppError> {
        self.store
            .get_student(student_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("student {} not found", student_id)))
    }

    async fn require_subscription(&self, subscription_id: Uuid) -> Result<Subscription, AppError> {
        self.store
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow!("subscription {} not found", subscription_id))
            })
    }
}
