//! Payment recording, verification, refunds and the checkout flow.
//!
//! Recording is a two-step write: the allocations land on the ledger first
//! (compare-and-swap, re-planned on every retry), then the payment document
//! is inserted. A failed insert un-applies the allocations again, so the
//! ledger never counts money that has no payment record.

use anyhow::anyhow;
use chrono::{Datelike, DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    format_receipt_no, Allocation, FeeLedger, GatewayRefs, NotificationEvent, NotificationKind,
    Payment, PaymentMethod, PaymentMode, PaymentStatus, RefundInfo, VerificationInfo,
};
use crate::services::metrics::{LEDGER_SAVES_TOTAL, PAYMENTS_RECORDED};
use crate::services::notifier::Notifier;
use crate::services::razorpay::{from_paise, PaymentGateway};
use crate::services::store::FeeStore;
use crate::services::CAS_MAX_ATTEMPTS;

/// Everything `record` needs. `paid_for` is the allocation target list; an
/// empty list targets every included unpaid item in ledger order.
#[derive(Debug, Clone)]
pub struct RecordPaymentCommand {
    pub ledger_id: Uuid,
    pub amount: Decimal,
    pub paid_for: Vec<Uuid>,
    pub mode: PaymentMode,
    pub method: PaymentMethod,
    pub recorded_by: String,
    pub gateway: Option<GatewayRefs>,
    pub installment_no: Option<u32>,
    pub notes: Option<String>,
    /// Overrides the cheque/demand-draft verification default when set.
    pub requires_verification: Option<bool>,
}

impl RecordPaymentCommand {
    /// Plain offline payment with the defaults most call sites want.
    pub fn offline(
        ledger_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
        recorded_by: impl Into<String>,
    ) -> Self {
        Self {
            ledger_id,
            amount,
            paid_for: Vec::new(),
            mode: PaymentMode::Offline,
            method,
            recorded_by: recorded_by.into(),
            gateway: None,
            installment_no: None,
            notes: None,
            requires_verification: None,
        }
    }
}

/// Checkout callback triple plus where the money should land.
#[derive(Debug, Clone)]
pub struct VerifyOnlineCommand {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
    pub ledger_id: Uuid,
    pub paid_for: Vec<Uuid>,
    pub recorded_by: String,
}

/// What the checkout widget needs to open a gateway order.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOrder {
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub receipt_no: String,
    pub key_id: String,
}

pub struct PaymentRecorder {
    store: Arc<dyn FeeStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    receipt_prefix: String,
    gateway_key_id: String,
}

impl PaymentRecorder {
    pub fn new(
        store: Arc<dyn FeeStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        receipt_prefix: String,
        gateway_key_id: String,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            receipt_prefix,
            gateway_key_id,
        }
    }

    /// Prefix prepended to receipt numbers for display.
    pub fn receipt_prefix(&self) -> &str {
        &self.receipt_prefix
    }

    /// Record a payment against a ledger.
    ///
    /// The allocation is planned and applied atomically per attempt; a
    /// remainder that no target can absorb rejects the whole payment before
    /// anything is written.
    pub async fn record(&self, cmd: RecordPaymentCommand) -> Result<Payment, AppError> {
        for attempt in 1..=CAS_MAX_ATTEMPTS {
            let now = Utc::now();
            let mut ledger = self.require_ledger(cmd.ledger_id).await?;
            let expected = ledger.version;
            let allocations = ledger.plan_allocation(cmd.amount, &cmd.paid_for)?;
            ledger.apply_allocations(&allocations);
            ledger.recompute(now);
            ledger.bump_version(now);
            match self.store.save_ledger(&ledger, expected).await {
                Ok(()) => {
                    LEDGER_SAVES_TOTAL.with_label_values(&["ok"]).inc();
                    return self.persist_payment(cmd, ledger, allocations, now).await;
                }
                Err(AppError::Conflict(_)) if attempt < CAS_MAX_ATTEMPTS => {
                    LEDGER_SAVES_TOTAL.with_label_values(&["conflict"]).inc();
                    tracing::debug!(
                        ledger_id = %cmd.ledger_id,
                        attempt,
                        "Ledger moved while allocating payment, retrying"
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
            "fee ledger {} is being modified concurrently, retry the payment",
            cmd.ledger_id
        )))
    }

    /// The ledger allocations are already saved; issue the receipt and
    /// insert the payment document, compensating if that fails.
    async fn persist_payment(
        &self,
        cmd: RecordPaymentCommand,
        ledger: FeeLedger,
        allocations: Vec<Allocation>,
        now: DateTime<Utc>,
    ) -> Result<Payment, AppError> {
        let year = now.year();
        let seq = match self.store.next_receipt_seq(year).await {
            Ok(seq) => seq,
            Err(e) => {
                self.compensate(ledger.id, &allocations).await;
                return Err(e);
            }
        };
        let requires_verification = cmd
            .requires_verification
            .unwrap_or_else(|| cmd.method.needs_verification());
        let status = if requires_verification {
            PaymentStatus::Pending
        } else if cmd.gateway.as_ref().is_some_and(|refs| refs.signature_verified) {
            PaymentStatus::Verified
        } else {
            PaymentStatus::Confirmed
        };
        let payment = Payment {
            id: Uuid::new_v4(),
            receipt_no: format_receipt_no(year, seq),
            student_id: ledger.student_id,
            ledger_id: ledger.id,
            amount: cmd.amount,
            mode: cmd.mode,
            method: cmd.method,
            status,
            allocations,
            gateway: cmd.gateway,
            requires_verification,
            verification: None,
            refund: None,
            installment_no: cmd.installment_no,
            notes: cmd.notes,
            recorded_by: cmd.recorded_by,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.store.insert_payment(&payment).await {
            self.compensate(ledger.id, &payment.allocations).await;
            return Err(e);
        }

        PAYMENTS_RECORDED
            .with_label_values(&[payment.method.as_str(), payment.status.as_str()])
            .inc();
        tracing::info!(
            payment_id = %payment.id,
            ledger_id = %payment.ledger_id,
            receipt_no = %payment.receipt_no,
            amount = %payment.amount,
            method = payment.method.as_str(),
            status = payment.status.as_str(),
            "Recorded payment"
        );
        self.notifier
            .notify(NotificationEvent::new(
                payment.student_id,
                NotificationKind::PaymentReceived,
                "Payment received",
                format!(
                    "Payment of {} received, receipt {}",
                    payment.amount,
                    payment.display_receipt(&self.receipt_prefix)
                ),
                "payment",
                payment.id,
            ))
            .await;
        Ok(payment)
    }

    /// Back-office verification of a pending offline instrument.
    pub async fn verify(
        &self,
        payment_id: Uuid,
        approved: bool,
        actor: String,
        notes: Option<String>,
    ) -> Result<Payment, AppError> {
        let mut payment = self.require_payment(payment_id).await?;
        if payment.status != PaymentStatus::Pending {
            return Err(AppError::Conflict(anyhow!(
                "payment {} is {}, only pending payments can be verified",
                payment_id,
                payment.status.as_str()
            )));
        }
        let now = Utc::now();
        if !approved {
            // The cheque bounced: take its money back off the ledger.
            self.reverse_allocations(payment.ledger_id, &payment.allocations)
                .await?;
        }
        payment.status = if approved {
            PaymentStatus::Verified
        } else {
            PaymentStatus::Failed
        };
        payment.requires_verification = false;
        payment.verification = Some(VerificationInfo {
            approved,
            verified_by: actor,
            notes,
            verified_at: now,
        });
        payment.updated_at = now;
        self.store.update_payment(&payment).await?;
        tracing::info!(
            payment_id = %payment.id,
            approved,
            status = payment.status.as_str(),
            "Verified offline payment"
        );
        Ok(payment)
    }

    /// Full refund. The gateway is asked first when the payment came
    /// through one; a gateway failure aborts with nothing changed locally.
    pub async fn refund(
        &self,
        payment_id: Uuid,
        reason: String,
        actor: String,
    ) -> Result<Payment, AppError> {
        let mut payment = self.require_payment(payment_id).await?;
        if !matches!(
            payment.status,
            PaymentStatus::Confirmed | PaymentStatus::Verified
        ) {
            return Err(AppError::Conflict(anyhow!(
                "payment {} is {} and cannot be refunded",
                payment_id,
                payment.status.as_str()
            )));
        }
        let gateway_refund_id = match &payment.gateway {
            Some(refs) => {
                let refund = self
                    .gateway
                    .create_refund(&refs.payment_id, payment.amount, &reason)
                    .await?;
                Some(refund.id)
            }
            None => None,
        };
        let now = Utc::now();
        self.reverse_allocations(payment.ledger_id, &payment.allocations)
            .await?;
        payment.status = PaymentStatus::Refunded;
        payment.refund = Some(RefundInfo {
            reason,
            refunded_by: actor,
            gateway_refund_id,
            refunded_at: now,
        });
        payment.updated_at = now;
        self.store.update_payment(&payment).await?;
        tracing::info!(
            payment_id = %payment.id,
            ledger_id = %payment.ledger_id,
            amount = %payment.amount,
            "Refunded payment"
        );
        Ok(payment)
    }

    /// Checkout bootstrap: a gateway order carrying a fresh receipt
    /// reference. Nothing is persisted until the callback verifies.
    pub async fn create_order(
        &self,
        ledger_id: Uuid,
        amount: Decimal,
    ) -> Result<CheckoutOrder, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow!(
                "order amount must be greater than zero"
            )));
        }
        let ledger = self.require_ledger(ledger_id).await?;
        let now = Utc::now();
        let seq = self.store.next_receipt_seq(now.year()).await?;
        let receipt_no = format_receipt_no(now.year(), seq);
        let order = self.gateway.create_order(amount, &receipt_no).await?;
        tracing::info!(
            ledger_id = %ledger.id,
            order_id = %order.id,
            amount = %amount,
            "Created checkout order"
        );
        Ok(CheckoutOrder {
            order_id: order.id,
            amount,
            currency: order.currency,
            receipt_no,
            key_id: self.gateway_key_id.clone(),
        })
    }

    /// Checkout callback: verify the signature, fetch the authoritative
    /// amount from the gateway and record a verified online payment.
    pub async fn verify_online(&self, cmd: VerifyOnlineCommand) -> Result<Payment, AppError> {
        let valid = self.gateway.verify_payment_signature(
            &cmd.order_id,
            &cmd.payment_id,
            &cmd.signature,
        )?;
        if !valid {
            return Err(AppError::SignatureInvalid(format!(
                "checkout signature mismatch for order {}",
                cmd.order_id
            )));
        }
        if self
            .store
            .find_payment_by_gateway_id(&cmd.payment_id)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(anyhow!(
                "gateway payment {} is already recorded",
                cmd.payment_id
            )));
        }

        let gateway_payment = self.gateway.get_payment(&cmd.payment_id).await?;
        let amount = from_paise(gateway_payment.amount);
        // Anything that is not UPI or netbanking is booked as a card charge.
        let method = match gateway_payment.method.as_deref() {
            Some("upi") => PaymentMethod::Upi,
            Some("netbanking") => PaymentMethod::NetBanking,
            _ => PaymentMethod::Card,
        };
        self.record(RecordPaymentCommand {
            ledger_id: cmd.ledger_id,
            amount,
            paid_for: cmd.paid_for,
            mode: PaymentMode::Online,
            method,
            recorded_by: cmd.recorded_by,
            gateway: Some(GatewayRefs {
                order_id: Some(cmd.order_id),
                payment_id: cmd.payment_id,
                signature_verified: true,
            }),
            installment_no: None,
            notes: None,
            requires_verification: Some(false),
        })
        .await
    }

    pub async fn get(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        self.require_payment(payment_id).await
    }

    pub async fn list_for_ledger(&self, ledger_id: Uuid) -> Result<Vec<Payment>, AppError> {
        self.require_ledger(ledger_id).await?;
        self.store.list_payments_for_ledger(ledger_id).await
    }

    /// Take previously applied allocations back off the ledger, with the
    /// same CAS retry discipline as applying them.
    async fn reverse_allocations(
        &self,
        ledger_id: Uuid,
        allocations: &[Allocation],
    ) -> Result<(), AppError> {
        for attempt in 1..=CAS_MAX_ATTEMPTS {
            let now = Utc::now();
            let mut ledger = self.require_ledger(ledger_id).await?;
            let expected = ledger.version;
            ledger.unapply_allocations(allocations);
            ledger.recompute(now);
            ledger.bump_version(now);
            match self.store.save_ledger(&ledger, expected).await {
                Ok(()) => {
                    LEDGER_SAVES_TOTAL.with_label_values(&["ok"]).inc();
                    return Ok(());
                }
                Err(AppError::Conflict(_)) if attempt < CAS_MAX_ATTEMPTS => {
                    LEDGER_SAVES_TOTAL.with_label_values(&["conflict"]).inc();
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
            "fee ledger {} is being modified concurrently, retry the reversal",
            ledger_id
        )))
    }

    /// Compensation after a failed payment insert: best effort, logged.
    async fn compensate(&self, ledger_id: Uuid, allocations: &[Allocation]) {
        if let Err(e) = self.reverse_allocations(ledger_id, allocations).await {
            tracing::error!(
                ledger_id = %ledger_id,
                error = %e,
                "Failed to reverse allocations after a payment insert failure"
            );
        }
    }

    async fn require_ledger(&self, ledger_id: Uuid) -> Result<FeeLedger, AppError> {
        self.store
            .get_ledger(ledger_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("fee ledger {} not found", ledger_id)))
    }

    async fn require_payment(&self, payment_id: Uuid) -> Result<Payment, AppError> {
        self.store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("payment {} not found", payment_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryMeta, LedgerStatus, ServicesOpted, Student};
    use crate::services::notifier::StoreNotifier;
    use crate::services::razorpay::StubGateway;
    use crate::services::store::MemoryStore;
    use rust_decimal_macros::dec;

    struct Harness {
        store: Arc<MemoryStore>,
        gateway: Arc<StubGateway>,
        payments: PaymentRecorder,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(StubGateway::new());
        let notifier = Arc::new(StoreNotifier::new(store.clone()));
        let payments = PaymentRecorder::new(
            store.clone(),
            gateway.clone(),
            notifier,
            "SF".to_string(),
            "rzp_test_key".to_string(),
        );
        Harness {
            store,
            gateway,
            payments,
        }
    }

    /// Ledger with two items: tuition 10000 and lab 2000.
    async fn seeded_ledger(store: &MemoryStore) -> FeeLedger {
        let student = Student::new(
            "Asha Rao".to_string(),
            "asha@example.edu".to_string(),
            "BSc".to_string(),
            1,
            6,
            ServicesOpted::default(),
        );
        store.insert_student(&student).await.unwrap();
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
                dec!(10000),
                CategoryMeta::custom(),
            )
            .unwrap();
        ledger
            .add_custom_item(
                Uuid::new_v4(),
                "Lab".to_string(),
                dec!(2000),
                CategoryMeta::custom(),
            )
            .unwrap();
        ledger.recompute(Utc::now());
        store.insert_ledger(&ledger).await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn cash_payment_allocates_greedily_in_ledger_order() {
        let h = harness().await;
        let ledger = seeded_ledger(&h.store).await;

        let payment = h
            .payments
            .record(RecordPaymentCommand::offline(
                ledger.id,
                dec!(10500),
                PaymentMethod::Cash,
                "clerk@example.edu",
            ))
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Confirmed);
        assert_eq!(payment.allocations.len(), 2);
        assert_eq!(payment.allocations[0].amount, dec!(10000));
        assert_eq!(payment.allocations[1].amount, dec!(500));
        assert_eq!(payment.receipt_no, format!("{}000001", Utc::now().year()));

        let saved = h.store.get_ledger(ledger.id).await.unwrap().unwrap();
        assert_eq!(saved.total_paid, dec!(10500));
        assert_eq!(saved.status, LedgerStatus::Partial);
    }

    #[tokio::test]
    async fn overpayment_rejects_without_writing() {
        let h = harness().await;
        let ledger = seeded_ledger(&h.store).await;

        let err = h
            .payments
            .record(RecordPaymentCommand::offline(
                ledger.id,
                dec!(13000),
                PaymentMethod::Cash,
                "clerk@example.edu",
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(err.to_string().contains("by 1000"));

        let saved = h.store.get_ledger(ledger.id).await.unwrap().unwrap();
        assert_eq!(saved.total_paid, Decimal::ZERO);
        assert_eq!(saved.version, ledger.version);
        assert!(h
            .store
            .list_payments_for_ledger(ledger.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn cheque_starts_pending_and_rejection_reverses_the_ledger() {
        let h = harness().await;
        let ledger = seeded_ledger(&h.store).await;

        let payment = h
            .payments
            .record(RecordPaymentCommand::offline(
                ledger.id,
                dec!(5000),
                PaymentMethod::Cheque {
                    cheque_number: "003321".to_string(),
                    bank_name: "SBI".to_string(),
                },
                "clerk@example.edu",
            ))
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert!(payment.requires_verification);
        let mid = h.store.get_ledger(ledger.id).await.unwrap().unwrap();
        assert_eq!(mid.total_paid, dec!(5000));

        let rejected = h
            .payments
            .verify(
                payment.id,
                false,
                "registrar@example.edu".to_string(),
                Some("returned unpaid".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(rejected.status, PaymentStatus::Failed);
        assert!(!rejected.requires_verification);

        let saved = h.store.get_ledger(ledger.id).await.unwrap().unwrap();
        assert_eq!(saved.total_paid, Decimal::ZERO);
        assert_eq!(saved.status, LedgerStatus::Unpaid);

        // A decided payment cannot be verified again.
        let err = h
            .payments
            .verify(payment.id, true, "registrar@example.edu".to_string(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn receipts_are_sequential_within_the_year() {
        let h = harness().await;
        let ledger = seeded_ledger(&h.store).await;

        let first = h
            .payments
            .record(RecordPaymentCommand::offline(
                ledger.id,
                dec!(1000),
                PaymentMethod::Cash,
                "clerk@example.edu",
            ))
            .await
            .unwrap();
        let second = h
            .payments
            .record(RecordPaymentCommand::offline(
                ledger.id,
                dec!(1000),
                PaymentMethod::Upi,
                "clerk@example.edu",
            ))
            .await
            .unwrap();

        let year = Utc::now().year();
        assert_eq!(first.receipt_no, format_receipt_no(year, 1));
        assert_eq!(second.receipt_no, format_receipt_no(year, 2));
        assert_eq!(first.display_receipt("SF"), format!("SF-{}", first.receipt_no));
    }

    #[tokio::test]
    async fn gateway_failure_aborts_refund_untouched() {
        let h = harness().await;
        let ledger = seeded_ledger(&h.store).await;
        h.gateway.seed_payment("pay_stub_1", dec!(3000));

        let payment = h
            .payments
            .record(RecordPaymentCommand {
                gateway: Some(GatewayRefs {
                    order_id: Some("order_stub_1".to_string()),
                    payment_id: "pay_stub_1".to_string(),
                    signature_verified: true,
                }),
                mode: PaymentMode::Online,
                ..RecordPaymentCommand::offline(
                    ledger.id,
                    dec!(3000),
                    PaymentMethod::Card,
                    "checkout",
                )
            })
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Verified);

        h.gateway.set_fail_refunds(true);
        let err = h
            .payments
            .refund(
                payment.id,
                "duplicate charge".to_string(),
                "registrar@example.edu".to_string(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Gateway(_)));

        let untouched = h.store.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, PaymentStatus::Verified);
        let saved = h.store.get_ledger(ledger.id).await.unwrap().unwrap();
        assert_eq!(saved.total_paid, dec!(3000));

        h.gateway.set_fail_refunds(false);
        let refunded = h
            .payments
            .refund(
                payment.id,
                "duplicate charge".to_string(),
                "registrar@example.edu".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
        assert!(refunded
            .refund
            .as_ref()
            .is_some_and(|r| r.gateway_refund_id.is_some()));
        let reversed = h.store.get_ledger(ledger.id).await.unwrap().unwrap();
        assert_eq!(reversed.total_paid, Decimal::ZERO);
        assert_eq!(h.gateway.refund_calls().len(), 1);
    }

    #[tokio::test]
    async fn checkout_callback_records_the_gateway_amount() {
        let h = harness().await;
        let ledger = seeded_ledger(&h.store).await;
        h.gateway.seed_payment("pay_cb_1", dec!(12000));

        let order = h
            .payments
            .create_order(ledger.id, dec!(12000))
            .await
            .unwrap();
        assert_eq!(order.key_id, "rzp_test_key");
        assert!(order.order_id.starts_with("order_"));

        let signature = h.gateway.sign_checkout(&order.order_id, "pay_cb_1");
        let payment = h
            .payments
            .verify_online(VerifyOnlineCommand {
                order_id: order.order_id.clone(),
                payment_id: "pay_cb_1".to_string(),
                signature,
                ledger_id: ledger.id,
                paid_for: Vec::new(),
                recorded_by: "checkout".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(payment.amount, dec!(12000));
        assert_eq!(payment.status, PaymentStatus::Verified);
        assert_eq!(payment.method, PaymentMethod::Card);
        assert!(payment.gateway.as_ref().is_some_and(|g| g.signature_verified));
        let saved = h.store.get_ledger(ledger.id).await.unwrap().unwrap();
        assert_eq!(saved.status, LedgerStatus::Paid);
    }

    #[tokio::test]
    async fn checkout_callback_rejects_a_bad_signature() {
        let h = harness().await;
        let ledger = seeded_ledger(&h.store).await;
        h.gateway.seed_payment("pay_cb_2", dec!(500));

        let err = h
            .payments
            .verify_online(VerifyOnlineCommand {
                order_id: "order_cb_2".to_string(),
                payment_id: "pay_cb_2".to_string(),
                signature: "forged".to_string(),
                ledger_id: ledger.id,
                paid_for: Vec::new(),
                recorded_by: "checkout".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SignatureInvalid(_)));
        assert!(h
            .store
            .list_payments_for_ledger(ledger.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn replayed_checkout_callback_is_a_conflict() {
        let h = harness().await;
        let ledger = seeded_ledger(&h.store).await;
        h.gateway.seed_payment("pay_cb_3", dec!(100));
        let signature = h.gateway.sign_checkout("order_cb_3", "pay_cb_3");

        let cmd = VerifyOnlineCommand {
            order_id: "order_cb_3".to_string(),
            payment_id: "pay_cb_3".to_string(),
            signature,
            ledger_id: ledger.id,
            paid_for: Vec::new(),
            recorded_by: "checkout".to_string(),
        };
        h.payments.verify_online(cmd.clone()).await.unwrap();
        let err = h.payments.verify_online(cmd).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
