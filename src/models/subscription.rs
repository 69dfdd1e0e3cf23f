//! Installment (EMI) subscriptions against a ledger.
//!
//! The status lattice follows the gateway's lifecycle:
//! `created -> authenticated -> active -> {completed | halted | cancelled |
//! paused}`; halted/paused can return to active via external reactivation;
//! cancelled/completed/expired are terminal. Webhook-driven transitions that
//! do not fit the current state are ignored, never errors, because gateways
//! redeliver and reorder events.

use anyhow::anyhow;
use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Billing period of an installment plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Monthly,
    Quarterly,
    Yearly,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Monthly => "monthly",
            PlanType::Quarterly => "quarterly",
            PlanType::Yearly => "yearly",
        }
    }

    pub fn months_per_period(&self) -> u32 {
        match self {
            PlanType::Monthly => 1,
            PlanType::Quarterly => 3,
            PlanType::Yearly => 12,
        }
    }

    /// One billing period after `from`. Day-of-month clamps at month end.
    pub fn advance(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from.checked_add_months(Months::new(self.months_per_period()))
            .unwrap_or(from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Created,
    Authenticated,
    Active,
    Paused,
    Halted,
    Cancelled,
    Completed,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Created => "created",
            SubscriptionStatus::Authenticated => "authenticated",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Halted => "halted",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Completed => "completed",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled
                | SubscriptionStatus::Completed
                | SubscriptionStatus::Expired
        )
    }
}

/// One successfully charged installment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallmentRecord {
    pub installment_no: u32,
    pub payment_id: Uuid,
    pub gateway_payment_id: String,
    pub amount: Decimal,
    pub charged_at: DateTime<Utc>,
}

/// Retry bookkeeping for one failed installment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub installment_no: u32,
    pub reason: String,
    pub retry_count: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationInfo {
    pub cancelled_by: String,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

/// An EMI plan satisfying one ledger's balance in installments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub student_id: Uuid,
    pub ledger_id: Uuid,
    pub gateway_subscription_id: Option<String>,
    pub gateway_plan_id: Option<String>,
    pub gateway_customer_id: Option<String>,
    pub plan_type: PlanType,
    pub total_amount: Decimal,
    pub installment_amount: Decimal,
    pub total_installments: u32,
    pub completed_installments: u32,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub next_charge_at: Option<DateTime<Utc>>,
    pub installments: Vec<InstallmentRecord>,
    pub failed_attempts: Vec<FailedAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<CancellationInfo>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// The installment math every plan must satisfy.
    pub fn validate_terms(
        total_amount: Decimal,
        installment_amount: Decimal,
        total_installments: u32,
    ) -> Result<(), AppError> {
        if total_amount <= Decimal::ZERO || installment_amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow!(
                "subscription amounts must be greater than zero"
            )));
        }
        if total_installments == 0 {
            return Err(AppError::BadRequest(anyhow!(
                "a subscription needs at least one installment"
            )));
        }
        if installment_amount * Decimal::from(total_installments) != total_amount {
            return Err(AppError::BadRequest(anyhow!(
                "installment amount {} x {} installments does not equal total amount {}",
                installment_amount,
                total_installments,
                total_amount
            )));
        }
        Ok(())
    }

    pub fn new(
        student_id: Uuid,
        ledger_id: Uuid,
        plan_type: PlanType,
        total_amount: Decimal,
        installment_amount: Decimal,
        total_installments: u32,
        start_date: DateTime<Utc>,
    ) -> Self {
        let span = Months::new(plan_type.months_per_period() * total_installments);
        let end_date = start_date.checked_add_months(span).unwrap_or(start_date);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            student_id,
            ledger_id,
            gateway_subscription_id: None,
            gateway_plan_id: None,
            gateway_customer_id: None,
            plan_type,
            total_amount,
            installment_amount,
            total_installments,
            completed_installments: 0,
            status: SubscriptionStatus::Created,
            start_date,
            end_date,
            next_charge_at: Some(start_date),
            installments: Vec::new(),
            failed_attempts: Vec::new(),
            cancellation: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn allows(&self, to: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        match self.status {
            Created => matches!(to, Authenticated | Active | Cancelled | Expired),
            Authenticated => matches!(to, Active | Cancelled | Expired),
            Active => matches!(to, Paused | Halted | Cancelled | Completed),
            Paused => matches!(to, Active | Cancelled),
            Halted => matches!(to, Active | Cancelled),
            Cancelled | Completed | Expired => false,
        }
    }

    /// Webhook-path transition: applies when the lattice allows it, returns
    /// whether anything changed. Mismatches are the caller's cue to log and
    /// acknowledge.
    pub fn try_transition(&mut self, to: SubscriptionStatus) -> bool {
        if self.status == to {
            return false;
        }
        if !self.allows(to) {
            return false;
        }
        self.status = to;
        true
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active
            && self.completed_installments < self.total_installments
            && self
                .next_charge_at
                .map(|at| at <= now)
                .unwrap_or(false)
    }

    /// Book a successfully charged installment: bumps the counter, clears
    /// that installment's retry record and advances the schedule (or
    /// completes the plan). Returns false when the plan is already full.
    pub fn record_charge(&mut self, record: InstallmentRecord, now: DateTime<Utc>) -> bool {
        if self.completed_installments >= self.total_installments {
            return false;
        }
        let installment_no = record.installment_no;
        self.completed_installments += 1;
        self.failed_attempts
            .retain(|attempt| attempt.installment_no != installment_no);
        self.installments.push(record);
        if self.completed_installments >= self.total_installments {
            self.status = SubscriptionStatus::Completed;
            self.next_charge_at = None;
        } else {
            let base = self.next_charge_at.unwrap_or(now);
            self.next_charge_at = Some(self.plan_type.advance(base));
        }
        true
    }

    /// Record a failed charge attempt for the next pending installment.
    /// Returns true when the retry ceiling was hit and the subscription
    /// halted.
    pub fn register_failure(
        &mut self,
        reason: &str,
        now: DateTime<Utc>,
        backoff_hours: i64,
        max_retries: u32,
    ) -> bool {
        let installment_no = self.completed_installments + 1;
        let next_retry_at = now + Duration::hours(backoff_hours);
        let retry_count = match self
            .failed_attempts
            .iter_mut()
            .find(|attempt| attempt.installment_no == installment_no)
        {
            Some(attempt) => {
                attempt.retry_count += 1;
                attempt.reason = reason.to_string();
                attempt.next_retry_at = next_retry_at;
                attempt.last_failed_at = now;
                attempt.retry_count
            }
            None => {
                self.failed_attempts.push(FailedAttempt {
                    installment_no,
                    reason: reason.to_string(),
                    retry_count: 1,
                    next_retry_at,
                    last_failed_at: now,
                });
                1
            }
        };
        if retry_count >= max_retries {
            self.status = SubscriptionStatus::Halted;
            true
        } else {
            false
        }
    }

    pub fn bump_version(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn monthly_plan() -> Subscription {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Subscription::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            PlanType::Monthly,
            dec!(3000),
            dec!(1000),
            3,
            start,
        )
    }

    fn charge(sub: &mut Subscription, n: u32, now: DateTime<Utc>) -> bool {
        sub.record_charge(
            InstallmentRecord {
                installment_no: n,
                payment_id: Uuid::new_v4(),
                gateway_payment_id: format!("pay_{n:03}"),
                amount: dec!(1000),
                charged_at: now,
            },
            now,
        )
    }

    #[test]
    fn terms_must_multiply_out() {
        assert!(Subscription::validate_terms(dec!(3000), dec!(1000), 3).is_ok());
        assert!(matches!(
            Subscription::validate_terms(dec!(3000), dec!(1000), 4),
            Err(AppError::BadRequest(_))
        ));
        assert!(Subscription::validate_terms(dec!(0), dec!(0), 0).is_err());
    }

    #[test]
    fn end_date_spans_the_whole_plan() {
        let sub = monthly_plan();
        assert_eq!(
            sub.end_date,
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(sub.next_charge_at, Some(sub.start_date));
    }

    #[test]
    fn lattice_accepts_forward_and_rejects_backward() {
        let mut sub = monthly_plan();
        assert!(sub.try_transition(SubscriptionStatus::Authenticated));
        assert!(sub.try_transition(SubscriptionStatus::Active));
        assert!(!sub.try_transition(SubscriptionStatus::Authenticated));
        assert!(sub.try_transition(SubscriptionStatus::Paused));
        assert!(sub.try_transition(SubscriptionStatus::Active));
        assert!(sub.try_transition(SubscriptionStatus::Cancelled));
        // terminal: nothing moves
        assert!(!sub.try_transition(SubscriptionStatus::Active));
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
    }

    #[test]
    fn charges_advance_schedule_then_complete() {
        let mut sub = monthly_plan();
        sub.try_transition(SubscriptionStatus::Authenticated);
        sub.try_transition(SubscriptionStatus::Active);
        let now = sub.start_date;

        assert!(charge(&mut sub, 1, now));
        assert_eq!(sub.completed_installments, 1);
        assert_eq!(
            sub.next_charge_at,
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(sub.status, SubscriptionStatus::Active);

        assert!(charge(&mut sub, 2, now));
        assert!(charge(&mut sub, 3, now));
        assert_eq!(sub.completed_installments, 3);
        assert_eq!(sub.status, SubscriptionStatus::Completed);
        assert_eq!(sub.next_charge_at, None);

        // the plan is full; further charges are refused
        assert!(!charge(&mut sub, 4, now));
        assert_eq!(sub.completed_installments, 3);
    }

    #[test]
    fn quarterly_advances_three_months() {
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let next = PlanType::Quarterly.advance(start);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 4, 30, 0, 0, 0).unwrap());
    }

    #[test]
    fn three_failures_halt_the_subscription() {
        let mut sub = monthly_plan();
        sub.try_transition(SubscriptionStatus::Authenticated);
        sub.try_transition(SubscriptionStatus::Active);
        let now = Utc::now();

        assert!(!sub.register_failure("card declined", now, 24, 3));
        assert!(!sub.register_failure("card declined", now, 24, 3));
        assert!(sub.register_failure("card declined", now, 24, 3));
        assert_eq!(sub.status, SubscriptionStatus::Halted);

        let attempt = &sub.failed_attempts[0];
        assert_eq!(attempt.installment_no, 1);
        assert_eq!(attempt.retry_count, 3);
        assert_eq!(attempt.next_retry_at, now + Duration::hours(24));
    }

    #[test]
    fn successful_charge_clears_the_retry_record() {
        let mut sub = monthly_plan();
        sub.try_transition(SubscriptionStatus::Authenticated);
        sub.try_transition(SubscriptionStatus::Active);
        let now = Utc::now();

        sub.register_failure("insufficient funds", now, 24, 3);
        assert_eq!(sub.failed_attempts.len(), 1);

        charge(&mut sub, 1, now);
        assert!(sub.failed_attempts.is_empty());
    }

    #[test]
    fn due_query_needs_active_status_and_elapsed_schedule() {
        let mut sub = monthly_plan();
        let now = sub.start_date + Duration::hours(1);
        assert!(!sub.is_due(now)); // still created

        sub.try_transition(SubscriptionStatus::Authenticated);
        sub.try_transition(SubscriptionStatus::Active);
        assert!(sub.is_due(now));
        assert!(!sub.is_due(sub.start_date - Duration::hours(1)));
    }
}
