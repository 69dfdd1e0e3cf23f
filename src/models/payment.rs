//! Payment records and receipt numbers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Channel the money arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    Online,
    Offline,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::Online => "online",
            PaymentMode::Offline => "offline",
        }
    }
}

/// Concrete instrument; cheque and demand draft carry their paper details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Cheque {
        cheque_number: String,
        bank_name: String,
    },
    DemandDraft {
        dd_number: String,
        bank_name: String,
    },
    Upi,
    Card,
    NetBanking,
    Subscription,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Cheque { .. } => "cheque",
            PaymentMethod::DemandDraft { .. } => "demand_draft",
            PaymentMethod::Upi => "upi",
            PaymentMethod::Card => "card",
            PaymentMethod::NetBanking => "net_banking",
            PaymentMethod::Subscription => "subscription",
        }
    }

    /// Paper instruments clear later and need back-office verification.
    pub fn needs_verification(&self) -> bool {
        matches!(
            self,
            PaymentMethod::Cheque { .. } | PaymentMethod::DemandDraft { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Verified,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Verified => "verified",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

/// How much of the payment went to which fee item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub fee_item_id: Uuid,
    pub amount: Decimal,
}

/// Gateway identifiers attached to online payments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRefs {
    pub order_id: Option<String>,
    pub payment_id: String,
    pub signature_verified: bool,
}

/// Outcome of back-office verification of an offline instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationInfo {
    pub approved: bool,
    pub verified_by: String,
    pub notes: Option<String>,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundInfo {
    pub reason: String,
    pub refunded_by: String,
    pub gateway_refund_id: Option<String>,
    pub refunded_at: DateTime<Utc>,
}

/// One recorded payment event. Immutable once created except for the
/// status/verification/refund fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub receipt_no: String,
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
    /// Set for subscription charges: which installment this payment covers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installment_no: Option<u32>,
    pub notes: Option<String>,
    pub recorded_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Receipt numbers are unique and monotonically increasing within a
/// calendar year: `{year}{sequence:06}`.
pub fn format_receipt_no(year: i32, sequence: u64) -> String {
    format!("{year}{sequence:06}")
}

impl Payment {
    /// Receipt as printed, with the institution prefix.
    pub fn display_receipt(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.receipt_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_format_zero_pads_sequence() {
        assert_eq!(format_receipt_no(2026, 481), "2026000481");
        assert_eq!(format_receipt_no(2026, 1), "2026000001");
        assert_eq!(format_receipt_no(2026, 1_000_000), "20261000000");
    }

    #[test]
    fn paper_instruments_need_verification() {
        assert!(PaymentMethod::Cheque {
            cheque_number: "001122".to_string(),
            bank_name: "SBI".to_string(),
        }
        .needs_verification());
        assert!(!PaymentMethod::Cash.needs_verification());
        assert!(!PaymentMethod::Subscription.needs_verification());
    }

    #[test]
    fn method_serializes_with_type_tag() {
        let method = PaymentMethod::Cheque {
            cheque_number: "991".to_string(),
            bank_name: "HDFC".to_string(),
        };
        let json = serde_json::to_value(&method).unwrap();
        assert_eq!(json["type"], "cheque");
        assert_eq!(json["cheque_number"], "991");
    }
}
