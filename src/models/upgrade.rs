//! Semester promotion audit log.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::student::ServicesOpted;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeStatus {
    Completed,
    Failed,
    RolledBack,
}

impl UpgradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpgradeStatus::Completed => "completed",
            UpgradeStatus::Failed => "failed",
            UpgradeStatus::RolledBack => "rolled_back",
        }
    }
}

/// Recorded when a completed upgrade is compensated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackInfo {
    pub actor: String,
    pub reason: String,
    pub rolled_back_at: DateTime<Utc>,
    /// Payments existed against the generated ledger at rollback time; the
    /// rollback still ran but the money movement is not undone here.
    pub had_payments: bool,
}

/// One upgrade attempt, written on every attempt (success or failure) and
/// mutated only by a rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemesterUpgradeLog {
    #[serde(rename = "_id")]
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

impl SemesterUpgradeLog {
    pub fn is_rolled_back(&self) -> bool {
        self.rollback.is_some()
    }
}
