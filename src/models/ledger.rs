//! Per-student-per-term fee ledger aggregate.
//!
//! The ledger owns its fee items, fines and discounts; they are embedded
//! sub-documents updated together in one atomic write. All derived fields
//! come out of [`FeeLedger::recompute`], which is deterministic and
//! idempotent so it can run after every mutation.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::category::CategoryMeta;
use crate::models::payment::Allocation;
use crate::models::template::LedgerSeed;

/// Per-item payment progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeItemStatus {
    Unpaid,
    Partial,
    Paid,
}

impl FeeItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeItemStatus::Unpaid => "unpaid",
            FeeItemStatus::Partial => "partial",
            FeeItemStatus::Paid => "paid",
        }
    }
}

/// Ledger-level payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Unpaid,
    Partial,
    Paid,
    Overdue,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Unpaid => "unpaid",
            LedgerStatus::Partial => "partial",
            LedgerStatus::Paid => "paid",
            LedgerStatus::Overdue => "overdue",
        }
    }
}

/// How a discount amount was specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percentage => "percentage",
            DiscountType::Fixed => "fixed",
        }
    }
}

/// One charge line inside a ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeItem {
    pub id: Uuid,
    pub category_id: Uuid,
    pub name: String,
    pub original_amount: Decimal,
    pub paid: Decimal,
    pub status: FeeItemStatus,
    pub is_optional: bool,
    pub is_included: bool,
    #[serde(default)]
    pub meta: CategoryMeta,
}

impl FeeItem {
    pub fn balance(&self) -> Decimal {
        self.original_amount - self.paid
    }
}

/// Penalty attached to a ledger; unpaid fines add to the amount owed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fine {
    pub id: Uuid,
    pub name: String,
    pub amount: Decimal,
    pub reason: String,
    pub imposed_by: String,
    pub is_paid: bool,
    pub imposed_at: DateTime<Utc>,
}

/// Reduction of the amount owed. Percentage discounts are resolved to an
/// absolute amount when added; `amount` always stores the absolute value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discount {
    pub id: Uuid,
    pub name: String,
    pub amount: Decimal,
    pub discount_type: DiscountType,
    pub reason: String,
    pub approved_by: String,
    pub granted_at: DateTime<Utc>,
}

/// The per-student-per-term aggregate root. Exactly one ledger exists per
/// (student, semester, academic year).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeLedger {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub student_id: Uuid,
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
    /// Authoritative balance figure: due + unpaid fines - discounts.
    /// Outstanding money is `net_amount - total_paid`.
    pub net_amount: Decimal,
    pub status: LedgerStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeeLedger {
    /// Instantiate from template-clone data. Term uniqueness is enforced by
    /// the caller against the store before insertion.
    pub fn create(seed: LedgerSeed, due_date: Option<DateTime<Utc>>) -> Self {
        let now = Utc::now();
        let items = seed
            .items
            .into_iter()
            .map(|item| FeeItem {
                id: Uuid::new_v4(),
                category_id: item.category_id,
                name: item.name,
                original_amount: item.original_amount,
                paid: Decimal::ZERO,
                status: FeeItemStatus::Unpaid,
                is_optional: item.is_optional,
                is_included: item.is_included,
                meta: item.meta,
            })
            .collect();
        let mut ledger = Self {
            id: Uuid::new_v4(),
            student_id: seed.student_id,
            course: seed.course,
            semester: seed.semester,
            academic_year: seed.academic_year,
            items,
            fines: Vec::new(),
            discounts: Vec::new(),
            total_due: Decimal::ZERO,
            total_paid: Decimal::ZERO,
            total_fines: Decimal::ZERO,
            total_discounts: Decimal::ZERO,
            net_amount: Decimal::ZERO,
            status: LedgerStatus::Unpaid,
            due_date,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        ledger.recompute(now);
        ledger
    }

    /// Empty ledger for custom-fee flows.
    pub fn bare(
        student_id: Uuid,
        course: Option<String>,
        semester: u32,
        academic_year: String,
        due_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self::create(
            LedgerSeed {
                student_id,
                course,
                semester,
                academic_year,
                items: Vec::new(),
                total_due: Decimal::ZERO,
            },
            due_date,
        )
    }

    /// Append an included, non-optional charge line.
    pub fn add_custom_item(
        &mut self,
        category_id: Uuid,
        name: String,
        amount: Decimal,
        meta: CategoryMeta,
    ) -> Result<Uuid, AppError> {
        if amount < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow!(
                "fee item amount must not be negative"
            )));
        }
        let id = Uuid::new_v4();
        self.items.push(FeeItem {
            id,
            category_id,
            name,
            original_amount: amount,
            paid: Decimal::ZERO,
            status: FeeItemStatus::Unpaid,
            is_optional: false,
            is_included: true,
            meta,
        });
        Ok(id)
    }

    pub fn add_fine(
        &mut self,
        name: String,
        amount: Decimal,
        reason: String,
        imposed_by: String,
        now: DateTime<Utc>,
    ) -> Result<Uuid, AppError> {
        if amount < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow!(
                "fine amount must not be negative"
            )));
        }
        let id = Uuid::new_v4();
        self.fines.push(Fine {
            id,
            name,
            amount,
            reason,
            imposed_by,
            is_paid: false,
            imposed_at: now,
        });
        Ok(id)
    }

    pub fn settle_fine(&mut self, fine_id: Uuid) -> Result<(), AppError> {
        let fine = self
            .fines
            .iter_mut()
            .find(|fine| fine.id == fine_id)
            .ok_or_else(|| AppError::NotFound(anyhow!("fine {} not found", fine_id)))?;
        if fine.is_paid {
            return Err(AppError::Conflict(anyhow!(
                "fine {} is already settled",
                fine_id
            )));
        }
        fine.is_paid = true;
        Ok(())
    }

    /// Add a discount. Percentage values are resolved against the current
    /// `total_due` and stored as an absolute amount.
    pub fn add_discount(
        &mut self,
        name: String,
        value: Decimal,
        discount_type: DiscountType,
        reason: String,
        approved_by: String,
        now: DateTime<Utc>,
    ) -> Result<Uuid, AppError> {
        if value < Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow!(
                "discount value must not be negative"
            )));
        }
        let amount = match discount_type {
            DiscountType::Percentage => {
                if value > Decimal::from(100) {
                    return Err(AppError::BadRequest(anyhow!(
                        "percentage discount cannot exceed 100"
                    )));
                }
                self.total_due * value / Decimal::from(100)
            }
            DiscountType::Fixed => value,
        };
        let id = Uuid::new_v4();
        self.discounts.push(Discount {
            id,
            name,
            amount,
            discount_type,
            reason,
            approved_by,
            granted_at: now,
        });
        Ok(id)
    }

    /// Toggle an optional item in or out of the ledger totals.
    pub fn set_item_inclusion(&mut self, item_id: Uuid, included: bool) -> Result<(), AppError> {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or_else(|| AppError::NotFound(anyhow!("fee item {} not found", item_id)))?;
        if !included {
            if !item.is_optional {
                return Err(AppError::BadRequest(anyhow!(
                    "fee item '{}' is not optional and cannot be excluded",
                    item.name
                )));
            }
            if item.paid > Decimal::ZERO {
                return Err(AppError::Conflict(anyhow!(
                    "fee item '{}' has payments recorded and cannot be excluded",
                    item.name
                )));
            }
        }
        item.is_included = included;
        Ok(())
    }

    /// Plan a greedy allocation of `amount` across the items named in
    /// `paid_for` (all included unpaid items, in ledger order, when empty).
    /// Nothing is mutated; the caller applies the returned allocations.
    ///
    /// Rejects when a remainder survives every target: an over-payment is
    /// surfaced to the caller, never silently dropped.
    pub fn plan_allocation(
        &self,
        amount: Decimal,
        paid_for: &[Uuid],
    ) -> Result<Vec<Allocation>, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow!(
                "payment amount must be greater than zero"
            )));
        }

        let target_ids: Vec<Uuid> = if paid_for.is_empty() {
            self.items
                .iter()
                .filter(|item| item.is_included && item.balance() > Decimal::ZERO)
                .map(|item| item.id)
                .collect()
        } else {
            paid_for.to_vec()
        };

        let mut remaining = amount;
        let mut allocations = Vec::new();
        for item_id in target_ids {
            let item = self
                .items
                .iter()
                .find(|item| item.id == item_id)
                .ok_or_else(|| {
                    AppError::BadRequest(anyhow!("fee item {} is not part of this ledger", item_id))
                })?;
            if !item.is_included {
                return Err(AppError::BadRequest(anyhow!(
                    "fee item '{}' is excluded and cannot receive payments",
                    item.name
                )));
            }
            if remaining == Decimal::ZERO {
                break;
            }
            let already = allocations
                .iter()
                .filter(|alloc: &&Allocation| alloc.fee_item_id == item_id)
                .map(|alloc| alloc.amount)
                .sum::<Decimal>();
            let take = remaining.min(item.balance() - already);
            if take > Decimal::ZERO {
                allocations.push(Allocation {
                    fee_item_id: item_id,
                    amount: take,
                });
                remaining -= take;
            }
        }

        if remaining > Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow!(
                "payment of {} exceeds the outstanding balance of its targets by {}; \
                 reduce the amount or target more items",
                amount,
                remaining
            )));
        }
        Ok(allocations)
    }

    /// Apply planned allocations to item `paid` amounts.
    pub fn apply_allocations(&mut self, allocations: &[Allocation]) {
        for alloc in allocations {
            if let Some(item) = self.items.iter_mut().find(|item| item.id == alloc.fee_item_id) {
                item.paid += alloc.amount;
            }
        }
    }

    /// Reverse previously applied allocations (failed verification, refund).
    pub fn unapply_allocations(&mut self, allocations: &[Allocation]) {
        for alloc in allocations {
            if let Some(item) = self.items.iter_mut().find(|item| item.id == alloc.fee_item_id) {
                item.paid = (item.paid - alloc.amount).max(Decimal::ZERO);
            }
        }
    }

    /// Recompute every derived field. Running this twice on unchanged data
    /// never changes the result.
    pub fn recompute(&mut self, now: DateTime<Utc>) {
        for item in &mut self.items {
            item.status = if item.paid <= Decimal::ZERO {
                FeeItemStatus::Unpaid
            } else if item.paid >= item.original_amount {
                FeeItemStatus::Paid
            } else {
                FeeItemStatus::Partial
            };
        }

        self.total_due = self
            .items
            .iter()
            .filter(|item| item.is_included)
            .map(|item| item.original_amount)
            .sum();
        self.total_paid = self
            .items
            .iter()
            .filter(|item| item.is_included)
            .map(|item| item.paid)
            .sum();
        self.total_fines = self
            .fines
            .iter()
            .filter(|fine| !fine.is_paid)
            .map(|fine| fine.amount)
            .sum();
        self.total_discounts = self.discounts.iter().map(|discount| discount.amount).sum();
        self.net_amount =
            (self.total_due + self.total_fines - self.total_discounts).max(Decimal::ZERO);

        let mut status = if self.total_paid == Decimal::ZERO {
            LedgerStatus::Unpaid
        } else if self.total_paid >= self.net_amount {
            LedgerStatus::Paid
        } else {
            LedgerStatus::Partial
        };
        if status != LedgerStatus::Paid {
            if let Some(due) = self.due_date {
                if now > due {
                    status = LedgerStatus::Overdue;
                }
            }
        }
        self.status = status;
    }

    pub fn bump_version(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}
