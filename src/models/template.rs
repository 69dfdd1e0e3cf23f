//! Fee structure templates.
//!
//! Templates are catalog input: what a course/semester charges. Applying one
//! to a student produces a [`LedgerSeed`], the only shape the ledger module
//! accepts for creation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::category::CategoryMeta;
use crate::models::student::Student;

/// One charge line in a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateItem {
    pub category_id: Uuid,
    pub name: String,
    pub amount: Decimal,
    #[serde(default)]
    pub meta: CategoryMeta,
    #[serde(default)]
    pub is_optional: bool,
}

/// Fee structure for a (course, semester, academic year).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeTemplate {
    #[serde(rename = "_id")]
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

/// Seed item handed to ledger creation.
#[derive(Debug, Clone)]
pub struct SeedItem {
    pub category_id: Uuid,
    pub name: String,
    pub original_amount: Decimal,
    pub meta: CategoryMeta,
    pub is_optional: bool,
    pub is_included: bool,
}

/// Template-catalog contract: everything a new ledger is cloned from.
#[derive(Debug, Clone)]
pub struct LedgerSeed {
    pub student_id: Uuid,
    pub course: Option<String>,
    pub semester: u32,
    pub academic_year: String,
    pub items: Vec<SeedItem>,
    pub total_due: Decimal,
}

impl FeeTemplate {
    pub fn new(
        name: String,
        course: String,
        semester: u32,
        academic_year: String,
        items: Vec<TemplateItem>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            course,
            semester,
            academic_year,
            items,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Clone this template for one student.
    ///
    /// Service-linked items for services the student has not opted into are
    /// seeded excluded (kept on the ledger so a later opt-in is a flag flip,
    /// not a re-seed). `total_due` covers included items only.
    pub fn clone_for_student(&self, student: &Student) -> LedgerSeed {
        let items: Vec<SeedItem> = self
            .items
            .iter()
            .map(|item| {
                let is_included = match item.meta.service() {
                    Some(service) => student.services_opted.wants(service),
                    None => true,
                };
                SeedItem {
                    category_id: item.category_id,
                    name: item.name.clone(),
                    original_amount: item.amount,
                    meta: item.meta.clone(),
                    is_optional: item.is_optional,
                    is_included,
                }
            })
            .collect();
        let total_due = items
            .iter()
            .filter(|item| item.is_included)
            .map(|item| item.original_amount)
            .sum();
        LedgerSeed {
            student_id: student.id,
            course: Some(self.course.clone()),
            semester: self.semester,
            academic_year: self.academic_year.clone(),
            items,
            total_due,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::student::ServicesOpted;
    use rust_decimal_macros::dec;

    fn template_with_hostel() -> FeeTemplate {
        FeeTemplate::new(
            "BSc sem 3".to_string(),
            "BSc".to_string(),
            3,
            "2025-26".to_string(),
            vec![
                TemplateItem {
                    category_id: Uuid::new_v4(),
                    name: "Tuition".to_string(),
                    amount: dec!(10000),
                    meta: CategoryMeta::custom(),
                    is_optional: false,
                },
                TemplateItem {
                    category_id: Uuid::new_v4(),
                    name: "Hostel".to_string(),
                    amount: dec!(4000),
                    meta: CategoryMeta::Hostel { room_type: None },
                    is_optional: true,
                },
            ],
        )
    }

    #[test]
    fn clone_excludes_services_not_opted_into() {
        let template = template_with_hostel();
        let student = Student::new(
            "Asha Rao".to_string(),
            "asha@example.edu".to_string(),
            "BSc".to_string(),
            3,
            6,
            ServicesOpted::default(),
        );

        let seed = template.clone_for_student(&student);
        assert_eq!(seed.items.len(), 2);
        assert!(seed.items[0].is_included);
        assert!(!seed.items[1].is_included);
        assert_eq!(seed.total_due, dec!(10000));
    }

    #[test]
    fn clone_includes_opted_services() {
        let template = template_with_hostel();
        let student = Student::new(
            "Vik Shah".to_string(),
            "vik@example.edu".to_string(),
            "BSc".to_string(),
            3,
            6,
            ServicesOpted {
                hostel: true,
                ..Default::default()
            },
        );

        let seed = template.clone_for_student(&student);
        assert!(seed.items[1].is_included);
        assert_eq!(seed.total_due, dec!(14000));
    }
}
