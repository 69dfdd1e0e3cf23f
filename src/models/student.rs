//! Student model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::category::ServiceKind;

/// Academic standing; only `Active` students take part in promotion and
/// template propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcademicStatus {
    Active,
    Suspended,
    Graduated,
    Withdrawn,
}

impl AcademicStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcademicStatus::Active => "active",
            AcademicStatus::Suspended => "suspended",
            AcademicStatus::Graduated => "graduated",
            AcademicStatus::Withdrawn => "withdrawn",
        }
    }
}

/// Which optional campus services the student has opted into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicesOpted {
    pub hostel: bool,
    pub mess: bool,
    pub transport: bool,
    pub library: bool,
}

impl ServicesOpted {
    pub fn wants(&self, service: ServiceKind) -> bool {
        match service {
            ServiceKind::Hostel => self.hostel,
            ServiceKind::Mess => self.mess,
            ServiceKind::Transport => self.transport,
            ServiceKind::Library => self.library,
        }
    }

    /// Apply an opt-in/out diff, leaving unspecified services untouched.
    pub fn apply(&mut self, changes: &ServiceChanges) {
        if let Some(hostel) = changes.hostel {
            self.hostel = hostel;
        }
        if let Some(mess) = changes.mess {
            self.mess = mess;
        }
        if let Some(transport) = changes.transport {
            self.transport = transport;
        }
        if let Some(library) = changes.library {
            self.library = library;
        }
    }
}

/// Opt-in/out diff requested alongside a semester promotion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostel: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mess: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<bool>,
}

impl ServiceChanges {
    pub fn is_empty(&self) -> bool {
        self.hostel.is_none()
            && self.mess.is_none()
            && self.transport.is_none()
            && self.library.is_none()
    }
}

/// Student record as this service needs it: term position, standing and
/// service opt-ins. Enrollment management itself is out of scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub course: String,
    pub current_semester: u32,
    pub total_semesters: u32,
    pub academic_status: AcademicStatus,
    pub services_opted: ServicesOpted,
    pub is_upgrade_eligible: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Student {
    pub fn new(
        full_name: String,
        email: String,
        course: String,
        current_semester: u32,
        total_semesters: u32,
        services_opted: ServicesOpted,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            full_name,
            email,
            course,
            current_semester,
            total_semesters,
            academic_status: AcademicStatus::Active,
            services_opted,
            is_upgrade_eligible: true,
            created_at: now,
            updated_at: now,
        }
    }
}
