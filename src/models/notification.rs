//! Outbound notification events (fire-and-forget contract).
//!
//! Delivery mechanics live outside this service; we only emit and record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    FeeAssigned,
    PaymentReceived,
    FineAdded,
    SemesterUpgrade,
    SubscriptionStatusChange,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::FeeAssigned => "fee_assigned",
            NotificationKind::PaymentReceived => "payment_received",
            NotificationKind::FineAdded => "fine_added",
            NotificationKind::SemesterUpgrade => "semester_upgrade",
            NotificationKind::SubscriptionStatusChange => "subscription_status_change",
        }
    }
}

/// What the notification is about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub entity_type: String,
    pub entity_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub related_entity: RelatedEntity,
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(
        recipient_id: Uuid,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl ToString,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_id,
            kind,
            title: title.into(),
            message: message.into(),
            related_entity: RelatedEntity {
                entity_type: entity_type.into(),
                entity_id: entity_id.to_string(),
            },
            created_at: Utc::now(),
        }
    }
}
