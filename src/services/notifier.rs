//! Fee event notifications.
//!
//! Delivery is fire-and-forget: a failing sink is logged and never fails
//! the financial mutation that produced the event.

use async_trait::async_trait;
use std::sync::Arc;

use crate::models::NotificationEvent;
use crate::services::store::FeeStore;

/// Sink for fee events addressed to a student.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotificationEvent);
}

/// Records events in the store for later delivery.
pub struct StoreNotifier {
    store: Arc<dyn FeeStore>,
}

impl StoreNotifier {
    pub fn new(store: Arc<dyn FeeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Notifier for StoreNotifier {
    async fn notify(&self, event: NotificationEvent) {
        tracing::info!(
            recipient_id = %event.recipient_id,
            kind = event.kind.as_str(),
            title = %event.title,
            "Queueing notification"
        );
        if let Err(e) = self.store.insert_notification(&event).await {
            tracing::warn!(
                recipient_id = %event.recipient_id,
                kind = event.kind.as_str(),
                error = %e,
                "Failed to record notification"
            );
        }
    }
}
