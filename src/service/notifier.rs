//! Notification side effects of transaction transitions.
//!
//! Emission is best effort relative to the state change that triggered
//! it: callers surface a failed emission in their outcome and log it, but
//! never roll the transition back.

use std::sync::Arc;

use crate::domain::{MemberId, NewNotification, Notification, NotificationBus, NotificationId};
use crate::error::BrokerError;
use crate::persistence::EntityStore;

/// Stores notifications and publishes them for live delivery.
#[derive(Debug, Clone)]
pub struct NotificationEmitter {
    store: Arc<dyn EntityStore>,
    bus: NotificationBus,
}

impl NotificationEmitter {
    /// Creates an emitter writing to `store` and publishing on `bus`.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, bus: NotificationBus) -> Self {
        Self { store, bus }
    }

    /// Returns the bus notifications are published on.
    #[must_use]
    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    /// Appends a notification addressed to `notification.member_id`.
    ///
    /// The bus publish happens only after the store write succeeded.
    ///
    /// # Errors
    ///
    /// Returns the store error. Nothing is published in that case.
    pub async fn emit(&self, notification: NewNotification) -> Result<NotificationId, BrokerError> {
        let stored = self.store.create_notification(notification).await?;
        let id = stored.id;
        tracing::debug!(
            notification_id = %id,
            member_id = %stored.member_id,
            transaction_id = %stored.transaction_id,
            action = %stored.action,
            "notification emitted"
        );
        let _ = self.bus.publish(stored);
        Ok(id)
    }

    /// A member's notifications, newest first.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn notifications_for(
        &self,
        member_id: MemberId,
    ) -> Result<Vec<Notification>, BrokerError> {
        self.store.notifications_for_member(member_id).await
    }

    /// Marks the member's own notifications among `ids` as read.
    ///
    /// Ids belonging to other members are ignored. Returns the number of
    /// notifications that changed.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn mark_read(
        &self,
        member_id: MemberId,
        ids: &[NotificationId],
    ) -> Result<u64, BrokerError> {
        let changed = self.store.mark_notifications_read(member_id, ids).await?;
        tracing::debug!(%member_id, changed, "notifications marked read");
        Ok(changed)
    }
}
