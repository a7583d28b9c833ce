//! Broadcast channel for emitted notifications.
//!
//! [`NotificationBus`] wraps a [`tokio::sync::broadcast`] channel. Every
//! notification the emitter stores is also published here so that
//! WebSocket clients receive it without polling.

use tokio::sync::broadcast;

use super::Notification;

/// Broadcast bus for stored [`Notification`]s.
///
/// When the ring buffer is full, the oldest notifications are dropped for
/// lagging receivers. The store remains the source of truth.
#[derive(Debug, Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<Notification>,
}

impl NotificationBus {
    /// Creates a new bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes a notification to all subscribers.
    ///
    /// Returns the number of receivers. With no receivers the message is
    /// dropped.
    pub fn publish(&self, notification: Notification) -> usize {
        self.sender.send(notification).unwrap_or(0)
    }

    /// Creates a receiver for all future notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::{
        EventId, EventKind, MemberId, NotificationAction, NotificationId, TransactionId,
        TransactionStatus,
    };

    fn make_notification(member: i64) -> Notification {
        Notification {
            id: NotificationId::new(1),
            event_kind: EventKind::Proposal,
            event_id: EventId::new(1),
            transaction_id: TransactionId::new(1),
            action: NotificationAction::Created,
            new_status: TransactionStatus::Waiting,
            member_id: MemberId::new(member),
            is_read: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn publish_without_receivers_returns_zero() {
        let bus = NotificationBus::new(16);
        assert_eq!(bus.publish(make_notification(1)), 0);
    }

    #[tokio::test]
    async fn every_subscriber_receives_the_notification() {
        let bus = NotificationBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.receiver_count(), 2);

        assert_eq!(bus.publish(make_notification(9)), 2);

        let Ok(a) = rx1.recv().await else {
            panic!("rx1 failed");
        };
        let Ok(b) = rx2.recv().await else {
            panic!("rx2 failed");
        };
        assert_eq!(a.member_id, MemberId::new(9));
        assert_eq!(a, b);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let bus = NotificationBus::new(0);
        let _rx = bus.subscribe();
        assert_eq!(bus.publish(make_notification(1)), 1);
    }
}
