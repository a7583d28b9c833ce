//! Notifications recorded for the counter-party of every transition.
//!
//! A [`Notification`] is written once per state change and never mutated
//! afterwards except for its `is_read` flag. Every stored notification is
//! also published on the [`super::NotificationBus`] for live delivery.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{EventId, EventKind, MemberId, NotificationId, TransactionId, TransactionStatus};
use crate::error::BrokerError;

/// What happened to the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    /// A responder created a transaction.
    Created,
    /// A transaction changed status.
    Updated,
}

impl NotificationAction {
    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
        }
    }
}

impl fmt::Display for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationAction {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            other => Err(BrokerError::Validation(format!(
                "unknown notification action: {other}"
            ))),
        }
    }
}

/// A stored notification.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Notification {
    /// Surrogate id.
    pub id: NotificationId,
    /// Kind of the event the transaction belongs to.
    pub event_kind: EventKind,
    /// Event the transaction belongs to.
    pub event_id: EventId,
    /// Transaction that changed.
    pub transaction_id: TransactionId,
    /// Created or updated.
    pub action: NotificationAction,
    /// Status the acting side moved to.
    pub new_status: TransactionStatus,
    /// Recipient.
    pub member_id: MemberId,
    /// Whether the recipient has seen it.
    pub is_read: bool,
    /// Emission timestamp.
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    /// Kind of the event.
    pub event_kind: EventKind,
    /// Event id.
    pub event_id: EventId,
    /// Transaction id.
    pub transaction_id: TransactionId,
    /// Created or updated.
    pub action: NotificationAction,
    /// New status.
    pub new_status: TransactionStatus,
    /// Recipient.
    pub member_id: MemberId,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn notification_serializes_with_snake_case_enums() {
        let n = Notification {
            id: NotificationId::new(1),
            event_kind: EventKind::Help,
            event_id: EventId::new(2),
            transaction_id: TransactionId::new(3),
            action: NotificationAction::Updated,
            new_status: TransactionStatus::InProcess,
            member_id: MemberId::new(4),
            is_read: false,
            created_at: Utc::now(),
        };
        let Ok(json) = serde_json::to_value(&n) else {
            panic!("serialization failed");
        };
        assert_eq!(json["event_kind"], "help");
        assert_eq!(json["action"], "updated");
        assert_eq!(json["new_status"], "in_progress");
        assert_eq!(json["member_id"], 4);
    }
}
