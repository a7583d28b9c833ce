//! Database row types and their conversion into domain records.

use chrono::{DateTime, Utc};

use crate::domain::{
    Event, EventId, MemberId, Need, NeedId, Notification, NotificationId, Transaction,
    TransactionId,
};
use crate::error::BrokerError;

/// Column list shared by every `events` query.
pub const EVENT_COLUMNS: &str = "id, kind, author_id, title, description, status, created_at, \
     end_date, max_concurrent_requests, remaining_helps";

/// Column list shared by every `transactions` query.
pub const TRANSACTION_COLUMNS: &str = "id, creator_id, event_id, event_kind, created_at, \
     completed_at, comment, report_url, transaction_status, responder_status";

/// Column list shared by every `needs` query.
pub const NEED_COLUMNS: &str =
    "id, event_id, transaction_id, title, amount, unit, received, received_total";

/// Column list shared by every `notifications` query.
pub const NOTIFICATION_COLUMNS: &str =
    "id, event_kind, event_id, transaction_id, action, new_status, member_id, is_read, created_at";

/// A row of the `events` table.
#[derive(Debug, sqlx::FromRow)]
pub struct EventRow {
    /// Surrogate id.
    pub id: i64,
    /// `proposal` or `help`.
    pub kind: String,
    /// Author member id.
    pub author_id: i64,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Status string.
    pub status: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Optional end date.
    pub end_date: Option<DateTime<Utc>>,
    /// Capacity ceiling.
    pub max_concurrent_requests: i32,
    /// Free slots.
    pub remaining_helps: i32,
}

impl TryFrom<EventRow> for Event {
    type Error = BrokerError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: EventId::new(row.id),
            kind: row.kind.parse()?,
            author_id: MemberId::new(row.author_id),
            title: row.title,
            description: row.description,
            status: row.status.parse()?,
            created_at: row.created_at,
            end_date: row.end_date,
            max_concurrent_requests: non_negative(row.max_concurrent_requests)?,
            remaining_helps: non_negative(row.remaining_helps)?,
        })
    }
}

/// A row of the `transactions` table.
#[derive(Debug, sqlx::FromRow)]
pub struct TransactionRow {
    /// Surrogate id.
    pub id: i64,
    /// Responder member id.
    pub creator_id: i64,
    /// Event id.
    pub event_id: i64,
    /// Event kind string.
    pub event_kind: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Close timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Responder comment.
    pub comment: String,
    /// Proof location.
    pub report_url: Option<String>,
    /// Author-facing status string.
    pub transaction_status: String,
    /// Responder-facing status string.
    pub responder_status: String,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = BrokerError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: TransactionId::new(row.id),
            creator_id: MemberId::new(row.creator_id),
            event_id: EventId::new(row.event_id),
            event_kind: row.event_kind.parse()?,
            created_at: row.created_at,
            completed_at: row.completed_at,
            comment: row.comment,
            report_url: row.report_url,
            transaction_status: row.transaction_status.parse()?,
            responder_status: row.responder_status.parse()?,
        })
    }
}

/// A row of the `needs` table.
#[derive(Debug, sqlx::FromRow)]
pub struct NeedRow {
    /// Surrogate id.
    pub id: i64,
    /// Owning event.
    pub event_id: i64,
    /// Owning transaction for pledge copies.
    pub transaction_id: Option<i64>,
    /// Title.
    pub title: String,
    /// Required quantity.
    pub amount: f64,
    /// Unit.
    pub unit: String,
    /// Pledged quantity.
    pub received: f64,
    /// Aggregated quantity.
    pub received_total: f64,
}

impl From<NeedRow> for Need {
    fn from(row: NeedRow) -> Self {
        Self {
            id: NeedId::new(row.id),
            event_id: EventId::new(row.event_id),
            transaction_id: row.transaction_id.map(TransactionId::new),
            title: row.title,
            amount: row.amount,
            unit: row.unit,
            received: row.received,
            received_total: row.received_total,
        }
    }
}

/// A row of the `notifications` table.
#[derive(Debug, sqlx::FromRow)]
pub struct NotificationRow {
    /// Surrogate id.
    pub id: i64,
    /// Event kind string.
    pub event_kind: String,
    /// Event id.
    pub event_id: i64,
    /// Transaction id.
    pub transaction_id: i64,
    /// Action string.
    pub action: String,
    /// New status string.
    pub new_status: String,
    /// Recipient.
    pub member_id: i64,
    /// Read flag.
    pub is_read: bool,
    /// Emission timestamp.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = BrokerError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: NotificationId::new(row.id),
            event_kind: row.event_kind.parse()?,
            event_id: EventId::new(row.event_id),
            transaction_id: TransactionId::new(row.transaction_id),
            action: row.action.parse()?,
            new_status: row.new_status.parse()?,
            member_id: MemberId::new(row.member_id),
            is_read: row.is_read,
            created_at: row.created_at,
        })
    }
}

fn non_negative(value: i32) -> Result<u32, BrokerError> {
    u32::try_from(value)
        .map_err(|_| BrokerError::Storage(format!("negative counter in storage: {value}")))
}

/// Converts a domain counter into an `INTEGER` bind value.
///
/// # Errors
///
/// Returns [`BrokerError::Validation`] if the value exceeds `i32::MAX`.
pub fn to_db_counter(value: u32) -> Result<i32, BrokerError> {
    i32::try_from(value).map_err(|_| BrokerError::Validation(format!("{value} is too large")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventKind, EventStatus};

    #[test]
    fn event_row_converts() {
        let row = EventRow {
            id: 3,
            kind: "help".to_string(),
            author_id: 9,
            title: "Blankets".to_string(),
            description: String::new(),
            status: "active".to_string(),
            created_at: Utc::now(),
            end_date: None,
            max_concurrent_requests: 4,
            remaining_helps: 2,
        };
        let event = Event::try_from(row);
        assert!(matches!(
            event,
            Ok(Event {
                kind: EventKind::Help,
                status: EventStatus::Active,
                remaining_helps: 2,
                ..
            })
        ));
    }

    #[test]
    fn corrupt_status_fails_conversion() {
        let row = TransactionRow {
            id: 1,
            creator_id: 1,
            event_id: 1,
            event_kind: "proposal".to_string(),
            created_at: Utc::now(),
            completed_at: None,
            comment: String::new(),
            report_url: None,
            transaction_status: "exploded".to_string(),
            responder_status: "not_started".to_string(),
        };
        assert!(Transaction::try_from(row).is_err());
    }

    #[test]
    fn counters_reject_overflow() {
        assert_eq!(to_db_counter(7), Ok(7));
        assert!(to_db_counter(u32::MAX).is_err());
        assert!(non_negative(-1).is_err());
    }
}
