//! Persistence layer: the entity store and proof-file storage.
//!
//! The service layer only sees the [`EntityStore`] and [`FileStorage`]
//! traits. Every counter or status mutation is a single conditional
//! update so concurrent callers never lose writes:
//!
//! - slot reservation: `remaining - 1 WHERE remaining > 0`
//! - slot release: `LEAST(remaining + n, max)`
//! - transitions: compare-and-swap on the statuses that were read, with
//!   the responder's pledge quantities written in the same unit
//! - need totals: `received_total + delta`
//!
//! [`MemoryStore`] backs tests and single-node runs; [`PostgresStore`]
//! is the durable implementation.

pub mod files;
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Event, EventId, EventStatus, MemberId, Need, NeedIncrement, NewEvent, NewNeed,
    NewNotification, NewTransaction, Notification, NotificationId, StatusSnapshot, Transaction,
    TransactionId, TransactionPatch,
};
use crate::error::BrokerError;

pub use files::{LocalFileStorage, MemoryFileStorage};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Durable storage for events, transactions, needs and notifications.
#[async_trait]
pub trait EntityStore: Send + Sync + std::fmt::Debug {
    /// Inserts an event and its event-scoped needs in one unit.
    async fn create_event(&self, event: NewEvent, needs: Vec<NewNeed>)
    -> Result<Event, BrokerError>;

    /// Loads an event. Deleted events read as [`BrokerError::NotFound`].
    async fn get_event(&self, id: EventId) -> Result<Event, BrokerError>;

    /// Counts the author's events in [`EventStatus::Active`].
    async fn count_active_events(&self, author_id: MemberId) -> Result<u32, BrokerError>;

    /// Decrements `remaining_helps` if and only if it is positive.
    ///
    /// Returns `false` when no slot was free.
    async fn try_reserve_slot(&self, id: EventId) -> Result<bool, BrokerError>;

    /// Increments `remaining_helps` by `n`, never beyond the ceiling.
    async fn release_slots(&self, id: EventId, n: u32) -> Result<(), BrokerError>;

    /// Changes the ceiling, shifting `remaining_helps` by the same delta.
    ///
    /// Returns `None` if `new_max` is below the occupied slot count.
    async fn resize_capacity(&self, id: EventId, new_max: u32)
    -> Result<Option<Event>, BrokerError>;

    /// Moves an event from `from` to `to`. Returns `false` if it was not in `from`.
    async fn transition_event(
        &self,
        id: EventId,
        from: EventStatus,
        to: EventStatus,
    ) -> Result<bool, BrokerError>;

    /// Active events whose end date is at or before `now`.
    async fn expired_active_events(&self, now: DateTime<Utc>) -> Result<Vec<Event>, BrokerError>;

    /// Inserts a transaction and its pledge copies in one unit.
    ///
    /// Fails with [`BrokerError::DuplicateTransaction`] if the responder
    /// already holds an open transaction on the event.
    async fn create_transaction(
        &self,
        tx: NewTransaction,
        pledges: Vec<NewNeed>,
    ) -> Result<Transaction, BrokerError>;

    /// Loads a transaction.
    async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, BrokerError>;

    /// The responder's open transaction on an event, if any.
    async fn find_open_transaction(
        &self,
        event_id: EventId,
        responder_id: MemberId,
    ) -> Result<Option<Transaction>, BrokerError>;

    /// Applies `patch` only if both statuses still equal `expected`.
    ///
    /// `patch.pledges` must be pledge copies of this transaction; their
    /// `received` is written in the same unit as the status change and is
    /// left untouched when the swap does not apply.
    ///
    /// Returns the updated record, or `None` when a concurrent writer won.
    async fn update_transaction_if(
        &self,
        id: TransactionId,
        expected: StatusSnapshot,
        patch: TransactionPatch,
    ) -> Result<Option<Transaction>, BrokerError>;

    /// Transactions on the author's events created in `[from, to)`.
    async fn transactions_for_author(
        &self,
        author_id: MemberId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, BrokerError>;

    /// Event-scoped needs of an event.
    async fn needs_by_event(&self, event_id: EventId) -> Result<Vec<Need>, BrokerError>;

    /// Pledge copies belonging to a transaction.
    async fn needs_by_transaction(&self, tx_id: TransactionId) -> Result<Vec<Need>, BrokerError>;

    /// Adds each delta to the matching need's `received_total` in one unit.
    async fn add_received_totals(&self, increments: &[NeedIncrement]) -> Result<(), BrokerError>;

    /// Appends a notification.
    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, BrokerError>;

    /// A member's notifications, newest first.
    async fn notifications_for_member(
        &self,
        member_id: MemberId,
    ) -> Result<Vec<Notification>, BrokerError>;

    /// Marks the member's own notifications among `ids` as read.
    ///
    /// Returns the number of rows changed.
    async fn mark_notifications_read(
        &self,
        member_id: MemberId,
        ids: &[NotificationId],
    ) -> Result<u64, BrokerError>;
}

/// Object storage for completion proofs.
#[async_trait]
pub trait FileStorage: Send + Sync + std::fmt::Debug {
    /// Stores `data` under `name` and returns its public location.
    async fn upload(&self, name: &str, data: Vec<u8>) -> Result<String, BrokerError>;

    /// Deletes a file stored under `name`. Removing a missing file is not
    /// an error.
    async fn remove(&self, name: &str) -> Result<(), BrokerError>;
}
