//! Domain layer: identifiers, records, the transaction status table and
//! the notification bus.
//!
//! Everything here is plain data plus pure rules. Storage and side
//! effects live in [`crate::persistence`] and [`crate::service`].

pub mod event;
pub mod event_bus;
pub mod ids;
pub mod need;
pub mod notification;
pub mod transaction;

pub use event::{Event, EventKind, EventStatus, NewEvent};
pub use event_bus::NotificationBus;
pub use ids::{EventId, MemberId, NeedId, NotificationId, TransactionId};
pub use need::{Need, NeedIncrement, NeedPledge, NewNeed};
pub use notification::{NewNotification, Notification, NotificationAction};
pub use transaction::{
    NewTransaction, Party, StatusSnapshot, Transaction, TransactionPatch, TransactionStatus,
};
