//! Quantity-based needs attached to help events.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{EventId, NeedId, TransactionId};

/// A requirement such as "10 kg of flour".
///
/// Event-scoped needs have `transaction_id == None` and aggregate
/// confirmed quantities in `received_total`. When a responder answers
/// a help event, each event need is copied with `transaction_id` set;
/// the copy tracks that responder's pledge in `received`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Need {
    /// Surrogate id.
    pub id: NeedId,
    /// Owning help event.
    pub event_id: EventId,
    /// Owning transaction for pledge copies.
    pub transaction_id: Option<TransactionId>,
    /// What is needed.
    pub title: String,
    /// Required quantity.
    pub amount: f64,
    /// Unit of `amount` (e.g. `"kg"`).
    pub unit: String,
    /// Quantity pledged on this copy.
    pub received: f64,
    /// Confirmed quantity summed across completed transactions.
    pub received_total: f64,
}

impl Need {
    /// Whether two needs describe the same requirement.
    ///
    /// Pledge copies are matched back to event needs on title, unit and
    /// amount rather than by id.
    #[must_use]
    pub fn same_requirement(&self, other: &Self) -> bool {
        self.title == other.title && self.unit == other.unit && self.amount == other.amount
    }

    /// Pledge copy of this event need for a new transaction.
    #[must_use]
    pub fn pledge_copy(&self) -> NewNeed {
        NewNeed {
            title: self.title.clone(),
            amount: self.amount,
            unit: self.unit.clone(),
        }
    }
}

/// Insert payload for a need.
#[derive(Debug, Clone, PartialEq, Deserialize, ToSchema)]
pub struct NewNeed {
    /// What is needed.
    pub title: String,
    /// Required quantity (must be positive).
    pub amount: f64,
    /// Unit of `amount`.
    pub unit: String,
}

/// A responder's report of how much of one pledge copy they delivered.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, ToSchema)]
pub struct NeedPledge {
    /// Pledge copy being updated.
    pub need_id: NeedId,
    /// Delivered quantity (non-negative).
    pub received: f64,
}

/// Quantity to add to an event need's `received_total`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeedIncrement {
    /// Event-scoped need.
    pub need_id: NeedId,
    /// Amount to add.
    pub delta: f64,
}
