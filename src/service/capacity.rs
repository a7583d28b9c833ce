//! Slot accounting for events.

use std::sync::Arc;

use crate::domain::EventId;
use crate::error::BrokerError;
use crate::persistence::EntityStore;

/// Owns the `remaining_helps` counter of every event.
///
/// Both operations are single conditional store updates. The manager
/// never reads the counter, computes in memory and writes it back.
#[derive(Debug, Clone)]
pub struct CapacityManager {
    store: Arc<dyn EntityStore>,
}

impl CapacityManager {
    /// Creates a manager over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Takes one free slot.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::CapacityExhausted`] if no slot is free and
    /// [`BrokerError::NotFound`] if the event does not exist.
    pub async fn reserve(&self, event_id: EventId) -> Result<(), BrokerError> {
        if self.store.try_reserve_slot(event_id).await? {
            tracing::debug!(%event_id, "slot reserved");
            Ok(())
        } else {
            Err(BrokerError::CapacityExhausted { event_id })
        }
    }

    /// Returns `n` slots, capped at the event's ceiling.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the store update fails.
    pub async fn release(&self, event_id: EventId, n: u32) -> Result<(), BrokerError> {
        self.store.release_slots(event_id, n).await?;
        tracing::debug!(%event_id, n, "slots released");
        Ok(())
    }
}
