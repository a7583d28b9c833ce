//! Per-connection subscription filter.
//!
//! Tracks which events a WebSocket client wants notifications for. A new
//! connection starts with the wildcard on, so a member sees every
//! notification addressed to them until they narrow the filter.

use std::collections::HashSet;

use crate::domain::EventId;

/// Event filter for a single WebSocket connection.
#[derive(Debug)]
pub struct SubscriptionManager {
    /// Explicitly subscribed events. Ignored while `subscribe_all` is set.
    event_ids: HashSet<EventId>,
    /// Whether every event matches (wildcard `"*"`).
    subscribe_all: bool,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self {
            event_ids: HashSet::new(),
            subscribe_all: true,
        }
    }
}

impl SubscriptionManager {
    /// Creates a filter with the wildcard enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds events to the filter, optionally enabling the wildcard.
    pub fn subscribe(&mut self, ids: &[EventId], wildcard: bool) {
        if wildcard {
            self.subscribe_all = true;
        }
        self.event_ids.extend(ids.iter().copied());
    }

    /// Removes events from the filter, optionally clearing the wildcard.
    pub fn unsubscribe(&mut self, ids: &[EventId], wildcard: bool) {
        if wildcard {
            self.subscribe_all = false;
        }
        for id in ids {
            self.event_ids.remove(id);
        }
    }

    /// Returns `true` if notifications for `event_id` should be forwarded.
    #[must_use]
    pub fn matches(&self, event_id: EventId) -> bool {
        self.subscribe_all || self.event_ids.contains(&event_id)
    }

    /// Number of explicitly subscribed events.
    #[must_use]
    pub fn count(&self) -> usize {
        self.event_ids.len()
    }

    /// Returns `true` if the wildcard is active.
    #[must_use]
    pub fn is_subscribed_all(&self) -> bool {
        self.subscribe_all
    }
}
