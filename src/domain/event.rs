//! Events: capacity-bounded offers (proposals) and quantity-based help requests.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{EventId, MemberId};
use crate::error::BrokerError;

/// Which flavour of event this is.
///
/// Proposal events carry no needs; help events carry one or more
/// [`super::Need`]s that responders fulfil incrementally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An offer of assistance with a fixed number of concurrent slots.
    Proposal,
    /// A request for quantities of goods, tracked per need.
    Help,
}

impl EventKind {
    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Proposal => "proposal",
            Self::Help => "help",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposal" => Ok(Self::Proposal),
            "help" => Ok(Self::Help),
            other => Err(BrokerError::Validation(format!("unknown event kind: {other}"))),
        }
    }
}

/// Lifecycle status of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Accepting responses.
    Active,
    /// Expired or fully satisfied. Set by the sweeper or by need aggregation.
    Done,
    /// Blocked by moderation.
    Banned,
    /// Soft-deleted by its author. Reads as not found.
    Deleted,
}

impl EventStatus {
    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Done => "done",
            Self::Banned => "banned",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "done" => Ok(Self::Done),
            "banned" => Ok(Self::Banned),
            "deleted" => Ok(Self::Deleted),
            other => Err(BrokerError::Validation(format!(
                "unknown event status: {other}"
            ))),
        }
    }
}

/// A stored event.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Event {
    /// Surrogate id.
    pub id: EventId,
    /// Proposal or help.
    pub kind: EventKind,
    /// Member who created the event.
    pub author_id: MemberId,
    /// Short title.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Current lifecycle status.
    pub status: EventStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When the event stops accepting work. `None` never expires.
    pub end_date: Option<DateTime<Utc>>,
    /// Capacity ceiling.
    pub max_concurrent_requests: u32,
    /// Free slots. Always `0 ..= max_concurrent_requests`.
    pub remaining_helps: u32,
}

impl Event {
    /// Number of slots currently held by open transactions.
    #[must_use]
    pub const fn occupied_slots(&self) -> u32 {
        self.max_concurrent_requests
            .saturating_sub(self.remaining_helps)
    }

    /// Returns `true` if the event is active and its end date has passed.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Active && self.end_date.is_some_and(|end| end <= now)
    }
}

/// Insert payload for a new event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Proposal or help.
    pub kind: EventKind,
    /// Author.
    pub author_id: MemberId,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Optional end date.
    pub end_date: Option<DateTime<Utc>>,
    /// Capacity ceiling; `remaining_helps` starts at the same value.
    pub max_concurrent_requests: u32,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn event(status: EventStatus, end_date: Option<DateTime<Utc>>) -> Event {
        Event {
            id: EventId::new(1),
            kind: EventKind::Proposal,
            author_id: MemberId::new(1),
            title: "t".to_string(),
            description: String::new(),
            status,
            created_at: Utc::now(),
            end_date,
            max_concurrent_requests: 3,
            remaining_helps: 1,
        }
    }

    #[test]
    fn occupied_slots_is_ceiling_minus_remaining() {
        assert_eq!(event(EventStatus::Active, None).occupied_slots(), 2);
    }

    #[test]
    fn expiry_requires_active_status_and_past_end() {
        let now = Utc::now();
        let past = Some(now - Duration::minutes(1));
        let future = Some(now + Duration::minutes(1));

        assert!(event(EventStatus::Active, past).is_expired_at(now));
        assert!(!event(EventStatus::Active, future).is_expired_at(now));
        assert!(!event(EventStatus::Active, None).is_expired_at(now));
        assert!(!event(EventStatus::Done, past).is_expired_at(now));
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            EventStatus::Active,
            EventStatus::Done,
            EventStatus::Banned,
            EventStatus::Deleted,
        ] {
            assert_eq!(status.as_str().parse::<EventStatus>().ok(), Some(status));
        }
        assert!("archived".parse::<EventStatus>().is_err());
    }
}
