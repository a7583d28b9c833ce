//! Event creation, capacity changes, deletion and reads.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::NeedAggregator;
use crate::domain::{Event, EventId, EventKind, EventStatus, MemberId, Need, NewEvent, NewNeed};
use crate::error::BrokerError;
use crate::persistence::EntityStore;

const MAX_TITLE_LEN: usize = 200;

/// Author input for a new event.
#[derive(Debug, Clone)]
pub struct EventDraft {
    /// Short title.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Optional end date, must lie in the future.
    pub end_date: Option<DateTime<Utc>>,
    /// Capacity ceiling, at least one.
    pub max_concurrent_requests: u32,
    /// Required quantities. Help events only.
    pub needs: Vec<NewNeed>,
}

/// An event with its needs and aggregate progress.
#[derive(Debug, Clone)]
pub struct EventDetails {
    /// The event.
    pub event: Event,
    /// Event-scoped needs, empty for proposals.
    pub needs: Vec<Need>,
    /// `100 * received / required` across all needs.
    pub completion_percentage: f64,
}

/// Event lifecycle operations driven by the author.
#[derive(Debug, Clone)]
pub struct EventService {
    store: Arc<dyn EntityStore>,
    max_active_events: u32,
}

impl EventService {
    /// Creates the service. `max_active_events` caps active events per author.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, max_active_events: u32) -> Self {
        Self {
            store,
            max_active_events,
        }
    }

    /// Creates a help event with at least one need.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Validation`] for malformed drafts and
    /// [`BrokerError::ActiveEventLimitReached`] when the author is at the limit.
    pub async fn create_help_event(
        &self,
        author: MemberId,
        draft: EventDraft,
    ) -> Result<EventDetails, BrokerError> {
        self.create(EventKind::Help, author, draft).await
    }

    /// Creates a proposal event. Proposals carry no needs.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Validation`] for malformed drafts and
    /// [`BrokerError::ActiveEventLimitReached`] when the author is at the limit.
    pub async fn create_proposal_event(
        &self,
        author: MemberId,
        draft: EventDraft,
    ) -> Result<EventDetails, BrokerError> {
        self.create(EventKind::Proposal, author, draft).await
    }

    async fn create(
        &self,
        kind: EventKind,
        author: MemberId,
        draft: EventDraft,
    ) -> Result<EventDetails, BrokerError> {
        validate_draft(kind, &draft, Utc::now())?;

        let active = self.store.count_active_events(author).await?;
        if active >= self.max_active_events {
            return Err(BrokerError::ActiveEventLimitReached {
                limit: self.max_active_events,
            });
        }

        let EventDraft {
            title,
            description,
            end_date,
            max_concurrent_requests,
            needs,
        } = draft;
        let event = self
            .store
            .create_event(
                NewEvent {
                    kind,
                    author_id: author,
                    title: title.trim().to_string(),
                    description,
                    end_date,
                    max_concurrent_requests,
                },
                needs,
            )
            .await?;

        tracing::info!(event_id = %event.id, %kind, %author, "event created");
        self.details(event).await
    }

    /// Loads an event with its needs and completion percentage.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotFound`] for unknown or deleted events.
    pub async fn get_event_details(&self, event_id: EventId) -> Result<EventDetails, BrokerError> {
        let event = self.store.get_event(event_id).await?;
        self.details(event).await
    }

    /// Changes the capacity ceiling. Occupied slots stay occupied.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::NotParticipant`] if `requester` is not the author
    /// - [`BrokerError::Validation`] if `new_max` is zero or below the
    ///   number of occupied slots
    pub async fn update_capacity(
        &self,
        event_id: EventId,
        requester: MemberId,
        new_max: u32,
    ) -> Result<Event, BrokerError> {
        if new_max == 0 {
            return Err(BrokerError::Validation(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        let event = self.store.get_event(event_id).await?;
        if event.author_id != requester {
            return Err(BrokerError::NotParticipant);
        }

        let Some(resized) = self.store.resize_capacity(event_id, new_max).await? else {
            let current = self.store.get_event(event_id).await?;
            return Err(BrokerError::Validation(format!(
                "{} slots are occupied, cannot shrink capacity to {new_max}",
                current.occupied_slots()
            )));
        };
        tracing::info!(
            %event_id,
            max = resized.max_concurrent_requests,
            remaining = resized.remaining_helps,
            "event capacity changed"
        );
        Ok(resized)
    }

    /// Soft-deletes an event. It reads as not found afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::NotParticipant`] if `requester` is not the
    /// author and [`BrokerError::Conflict`] if the status changed meanwhile.
    pub async fn delete_event(
        &self,
        event_id: EventId,
        requester: MemberId,
    ) -> Result<(), BrokerError> {
        let event = self.store.get_event(event_id).await?;
        if event.author_id != requester {
            return Err(BrokerError::NotParticipant);
        }
        if !self
            .store
            .transition_event(event_id, event.status, EventStatus::Deleted)
            .await?
        {
            return Err(BrokerError::Conflict(format!(
                "event {event_id} changed status concurrently"
            )));
        }
        tracing::info!(%event_id, "event deleted");
        Ok(())
    }

    async fn details(&self, event: Event) -> Result<EventDetails, BrokerError> {
        let needs = match event.kind {
            EventKind::Help => self.store.needs_by_event(event.id).await?,
            EventKind::Proposal => Vec::new(),
        };
        let completion_percentage = NeedAggregator::completion_percentage(&needs);
        Ok(EventDetails {
            event,
            needs,
            completion_percentage,
        })
    }
}

fn validate_draft(kind: EventKind, draft: &EventDraft, now: DateTime<Utc>) -> Result<(), BrokerError> {
    let title = draft.title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(BrokerError::Validation(format!(
            "title must be 1 to {MAX_TITLE_LEN} characters"
        )));
    }
    if draft.max_concurrent_requests == 0 {
        return Err(BrokerError::Validation(
            "max_concurrent_requests must be at least 1".to_string(),
        ));
    }
    if draft.end_date.is_some_and(|end| end <= now) {
        return Err(BrokerError::Validation(
            "end_date must be in the future".to_string(),
        ));
    }

    match kind {
        EventKind::Proposal if !draft.needs.is_empty() => Err(BrokerError::Validation(
            "proposal events cannot carry needs".to_string(),
        )),
        EventKind::Help if draft.needs.is_empty() => Err(BrokerError::Validation(
            "help events need at least one need".to_string(),
        )),
        _ => draft.needs.iter().try_for_each(validate_need),
    }
}

fn validate_need(need: &NewNeed) -> Result<(), BrokerError> {
    if need.title.trim().is_empty() || need.unit.trim().is_empty() {
        return Err(BrokerError::Validation(
            "needs require a title and a unit".to_string(),
        ));
    }
    if !need.amount.is_finite() || need.amount <= 0.0 {
        return Err(BrokerError::Validation(format!(
            "need '{}' must have a positive amount",
            need.title
        )));
    }
    Ok(())
}
