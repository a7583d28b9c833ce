//! Event DTOs for create, read and capacity operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{Event, Need, NewNeed};
use crate::service::{EventDetails, EventDraft};

/// Request body for `POST /events/help` and `POST /events/proposal`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateEventRequest {
    /// Short title (max 200 chars).
    pub title: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// When the event stops accepting work.
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    /// Concurrent responder slots, at least 1.
    pub max_concurrent_requests: u32,
    /// Required quantities. Help events only.
    #[serde(default)]
    pub needs: Vec<NewNeed>,
}

impl From<CreateEventRequest> for EventDraft {
    fn from(req: CreateEventRequest) -> Self {
        Self {
            title: req.title,
            description: req.description,
            end_date: req.end_date,
            max_concurrent_requests: req.max_concurrent_requests,
            needs: req.needs,
        }
    }
}

/// Event with its needs, returned by create and `GET /events/{id}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct EventDetailsResponse {
    /// The event record.
    pub event: Event,
    /// Event-scoped needs.
    pub needs: Vec<Need>,
    /// Received versus required across all needs, in percent.
    pub completion_percentage: f64,
}

impl From<EventDetails> for EventDetailsResponse {
    fn from(details: EventDetails) -> Self {
        Self {
            event: details.event,
            needs: details.needs,
            completion_percentage: details.completion_percentage,
        }
    }
}

/// Request body for `PATCH /events/{id}/capacity`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCapacityRequest {
    /// New ceiling. Must cover the currently occupied slots.
    pub max_concurrent_requests: u32,
}

/// Request body for `POST /events/{id}/responses`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RespondRequest {
    /// Note for the event author.
    #[serde(default)]
    pub comment: String,
}
