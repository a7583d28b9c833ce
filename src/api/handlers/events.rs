//! Event handlers: create, read, resize, delete and respond.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};

use crate::api::dto::{
    CreateEventRequest, EventDetailsResponse, RespondRequest, TransitionResponse,
    UpdateCapacityRequest,
};
use crate::api::extract::Actor;
use crate::app_state::AppState;
use crate::domain::{Event, EventId};
use crate::error::{BrokerError, ErrorResponse};

/// `POST /events/help`: Create a help event with needs.
///
/// # Errors
///
/// Returns [`BrokerError`] on invalid input or when the author is at the
/// active-event limit.
#[utoipa::path(
    post,
    path = "/api/v1/events/help",
    tag = "Events",
    summary = "Create a help event",
    description = "Creates a quantity-based help event. At least one need is required. Remaining slots start at `max_concurrent_requests`.",
    request_body = CreateEventRequest,
    params(("x-member-id" = i64, Header, description = "Acting member")),
    responses(
        (status = 201, description = "Event created", body = EventDetailsResponse),
        (status = 400, description = "Invalid event or active-event limit reached", body = ErrorResponse),
    )
)]
pub async fn create_help_event(
    State(state): State<AppState>,
    Actor(author): Actor,
    Json(req): Json<CreateEventRequest>,
) -> Result<impl IntoResponse, BrokerError> {
    let events = Arc::clone(&state.events);
    let details = state
        .guard
        .run("create_help_event", async move {
            events.create_help_event(author, req.into()).await
        })
        .await?;
    Ok((StatusCode::CREATED, Json(EventDetailsResponse::from(details))))
}

/// `POST /events/proposal`: Create a proposal event.
///
/// # Errors
///
/// Returns [`BrokerError`] on invalid input or when the author is at the
/// active-event limit.
#[utoipa::path(
    post,
    path = "/api/v1/events/proposal",
    tag = "Events",
    summary = "Create a proposal event",
    description = "Creates a capacity-bounded offer of help. Proposals carry no needs.",
    request_body = CreateEventRequest,
    params(("x-member-id" = i64, Header, description = "Acting member")),
    responses(
        (status = 201, description = "Event created", body = EventDetailsResponse),
        (status = 400, description = "Invalid event or active-event limit reached", body = ErrorResponse),
    )
)]
pub async fn create_proposal_event(
    State(state): State<AppState>,
    Actor(author): Actor,
    Json(req): Json<CreateEventRequest>,
) -> Result<impl IntoResponse, BrokerError> {
    let events = Arc::clone(&state.events);
    let details = state
        .guard
        .run("create_proposal_event", async move {
            events.create_proposal_event(author, req.into()).await
        })
        .await?;
    Ok((StatusCode::CREATED, Json(EventDetailsResponse::from(details))))
}

/// `GET /events/{id}`: Event with needs and completion percentage.
///
/// # Errors
///
/// Returns [`BrokerError::NotFound`] for unknown or deleted events.
#[utoipa::path(
    get,
    path = "/api/v1/events/{id}",
    tag = "Events",
    summary = "Get event details",
    params(("id" = i64, Path, description = "Event id")),
    responses(
        (status = 200, description = "Event details", body = EventDetailsResponse),
        (status = 404, description = "Event not found", body = ErrorResponse),
    )
)]
pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<EventId>,
) -> Result<impl IntoResponse, BrokerError> {
    let details = state.events.get_event_details(id).await?;
    Ok(Json(EventDetailsResponse::from(details)))
}

/// `PATCH /events/{id}/capacity`: Change the slot ceiling.
///
/// # Errors
///
/// Returns [`BrokerError`] if the caller is not the author or the new
/// ceiling is below the occupied slots.
#[utoipa::path(
    patch,
    path = "/api/v1/events/{id}/capacity",
    tag = "Events",
    summary = "Update event capacity",
    description = "Shifts `remaining_helps` by the same delta as the ceiling. Occupied slots are never revoked.",
    request_body = UpdateCapacityRequest,
    params(
        ("id" = i64, Path, description = "Event id"),
        ("x-member-id" = i64, Header, description = "Acting member"),
    ),
    responses(
        (status = 200, description = "Updated event", body = Event),
        (status = 400, description = "Capacity below occupied slots", body = ErrorResponse),
        (status = 403, description = "Not the author", body = ErrorResponse),
    )
)]
pub async fn update_capacity(
    State(state): State<AppState>,
    Actor(requester): Actor,
    Path(id): Path<EventId>,
    Json(req): Json<UpdateCapacityRequest>,
) -> Result<impl IntoResponse, BrokerError> {
    let events = Arc::clone(&state.events);
    let event = state
        .guard
        .run("update_capacity", async move {
            events
                .update_capacity(id, requester, req.max_concurrent_requests)
                .await
        })
        .await?;
    Ok(Json(event))
}

/// `DELETE /events/{id}`: Soft-delete an event.
///
/// # Errors
///
/// Returns [`BrokerError`] if the caller is not the author.
#[utoipa::path(
    delete,
    path = "/api/v1/events/{id}",
    tag = "Events",
    summary = "Delete event",
    params(
        ("id" = i64, Path, description = "Event id"),
        ("x-member-id" = i64, Header, description = "Acting member"),
    ),
    responses(
        (status = 204, description = "Event deleted"),
        (status = 403, description = "Not the author", body = ErrorResponse),
        (status = 404, description = "Event not found", body = ErrorResponse),
    )
)]
pub async fn delete_event(
    State(state): State<AppState>,
    Actor(requester): Actor,
    Path(id): Path<EventId>,
) -> Result<impl IntoResponse, BrokerError> {
    let events = Arc::clone(&state.events);
    state
        .guard
        .run("delete_event", async move { events.delete_event(id, requester).await })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /events/{id}/responses`: Respond to an event.
///
/// # Errors
///
/// Returns [`BrokerError`] when the event is full, inactive, the caller's
/// own, or already has an open transaction from the caller.
#[utoipa::path(
    post,
    path = "/api/v1/events/{id}/responses",
    tag = "Transactions",
    summary = "Respond to an event",
    description = "Reserves a slot and creates a transaction in `waiting`. The event author is notified.",
    request_body = RespondRequest,
    params(
        ("id" = i64, Path, description = "Event id"),
        ("x-member-id" = i64, Header, description = "Responding member"),
    ),
    responses(
        (status = 201, description = "Transaction created", body = TransitionResponse),
        (status = 400, description = "No free slot, duplicate or self response", body = ErrorResponse),
        (status = 404, description = "Event not found", body = ErrorResponse),
        (status = 408, description = "Deadline elapsed, outcome unknown", body = ErrorResponse),
    )
)]
pub async fn respond(
    State(state): State<AppState>,
    Actor(responder): Actor,
    Path(id): Path<EventId>,
    Json(req): Json<RespondRequest>,
) -> Result<impl IntoResponse, BrokerError> {
    let machine = Arc::clone(&state.transactions);
    let outcome = state
        .guard
        .run("respond", async move {
            machine.respond(id, responder, req.comment).await
        })
        .await?;
    Ok((StatusCode::CREATED, Json(TransitionResponse::from(outcome))))
}

/// Event routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events/help", post(create_help_event))
        .route("/events/proposal", post(create_proposal_event))
        .route("/events/{id}", get(get_event).delete(delete_event))
        .route("/events/{id}/capacity", patch(update_capacity))
        .route("/events/{id}/responses", post(respond))
}
