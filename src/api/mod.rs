//! REST API layer: route handlers, DTOs, extractors and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` stays at the
//! root.

pub mod dto;
pub mod extract;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for every REST endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "relief-broker",
        description = "Capacity-bounded help request broker"
    ),
    paths(
        handlers::events::create_help_event,
        handlers::events::create_proposal_event,
        handlers::events::get_event,
        handlers::events::update_capacity,
        handlers::events::delete_event,
        handlers::events::respond,
        handlers::transactions::decide,
        handlers::transactions::update_status,
        handlers::transactions::get_transaction,
        handlers::notifications::list_notifications,
        handlers::notifications::mark_read,
        handlers::notifications::get_statistics,
        handlers::system::health_handler,
    ),
    components(schemas(crate::error::ErrorResponse, crate::error::ErrorBody)),
    tags(
        (name = "Events", description = "Help and proposal events"),
        (name = "Transactions", description = "Responder transactions"),
        (name = "Notifications", description = "Per-member notifications"),
        (name = "Statistics", description = "Author statistics"),
        (name = "System", description = "Service health"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
}
