//! Notification read side and author statistics.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{
    MarkReadRequest, MarkReadResponse, NotificationListResponse, PaginationParams,
    StatisticsParams,
};
use crate::api::extract::Actor;
use crate::app_state::AppState;
use crate::error::{BrokerError, ErrorResponse};
use crate::service::EventStatistics;

/// `GET /notifications`: The caller's notifications, newest first.
///
/// # Errors
///
/// Returns [`BrokerError`] on storage failures.
#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    tag = "Notifications",
    summary = "List notifications",
    params(
        PaginationParams,
        ("x-member-id" = i64, Header, description = "Recipient"),
    ),
    responses(
        (status = 200, description = "Paginated notifications", body = NotificationListResponse),
        (status = 401, description = "Missing member identity", body = ErrorResponse),
    )
)]
pub async fn list_notifications(
    State(state): State<AppState>,
    Actor(member): Actor,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, BrokerError> {
    let all = state.notifier.notifications_for(member).await?;
    let unread = u32::try_from(all.iter().filter(|n| !n.is_read).count()).unwrap_or(u32::MAX);
    let (data, pagination) = params.paginate(all);
    Ok(Json(NotificationListResponse {
        data,
        unread,
        pagination,
    }))
}

/// `POST /notifications/read`: Mark notifications read.
///
/// # Errors
///
/// Returns [`BrokerError`] on storage failures.
#[utoipa::path(
    post,
    path = "/api/v1/notifications/read",
    tag = "Notifications",
    summary = "Mark notifications read",
    request_body = MarkReadRequest,
    params(("x-member-id" = i64, Header, description = "Recipient")),
    responses(
        (status = 200, description = "Number of notifications changed", body = MarkReadResponse),
    )
)]
pub async fn mark_read(
    State(state): State<AppState>,
    Actor(member): Actor,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, BrokerError> {
    let notifier = state.notifier.clone();
    let updated = state
        .guard
        .run("mark_notifications_read", async move {
            notifier.mark_read(member, &req.ids).await
        })
        .await?;
    Ok(Json(MarkReadResponse { updated }))
}

/// `GET /statistics`: Transaction statistics for the caller's events.
///
/// # Errors
///
/// Returns [`BrokerError::Validation`] for windows outside 1..=366 days.
#[utoipa::path(
    get,
    path = "/api/v1/statistics",
    tag = "Statistics",
    summary = "Event statistics",
    description = "Counts transactions on the caller's events in the last `days` days and compares each count with the preceding window of equal length.",
    params(
        StatisticsParams,
        ("x-member-id" = i64, Header, description = "Event author"),
    ),
    responses(
        (status = 200, description = "Statistics", body = EventStatistics),
        (status = 400, description = "Invalid window", body = ErrorResponse),
    )
)]
pub async fn get_statistics(
    State(state): State<AppState>,
    Actor(author): Actor,
    Query(params): Query<StatisticsParams>,
) -> Result<impl IntoResponse, BrokerError> {
    let stats = state
        .statistics
        .get_event_statistics(author, params.days)
        .await?;
    Ok(Json(stats))
}

/// Notification and statistics routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/read", post(mark_read))
        .route("/statistics", get(get_statistics))
}
