//! Axum WebSocket upgrade handler.

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;

use super::connection::run_connection;
use crate::api::extract::Actor;
use crate::app_state::AppState;

/// `GET /ws`: Upgrade to a notification stream for the calling member.
///
/// The member is taken from the `x-member-id` header of the upgrade
/// request; only notifications addressed to that member are forwarded.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Actor(member): Actor,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let notification_rx = state.notification_bus.subscribe();
    let notifier = state.notifier.clone();
    tracing::debug!(%member, "ws upgrade");

    ws.on_upgrade(move |socket| run_connection(socket, member, notification_rx, notifier))
}
