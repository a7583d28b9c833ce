//! WebSocket connection loop.
//!
//! Handles the read/write loop for a single member's connection,
//! dispatching incoming commands and forwarding that member's
//! notifications through the subscription filter.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use super::messages::{WsCommand, WsMessage, WsMessageType};
use super::subscription::SubscriptionManager;
use crate::domain::{EventId, MemberId, Notification};
use crate::service::NotificationEmitter;

/// Runs the read/write loop for one connection owned by `member`.
pub async fn run_connection(
    socket: WebSocket,
    member: MemberId,
    mut notification_rx: broadcast::Receiver<Notification>,
    notifier: NotificationEmitter,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut subs = SubscriptionManager::new();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_text_message(&text, member, &mut subs, &notifier).await;
                        if let Some(json) = reply
                            && ws_tx.send(Message::text(json)).await.is_err() {
                                break;
                            }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
            received = notification_rx.recv() => {
                match received {
                    Ok(notification) => {
                        if notification.member_id != member || !subs.matches(notification.event_id) {
                            continue;
                        }
                        let push = WsMessage::new(
                            notification.id.to_string(),
                            WsMessageType::Notification,
                            serde_json::to_value(&notification).unwrap_or_default(),
                        );
                        let Ok(json) = serde_json::to_string(&push) else {
                            continue;
                        };
                        if ws_tx.send(Message::text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(%member, lagged = n, "ws client lagged behind notification bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!(%member, "ws connection closed");
}

/// Handles a text frame, returning the JSON reply if any.
async fn handle_text_message(
    text: &str,
    member: MemberId,
    subs: &mut SubscriptionManager,
    notifier: &NotificationEmitter,
) -> Option<String> {
    let reply = match serde_json::from_str::<WsMessage>(text) {
        Err(_) => WsMessage::error("", 400, "malformed JSON"),
        Ok(msg) if msg.msg_type != WsMessageType::Command => {
            WsMessage::error(msg.id, 400, "expected a command")
        }
        Ok(msg) => match serde_json::from_value::<WsCommand>(msg.payload) {
            Ok(command) => execute(msg.id, command, member, subs, notifier).await,
            Err(_) => WsMessage::error(msg.id, 404, "unknown command"),
        },
    };
    serde_json::to_string(&reply).ok()
}

async fn execute(
    id: String,
    command: WsCommand,
    member: MemberId,
    subs: &mut SubscriptionManager,
    notifier: &NotificationEmitter,
) -> WsMessage {
    match command {
        WsCommand::Subscribe { event_ids } => {
            let (ids, wildcard) = parse_event_ids(&event_ids);
            subs.subscribe(&ids, wildcard);
            WsMessage::new(
                id,
                WsMessageType::Response,
                serde_json::json!({
                    "subscribed": ids,
                    "count": subs.count(),
                    "wildcard": subs.is_subscribed_all(),
                }),
            )
        }
        WsCommand::Unsubscribe { event_ids } => {
            let (ids, wildcard) = parse_event_ids(&event_ids);
            subs.unsubscribe(&ids, wildcard);
            WsMessage::new(
                id,
                WsMessageType::Response,
                serde_json::json!({
                    "unsubscribed": ids,
                    "remaining_count": subs.count(),
                    "wildcard": subs.is_subscribed_all(),
                }),
            )
        }
        WsCommand::MarkRead { ids } => match notifier.mark_read(member, &ids).await {
            Ok(updated) => WsMessage::new(
                id,
                WsMessageType::Response,
                serde_json::json!({ "updated": updated }),
            ),
            Err(err) => WsMessage::error(id, err.status_code().as_u16(), &err.to_string()),
        },
    }
}

/// Splits raw ids into parsed event ids and the wildcard flag.
/// Unparseable entries are skipped.
fn parse_event_ids(raw: &[String]) -> (Vec<EventId>, bool) {
    let mut ids = Vec::new();
    let mut wildcard = false;
    for value in raw {
        if value == "*" {
            wildcard = true;
        } else if let Ok(parsed) = value.trim().parse::<i64>() {
            ids.push(EventId::new(parsed));
        }
    }
    (ids, wildcard)
}
