use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use crate::broadcast::hub::{ConnId, ProgressHub};
use crate::broadcast::message::{ClientMessage, SubscriptionScope, WsMessage};
use crate::core::state::AppState;
use crate::core::time::{format_primitive, primitive_now_utc};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let hub = state.hub().clone();
    let (conn_id, mut updates) = hub.register();
    let (mut sender, mut receiver) = socket.split();

    let hello = WsMessage::ConnectionEstablished {
        connection_id: conn_id.to_string(),
        timestamp: format_primitive(primitive_now_utc()),
    };
    if send_json(&mut sender, &hello).await.is_err() {
        hub.unregister(conn_id);
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                if send_json(&mut sender, &update).await.is_err() {
                    break;
                }
            }
            incoming = next_message(&mut receiver) => {
                match incoming {
                    Incoming::Text(text) => {
                        if let Some(reply) = handle_client_message(&hub, conn_id, &text) {
                            if send_json(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Incoming::Ping(payload) => {
                        if sender.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Incoming::Ignore => {}
                    Incoming::Closed => break,
                }
            }
        }
    }

    hub.unregister(conn_id);
    tracing::debug!(conn_id, "progress connection closed");
}

enum Incoming {
    Text(String),
    Ping(Vec<u8>),
    Ignore,
    Closed,
}

async fn next_message(receiver: &mut SplitStream<WebSocket>) -> Incoming {
    match receiver.next().await {
        Some(Ok(Message::Text(text))) => Incoming::Text(text),
        Some(Ok(Message::Ping(payload))) => Incoming::Ping(payload),
        Some(Ok(Message::Close(_))) | None => Incoming::Closed,
        Some(Ok(_)) => Incoming::Ignore,
        Some(Err(_)) => Incoming::Closed,
    }
}

async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &WsMessage,
) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(message) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(error = %err, "failed to encode ws message");
            return Ok(());
        }
    };
    sender.send(Message::Text(payload)).await
}

/// Subscription requests are acknowledged without id validation: subscribing
/// to an id that never produces events is a harmless no-op.
fn handle_client_message(hub: &ProgressHub, conn_id: ConnId, text: &str) -> Option<WsMessage> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::SubscribeScript { script_id }) => {
            hub.subscribe_script(conn_id, &script_id);
            Some(WsMessage::Subscribed { scope: SubscriptionScope::Script, id: script_id })
        }
        Ok(ClientMessage::UnsubscribeScript { script_id }) => {
            hub.unsubscribe_script(conn_id, &script_id);
            Some(WsMessage::Unsubscribed { scope: SubscriptionScope::Script, id: script_id })
        }
        Ok(ClientMessage::SubscribeSession { session_id }) => {
            hub.subscribe_session(conn_id, &session_id);
            Some(WsMessage::Subscribed { scope: SubscriptionScope::Session, id: session_id })
        }
        Ok(ClientMessage::UnsubscribeSession { session_id }) => {
            hub.unsubscribe_session(conn_id, &session_id);
            Some(WsMessage::Unsubscribed { scope: SubscriptionScope::Session, id: session_id })
        }
        Ok(ClientMessage::Ping) => Some(WsMessage::Pong),
        Ok(ClientMessage::GetStats) => {
            let stats = hub.stats();
            Some(WsMessage::Stats {
                connections: stats.connections,
                script_subscriptions: stats.script_subscriptions,
                session_subscriptions: stats.session_subscriptions,
            })
        }
        Err(_) => Some(WsMessage::Error { message: "unrecognized message".to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_is_acknowledged_and_registered() {
        let hub = ProgressHub::new();
        let (conn_id, _rx) = hub.register();

        let reply = handle_client_message(
            &hub,
            conn_id,
            r#"{"type":"subscribe_script","script_id":"script-1"}"#,
        );
        assert_eq!(
            reply,
            Some(WsMessage::Subscribed {
                scope: SubscriptionScope::Script,
                id: "script-1".to_string()
            })
        );
        assert_eq!(hub.stats().script_subscriptions, 1);
    }

    #[test]
    fn unknown_id_subscription_still_acks() {
        let hub = ProgressHub::new();
        let (conn_id, _rx) = hub.register();

        let reply = handle_client_message(
            &hub,
            conn_id,
            r#"{"type":"subscribe_session","session_id":"no-such-session"}"#,
        );
        assert!(matches!(reply, Some(WsMessage::Subscribed { .. })));
    }

    #[test]
    fn ping_gets_pong_and_garbage_gets_error() {
        let hub = ProgressHub::new();
        let (conn_id, _rx) = hub.register();

        assert_eq!(handle_client_message(&hub, conn_id, r#"{"type":"ping"}"#), Some(WsMessage::Pong));
        assert!(matches!(
            handle_client_message(&hub, conn_id, "garbage"),
            Some(WsMessage::Error { .. })
        ));
    }

    #[test]
    fn stats_reflect_hub_state() {
        let hub = ProgressHub::new();
        let (conn_id, _rx) = hub.register();
        hub.subscribe_script(conn_id, "script-1");
        hub.subscribe_session(conn_id, "session-1");

        let reply = handle_client_message(&hub, conn_id, r#"{"type":"get_stats"}"#);
        assert_eq!(
            reply,
            Some(WsMessage::Stats {
                connections: 1,
                script_subscriptions: 1,
                session_subscriptions: 1
            })
        );
    }
}
