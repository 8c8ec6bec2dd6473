//! WebSocket feed of loan lifecycle events
//!
//! Clients receive every event until they subscribe to specific loan ids.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use crate::loan::{EventSink, LoanEvent};

const EVENT_BUFFER: usize = 256;

/// WebSocket server state
#[derive(Clone)]
pub struct WsState {
    tx: broadcast::Sender<LoanEvent>,
    clients: Arc<RwLock<HashMap<Uuid, HashSet<Uuid>>>>,
}

/// Client message types
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    Subscribe { loan_ids: Vec<Uuid> },
    Unsubscribe { loan_ids: Vec<Uuid> },
    Ping,
}

/// Server message types
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ServerMessage {
    Event { event: LoanEvent },
    Subscribed { loan_ids: Vec<Uuid> },
    Unsubscribed { loan_ids: Vec<Uuid> },
    Pong,
}

impl Default for WsState {
    fn default() -> Self {
        Self::new()
    }
}

impl WsState {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_BUFFER);
        Self {
            tx,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// A receiver of every published event
    pub fn subscribe(&self) -> broadcast::Receiver<LoanEvent> {
        self.tx.subscribe()
    }

    pub async fn connected_clients(&self) -> usize {
        self.clients.read().await.len()
    }

    async fn wants(&self, client_id: Uuid, loan_id: Uuid) -> bool {
        self.clients
            .read()
            .await
            .get(&client_id)
            .map(|subs| subs.is_empty() || subs.contains(&loan_id))
            .unwrap_or(false)
    }

    async fn add_subscriptions(&self, client_id: Uuid, loan_ids: &[Uuid]) {
        if let Some(subs) = self.clients.write().await.get_mut(&client_id) {
            subs.extend(loan_ids.iter().copied());
        }
    }

    async fn remove_subscriptions(&self, client_id: Uuid, loan_ids: &[Uuid]) {
        if let Some(subs) = self.clients.write().await.get_mut(&client_id) {
            subs.retain(|id| !loan_ids.contains(id));
        }
    }
}

impl EventSink for WsState {
    fn publish(&self, event: LoanEvent) {
        let loan_id = event.loan_id();
        match self.tx.send(event) {
            Ok(receivers) => tracing::debug!(loan_id = %loan_id, receivers, "Event published"),
            // No connected clients
            Err(_) => tracing::trace!(loan_id = %loan_id, "Event dropped"),
        }
    }
}

/// Upgrade the HTTP connection to a WebSocket
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let client_id = Uuid::new_v4();
    state.clients.write().await.insert(client_id, HashSet::new());
    tracing::info!(client_id = %client_id, "WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMessage>(32);
    let mut events = state.subscribe();

    let send_state = state.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => {
                        if !send_state.wants(client_id, event.loan_id()).await {
                            continue;
                        }
                        ServerMessage::Event { event }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(client_id = %client_id, skipped, "WebSocket client lagging");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(reply) = reply_rx.recv() => reply,
                else => break,
            };

            let Ok(text) = serde_json::to_string(&msg) else {
                continue;
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) else {
                tracing::debug!(client_id = %client_id, "Ignoring malformed WebSocket message");
                continue;
            };

            let reply = match client_msg {
                ClientMessage::Subscribe { loan_ids } => {
                    recv_state.add_subscriptions(client_id, &loan_ids).await;
                    ServerMessage::Subscribed { loan_ids }
                }
                ClientMessage::Unsubscribe { loan_ids } => {
                    recv_state.remove_subscriptions(client_id, &loan_ids).await;
                    ServerMessage::Unsubscribed { loan_ids }
                }
                ClientMessage::Ping => ServerMessage::Pong,
            };
            if reply_tx.send(reply).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.clients.write().await.remove(&client_id);
    tracing::info!(client_id = %client_id, "WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_published_events_reach_subscribers() {
        let state = WsState::new();
        let mut rx = state.subscribe();
        let loan_id = Uuid::new_v4();

        state.publish(LoanEvent::Cancelled { loan_id });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.loan_id(), loan_id);
    }

    #[tokio::test]
    async fn test_publish_without_clients_is_harmless() {
        let state = WsState::new();
        state.publish(LoanEvent::Cancelled {
            loan_id: Uuid::new_v4(),
        });
        assert_eq!(state.connected_clients().await, 0);
    }

    #[tokio::test]
    async fn test_subscription_filtering() {
        let state = WsState::new();
        let client = Uuid::new_v4();
        let watched = Uuid::new_v4();
        let other = Uuid::new_v4();
        state.clients.write().await.insert(client, HashSet::new());

        // No subscriptions means everything
        assert!(state.wants(client, other).await);

        state.add_subscriptions(client, &[watched]).await;
        assert!(state.wants(client, watched).await);
        assert!(!state.wants(client, other).await);

        state.remove_subscriptions(client, &[watched]).await;
        assert!(state.wants(client, other).await);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let msg = ServerMessage::Event {
            event: LoanEvent::StatusChanged {
                loan_id: Uuid::nil(),
                status: crate::loan::LoanStatus::Disputed,
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "Event");
        assert_eq!(json["event"]["type"], "StatusChanged");
        assert_eq!(json["event"]["status"], "disputed");
    }
}
