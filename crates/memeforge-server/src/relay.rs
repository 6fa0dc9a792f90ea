//! WebSocket relay for bot bridges.
//!
//! A bridge connects to `/ws`, optionally subscribes to chats, and receives
//! every share addressed to one of them. Shares without a chat go to every
//! bridge, and a bridge with no subscriptions receives everything.
//!
//! ```json
//! { "type": "subscribe", "chats": ["-100123"] }
//! { "type": "ack", "share_id": "0b6f..." }
//! ```

use crate::state::{AppState, Share};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, sync::Arc};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A message sent by a bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    /// Replace the set of chats this bridge delivers to.
    Subscribe { chats: Vec<String> },
    /// Delivery confirmation.
    Ack { share_id: Uuid },
}

/// A message sent to a bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    Hello { bridge_id: String },
    Subscribed { chats: Vec<String> },
    Share(Share),
    Error { message: String },
}

/// Whether a bridge subscribed to `chats` should receive `share`.
pub fn wants(chats: &HashSet<String>, share: &Share) -> bool {
    match &share.chat {
        Some(chat) => chats.is_empty() || chats.contains(chat),
        None => true,
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    message: &RelayMessage,
) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to encode relay message: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(json.into())).await.is_ok()
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let bridge_id = Uuid::new_v4().to_string();
    info!("Bridge connected: {}", bridge_id);

    let (mut sender, mut receiver) = socket.split();
    let mut shares = state.subscribe();
    let mut chats: HashSet<String> = HashSet::new();

    let hello = RelayMessage::Hello {
        bridge_id: bridge_id.clone(),
    };
    if !send(&mut sender, &hello).await {
        return;
    }

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<BridgeMessage>(&text) {
                            Ok(BridgeMessage::Subscribe { chats: requested }) => {
                                chats = requested.into_iter().collect();
                                info!("Bridge {} subscribed to {} chat(s)", bridge_id, chats.len());
                                let mut sorted: Vec<String> = chats.iter().cloned().collect();
                                sorted.sort();
                                Some(RelayMessage::Subscribed { chats: sorted })
                            }
                            Ok(BridgeMessage::Ack { share_id }) => {
                                debug!("Bridge {} delivered share {}", bridge_id, share_id);
                                None
                            }
                            Err(e) => {
                                warn!("Invalid message from {}: {}", bridge_id, e);
                                Some(RelayMessage::Error {
                                    message: format!("Invalid message: {}", e),
                                })
                            }
                        };
                        if let Some(reply) = reply {
                            if !send(&mut sender, &reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", bridge_id, e);
                        break;
                    }
                }
            }

            share = shares.recv() => {
                match share {
                    Ok(share) => {
                        if wants(&chats, &share) && !send(&mut sender, &RelayMessage::Share(share)).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Bridge {} missed {} share(s)", bridge_id, missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    info!("Bridge disconnected: {}", bridge_id);
}
