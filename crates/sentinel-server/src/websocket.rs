//! WebSocket sessions for leaves
//!
//! A session starts with a `CONFIG` frame naming the leaf. From then on
//! replies and subscription deliveries share the leaf's outbound queue, so
//! they reach the socket in the order the hub produced them.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use hub_core::{ConnectionSink, LeafRegistration};
use leaf_protocol::{codec, HubId, InboundMessage, OutboundMessage};

use crate::AppState;

/// Handle a leaf connection on `hub_id`
pub async fn handle_socket(socket: WebSocket, hub_id: HubId, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let registration = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match codec::decode(&text) {
                Ok(InboundMessage::Config {
                    uuid,
                    name,
                    model,
                    api_version,
                    token: _,
                }) => {
                    break LeafRegistration {
                        uuid,
                        name,
                        model,
                        api_version,
                    }
                }
                Ok(_) => {
                    reject(&mut sender, "expected CONFIG as the first message").await;
                    return;
                }
                Err(e) => {
                    reject(&mut sender, &e.to_string()).await;
                    return;
                }
            },
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => {}
        }
    };

    let uuid = registration.uuid.clone();
    tracing::info!("Leaf {} ({}) connected to hub {}", uuid, registration.name, hub_id);

    let (connection_id, mut outbound_rx) = state.connections.register(hub_id, &uuid);
    state.engine.connect_leaf(hub_id, registration).await;
    state
        .connections
        .send(hub_id, &uuid, OutboundMessage::ConfigComplete { hub_id });
    state
        .connections
        .send(hub_id, &uuid, OutboundMessage::ListDevices { uuid: uuid.clone() });

    // Forward queued messages to the socket
    let send_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let json = match codec::encode(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!("Failed to encode outbound message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let reply = match codec::decode(&text) {
                    Ok(message) => {
                        tracing::trace!("Hub {}: message from {}: {:?}", hub_id, uuid, message);
                        state.engine.handle_message(hub_id, &uuid, message).await
                    }
                    Err(e) => {
                        tracing::debug!("Hub {}: bad frame from {}: {}", hub_id, uuid, e);
                        Some(OutboundMessage::InvalidMessage {
                            reason: e.to_string(),
                        })
                    }
                };
                if let Some(reply) = reply {
                    state.connections.send(hub_id, &uuid, reply);
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    // Clean up
    send_task.abort();
    if state.connections.unregister(hub_id, &uuid, connection_id) {
        state.engine.disconnect_leaf(hub_id, &uuid).await;
    }
    tracing::info!("Leaf {} disconnected from hub {}", uuid, hub_id);
}

/// Answer a failed handshake and close
async fn reject(sender: &mut SplitSink<WebSocket, Message>, reason: &str) {
    let message = OutboundMessage::InvalidMessage {
        reason: reason.to_string(),
    };
    if let Ok(json) = codec::encode(&message) {
        let _ = sender.send(Message::Text(json)).await;
    }
    let _ = sender.close().await;
}
