//! Helpers for driving an engine with in-process leaf sessions

use crate::engine::{AutomationEngine, EngineConfig};
use hub_core::{LeafConnections, LeafRegistration, Value};
use leaf_protocol::{DeviceMode, Format, HubId, InboundMessage, OutboundMessage};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) struct TestHub {
    pub engine: Arc<AutomationEngine>,
    pub connections: Arc<LeafConnections>,
    pub hub_id: HubId,
}

impl TestHub {
    pub async fn new() -> Self {
        Self::with_config(EngineConfig::default()).await
    }

    pub async fn with_depth(max_cascade_depth: usize) -> Self {
        Self::with_config(EngineConfig {
            max_cascade_depth,
            ..EngineConfig::default()
        })
        .await
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        let connections = Arc::new(LeafConnections::new(256));
        let engine = Arc::new(AutomationEngine::new(connections.clone(), config));
        engine.load().await.unwrap();
        Self {
            engine,
            connections,
            hub_id: HubId(1),
        }
    }

    /// Same engine and connections, another hub
    pub fn sibling(&self, hub_id: HubId) -> Self {
        Self {
            engine: self.engine.clone(),
            connections: self.connections.clone(),
            hub_id,
        }
    }

    /// Open a session for a leaf and return its outbound queue
    pub async fn leaf(&self, uuid: &str) -> mpsc::Receiver<OutboundMessage> {
        let (_id, rx) = self.connections.register(self.hub_id, uuid);
        self.engine
            .connect_leaf(
                self.hub_id,
                LeafRegistration {
                    uuid: uuid.to_string(),
                    name: uuid.to_string(),
                    model: "test".to_string(),
                    api_version: "0.1.0".to_string(),
                },
            )
            .await;
        rx
    }

    pub async fn send(&self, requester: &str, message: InboundMessage) -> Option<OutboundMessage> {
        self.engine
            .handle_message(self.hub_id, requester, message)
            .await
    }

    pub async fn device(&self, uuid: &str, device: &str, mode: &str, format: &str, value: JsonValue) {
        let reply = self
            .send(
                uuid,
                InboundMessage::DeviceStatus {
                    uuid: uuid.to_string(),
                    device: device.to_string(),
                    mode: mode.parse::<DeviceMode>().ok(),
                    format: Some(Format::from_wire(format)),
                    value,
                    units: None,
                },
            )
            .await;
        assert_eq!(reply, None, "device status for {uuid}/{device}");
    }

    pub async fn set_datastore(&self, requester: &str, name: &str, value: JsonValue) -> Option<OutboundMessage> {
        self.send(
            requester,
            InboundMessage::DatastoreSet {
                name: name.to_string(),
                value,
            },
        )
        .await
    }

    pub async fn datastore_value(&self, name: &str) -> Value {
        self.engine
            .inspect(self.hub_id, |rt| rt.hub().datastore(name).unwrap().value.clone())
            .await
    }
}

/// Everything currently queued for a leaf
pub(crate) fn drain(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<OutboundMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}
