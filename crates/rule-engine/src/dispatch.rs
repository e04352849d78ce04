//! Inbound message handling for a hub runtime
//!
//! Each message is handled to completion, including any cascade it causes,
//! and produces at most one reply for the requesting leaf.

use crate::engine::{AutomationEvent, Context, HubRuntime};
use crate::error::EngineError;
use hub_core::{AccessTable, DeviceReport, DeviceUpdate, HubError, StateChange, Subscription};
use leaf_protocol::{InboundMessage, OutboundMessage, RequestKind};

impl HubRuntime {
    /// Handle one message from `requester`
    pub(crate) fn handle(
        &mut self,
        requester: &str,
        message: InboundMessage,
        ctx: &Context<'_>,
    ) -> Option<OutboundMessage> {
        match message {
            InboundMessage::Config { .. } => Some(OutboundMessage::InvalidMessage {
                reason: "session is already configured".to_string(),
            }),
            InboundMessage::DeviceStatus {
                uuid,
                device,
                mode,
                format,
                value,
                units,
            } => {
                if uuid != requester {
                    return Some(OutboundMessage::InvalidDevice {
                        uuid,
                        device,
                        reason: "a leaf may only report its own devices".to_string(),
                    });
                }
                let report = DeviceReport {
                    device: device.clone(),
                    mode,
                    format,
                    value,
                    units,
                };
                match self.hub.report_device(&uuid, report) {
                    Ok(DeviceUpdate::Created) => {
                        self.dirty = true;
                        None
                    }
                    Ok(DeviceUpdate::Changed(change)) => {
                        self.commit(change, ctx, 0);
                        None
                    }
                    Ok(DeviceUpdate::Unchanged) => None,
                    Err(HubError::UnknownLeaf(uuid)) => Some(OutboundMessage::UnknownLeaf { uuid }),
                    Err(e) => Some(OutboundMessage::InvalidDevice {
                        uuid,
                        device,
                        reason: e.to_string(),
                    }),
                }
            }
            InboundMessage::DatastoreCreate {
                name,
                value,
                format,
                permissions,
            } => {
                let access = AccessTable::from_wire(&permissions);
                match self.hub.create_datastore(requester, &name, format, &value, access) {
                    Ok(Some(datastore)) => {
                        let reply = datastore.created_message();
                        self.dirty = true;
                        Some(reply)
                    }
                    Ok(None) => None,
                    Err(e) => Some(datastore_error(RequestKind::DatastoreCreate, &name, e)),
                }
            }
            InboundMessage::DatastoreGet { name } => match self.hub.read_datastore(requester, &name) {
                Ok(datastore) => Some(datastore.value_message()),
                Err(e) => Some(datastore_error(RequestKind::DatastoreGet, &name, e)),
            },
            InboundMessage::DatastoreSet { name, value } => {
                match self.hub.write_datastore(requester, &name, &value) {
                    Ok(change) => {
                        self.apply(change, ctx);
                        // The value as it stands once every cascade has settled
                        self.hub.datastore(&name).ok().map(|d| d.value_message())
                    }
                    Err(e) => Some(datastore_error(RequestKind::DatastoreSet, &name, e)),
                }
            }
            InboundMessage::DatastoreDelete { name } => {
                match self.hub.delete_datastore(requester, &name) {
                    Ok(_) => {
                        self.dirty = true;
                        Some(OutboundMessage::DatastoreDeleted { name })
                    }
                    Err(e) => Some(datastore_error(RequestKind::DatastoreDelete, &name, e)),
                }
            }
            InboundMessage::DatastorePermissions { name, permissions } => {
                let access = AccessTable::from_wire(&permissions);
                match self.hub.set_datastore_permissions(requester, &name, access) {
                    Ok(()) => {
                        self.dirty = true;
                        Some(OutboundMessage::DatastorePermissionsUpdated { name })
                    }
                    Err(e) => Some(datastore_error(RequestKind::DatastorePermissions, &name, e)),
                }
            }
            InboundMessage::Subscribe {
                sub_uuid,
                sub_device,
            } => {
                if self
                    .hub
                    .subscribe(Subscription::new(requester, &sub_uuid, &sub_device))
                {
                    tracing::debug!(
                        "Hub {}: {} subscribed to {}/{}",
                        self.hub.id(),
                        requester,
                        sub_uuid,
                        sub_device
                    );
                    self.dirty = true;
                }
                None
            }
            InboundMessage::Unsubscribe {
                sub_uuid,
                sub_device,
            } => {
                if self
                    .hub
                    .unsubscribe(&Subscription::new(requester, &sub_uuid, &sub_device))
                {
                    self.dirty = true;
                }
                None
            }
            InboundMessage::ConditionCreate {
                name,
                predicate,
                actions,
            } => match self.create_condition(requester, &name, &predicate, &actions) {
                Ok(()) => {
                    let _ = ctx.events.send(AutomationEvent::ConditionCreated {
                        hub_id: self.hub.id(),
                        name,
                    });
                    None
                }
                Err(e) => Some(condition_error(&name, e)),
            },
            InboundMessage::ConditionDelete { name } => match self.delete_condition(&name) {
                Ok(_) => {
                    let _ = ctx.events.send(AutomationEvent::ConditionDeleted {
                        hub_id: self.hub.id(),
                        name,
                    });
                    None
                }
                Err(_) => Some(OutboundMessage::UnknownCondition { name }),
            },
        }
    }

    fn apply(&mut self, change: Option<StateChange>, ctx: &Context<'_>) {
        if let Some(change) = change {
            self.commit(change, ctx, 0);
        }
    }
}

fn datastore_error(request: RequestKind, name: &str, error: HubError) -> OutboundMessage {
    match error {
        HubError::UnknownDatastore(_) => OutboundMessage::UnknownDatastore {
            request,
            name: name.to_string(),
        },
        HubError::PermissionDenied { operation, .. } => OutboundMessage::PermissionDenied {
            request: operation.request_kind(),
            name: name.to_string(),
        },
        other => OutboundMessage::InvalidMessage {
            reason: format!("{name}: {other}"),
        },
    }
}

fn condition_error(name: &str, error: EngineError) -> OutboundMessage {
    match error {
        EngineError::Hub(HubError::UnknownLeaf(uuid)) => OutboundMessage::UnknownLeaf { uuid },
        EngineError::Hub(HubError::UnknownDevice { leaf, device }) => OutboundMessage::InvalidDevice {
            uuid: leaf,
            device,
            reason: "no such device".to_string(),
        },
        EngineError::Hub(HubError::InvalidTarget { slot, reason }) => OutboundMessage::InvalidDevice {
            uuid: slot.target.as_str().to_string(),
            device: slot.name,
            reason,
        },
        other => OutboundMessage::InvalidCondition {
            name: name.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::{Context, HubRuntime};
    use crate::testing::{drain, TestHub};
    use hub_core::{LeafConnections, LeafRegistration};
    use leaf_protocol::{
        DeviceMode, Format, HubId, InboundMessage, OutboundMessage, Permission, RequestKind,
    };
    use serde_json::json;
    use std::collections::BTreeMap;
    use tokio::sync::broadcast;

    async fn shared_store(permissions: &[(&str, Permission)]) -> TestHub {
        let t = TestHub::new().await;
        for uuid in ["owner", "guest", "friend"] {
            t.leaf(uuid).await;
        }
        let permissions: BTreeMap<String, Permission> = permissions
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        let reply = t
            .send(
                "owner",
                InboundMessage::DatastoreCreate {
                    name: "mode".into(),
                    value: json!("home"),
                    format: Format::String,
                    permissions,
                },
            )
            .await;
        assert_eq!(
            reply,
            Some(OutboundMessage::DatastoreCreated {
                name: "mode".into(),
                value: json!("home"),
                format: Format::String,
            })
        );
        t
    }

    fn get(name: &str) -> InboundMessage {
        InboundMessage::DatastoreGet { name: name.into() }
    }

    #[tokio::test]
    async fn test_missing_default_denies() {
        let t = shared_store(&[]).await;
        assert_eq!(
            t.send("guest", get("mode")).await,
            Some(OutboundMessage::PermissionDenied {
                request: RequestKind::DatastoreGet,
                name: "mode".into(),
            })
        );
        assert!(matches!(
            t.send("owner", get("mode")).await,
            Some(OutboundMessage::DatastoreValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_default_with_write_override() {
        let t = shared_store(&[("default", Permission::Read), ("friend", Permission::Write)]).await;

        assert!(matches!(
            t.send("guest", get("mode")).await,
            Some(OutboundMessage::DatastoreValue { .. })
        ));
        assert_eq!(
            t.set_datastore("guest", "mode", json!("away")).await,
            Some(OutboundMessage::PermissionDenied {
                request: RequestKind::DatastoreSet,
                name: "mode".into(),
            })
        );
        assert_eq!(
            t.set_datastore("friend", "mode", json!("away")).await,
            Some(OutboundMessage::DatastoreValue {
                name: "mode".into(),
                value: json!("away"),
                format: Format::String,
            })
        );
        assert_eq!(
            t.send("friend", InboundMessage::DatastoreDelete { name: "mode".into() })
                .await,
            Some(OutboundMessage::PermissionDenied {
                request: RequestKind::DatastoreDelete,
                name: "mode".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_explicit_deny_overrides_default() {
        let t = shared_store(&[("default", Permission::Write), ("guest", Permission::Deny)]).await;
        assert!(matches!(
            t.send("guest", get("mode")).await,
            Some(OutboundMessage::PermissionDenied { .. })
        ));
        assert!(matches!(
            t.send("friend", get("mode")).await,
            Some(OutboundMessage::DatastoreValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_datastore_is_distinct_from_denied() {
        let t = shared_store(&[]).await;
        assert_eq!(
            t.send("guest", get("nothing")).await,
            Some(OutboundMessage::UnknownDatastore {
                request: RequestKind::DatastoreGet,
                name: "nothing".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_second_create_is_noop() {
        let t = shared_store(&[("default", Permission::Read)]).await;
        t.set_datastore("owner", "mode", json!("away")).await;

        let reply = t
            .send(
                "guest",
                InboundMessage::DatastoreCreate {
                    name: "mode".into(),
                    value: json!("home"),
                    format: Format::String,
                    permissions: BTreeMap::from([("default".to_string(), Permission::Admin)]),
                },
            )
            .await;
        assert_eq!(reply, None);
        assert_eq!(
            t.send("guest", get("mode")).await,
            Some(OutboundMessage::DatastoreValue {
                name: "mode".into(),
                value: json!("away"),
                format: Format::String,
            })
        );
        assert!(matches!(
            t.set_datastore("guest", "mode", json!("x")).await,
            Some(OutboundMessage::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_only_admin_edits_permissions() {
        let t = shared_store(&[("default", Permission::Write)]).await;
        let grant = |who: &str| InboundMessage::DatastorePermissions {
            name: "mode".into(),
            permissions: BTreeMap::from([(who.to_string(), Permission::Admin)]),
        };

        assert!(matches!(
            t.send("guest", grant("guest")).await,
            Some(OutboundMessage::PermissionDenied {
                request: RequestKind::DatastorePermissions,
                ..
            })
        ));
        assert_eq!(
            t.send("owner", grant("friend")).await,
            Some(OutboundMessage::DatastorePermissionsUpdated { name: "mode".into() })
        );
        // No default any more, so everyone else is denied
        assert!(matches!(
            t.send("guest", get("mode")).await,
            Some(OutboundMessage::PermissionDenied { .. })
        ));
        assert_eq!(
            t.send("friend", InboundMessage::DatastoreDelete { name: "mode".into() })
                .await,
            Some(OutboundMessage::DatastoreDeleted { name: "mode".into() })
        );
    }

    #[tokio::test]
    async fn test_set_with_wrong_format_is_invalid() {
        let t = TestHub::new().await;
        t.leaf("owner").await;
        t.send(
            "owner",
            InboundMessage::DatastoreCreate {
                name: "level".into(),
                value: json!(3),
                format: Format::Number,
                permissions: BTreeMap::new(),
            },
        )
        .await;
        assert!(matches!(
            t.set_datastore("owner", "level", json!("high")).await,
            Some(OutboundMessage::InvalidMessage { .. })
        ));
    }

    #[tokio::test]
    async fn test_datastore_subscription_receives_updates() {
        let t = shared_store(&[("default", Permission::Write)]).await;
        let mut guest = t.leaf("guest").await;
        t.send(
            "guest",
            InboundMessage::Subscribe {
                sub_uuid: "datastore".into(),
                sub_device: "mode".into(),
            },
        )
        .await;

        t.set_datastore("friend", "mode", json!("away")).await;
        let received = drain(&mut guest);
        assert_eq!(received.len(), 1);
        assert!(matches!(
            &received[0],
            OutboundMessage::SubscriptionUpdate { sub_uuid, sub_device, .. }
                if sub_uuid == "datastore" && sub_device == "mode"
        ));
    }

    #[tokio::test]
    async fn test_device_and_leaf_subscription_delivers_once() {
        let t = TestHub::new().await;
        t.leaf("sensor").await;
        let mut watcher = t.leaf("watcher").await;
        t.device("sensor", "temp", "IN", "number", json!(20)).await;

        for device in ["temp", "leaf", "temp"] {
            t.send(
                "watcher",
                InboundMessage::Subscribe {
                    sub_uuid: "sensor".into(),
                    sub_device: device.into(),
                },
            )
            .await;
        }
        assert_eq!(
            t.engine
                .inspect(t.hub_id, |rt| rt.hub().subscriptions().len())
                .await,
            2
        );

        t.device("sensor", "temp", "IN", "number", json!(21)).await;
        let received = drain(&mut watcher);
        assert_eq!(received.len(), 1);
        let OutboundMessage::SubscriptionUpdate { message, sub_device, .. } = &received[0] else {
            panic!("expected a subscription update, got {:?}", received[0]);
        };
        assert_eq!(sub_device, "temp");
        assert_eq!(
            **message,
            OutboundMessage::DeviceStatus {
                uuid: "sensor".into(),
                device: "temp".into(),
                value: json!(21),
                format: Format::Number,
                units: None,
            }
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_updates() {
        let t = TestHub::new().await;
        t.leaf("sensor").await;
        let mut watcher = t.leaf("watcher").await;
        t.device("sensor", "temp", "IN", "number", json!(20)).await;
        let subscription = |subscribe: bool| {
            let (sub_uuid, sub_device) = ("sensor".to_string(), "leaf".to_string());
            if subscribe {
                InboundMessage::Subscribe { sub_uuid, sub_device }
            } else {
                InboundMessage::Unsubscribe { sub_uuid, sub_device }
            }
        };

        t.send("watcher", subscription(true)).await;
        t.device("sensor", "temp", "IN", "number", json!(21)).await;
        assert_eq!(drain(&mut watcher).len(), 1);

        t.send("watcher", subscription(false)).await;
        t.device("sensor", "temp", "IN", "number", json!(22)).await;
        assert!(drain(&mut watcher).is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_report_is_not_published() {
        let t = TestHub::new().await;
        t.leaf("sensor").await;
        let mut watcher = t.leaf("watcher").await;
        t.device("sensor", "temp", "IN", "number", json!(20)).await;
        t.send(
            "watcher",
            InboundMessage::Subscribe {
                sub_uuid: "sensor".into(),
                sub_device: "temp".into(),
            },
        )
        .await;

        t.device("sensor", "temp", "IN", "number", json!(20)).await;
        assert!(drain(&mut watcher).is_empty());
    }

    #[tokio::test]
    async fn test_report_for_another_leaf_is_rejected() {
        let t = TestHub::new().await;
        t.leaf("sensor").await;
        let reply = t
            .send(
                "sensor",
                InboundMessage::DeviceStatus {
                    uuid: "someone-else".into(),
                    device: "temp".into(),
                    mode: None,
                    format: Some(Format::Number),
                    value: json!(1),
                    units: None,
                },
            )
            .await;
        assert!(matches!(reply, Some(OutboundMessage::InvalidDevice { .. })));
    }

    #[tokio::test]
    async fn test_condition_on_unknown_leaf() {
        let t = TestHub::new().await;
        t.leaf("owner").await;
        let reply = t
            .send(
                "owner",
                InboundMessage::ConditionCreate {
                    name: "ghost".into(),
                    predicate: json!(["=", ["nobody", "temp"], 1]),
                    actions: vec![],
                },
            )
            .await;
        assert_eq!(reply, Some(OutboundMessage::UnknownLeaf { uuid: "nobody".into() }));
    }

    #[tokio::test]
    async fn test_late_config_is_invalid() {
        let t = TestHub::new().await;
        t.leaf("owner").await;
        let reply = t
            .send(
                "owner",
                InboundMessage::Config {
                    uuid: "owner".into(),
                    name: "Owner".into(),
                    model: String::new(),
                    api_version: "0.1.0".into(),
                    token: None,
                },
            )
            .await;
        assert!(matches!(reply, Some(OutboundMessage::InvalidMessage { .. })));
    }

    #[test]
    fn test_only_new_devices_and_changes_mark_runtime_dirty() {
        let connections = LeafConnections::new(8);
        let (events, _) = broadcast::channel(8);
        let ctx = Context {
            sink: &connections,
            events: &events,
            max_depth: 8,
        };
        let mut runtime = HubRuntime::new(HubId(1));
        runtime.hub.register_leaf(LeafRegistration {
            uuid: "sensor".into(),
            name: "Sensor".into(),
            model: "thermometer".into(),
            api_version: "0.1.0".into(),
        });
        let status = |value| InboundMessage::DeviceStatus {
            uuid: "sensor".into(),
            device: "temp".into(),
            mode: Some(DeviceMode::Input),
            format: Some(Format::Number),
            value,
            units: None,
        };

        assert_eq!(runtime.handle("sensor", status(json!(20)), &ctx), None);
        assert!(runtime.dirty);

        runtime.dirty = false;
        assert_eq!(runtime.handle("sensor", status(json!(20)), &ctx), None);
        assert!(!runtime.dirty);

        assert_eq!(runtime.handle("sensor", status(json!(21)), &ctx), None);
        assert!(runtime.dirty);
    }
}
