//! Subscriptions and change fan-out

use crate::connection::ConnectionSink;
use crate::hub::StateChange;
use crate::slot::Target;
use leaf_protocol::{HubId, OutboundMessage, WHOLE_LEAF};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Which devices of a target a subscription covers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceScope {
    /// Every device of the target
    WholeLeaf,
    Device(String),
}

impl DeviceScope {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            DeviceScope::WholeLeaf => WHOLE_LEAF,
            DeviceScope::Device(name) => name,
        }
    }
}

impl From<String> for DeviceScope {
    fn from(raw: String) -> Self {
        if raw == WHOLE_LEAF {
            DeviceScope::WholeLeaf
        } else {
            DeviceScope::Device(raw)
        }
    }
}

impl From<DeviceScope> for String {
    fn from(scope: DeviceScope) -> Self {
        match scope {
            DeviceScope::WholeLeaf => WHOLE_LEAF.to_string(),
            DeviceScope::Device(name) => name,
        }
    }
}

/// A standing request by `subscriber` to hear about changes of `target`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subscription {
    pub subscriber: String,
    pub target: Target,
    pub scope: DeviceScope,
}

impl Subscription {
    #[must_use]
    pub fn new(subscriber: &str, target: &str, device: &str) -> Self {
        Self {
            subscriber: subscriber.to_string(),
            target: Target::parse(target),
            scope: DeviceScope::from(device.to_string()),
        }
    }
}

/// One notification owed to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub subscriber: String,
    pub scope: DeviceScope,
}

/// The subscriptions of one hub
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionTable {
    entries: BTreeSet<Subscription>,
}

impl SubscriptionTable {
    /// Add a subscription. Returns `false` if it already existed.
    pub fn subscribe(&mut self, subscription: Subscription) -> bool {
        self.entries.insert(subscription)
    }

    /// Remove exactly this subscription. Returns `false` if it was absent.
    pub fn unsubscribe(&mut self, subscription: &Subscription) -> bool {
        self.entries.remove(subscription)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Who must be told about a change to `device` of `target`
    ///
    /// Device-exact subscribers come first. Whole-leaf subscribers follow,
    /// skipping anyone already served, so a subscriber holds at most one
    /// delivery per change.
    #[must_use]
    pub fn deliveries(&self, target: &Target, device: &str) -> Vec<Delivery> {
        let matching: Vec<&Subscription> =
            self.entries.iter().filter(|s| &s.target == target).collect();
        let mut seen = HashSet::new();
        let mut deliveries = Vec::new();

        for sub in matching.iter().filter(|s| s.scope.as_str() == device) {
            if seen.insert(sub.subscriber.as_str()) {
                deliveries.push(Delivery {
                    subscriber: sub.subscriber.clone(),
                    scope: sub.scope.clone(),
                });
            }
        }
        for sub in matching.iter().filter(|s| s.scope == DeviceScope::WholeLeaf) {
            if seen.insert(sub.subscriber.as_str()) {
                deliveries.push(Delivery {
                    subscriber: sub.subscriber.clone(),
                    scope: DeviceScope::WholeLeaf,
                });
            }
        }
        deliveries
    }
}

/// Push a committed change to every subscriber with a live session.
/// Returns the number of messages accepted by the sink.
pub fn fan_out(
    hub_id: HubId,
    subscriptions: &SubscriptionTable,
    change: &StateChange,
    sink: &dyn ConnectionSink,
) -> usize {
    let status = change.status_message();
    let mut delivered = 0;

    for delivery in subscriptions.deliveries(&change.slot.target, &change.slot.name) {
        let message = OutboundMessage::SubscriptionUpdate {
            uuid: delivery.subscriber.clone(),
            hub_id,
            sub_uuid: change.slot.target.as_str().to_string(),
            sub_device: delivery.scope.as_str().to_string(),
            message: Box::new(status.clone()),
        };
        if sink.send(hub_id, &delivery.subscriber, message) {
            delivered += 1;
        }
    }

    tracing::trace!("Fanned out {} to {} subscribers", change.slot, delivered);
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LeafConnections;
    use crate::slot::SlotRef;
    use crate::value::Value;
    use rust_decimal_macros::dec;

    fn change(target: &str, device: &str) -> StateChange {
        StateChange {
            slot: SlotRef::new(target, device),
            value: Value::Number(dec!(1)),
        }
    }

    #[test]
    fn test_device_and_whole_leaf_yield_one_delivery() {
        let mut table = SubscriptionTable::default();
        table.subscribe(Subscription::new("watcher", "sensor", "temp"));
        table.subscribe(Subscription::new("watcher", "sensor", "leaf"));

        let deliveries = table.deliveries(&Target::parse("sensor"), "temp");
        assert_eq!(
            deliveries,
            vec![Delivery {
                subscriber: "watcher".into(),
                scope: DeviceScope::Device("temp".into()),
            }]
        );
    }

    #[test]
    fn test_whole_leaf_covers_other_devices() {
        let mut table = SubscriptionTable::default();
        table.subscribe(Subscription::new("watcher", "sensor", "temp"));
        table.subscribe(Subscription::new("other", "sensor", "leaf"));

        let deliveries = table.deliveries(&Target::parse("sensor"), "humidity");
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].subscriber, "other");
        assert_eq!(deliveries[0].scope, DeviceScope::WholeLeaf);
    }

    #[test]
    fn test_unsubscribe_removes_only_exact_tuple() {
        let mut table = SubscriptionTable::default();
        table.subscribe(Subscription::new("watcher", "sensor", "temp"));
        table.subscribe(Subscription::new("watcher", "sensor", "leaf"));

        assert!(table.unsubscribe(&Subscription::new("watcher", "sensor", "temp")));
        assert!(!table.unsubscribe(&Subscription::new("watcher", "sensor", "temp")));
        assert_eq!(table.len(), 1);

        let deliveries = table.deliveries(&Target::parse("sensor"), "temp");
        assert_eq!(deliveries[0].scope, DeviceScope::WholeLeaf);
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut table = SubscriptionTable::default();
        assert!(table.subscribe(Subscription::new("a", "b", "c")));
        assert!(!table.subscribe(Subscription::new("a", "b", "c")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_datastore_target() {
        let mut table = SubscriptionTable::default();
        table.subscribe(Subscription::new("watcher", "datastore", "door_open"));

        assert_eq!(table.deliveries(&Target::Datastore, "door_open").len(), 1);
        assert!(table.deliveries(&Target::Datastore, "other").is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_wraps_status() {
        let connections = LeafConnections::new(8);
        let (_id, mut rx) = connections.register(HubId(7), "watcher");
        let mut table = SubscriptionTable::default();
        table.subscribe(Subscription::new("watcher", "sensor", "leaf"));
        table.subscribe(Subscription::new("offline", "sensor", "leaf"));

        let delivered = fan_out(HubId(7), &table, &change("sensor", "temp"), &connections);
        assert_eq!(delivered, 1);

        match rx.recv().await {
            Some(OutboundMessage::SubscriptionUpdate {
                uuid,
                hub_id,
                sub_uuid,
                sub_device,
                message,
            }) => {
                assert_eq!(uuid, "watcher");
                assert_eq!(hub_id, HubId(7));
                assert_eq!(sub_uuid, "sensor");
                assert_eq!(sub_device, "leaf");
                assert!(matches!(*message, OutboundMessage::DeviceStatus { .. }));
            }
            other => panic!("unexpected delivery: {other:?}"),
        }
    }
}
