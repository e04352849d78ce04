//! State of a single hub
//!
//! A [`Hub`] is plain data behind a single writer. Every mutation that
//! changes a value returns a [`StateChange`] describing the committed value;
//! callers fan that change out and re-evaluate their rules against it.

use crate::datastore::{AccessTable, Datastore, DatastoreOperation};
use crate::device::{Device, DeviceReport, Leaf, LeafRegistration};
use crate::error::HubError;
use crate::slot::{SlotRef, Target};
use crate::subscription::{Subscription, SubscriptionTable};
use crate::value::Value;
use chrono::Utc;
use leaf_protocol::{DeviceMode, Format, HubId, OutboundMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// A committed change of one device or datastore value
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub slot: SlotRef,
    pub value: Value,
}

impl StateChange {
    /// `DEVICE_STATUS` message describing the new value
    #[must_use]
    pub fn status_message(&self) -> OutboundMessage {
        OutboundMessage::DeviceStatus {
            uuid: self.slot.target.as_str().to_string(),
            device: self.slot.name.clone(),
            value: self.value.to_json(),
            format: self.value.format(),
            units: self.value.units().map(str::to_string),
        }
    }
}

/// Outcome of a `DEVICE_STATUS` report
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceUpdate {
    /// First report for this device name
    Created,
    /// The stored value was replaced
    Changed(StateChange),
    /// Same value as before
    Unchanged,
}

/// Leaves, datastores and subscriptions of one hub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hub {
    id: HubId,
    #[serde(default)]
    leaves: BTreeMap<String, Leaf>,
    #[serde(default)]
    datastores: BTreeMap<String, Datastore>,
    #[serde(default)]
    subscriptions: SubscriptionTable,
}

impl Hub {
    #[must_use]
    pub fn new(id: HubId) -> Self {
        Self {
            id,
            leaves: BTreeMap::new(),
            datastores: BTreeMap::new(),
            subscriptions: SubscriptionTable::default(),
        }
    }

    #[must_use]
    pub fn id(&self) -> HubId {
        self.id
    }

    // Leaves

    /// Create or refresh a leaf from its session handshake
    pub fn register_leaf(&mut self, registration: LeafRegistration) -> &Leaf {
        let uuid = registration.uuid.clone();
        let leaf = self
            .leaves
            .entry(uuid)
            .and_modify(|leaf| leaf.reconnect(registration.clone()))
            .or_insert_with(|| Leaf::new(registration));
        tracing::info!("Leaf {} ({}) connected to hub {}", leaf.uuid, leaf.name, self.id);
        leaf
    }

    /// Mark a leaf as disconnected. Its devices and subscriptions remain.
    pub fn disconnect_leaf(&mut self, uuid: &str) -> bool {
        match self.leaves.get_mut(uuid) {
            Some(leaf) if leaf.connected => {
                leaf.connected = false;
                tracing::info!("Leaf {} disconnected from hub {}", uuid, self.id);
                true
            }
            _ => false,
        }
    }

    /// Mark every leaf as disconnected
    pub fn disconnect_all(&mut self) {
        for leaf in self.leaves.values_mut() {
            leaf.connected = false;
        }
    }

    /// Record an inbound message from a leaf
    pub fn touch_leaf(&mut self, uuid: &str) {
        if let Some(leaf) = self.leaves.get_mut(uuid) {
            leaf.touch();
        }
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn leaf(&self, uuid: &str) -> Result<&Leaf, HubError> {
        self.leaves
            .get(uuid)
            .ok_or_else(|| HubError::UnknownLeaf(uuid.to_string()))
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Leaf> {
        self.leaves.values()
    }

    // Devices

    #[allow(clippy::missing_errors_doc)]
    pub fn device(&self, uuid: &str, name: &str) -> Result<&Device, HubError> {
        self.leaf(uuid)?
            .device(name)
            .ok_or_else(|| HubError::UnknownDevice {
                leaf: uuid.to_string(),
                device: name.to_string(),
            })
    }

    /// Apply a status report from a leaf
    ///
    /// The first report for a device name creates the device and is not a
    /// change. Later reports are read with the device's stored format and
    /// yield a change only if the value differs.
    #[allow(clippy::missing_errors_doc)]
    pub fn report_device(
        &mut self,
        uuid: &str,
        report: DeviceReport,
    ) -> Result<DeviceUpdate, HubError> {
        let hub_id = self.id;
        let leaf = self
            .leaves
            .get_mut(uuid)
            .ok_or_else(|| HubError::UnknownLeaf(uuid.to_string()))?;

        let Some(device) = leaf.devices.get_mut(&report.device) else {
            let format = report.format.unwrap_or(Format::String);
            let value = Value::from_json(format, &report.value, report.units.as_deref())?;
            let device = Device {
                name: report.device.clone(),
                mode: report.mode.unwrap_or(DeviceMode::Input),
                value,
                last_updated: Utc::now(),
            };
            tracing::debug!(
                "Hub {}: leaf {} added {} device {} = {}",
                hub_id,
                uuid,
                device.mode.as_str(),
                device.name,
                device.value
            );
            leaf.devices.insert(report.device, device);
            return Ok(DeviceUpdate::Created);
        };

        let units = report
            .units
            .as_deref()
            .or_else(|| device.value.units())
            .map(str::to_string);
        let value = Value::from_json(device.value.format(), &report.value, units.as_deref())?;
        if value == device.value {
            return Ok(DeviceUpdate::Unchanged);
        }

        device.value = value.clone();
        device.last_updated = Utc::now();
        tracing::debug!("Hub {}: {}/{} = {}", hub_id, uuid, device.name, value);
        Ok(DeviceUpdate::Changed(StateChange {
            slot: SlotRef::device(uuid, &report.device),
            value,
        }))
    }

    // Slots

    /// Current value of a device or datastore, ignoring access control
    #[allow(clippy::missing_errors_doc)]
    pub fn value_of(&self, slot: &SlotRef) -> Result<&Value, HubError> {
        match &slot.target {
            Target::Leaf(uuid) => Ok(&self.device(uuid, &slot.name)?.value),
            Target::Datastore => Ok(&self.datastore(&slot.name)?.value),
        }
    }

    // Datastores

    /// Look up a datastore without access control
    #[allow(clippy::missing_errors_doc)]
    pub fn datastore(&self, name: &str) -> Result<&Datastore, HubError> {
        self.datastores
            .get(name)
            .ok_or_else(|| HubError::UnknownDatastore(name.to_string()))
    }

    pub fn datastores(&self) -> impl Iterator<Item = &Datastore> {
        self.datastores.values()
    }

    /// Create a datastore owned by `creator`
    ///
    /// Returns `None` if the name is taken; the existing value and access
    /// table are left untouched.
    #[allow(clippy::missing_errors_doc)]
    pub fn create_datastore(
        &mut self,
        creator: &str,
        name: &str,
        format: Format,
        raw: &JsonValue,
        access: AccessTable,
    ) -> Result<Option<&Datastore>, HubError> {
        if self.datastores.contains_key(name) {
            tracing::debug!("Hub {}: datastore {} already exists", self.id, name);
            return Ok(None);
        }

        let value = Value::from_json(format, raw, None)?;
        let datastore = Datastore::new(name, value, access.with_admin(creator), creator);
        tracing::info!("Hub {}: {} created datastore {}", self.id, creator, name);
        let stored: &Datastore = self.datastores.entry(name.to_string()).or_insert(datastore);
        Ok(Some(stored))
    }

    /// Datastore lookup on behalf of a requester
    #[allow(clippy::missing_errors_doc)]
    pub fn read_datastore(&self, requester: &str, name: &str) -> Result<&Datastore, HubError> {
        self.authorize(requester, name, DatastoreOperation::Read)
    }

    /// Write a raw value on behalf of a requester
    #[allow(clippy::missing_errors_doc)]
    pub fn write_datastore(
        &mut self,
        requester: &str,
        name: &str,
        raw: &JsonValue,
    ) -> Result<Option<StateChange>, HubError> {
        let current = &self.authorize(requester, name, DatastoreOperation::Set)?.value;
        let value = Value::from_json(current.format(), raw, current.units())?;
        self.assign_datastore(name, value)
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn delete_datastore(&mut self, requester: &str, name: &str) -> Result<Datastore, HubError> {
        self.authorize(requester, name, DatastoreOperation::Delete)?;
        let removed = self
            .datastores
            .remove(name)
            .ok_or_else(|| HubError::UnknownDatastore(name.to_string()))?;
        tracing::info!("Hub {}: {} deleted datastore {}", self.id, requester, name);
        Ok(removed)
    }

    /// Replace a datastore's access table. The requester keeps admin.
    #[allow(clippy::missing_errors_doc)]
    pub fn set_datastore_permissions(
        &mut self,
        requester: &str,
        name: &str,
        access: AccessTable,
    ) -> Result<(), HubError> {
        self.authorize(requester, name, DatastoreOperation::EditPermissions)?;
        if let Some(datastore) = self.datastores.get_mut(name) {
            datastore.access = access.with_admin(requester);
        }
        Ok(())
    }

    /// Assign a datastore value with no access check. Rule actions write
    /// through here.
    #[allow(clippy::missing_errors_doc)]
    pub fn assign_datastore(
        &mut self,
        name: &str,
        value: Value,
    ) -> Result<Option<StateChange>, HubError> {
        let datastore = self
            .datastores
            .get_mut(name)
            .ok_or_else(|| HubError::UnknownDatastore(name.to_string()))?;

        if value.format() != datastore.value.format() {
            return Err(HubError::FormatMismatch {
                expected: datastore.value.format(),
                found: value.format(),
            });
        }
        if value == datastore.value {
            return Ok(None);
        }

        datastore.value = value.clone();
        datastore.last_updated = Utc::now();
        tracing::debug!("Hub {}: datastore {} = {}", self.id, name, value);
        Ok(Some(StateChange {
            slot: SlotRef::datastore(name),
            value,
        }))
    }

    fn authorize(
        &self,
        requester: &str,
        name: &str,
        operation: DatastoreOperation,
    ) -> Result<&Datastore, HubError> {
        let datastore = self.datastore(name)?;
        if !datastore.access.allows(requester, operation) {
            tracing::debug!(
                "Hub {}: {} denied {:?} on datastore {}",
                self.id,
                requester,
                operation,
                name
            );
            return Err(HubError::PermissionDenied {
                operation,
                target: name.to_string(),
            });
        }
        Ok(datastore)
    }

    // Subscriptions

    pub fn subscribe(&mut self, subscription: Subscription) -> bool {
        self.subscriptions.subscribe(subscription)
    }

    pub fn unsubscribe(&mut self, subscription: &Subscription) -> bool {
        self.subscriptions.unsubscribe(subscription)
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }
}
