//! Hub state for Sentinel
//!
//! This crate holds everything a hub knows about the world: the leaves that
//! have connected, their devices, hub-global datastores with their access
//! tables, and the subscriptions that decide who hears about a change.

pub mod connection;
pub mod datastore;
pub mod device;
pub mod error;
pub mod hub;
pub mod slot;
pub mod subscription;
pub mod value;

pub use connection::{ConnectionId, ConnectionSink, LeafConnections};
pub use datastore::{AccessTable, Datastore, DatastoreOperation};
pub use device::{Device, DeviceReport, Leaf, LeafRegistration};
pub use error::HubError;
pub use hub::{DeviceUpdate, Hub, StateChange};
pub use slot::{SlotRef, Target};
pub use subscription::{Delivery, DeviceScope, Subscription, SubscriptionTable};
pub use value::Value;
