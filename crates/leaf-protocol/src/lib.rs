//! Leaf wire protocol for the Sentinel hub
//!
//! This crate defines the JSON messages exchanged between a hub and its
//! leaves, together with the small vocabulary types (formats, device modes,
//! datastore permissions) those messages carry.

pub mod codec;
pub mod messages;
pub mod types;

pub use messages::{ActionSpec, ActionType, InboundMessage, OutboundMessage};
pub use types::*;
