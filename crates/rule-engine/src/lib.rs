//! Rule engine for Sentinel hubs
//!
//! Conditions pair a predicate tree over device and datastore values with
//! actions that run when the predicate becomes true. The engine owns one
//! runtime per hub and serializes every mutation of that hub through it.

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod model;
pub mod persistence;

#[cfg(test)]
mod testing;

pub use engine::{AutomationEngine, AutomationEvent, EngineConfig, HubRuntime};
pub use error::EngineError;
pub use model::*;
