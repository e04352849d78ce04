//! Error types for the rule engine

use hub_core::HubError;
use thiserror::Error;

/// Errors that can occur in the rule engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Hub state rejected the operation
    #[error(transparent)]
    Hub(#[from] HubError),

    /// Predicate could not be parsed from its wire form
    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    /// Action could not be parsed from its wire form
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// A condition with this name already exists on the hub
    #[error("Condition already exists: {0}")]
    DuplicateCondition(String),

    /// Condition not found
    #[error("Condition not found: {0}")]
    NotFound(String),

    /// IO error (persistence)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
