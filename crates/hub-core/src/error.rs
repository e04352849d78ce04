//! Error types for hub state

use crate::datastore::DatastoreOperation;
use crate::slot::SlotRef;
use leaf_protocol::Format;
use thiserror::Error;

/// Errors raised while reading or mutating hub state
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HubError {
    /// No leaf with this uuid has ever connected to the hub
    #[error("Unknown leaf: {0}")]
    UnknownLeaf(String),

    /// The leaf exists but has not reported this device
    #[error("Unknown device {device} on leaf {leaf}")]
    UnknownDevice { leaf: String, device: String },

    #[error("Unknown datastore: {0}")]
    UnknownDatastore(String),

    /// The requester's access level does not cover the operation
    #[error("Permission denied: {operation:?} on {target}")]
    PermissionDenied {
        operation: DatastoreOperation,
        target: String,
    },

    /// Two values, or a value and a slot, disagree on format
    #[error("Format mismatch: expected {expected}, found {found}")]
    FormatMismatch { expected: Format, found: Format },

    /// A raw JSON value cannot be read as the given format
    #[error("Invalid {format} value: {value}")]
    InvalidValue { format: Format, value: String },

    /// The slot exists but cannot be used the way it was asked to
    #[error("Invalid target {slot}: {reason}")]
    InvalidTarget { slot: SlotRef, reason: String },
}
