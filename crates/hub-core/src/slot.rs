//! Addresses of value slots
//!
//! A slot is either a device on a leaf or a hub-global datastore. On the
//! wire both are written `[owner, name]`, where the owner of a datastore is
//! the reserved pseudo-leaf `"datastore"`.

use leaf_protocol::DATASTORE_TARGET;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Owner of a value slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Target {
    Leaf(String),
    Datastore,
}

impl Target {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw == DATASTORE_TARGET {
            Target::Datastore
        } else {
            Target::Leaf(raw.to_string())
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Target::Leaf(uuid) => uuid,
            Target::Datastore => DATASTORE_TARGET,
        }
    }
}

impl From<String> for Target {
    fn from(raw: String) -> Self {
        if raw == DATASTORE_TARGET {
            Target::Datastore
        } else {
            Target::Leaf(raw)
        }
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        match target {
            Target::Leaf(uuid) => uuid,
            Target::Datastore => DATASTORE_TARGET.to_string(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device or datastore, addressed by owner and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRef {
    pub target: Target,
    pub name: String,
}

impl SlotRef {
    #[must_use]
    pub fn new(target: &str, name: &str) -> Self {
        Self {
            target: Target::parse(target),
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn device(leaf: &str, name: &str) -> Self {
        Self {
            target: Target::Leaf(leaf.to_string()),
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn datastore(name: &str) -> Self {
        Self {
            target: Target::Datastore,
            name: name.to_string(),
        }
    }

    /// Parse the `[owner, name]` form; anything else is not a reference
    #[must_use]
    pub fn from_wire(raw: &JsonValue) -> Option<Self> {
        match raw.as_array()?.as_slice() {
            [JsonValue::String(owner), JsonValue::String(name)] => Some(Self::new(owner, name)),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_wire(&self) -> JsonValue {
        JsonValue::Array(vec![
            JsonValue::String(self.target.as_str().to_string()),
            JsonValue::String(self.name.clone()),
        ])
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.target, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_datastore_pseudo_leaf() {
        let slot = SlotRef::from_wire(&json!(["datastore", "door_open"])).unwrap();
        assert_eq!(slot.target, Target::Datastore);
        assert_eq!(slot.to_wire(), json!(["datastore", "door_open"]));
    }

    #[test]
    fn test_device_reference() {
        let slot = SlotRef::from_wire(&json!(["9f2c", "rfid"])).unwrap();
        assert_eq!(slot, SlotRef::device("9f2c", "rfid"));
    }

    #[test]
    fn test_non_reference_shapes() {
        assert!(SlotRef::from_wire(&json!("rfid")).is_none());
        assert!(SlotRef::from_wire(&json!(["a", "b", "c"])).is_none());
        assert!(SlotRef::from_wire(&json!(["a", 1])).is_none());
    }

    #[test]
    fn test_target_serializes_as_string() {
        assert_eq!(serde_json::to_value(Target::Datastore).unwrap(), json!("datastore"));
        let target: Target = serde_json::from_value(json!("abc")).unwrap();
        assert_eq!(target, Target::Leaf("abc".into()));
    }
}
