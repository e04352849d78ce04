//! Data models for the rule engine
//!
//! Predicates arrive as nested JSON arrays:
//!
//! ```text
//! ["=", ["<leaf uuid>", "rfid"], 33790]          comparator
//! ["NOT", <predicate>]                            negation
//! ["AND", [<predicate>, <predicate>, ...]]        n-ary boolean
//! ["OR", <predicate>, <predicate>]                binary shorthand
//! ```
//!
//! Comparator operands are `[owner, name]` slot references (the owner
//! `"datastore"` addresses a datastore) or scalar literals.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use hub_core::{SlotRef, Value};
use leaf_protocol::{ActionSpec, ActionType};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;

/// Wire keyword of the negation node
pub const NOT: &str = "NOT";

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Comparison {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "!=",
            Comparison::Lt => "<",
            Comparison::Gt => ">",
            Comparison::Le => "<=",
            Comparison::Ge => ">=",
        }
    }

    #[must_use]
    pub fn parse(symbol: &str) -> Option<Self> {
        match symbol {
            "=" => Some(Comparison::Eq),
            "!=" => Some(Comparison::Ne),
            "<" => Some(Comparison::Lt),
            ">" => Some(Comparison::Gt),
            "<=" => Some(Comparison::Le),
            ">=" => Some(Comparison::Ge),
            _ => None,
        }
    }

    /// Whether `left op right` holds given `left.cmp(right)`
    #[must_use]
    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Ne => ordering != Ordering::Equal,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Le => ordering != Ordering::Greater,
            Comparison::Ge => ordering != Ordering::Less,
        }
    }
}

/// N-ary boolean connectives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolOp {
    And,
    Or,
    Xor,
}

impl BoolOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            BoolOp::And => "AND",
            BoolOp::Or => "OR",
            BoolOp::Xor => "XOR",
        }
    }

    #[must_use]
    pub fn parse(symbol: &str) -> Option<Self> {
        match symbol {
            "AND" => Some(BoolOp::And),
            "OR" => Some(BoolOp::Or),
            "XOR" => Some(BoolOp::Xor),
            _ => None,
        }
    }
}

/// One side of a comparator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operand {
    /// A value owned by the predicate itself
    Literal { value: Value },
    /// A live device or datastore value, read at evaluation time
    Slot { slot: SlotRef },
}

impl Operand {
    #[allow(clippy::missing_errors_doc)]
    pub fn from_wire(raw: &JsonValue) -> Result<Self, EngineError> {
        if let Some(slot) = SlotRef::from_wire(raw) {
            return Ok(Operand::Slot { slot });
        }
        Value::from_literal(raw)
            .map(|value| Operand::Literal { value })
            .map_err(|_| EngineError::InvalidPredicate(format!("invalid operand {raw}")))
    }

    #[must_use]
    pub fn to_representation(&self) -> JsonValue {
        match self {
            Operand::Literal { value } => value.to_json(),
            Operand::Slot { slot } => slot.to_wire(),
        }
    }
}

/// Boolean expression tree over values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    Comparator {
        op: Comparison,
        left: Operand,
        right: Operand,
    },
    Not {
        operand: Box<Predicate>,
    },
    Multivariate {
        op: BoolOp,
        operands: Vec<Predicate>,
    },
}

impl Predicate {
    /// Parse the nested-array wire form
    #[allow(clippy::missing_errors_doc)]
    pub fn from_wire(raw: &JsonValue) -> Result<Self, EngineError> {
        let invalid = || EngineError::InvalidPredicate(raw.to_string());
        let items = raw.as_array().ok_or_else(invalid)?;
        let (head, rest) = items.split_first().ok_or_else(invalid)?;
        let symbol = head.as_str().ok_or_else(invalid)?;

        if symbol == NOT {
            return match rest {
                [operand] => Ok(Predicate::Not {
                    operand: Box::new(Predicate::from_wire(operand)?),
                }),
                _ => Err(EngineError::InvalidPredicate(format!(
                    "NOT takes one operand: {raw}"
                ))),
            };
        }

        if let Some(op) = BoolOp::parse(symbol) {
            let operands = match rest {
                [JsonValue::Array(list)] => list
                    .iter()
                    .map(Predicate::from_wire)
                    .collect::<Result<Vec<_>, _>>()?,
                [first, second] => vec![Predicate::from_wire(first)?, Predicate::from_wire(second)?],
                _ => return Err(invalid()),
            };
            return Ok(Predicate::Multivariate { op, operands });
        }

        if let Some(op) = Comparison::parse(symbol) {
            return match rest {
                [left, right] => Ok(Predicate::Comparator {
                    op,
                    left: Operand::from_wire(left)?,
                    right: Operand::from_wire(right)?,
                }),
                _ => Err(EngineError::InvalidPredicate(format!(
                    "{symbol} takes two operands: {raw}"
                ))),
            };
        }

        Err(EngineError::InvalidPredicate(format!(
            "unknown operator {symbol}"
        )))
    }

    /// Nested-array form of this tree
    ///
    /// Boolean connectives are always written in the n-ary form.
    #[must_use]
    pub fn to_representation(&self) -> JsonValue {
        match self {
            Predicate::Comparator { op, left, right } => JsonValue::Array(vec![
                op.symbol().into(),
                left.to_representation(),
                right.to_representation(),
            ]),
            Predicate::Not { operand } => {
                JsonValue::Array(vec![NOT.into(), operand.to_representation()])
            }
            Predicate::Multivariate { op, operands } => JsonValue::Array(vec![
                op.symbol().into(),
                JsonValue::Array(operands.iter().map(Predicate::to_representation).collect()),
            ]),
        }
    }
}

/// Server-side mutation run when a condition fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Overwrite the target value
    Set { target: SlotRef, value: Value },
    /// Add `delta` to a numeric target
    Change { target: SlotRef, delta: Value },
}

impl Action {
    #[allow(clippy::missing_errors_doc)]
    pub fn from_spec(spec: &ActionSpec) -> Result<Self, EngineError> {
        let target = SlotRef::new(&spec.target, &spec.device);
        let value = Value::from_literal(&spec.value).map_err(|_| {
            EngineError::InvalidAction(format!("invalid value {} for {}", spec.value, target))
        })?;

        Ok(match spec.action_type {
            ActionType::Set => Action::Set { target, value },
            ActionType::Change => Action::Change {
                target,
                delta: value,
            },
        })
    }

    #[must_use]
    pub fn target(&self) -> &SlotRef {
        match self {
            Action::Set { target, .. } | Action::Change { target, .. } => target,
        }
    }
}

/// A named predicate with edge-triggered actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Unique within the hub
    pub name: String,
    pub predicate: Predicate,
    pub actions: Vec<Action>,
    /// Result of the previous evaluation
    #[serde(default)]
    pub previously_satisfied: bool,
    /// Leaf that created the condition
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Condition {
    /// Parse a condition from its wire request. Slot references are not
    /// checked against hub state here.
    #[allow(clippy::missing_errors_doc)]
    pub fn from_request(
        creator: &str,
        name: &str,
        predicate: &JsonValue,
        actions: &[ActionSpec],
    ) -> Result<Self, EngineError> {
        Ok(Self {
            name: name.to_string(),
            predicate: Predicate::from_wire(predicate)?,
            actions: actions
                .iter()
                .map(Action::from_spec)
                .collect::<Result<Vec<_>, _>>()?,
            previously_satisfied: false,
            created_by: creator.to_string(),
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn round_trip(raw: JsonValue) {
        let predicate = Predicate::from_wire(&raw).unwrap();
        assert_eq!(predicate.to_representation(), raw);
    }

    #[test]
    fn test_round_trip_comparator() {
        round_trip(json!(["=", ["a1b2", "rfid"], 33790]));
        round_trip(json!(["<=", ["datastore", "limit"], ["a1b2", "temp"]]));
        round_trip(json!(["!=", ["a1b2", "name"], "front door"]));
        round_trip(json!([">", ["a1b2", "level"], 0.25]));
        round_trip(json!([">", ["a1b2", "level"], 1.0]));
        round_trip(json!(["<", ["a1b2", "level"], -0.1]));
    }

    #[test]
    fn test_literal_keeps_written_scale() {
        let raw: JsonValue = serde_json::from_str(r#"[">", ["a1b2", "level"], 1.0]"#).unwrap();
        let predicate = Predicate::from_wire(&raw).unwrap();
        assert_eq!(
            predicate.to_representation().to_string(),
            r#"[">",["a1b2","level"],1.0]"#
        );
    }

    #[test]
    fn test_round_trip_not() {
        round_trip(json!(["NOT", ["=", ["a1b2", "door"], true]]));
    }

    #[test]
    fn test_round_trip_nested_nary() {
        round_trip(json!([
            "OR",
            [
                ["AND", [["=", ["a", "x"], 1], [">", ["b", "y"], 2]]],
                ["NOT", ["XOR", [["<", ["a", "x"], 0], ["=", ["datastore", "z"], false]]]],
                [">=", ["c", "w"], 10]
            ]
        ]));
    }

    #[test]
    fn test_binary_shorthand_normalises() {
        let predicate =
            Predicate::from_wire(&json!(["AND", ["=", ["a", "x"], 1], ["=", ["b", "y"], 2]]))
                .unwrap();
        assert_eq!(
            predicate.to_representation(),
            json!(["AND", [["=", ["a", "x"], 1], ["=", ["b", "y"], 2]]])
        );
    }

    #[test]
    fn test_operand_kinds() {
        let Predicate::Comparator { left, right, .. } =
            Predicate::from_wire(&json!(["=", ["datastore", "door_open"], true])).unwrap()
        else {
            panic!("expected comparator");
        };
        assert_eq!(
            left,
            Operand::Slot {
                slot: SlotRef::datastore("door_open")
            }
        );
        assert_eq!(
            right,
            Operand::Literal {
                value: Value::Boolean(true)
            }
        );
    }

    #[test]
    fn test_rejects_malformed_predicates() {
        for raw in [
            json!("="),
            json!([]),
            json!(["=", 1]),
            json!(["NOT", ["=", 1, 1], ["=", 2, 2]]),
            json!(["~", 1, 2]),
            json!(["=", {"a": 1}, 2]),
            json!(["AND", 5]),
        ] {
            assert!(
                matches!(Predicate::from_wire(&raw), Err(EngineError::InvalidPredicate(_))),
                "accepted {raw}"
            );
        }
    }

    #[test]
    fn test_comparison_holds() {
        use Ordering::*;
        assert!(Comparison::Eq.holds(Equal));
        assert!(!Comparison::Ne.holds(Equal));
        assert!(Comparison::Lt.holds(Less) && !Comparison::Lt.holds(Equal));
        assert!(Comparison::Gt.holds(Greater) && !Comparison::Gt.holds(Equal));
        assert!(Comparison::Le.holds(Equal) && !Comparison::Le.holds(Greater));
        assert!(Comparison::Ge.holds(Equal) && !Comparison::Ge.holds(Less));
    }

    #[test]
    fn test_action_from_spec() {
        let spec = ActionSpec {
            action_type: ActionType::Change,
            target: "datastore".into(),
            device: "counter".into(),
            value: json!(2),
        };
        let action = Action::from_spec(&spec).unwrap();
        assert_eq!(
            action,
            Action::Change {
                target: SlotRef::datastore("counter"),
                delta: Value::Number(dec!(2)),
            }
        );
    }
}
