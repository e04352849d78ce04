//! Predicate evaluation

use crate::error::EngineError;
use crate::model::{BoolOp, Operand, Predicate};
use hub_core::{Hub, HubError, SlotRef, Value};

/// Somewhere slot references can be resolved to live values
pub trait ValueSource {
    #[allow(clippy::missing_errors_doc)]
    fn resolve(&self, slot: &SlotRef) -> Result<Value, HubError>;
}

impl ValueSource for Hub {
    fn resolve(&self, slot: &SlotRef) -> Result<Value, HubError> {
        self.value_of(slot).cloned()
    }
}

/// Evaluator for predicate trees
///
/// Values are read afresh on every call; nothing is cached between
/// evaluations.
pub struct PredicateEvaluator<'a, S: ValueSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: ValueSource + ?Sized> PredicateEvaluator<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Evaluate a predicate
    ///
    /// AND stops at the first false operand and OR at the first true one.
    /// XOR evaluates every operand and is true when an odd number hold.
    #[allow(clippy::missing_errors_doc)]
    pub fn evaluate(&self, predicate: &Predicate) -> Result<bool, EngineError> {
        match predicate {
            Predicate::Comparator { op, left, right } => {
                let left = self.operand(left)?;
                let right = self.operand(right)?;
                Ok(op.holds(left.compare(&right)?))
            }
            Predicate::Not { operand } => Ok(!self.evaluate(operand)?),
            Predicate::Multivariate {
                op: BoolOp::And,
                operands,
            } => {
                for p in operands {
                    if !self.evaluate(p)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Multivariate {
                op: BoolOp::Or,
                operands,
            } => {
                for p in operands {
                    if self.evaluate(p)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Multivariate {
                op: BoolOp::Xor,
                operands,
            } => operands
                .iter()
                .try_fold(false, |acc, p| -> Result<bool, EngineError> {
                    Ok(acc ^ self.evaluate(p)?)
                }),
        }
    }

    fn operand(&self, operand: &Operand) -> Result<Value, EngineError> {
        match operand {
            Operand::Literal { value } => Ok(value.clone()),
            Operand::Slot { slot } => Ok(self.source.resolve(slot)?),
        }
    }
}
