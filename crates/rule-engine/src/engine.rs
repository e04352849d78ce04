//! Core rule engine
//!
//! Each hub has one [`HubRuntime`] behind a mutex. Holding that lock is the
//! single-writer discipline for the hub: a mutation, its subscriber fan-out,
//! condition re-evaluation and every action cascade it causes run to
//! completion before the next message for that hub is looked at. Hubs are
//! independent and may be driven concurrently.

use crate::error::EngineError;
use crate::evaluator::PredicateEvaluator;
use crate::executor::ActionExecutor;
use crate::model::{Action, Condition, Operand, Predicate};
use crate::persistence::{self, HubSnapshot};
use dashmap::DashMap;
use hub_core::{subscription, ConnectionSink, Hub, HubError, LeafRegistration, SlotRef, StateChange, Target};
use leaf_protocol::{ActionSpec, Format, HubId, InboundMessage, OutboundMessage};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Default bound on nested action-triggered mutations
pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 8;

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory for hub snapshots; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    /// Nested commits deeper than this are fanned out but do not
    /// re-evaluate conditions
    pub max_cascade_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
        }
    }
}

/// Events emitted by the rule engine
#[derive(Debug, Clone, PartialEq)]
pub enum AutomationEvent {
    /// A condition was created
    ConditionCreated { hub_id: HubId, name: String },
    /// A condition was deleted
    ConditionDeleted { hub_id: HubId, name: String },
    /// A condition became satisfied and ran its actions
    ConditionFired {
        hub_id: HubId,
        name: String,
        depth: usize,
    },
    /// A device or datastore value changed
    StateChanged { hub_id: HubId, slot: SlotRef },
    /// An action cascade hit the depth bound
    CascadeLimitReached {
        hub_id: HubId,
        slot: SlotRef,
        depth: usize,
    },
}

/// Collaborators a runtime needs while processing one message
pub(crate) struct Context<'a> {
    pub sink: &'a dyn ConnectionSink,
    pub events: &'a broadcast::Sender<AutomationEvent>,
    pub max_depth: usize,
}

/// State and rules of one hub
pub struct HubRuntime {
    pub(crate) hub: Hub,
    pub(crate) conditions: Vec<Condition>,
    /// Set when state changed since the last snapshot
    pub(crate) dirty: bool,
    /// Conditions whose actions are running further up the cascade
    firing: BTreeSet<usize>,
}

impl HubRuntime {
    #[must_use]
    pub fn new(hub_id: HubId) -> Self {
        Self {
            hub: Hub::new(hub_id),
            conditions: Vec::new(),
            dirty: false,
            firing: BTreeSet::new(),
        }
    }

    /// Restore a runtime from disk. No leaf is connected after a restart.
    #[must_use]
    pub fn from_snapshot(snapshot: HubSnapshot) -> Self {
        let mut hub = snapshot.hub;
        hub.disconnect_all();
        Self {
            hub,
            conditions: snapshot.conditions,
            dirty: false,
            firing: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    #[must_use]
    pub fn condition(&self, name: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.name == name)
    }

    /// Publish a committed change and re-evaluate every condition of the hub
    ///
    /// Subscribers and conditions both see the value as committed. Changes
    /// made by actions are committed recursively, depth first, before the
    /// next condition is evaluated. A condition whose actions are still
    /// running is not evaluated again inside its own cascade.
    pub(crate) fn commit(&mut self, change: StateChange, ctx: &Context<'_>, depth: usize) {
        let hub_id = self.hub.id();
        self.dirty = true;

        let _ = ctx.events.send(AutomationEvent::StateChanged {
            hub_id,
            slot: change.slot.clone(),
        });
        subscription::fan_out(hub_id, self.hub.subscriptions(), &change, ctx.sink);

        if depth >= ctx.max_depth {
            tracing::warn!(
                "Hub {}: cascade depth {} reached at {}, conditions not re-evaluated",
                hub_id,
                depth,
                change.slot
            );
            let _ = ctx.events.send(AutomationEvent::CascadeLimitReached {
                hub_id,
                slot: change.slot,
                depth,
            });
            return;
        }

        for index in 0..self.conditions.len() {
            if !self.firing.contains(&index) {
                self.execute_condition(index, ctx, depth);
            }
        }
    }

    /// Evaluate one condition and run its actions on a false to true edge
    fn execute_condition(&mut self, index: usize, ctx: &Context<'_>, depth: usize) {
        let hub_id = self.hub.id();
        let condition = &self.conditions[index];

        let current = match PredicateEvaluator::new(&self.hub).evaluate(&condition.predicate) {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(
                    "Hub {}: condition '{}' could not be evaluated: {}",
                    hub_id,
                    condition.name,
                    e
                );
                return;
            }
        };

        if current && !condition.previously_satisfied {
            let name = condition.name.clone();
            let actions = condition.actions.clone();
            tracing::info!("Hub {}: condition '{}' fired", hub_id, name);
            let _ = ctx.events.send(AutomationEvent::ConditionFired {
                hub_id,
                name: name.clone(),
                depth,
            });

            self.firing.insert(index);
            let executor = ActionExecutor::new(ctx.sink);
            for action in &actions {
                match executor.execute(&mut self.hub, action) {
                    Ok(Some(change)) => self.commit(change, ctx, depth + 1),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(
                            "Hub {}: action on {} of condition '{}' failed: {}",
                            hub_id,
                            action.target(),
                            name,
                            e
                        );
                    }
                }
            }
            self.firing.remove(&index);
        }

        if let Some(condition) = self.conditions.get_mut(index) {
            condition.previously_satisfied = current;
        }
    }

    /// Validate and add a condition
    ///
    /// Every slot the condition mentions must exist, action targets on
    /// leaves must be output devices, and literals must fit the format of
    /// what they are compared with or written to. Nothing is stored unless
    /// all checks pass.
    pub(crate) fn create_condition(
        &mut self,
        creator: &str,
        name: &str,
        predicate: &JsonValue,
        actions: &[ActionSpec],
    ) -> Result<(), EngineError> {
        if self.condition(name).is_some() {
            return Err(EngineError::DuplicateCondition(name.to_string()));
        }

        let mut condition = Condition::from_request(creator, name, predicate, actions)?;
        validate_predicate(&self.hub, &mut condition.predicate)?;
        for action in &mut condition.actions {
            validate_action(&self.hub, action)?;
        }

        tracing::info!(
            "Hub {}: created condition '{}' with {} actions",
            self.hub.id(),
            name,
            condition.actions.len()
        );
        self.conditions.push(condition);
        self.dirty = true;
        Ok(())
    }

    pub(crate) fn delete_condition(&mut self, name: &str) -> Result<Condition, EngineError> {
        let index = self
            .conditions
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        let condition = self.conditions.remove(index);
        self.dirty = true;

        tracing::info!("Hub {}: deleted condition '{}'", self.hub.id(), name);
        Ok(condition)
    }
}

fn validate_predicate(hub: &Hub, predicate: &mut Predicate) -> Result<(), EngineError> {
    match predicate {
        Predicate::Comparator { left, right, .. } => validate_comparator(hub, left, right),
        Predicate::Not { operand } => validate_predicate(hub, operand),
        Predicate::Multivariate { operands, .. } => operands
            .iter_mut()
            .try_for_each(|p| validate_predicate(hub, p)),
    }
}

/// Format and units of a slot operand, `None` for literals
fn operand_format(hub: &Hub, operand: &Operand) -> Result<Option<(Format, Option<String>)>, HubError> {
    match operand {
        Operand::Literal { .. } => Ok(None),
        Operand::Slot { slot } => {
            let value = hub.value_of(slot)?;
            Ok(Some((value.format(), value.units().map(str::to_string))))
        }
    }
}

fn coerce_literal(operand: &mut Operand, format: Format, units: Option<&str>) -> Result<(), HubError> {
    if let Operand::Literal { value } = operand {
        *value = value.clone().coerce_to(format, units)?;
    }
    Ok(())
}

fn validate_comparator(hub: &Hub, left: &mut Operand, right: &mut Operand) -> Result<(), EngineError> {
    match (operand_format(hub, left)?, operand_format(hub, right)?) {
        (Some((a, _)), Some((b, _))) if a != b => {
            let Operand::Slot { slot } = left else {
                return Err(HubError::FormatMismatch { expected: a, found: b }.into());
            };
            Err(HubError::InvalidTarget {
                slot: slot.clone(),
                reason: format!("cannot compare {a} with {b}"),
            }
            .into())
        }
        (Some(_), Some(_)) => Ok(()),
        (Some((format, units)), None) => Ok(coerce_literal(right, format, units.as_deref())?),
        (None, Some((format, units))) => Ok(coerce_literal(left, format, units.as_deref())?),
        (None, None) => match (&*left, &*right) {
            (Operand::Literal { value: a }, Operand::Literal { value: b })
                if a.format() != b.format() =>
            {
                Err(HubError::FormatMismatch {
                    expected: a.format(),
                    found: b.format(),
                }
                .into())
            }
            _ => Ok(()),
        },
    }
}

fn validate_action(hub: &Hub, action: &mut Action) -> Result<(), EngineError> {
    let target = action.target().clone();
    let current = hub.value_of(&target)?;
    let (format, units) = (current.format(), current.units().map(str::to_string));

    if let Target::Leaf(uuid) = &target.target {
        if !hub.device(uuid, &target.name)?.is_output() {
            return Err(HubError::InvalidTarget {
                slot: target,
                reason: "device is not an output".to_string(),
            }
            .into());
        }
    }

    match action {
        Action::Set { value, .. } => {
            *value = value.clone().coerce_to(format, units.as_deref())?;
        }
        Action::Change { delta, .. } => {
            if !format.is_numeric() {
                return Err(HubError::FormatMismatch {
                    expected: Format::Number,
                    found: format,
                }
                .into());
            }
            *delta = delta.clone().coerce_to(format, units.as_deref())?;
        }
    }
    Ok(())
}

/// The rule engine: every hub's runtime plus the shared connection sink
pub struct AutomationEngine {
    /// Runtimes keyed by hub, created on first use
    hubs: DashMap<HubId, Arc<Mutex<HubRuntime>>>,
    /// Delivery to leaf sessions
    sink: Arc<dyn ConnectionSink>,
    /// Event broadcaster
    event_tx: broadcast::Sender<AutomationEvent>,
    config: EngineConfig,
}

impl AutomationEngine {
    /// Create a new engine
    pub fn new(sink: Arc<dyn ConnectionSink>, config: EngineConfig) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            hubs: DashMap::new(),
            sink,
            event_tx,
            config,
        }
    }

    /// Load hub snapshots from the data directory
    #[allow(clippy::missing_errors_doc)]
    pub async fn load(&self) -> Result<usize, EngineError> {
        let Some(dir) = &self.config.data_dir else {
            return Ok(0);
        };

        let snapshots = persistence::load_hubs(dir).await?;
        let count = snapshots.len();
        for snapshot in snapshots {
            let hub_id = snapshot.hub.id();
            self.hubs
                .insert(hub_id, Arc::new(Mutex::new(HubRuntime::from_snapshot(snapshot))));
        }
        Ok(count)
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<AutomationEvent> {
        self.event_tx.subscribe()
    }

    /// Hubs with a runtime
    pub fn hub_ids(&self) -> Vec<HubId> {
        let mut ids: Vec<HubId> = self.hubs.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    fn runtime(&self, hub_id: HubId) -> Arc<Mutex<HubRuntime>> {
        self.hubs
            .entry(hub_id)
            .or_insert_with(|| {
                tracing::info!("Creating runtime for hub {}", hub_id);
                Arc::new(Mutex::new(HubRuntime::new(hub_id)))
            })
            .clone()
    }

    /// Read a hub's state under its lock
    pub async fn inspect<R>(&self, hub_id: HubId, f: impl FnOnce(&HubRuntime) -> R) -> R {
        let runtime = self.runtime(hub_id);
        let guard = runtime.lock().await;
        f(&*guard)
    }

    /// Register a leaf session
    pub async fn connect_leaf(&self, hub_id: HubId, registration: LeafRegistration) {
        let runtime = self.runtime(hub_id);
        let mut runtime = runtime.lock().await;
        runtime.hub.register_leaf(registration);
        runtime.dirty = true;
        self.persist(&mut runtime).await;
    }

    /// Mark a leaf as gone. Work already running for the hub is not
    /// interrupted; later deliveries to the leaf are simply dropped.
    pub async fn disconnect_leaf(&self, hub_id: HubId, uuid: &str) {
        let runtime = self.runtime(hub_id);
        let mut runtime = runtime.lock().await;
        if runtime.hub.disconnect_leaf(uuid) {
            runtime.dirty = true;
            self.persist(&mut runtime).await;
        }
    }

    /// Handle one message from `requester`, returning the reply for it
    pub async fn handle_message(
        &self,
        hub_id: HubId,
        requester: &str,
        message: InboundMessage,
    ) -> Option<OutboundMessage> {
        let runtime = self.runtime(hub_id);
        let mut runtime = runtime.lock().await;
        runtime.hub.touch_leaf(requester);

        let ctx = Context {
            sink: self.sink.as_ref(),
            events: &self.event_tx,
            max_depth: self.config.max_cascade_depth,
        };
        let reply = runtime.handle(requester, message, &ctx);

        self.persist(&mut runtime).await;
        reply
    }

    /// Write the hub snapshot if anything changed
    async fn persist(&self, runtime: &mut HubRuntime) {
        if !runtime.dirty {
            return;
        }
        runtime.dirty = false;

        let Some(dir) = &self.config.data_dir else {
            return;
        };
        let hub_id = runtime.hub.id();
        let path = persistence::hub_path(dir, hub_id);
        if let Err(e) = persistence::save_hub(&path, &runtime.hub, &runtime.conditions).await {
            tracing::warn!("Failed to save hub {}: {}", hub_id, e);
        }
    }
}
