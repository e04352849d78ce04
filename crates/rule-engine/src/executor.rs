//! Action executor for conditions

use crate::error::EngineError;
use crate::model::Action;
use hub_core::{ConnectionSink, Hub, SlotRef, StateChange, Target, Value};
use leaf_protocol::OutboundMessage;

/// Executor for condition actions
///
/// Datastore targets are written directly and without an access check.
/// Device targets are only asked to change; their value moves when the
/// leaf reports back.
pub struct ActionExecutor<'a> {
    sink: &'a dyn ConnectionSink,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(sink: &'a dyn ConnectionSink) -> Self {
        Self { sink }
    }

    /// Run one action. Returns the change to commit, if any.
    #[allow(clippy::missing_errors_doc)]
    pub fn execute(&self, hub: &mut Hub, action: &Action) -> Result<Option<StateChange>, EngineError> {
        match action {
            Action::Set { target, value } => match &target.target {
                Target::Datastore => Ok(hub.assign_datastore(&target.name, value.clone())?),
                Target::Leaf(uuid) => {
                    self.request_output(hub, uuid, target, OutputRequest::Set, value);
                    Ok(None)
                }
            },
            Action::Change { target, delta } => match &target.target {
                Target::Datastore => {
                    let next = hub.value_of(target)?.add(delta)?;
                    Ok(hub.assign_datastore(&target.name, next)?)
                }
                Target::Leaf(uuid) => {
                    self.request_output(hub, uuid, target, OutputRequest::Change, delta);
                    Ok(None)
                }
            },
        }
    }

    fn request_output(
        &self,
        hub: &Hub,
        uuid: &str,
        target: &SlotRef,
        kind: OutputRequest,
        value: &Value,
    ) {
        let (uuid, device, value, format) = (
            uuid.to_string(),
            target.name.clone(),
            value.to_json(),
            value.format(),
        );
        let message = match kind {
            OutputRequest::Set => OutboundMessage::SetOutput {
                uuid,
                device,
                value,
                format,
            },
            OutputRequest::Change => OutboundMessage::ChangeOutput {
                uuid,
                device,
                value,
                format,
            },
        };

        if !self.sink.send(hub.id(), target.target.as_str(), message) {
            tracing::debug!("Output request for {} not delivered", target);
        }
    }
}

#[derive(Clone, Copy)]
enum OutputRequest {
    Set,
    Change,
}
