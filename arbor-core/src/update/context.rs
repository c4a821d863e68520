//! Process Context
//!
//! The only view of the tree a node gets while it runs: its resolved inputs,
//! a buffer for its outputs, and what triggered the pass. A node cannot reach
//! other nodes' sockets or the scheduler from here; anything it wants to
//! change goes through [`events`](ProcessContext::events) and is handled in a
//! follow-up pass.

use std::sync::Arc;

use crate::data::SocketData;
use crate::error::NodeError;
use crate::graph::{NodeId, Socket};
use super::event::{EventKind, FrameInfo};
use super::queue::EventSender;

/// An input value as resolved by the scheduler before `process` runs.
#[derive(Debug, Clone)]
pub(crate) enum InputSlot {
    Ready(Arc<SocketData>),
    /// No value could be resolved; the message explains why.
    Missing(String),
}

/// Inputs, outputs and trigger details for one node execution.
pub struct ProcessContext<'a> {
    node: NodeId,
    inputs: &'a [Socket],
    slots: Vec<InputSlot>,
    outputs: &'a [Socket],
    produced: Vec<Option<SocketData>>,
    trigger: &'a EventKind,
    draft: bool,
    events: &'a EventSender,
}

impl<'a> ProcessContext<'a> {
    pub(crate) fn new(
        node: NodeId,
        inputs: &'a [Socket],
        slots: Vec<InputSlot>,
        outputs: &'a [Socket],
        trigger: &'a EventKind,
        draft: bool,
        events: &'a EventSender,
    ) -> Self {
        Self {
            node,
            inputs,
            slots,
            outputs,
            produced: vec![None; outputs.len()],
            trigger,
            draft,
            events,
        }
    }

    /// The executing node.
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Value of a required input.
    ///
    /// Fails with [`NodeError::NoData`] when the input is unlinked without a
    /// default, or its upstream failed or produced nothing. Returning that
    /// error from `process` marks the node with the "no data" style.
    pub fn input(&self, name: &str) -> Result<&SocketData, NodeError> {
        let index = self.input_index(name)?;
        match &self.slots[index] {
            InputSlot::Ready(data) => Ok(data),
            InputSlot::Missing(reason) => Err(NodeError::NoData(reason.clone())),
        }
    }

    /// Value of an input, or `None` when nothing could be resolved.
    pub fn optional_input(&self, name: &str) -> Option<&SocketData> {
        let index = self.inputs.iter().position(|s| s.name() == name)?;
        match &self.slots[index] {
            InputSlot::Ready(data) => Some(data),
            InputSlot::Missing(_) => None,
        }
    }

    pub fn is_linked(&self, input: &str) -> bool {
        self.inputs
            .iter()
            .any(|s| s.name() == input && s.is_linked())
    }

    /// Whether anything consumes an output. Nodes may skip work for unused
    /// outputs.
    pub fn output_is_linked(&self, output: &str) -> bool {
        self.outputs
            .iter()
            .any(|s| s.name() == output && s.is_linked())
    }

    pub fn input_sockets(&self) -> &[Socket] {
        self.inputs
    }

    pub fn output_sockets(&self) -> &[Socket] {
        self.outputs
    }

    /// Write an output value. Outputs left unset are cleared after a
    /// successful run.
    pub fn set_output(&mut self, name: &str, data: SocketData) -> Result<(), NodeError> {
        let index = self
            .outputs
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| NodeError::process(format!("no output socket named '{name}'")))?;
        let kind = self.outputs[index].kind();
        if !kind.accepts(data.kind()) {
            return Err(NodeError::process(format!(
                "output '{name}' expects {kind:?} data, got {:?}",
                data.kind()
            )));
        }
        self.produced[index] = Some(data);
        Ok(())
    }

    /// The event that started this pass.
    pub fn trigger(&self) -> &EventKind {
        self.trigger
    }

    /// Frame details when the pass was started by a frame change.
    pub fn frame(&self) -> Option<FrameInfo> {
        self.trigger.frame()
    }

    /// Whether the tree is in draft mode.
    pub fn is_draft(&self) -> bool {
        self.draft
    }

    /// Post events to the tree; they run after the current pass.
    pub fn events(&self) -> &EventSender {
        self.events
    }

    pub(crate) fn into_outputs(self) -> Vec<Option<SocketData>> {
        self.produced
    }

    fn input_index(&self, name: &str) -> Result<usize, NodeError> {
        self.inputs
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| NodeError::process(format!("no input socket named '{name}'")))
    }
}
