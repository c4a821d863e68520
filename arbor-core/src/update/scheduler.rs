//! Update Scheduler
//!
//! The scheduler turns queued events into update passes. A pass selects the
//! nodes an event affects, orders them so dependencies run before their
//! dependents, and executes each one.
//!
//! # Algorithm
//!
//! For each event, in queue order:
//!
//! 1. `TopologyChanged` first lets every node react to the new connectivity
//!    (`on_topology_update`), whether or not processing is enabled. A node
//!    whose hook panics is reported as failed and skipped for the pass.
//! 2. The event is gated: with the tree's `process` switch off only forced
//!    rebuilds and refreshes continue; scene and frame events additionally
//!    need their tree switches (and frame events the engine's frame mode).
//! 3. Targets are selected:
//!    - forced rebuilds and topology changes take every node
//!    - property changes and refreshes take the forward closure of the
//!      listed nodes
//!    - scene changes take the forward closure of scene-dependent nodes with
//!      `is_interactive` set
//!    - frame changes take the forward closure of animation-dependent nodes
//!      with `is_animatable` set
//! 4. Targets run in topological order restricted to the target set.
//!
//! A failing node is isolated: it keeps its last good outputs, its error is
//! reported, and any node pulling data from it in the same pass sees missing
//! data. Events posted while a pass runs wait for the next round.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, debug_span, error, info, warn};

use crate::error::{ErrorKind, NodeError};
use crate::graph::{
    LibraryResolver, NodeId, NodeTree, Socket, SocketId, TimeMode, TreeId, TreeSettings,
};
use crate::settings::Settings;
use super::context::{InputSlot, ProcessContext};
use super::event::{Event, EventKind};
use super::feedback::{ErrorRecord, FeedbackSink};
use super::queue::EventSender;

/// Upper bound on follow-up rounds in one flush. Nodes that keep posting
/// events would otherwise never let a flush finish.
pub const MAX_FOLLOW_UP_ROUNDS: usize = 32;

/// What one pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub tree: TreeId,
    pub trigger: EventKind,
    /// Every node the pass attempted, in execution order.
    pub executed: Vec<NodeId>,
    pub failed: Vec<(NodeId, ErrorKind)>,
    pub duration: Duration,
}

impl PassReport {
    pub fn ran(&self, node: NodeId) -> bool {
        self.executed.contains(&node)
    }

    /// Execution position of a node within the pass.
    pub fn position(&self, node: NodeId) -> Option<usize> {
        self.executed.iter().position(|id| *id == node)
    }

    pub fn failure(&self, node: NodeId) -> Option<ErrorKind> {
        self.failed.iter().find(|(id, _)| *id == node).map(|(_, kind)| *kind)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.executed
            .iter()
            .copied()
            .filter(move |id| self.failure(*id).is_none())
    }
}

/// Drives update passes for node trees.
pub struct UpdateScheduler {
    settings: Settings,
    sink: Arc<dyn FeedbackSink>,
}

impl UpdateScheduler {
    pub fn new(settings: Settings, sink: Arc<dyn FeedbackSink>) -> Self {
        Self { settings, sink }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    pub fn sink(&self) -> &Arc<dyn FeedbackSink> {
        &self.sink
    }

    /// Queue `event` on the tree and run every pending pass.
    pub fn dispatch(&mut self, tree: &mut NodeTree, event: Event) -> Vec<PassReport> {
        tree.events().push(event);
        self.flush(tree)
    }

    /// Run passes until the tree's queue is empty.
    ///
    /// Nothing runs while the tree is bulk loading; the queue is left as is.
    pub fn flush(&mut self, tree: &mut NodeTree) -> Vec<PassReport> {
        if tree.is_bulk_loading() {
            debug!(tree = %tree.id(), "bulk load open, deferring updates");
            return Vec::new();
        }
        self.clear_released(tree);

        let mut reports = Vec::new();
        let mut rounds = 0;
        while !tree.events().is_empty() {
            if rounds == MAX_FOLLOW_UP_ROUNDS {
                warn!(
                    tree = %tree.id(),
                    pending = tree.events().len(),
                    "follow-up limit reached, leaving events queued"
                );
                break;
            }
            rounds += 1;
            for event in tree.events().drain_coalesced() {
                if event.tree != tree.id() {
                    warn!(
                        tree = %tree.id(),
                        target = %event.tree,
                        "ignoring event for another tree"
                    );
                    continue;
                }
                if let Some(report) = self.run_pass(tree, &event.kind) {
                    reports.push(report);
                }
            }
        }
        reports
    }

    /// Run one pass for `trigger`. Returns `None` when the event is gated.
    pub fn run_pass(&mut self, tree: &mut NodeTree, trigger: &EventKind) -> Option<PassReport> {
        let span = debug_span!("pass", tree = %tree.id(), trigger = trigger.label());
        let _enter = span.enter();

        let mut broken: HashMap<NodeId, ErrorKind> = HashMap::new();
        if *trigger == EventKind::TopologyChanged {
            for (id, err) in tree.run_topology_updates() {
                error!(node = %id, error = %err, "topology update failed");
                broken.insert(id, self.fail_node(tree, id, &err));
            }
        }
        if !self.admits(tree.settings(), trigger) {
            debug!("event gated by tree settings");
            return None;
        }

        let targets = select_targets(tree, trigger);
        let order = tree.topological_order_of(&targets);
        debug!(nodes = order.len(), "running pass");
        Some(self.execute(tree, trigger, order, &broken))
    }

    fn admits(&self, tree: &TreeSettings, trigger: &EventKind) -> bool {
        if !tree.process && !trigger.bypasses_process_gate() {
            return false;
        }
        match trigger {
            EventKind::SceneChanged => tree.scene_update,
            EventKind::FrameChanged(_) => tree.animate && self.settings.reacts_to_frames(),
            _ => true,
        }
    }

    /// Run `order`. Nodes in `broken` already failed this pass and are
    /// skipped.
    fn execute(
        &self,
        tree: &mut NodeTree,
        trigger: &EventKind,
        order: Vec<NodeId>,
        broken: &HashMap<NodeId, ErrorKind>,
    ) -> PassReport {
        let started = Instant::now();
        for id in order.iter().filter(|id| !broken.contains_key(*id)) {
            if let Some(node) = tree.node_mut(*id) {
                node.mark_dirty();
            }
        }

        let settings = *tree.settings();
        let libraries = Arc::clone(tree.libraries());
        let sender = tree.event_sender();
        let incoming: HashMap<SocketId, (NodeId, SocketId)> = tree
            .links()
            .map(|l| (l.to_socket, (l.from_node, l.from_socket)))
            .collect();

        let mut report = PassReport {
            tree: tree.id(),
            trigger: trigger.clone(),
            executed: Vec::with_capacity(order.len()),
            failed: Vec::new(),
            duration: Duration::ZERO,
        };
        let mut failed_now: HashSet<NodeId> = broken.keys().copied().collect();
        let mut cumulative = Duration::ZERO;

        for id in order {
            if let Some(kind) = broken.get(&id) {
                report.failed.push((id, *kind));
                continue;
            }
            let node_started = Instant::now();
            let slots = resolve_inputs(tree, id, &incoming, &failed_now);
            let outcome =
                run_node(tree, id, slots, trigger, &settings, libraries.as_ref(), &sender);
            let took = node_started.elapsed();
            cumulative += took;
            report.executed.push(id);

            match outcome {
                Ok(()) => {
                    if let Some(node) = tree.node_mut(id) {
                        node.mark_clean();
                    }
                    if self.settings.log_timings {
                        let name = tree.node(id).map(|n| n.name()).unwrap_or_default();
                        info!("{} took {:.3} ms", name, took.as_secs_f64() * 1000.0);
                    }
                    let duration = settings.show_time.then_some(match settings.time_mode {
                        TimeMode::PerNode => took,
                        TimeMode::Cumulative => cumulative,
                    });
                    self.sink.update_ui(id, None, duration);
                }
                Err(err) => {
                    match err.kind() {
                        ErrorKind::MissingData => {
                            debug!(node = %id, error = %err, "node has no data")
                        }
                        ErrorKind::Exception | ErrorKind::Dependency => {
                            warn!(node = %id, error = %err, "node failed")
                        }
                    }
                    let kind = self.fail_node(tree, id, &err);
                    failed_now.insert(id);
                    report.failed.push((id, kind));
                }
            }
        }

        report.duration = started.elapsed();
        report
    }

    fn fail_node(&self, tree: &mut NodeTree, id: NodeId, err: &NodeError) -> ErrorKind {
        let kind = err.kind();
        if let Some(node) = tree.node_mut(id) {
            node.mark_failed(kind);
        }
        self.sink.update_ui(id, Some(&ErrorRecord::from(err)), None);
        kind
    }

    fn clear_released(&self, tree: &mut NodeTree) {
        for id in tree.take_released() {
            self.sink.update_ui(id, None, None);
        }
    }
}

fn select_targets(tree: &NodeTree, trigger: &EventKind) -> HashSet<NodeId> {
    match trigger {
        EventKind::ForceFullRebuild | EventKind::TopologyChanged => tree.node_ids().collect(),
        EventKind::PropertyChanged { nodes } | EventKind::Refresh { nodes } => {
            tree.forward_closure(nodes.iter().copied())
        }
        EventKind::SceneChanged => {
            let roots: Vec<NodeId> = tree
                .nodes()
                .filter(|n| n.is_scene_dependent() && n.is_interactive())
                .map(|n| n.id())
                .collect();
            tree.forward_closure(roots)
        }
        EventKind::FrameChanged(_) => {
            let roots: Vec<NodeId> = tree
                .nodes()
                .filter(|n| n.is_animation_dependent() && n.is_animatable())
                .map(|n| n.id())
                .collect();
            tree.forward_closure(roots)
        }
    }
}

/// Resolve every input of a node from its upstream cache or its default.
fn resolve_inputs(
    tree: &NodeTree,
    id: NodeId,
    incoming: &HashMap<SocketId, (NodeId, SocketId)>,
    failed_now: &HashSet<NodeId>,
) -> Vec<InputSlot> {
    let Some(node) = tree.node(id) else {
        return Vec::new();
    };
    node.sockets()
        .inputs()
        .iter()
        .map(|input| match incoming.get(&input.id()) {
            Some((from_node, _)) if failed_now.contains(from_node) => {
                InputSlot::Missing(format!("upstream of input '{}' failed", input.name()))
            }
            Some((_, from_socket)) => {
                match tree.socket(*from_socket).and_then(Socket::value_shared) {
                    Some(data) if !data.is_empty() => InputSlot::Ready(data),
                    Some(_) => {
                        InputSlot::Missing(format!("input '{}' received empty data", input.name()))
                    }
                    None => {
                        InputSlot::Missing(format!("input '{}' has no upstream data", input.name()))
                    }
                }
            }
            None => match input.default_shared() {
                Some(data) => InputSlot::Ready(data),
                None => InputSlot::Missing(format!("input '{}' is not connected", input.name())),
            },
        })
        .collect()
}

fn run_node(
    tree: &mut NodeTree,
    id: NodeId,
    slots: Vec<InputSlot>,
    trigger: &EventKind,
    settings: &TreeSettings,
    libraries: &dyn LibraryResolver,
    sender: &EventSender,
) -> Result<(), NodeError> {
    let Some(node) = tree.node_mut(id) else {
        return Ok(());
    };

    for (socket, slot) in node.sockets_mut().inputs_mut().iter_mut().zip(&slots) {
        socket.set_value(match slot {
            InputSlot::Ready(data) => Some(Arc::clone(data)),
            InputSlot::Missing(_) => None,
        });
    }

    if node.is_muted() {
        let links = node.behavior().internal_links(node.sockets());
        let mut forwarded: Vec<Option<&InputSlot>> = vec![None; node.sockets().outputs().len()];
        for (input, output) in links {
            if let (Some(slot), Some(target)) = (slots.get(input), forwarded.get_mut(output)) {
                *target = Some(slot);
            }
        }
        for (socket, slot) in node.sockets_mut().outputs_mut().iter_mut().zip(forwarded) {
            match slot {
                Some(InputSlot::Ready(data)) => socket.set_value(Some(Arc::clone(data))),
                // nothing upstream this pass, keep the last value
                Some(InputSlot::Missing(_)) => {}
                None => socket.forget(),
            }
        }
        return Ok(());
    }

    node.check_dependencies(libraries)?;

    let (sockets, behavior) = node.split_mut();
    let mut ctx = ProcessContext::new(
        id,
        sockets.inputs(),
        slots,
        sockets.outputs(),
        trigger,
        settings.draft,
        sender,
    );
    let result = match panic::catch_unwind(AssertUnwindSafe(|| behavior.process(&mut ctx))) {
        Ok(result) => result,
        Err(payload) => {
            let err = NodeError::from_panic(payload.as_ref());
            error!(node = %id, error = %err, "node panicked");
            Err(err)
        }
    };
    let produced = ctx.into_outputs();
    result?;

    for (socket, value) in node.sockets_mut().outputs_mut().iter_mut().zip(produced) {
        socket.set_value(value.map(Arc::new));
    }
    Ok(())
}
