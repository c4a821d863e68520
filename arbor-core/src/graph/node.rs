//! Graph Nodes
//!
//! This module defines the nodes that live in a node tree.
//!
//! A [`Node`] is the tree-owned part: identity, mode flags, sockets and update
//! state. The computation itself is a [`NodeBehavior`] implemented by each
//! node type. Optional capabilities (external library requirements, draft
//! mode, viewport visibility) are separate traits that a behavior exposes
//! through `as_*` queries.

use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::error;

use crate::error::{DependencyError, ErrorKind, NodeError};
use crate::update::ProcessContext;
use super::id::{NodeId, SocketId};
use super::socket::{DataKind, Socket, SocketDirection};

/// The computation carried by a node.
///
/// # Lifecycle
///
/// 1. [`init`](Self::init) runs exactly once when the node is created and
///    declares its sockets.
/// 2. [`on_topology_update`](Self::on_topology_update) runs after every
///    topology change of the tree. It may retype or add sockets but does not
///    compute anything.
/// 3. [`process`](Self::process) runs whenever the scheduler selects the node.
/// 4. [`on_free`](Self::on_free) runs when the node is removed.
///
/// Behaviors must be `Clone` so nodes can be duplicated; the blanket
/// [`BehaviorClone`] impl takes care of boxing.
pub trait NodeBehavior: BehaviorClone + Send + 'static {
    /// Registry name of the node type.
    fn type_name(&self) -> &'static str;

    /// Declare sockets and defaults.
    fn init(&mut self, sockets: &mut NodeSockets);

    /// Compute outputs from inputs.
    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeError>;

    /// React to changed connectivity without recomputing.
    fn on_topology_update(&mut self, _sockets: &mut NodeSockets) {}

    /// Called on the fresh copy when a node is duplicated.
    fn on_copy(&mut self, _original: NodeId) {}

    fn on_free(&mut self) {}

    /// Whether the node reads host scene data and shows an "interactive"
    /// toggle.
    fn is_scene_dependent(&self) -> bool {
        false
    }

    /// Whether the node depends on the current frame and shows an "animate"
    /// toggle.
    fn is_animation_dependent(&self) -> bool {
        false
    }

    /// Input/output index pairs used to pass data through a muted node.
    fn internal_links(&self, sockets: &NodeSockets) -> Vec<(usize, usize)> {
        default_internal_links(sockets)
    }

    fn as_dependent(&self) -> Option<&dyn Dependent> {
        None
    }

    fn as_draft_mode(&mut self) -> Option<&mut dyn DraftMode> {
        None
    }

    fn as_viewer(&mut self) -> Option<&mut dyn Viewer> {
        None
    }

    /// Node-specific state to persist in snapshots.
    fn properties(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn load_properties(&mut self, _properties: &serde_json::Value) -> Result<(), NodeError> {
        Ok(())
    }
}

/// Object-safe cloning for boxed behaviors.
pub trait BehaviorClone {
    fn clone_box(&self) -> Box<dyn NodeBehavior>;
}

impl<T> BehaviorClone for T
where
    T: NodeBehavior + Clone,
{
    fn clone_box(&self) -> Box<dyn NodeBehavior> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn NodeBehavior> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// A node that cannot run without optional external libraries.
pub trait Dependent {
    fn required_libraries(&self) -> &[&'static str];
}

/// A node with lighter parameter values for interactive editing.
pub trait DraftMode {
    fn set_draft(&mut self, enabled: bool);
}

/// A node that draws into the host viewport.
pub trait Viewer {
    fn show_viewport(&mut self, visible: bool);
}

/// Answers whether an external library is installed.
pub trait LibraryResolver: Send + Sync {
    fn is_available(&self, library: &str) -> bool;
}

impl<F> LibraryResolver for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_available(&self, library: &str) -> bool {
        self(library)
    }
}

/// A fixed set of installed libraries.
#[derive(Debug, Clone, Default)]
pub struct InstalledLibraries {
    names: HashSet<String>,
}

impl InstalledLibraries {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }
}

impl LibraryResolver for InstalledLibraries {
    fn is_available(&self, library: &str) -> bool {
        self.names.contains(library)
    }
}

/// Pair each input with the first unused output of a compatible kind.
pub fn default_internal_links(sockets: &NodeSockets) -> Vec<(usize, usize)> {
    let mut used = vec![false; sockets.outputs().len()];
    let mut links = Vec::new();
    for (i, input) in sockets.inputs().iter().enumerate() {
        let found = sockets
            .outputs()
            .iter()
            .enumerate()
            .find(|(o, output)| !used[*o] && output.kind().accepts(input.kind()))
            .map(|(o, _)| o);
        if let Some(o) = found {
            used[o] = true;
            links.push((i, o));
        }
    }
    links
}

/// The input and output sockets of a node.
#[derive(Debug, Clone, Default)]
pub struct NodeSockets {
    inputs: SmallVec<[Socket; 4]>,
    outputs: SmallVec<[Socket; 4]>,
}

impl NodeSockets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a socket to the list matching its direction.
    pub fn push(&mut self, socket: Socket) -> &mut Socket {
        let list = match socket.direction() {
            SocketDirection::Input => &mut self.inputs,
            SocketDirection::Output => &mut self.outputs,
        };
        list.push(socket);
        let last = list.len() - 1;
        &mut list[last]
    }

    pub fn add_input(&mut self, name: impl Into<String>, kind: DataKind) -> &mut Socket {
        self.push(Socket::input(name, kind))
    }

    pub fn add_output(&mut self, name: impl Into<String>, kind: DataKind) -> &mut Socket {
        self.push(Socket::output(name, kind))
    }

    pub fn inputs(&self) -> &[Socket] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Socket] {
        &self.outputs
    }

    pub fn inputs_mut(&mut self) -> &mut [Socket] {
        &mut self.inputs
    }

    pub fn outputs_mut(&mut self) -> &mut [Socket] {
        &mut self.outputs
    }

    pub fn input(&self, name: &str) -> Option<&Socket> {
        self.inputs.iter().find(|s| s.name() == name)
    }

    pub fn output(&self, name: &str) -> Option<&Socket> {
        self.outputs.iter().find(|s| s.name() == name)
    }

    pub fn input_mut(&mut self, name: &str) -> Option<&mut Socket> {
        self.inputs.iter_mut().find(|s| s.name() == name)
    }

    pub fn output_mut(&mut self, name: &str) -> Option<&mut Socket> {
        self.outputs.iter_mut().find(|s| s.name() == name)
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|s| s.name() == name)
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|s| s.name() == name)
    }

    /// Remove an input by name. Links to it are dropped by the tree.
    pub fn remove_input(&mut self, name: &str) -> Option<Socket> {
        let index = self.input_index(name)?;
        Some(self.inputs.remove(index))
    }

    /// Remove an output by name. Links from it are dropped by the tree.
    pub fn remove_output(&mut self, name: &str) -> Option<Socket> {
        let index = self.output_index(name)?;
        Some(self.outputs.remove(index))
    }

    /// Find a socket by ID in either direction.
    pub fn get(&self, id: SocketId) -> Option<&Socket> {
        self.iter().find(|s| s.id() == id)
    }

    pub fn get_mut(&mut self, id: SocketId) -> Option<&mut Socket> {
        self.inputs
            .iter_mut()
            .chain(self.outputs.iter_mut())
            .find(|s| s.id() == id)
    }

    /// All sockets, inputs first.
    pub fn iter(&self) -> impl Iterator<Item = &Socket> {
        self.inputs.iter().chain(self.outputs.iter())
    }

    fn forget_all(&mut self) {
        for socket in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            socket.forget();
        }
    }
}

/// Per-node mode flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFlags {
    /// React to host scene changes.
    pub is_interactive: bool,
    /// React to frame changes.
    pub is_animatable: bool,
    /// Pass inputs through instead of processing.
    pub muted: bool,
}

/// Update state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    /// The node's outputs reflect its inputs.
    Clean,

    /// The node is selected for (re)computation.
    Dirty,

    /// The last execution failed; outputs hold the last good values.
    Failed(ErrorKind),
}

/// A node in a node tree.
pub struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// User-visible name.
    name: String,

    flags: NodeFlags,

    sockets: NodeSockets,

    behavior: Box<dyn NodeBehavior>,

    state: UpdateState,
}

impl Node {
    /// Create a node around a behavior and let it declare its sockets.
    pub fn new<B: NodeBehavior>(behavior: B) -> Self {
        Self::from_boxed(Box::new(behavior))
    }

    /// A panicking `init` is logged and the node keeps the sockets declared
    /// before the panic.
    pub fn from_boxed(mut behavior: Box<dyn NodeBehavior>) -> Self {
        let mut sockets = NodeSockets::new();
        let declared = panic::catch_unwind(AssertUnwindSafe(|| behavior.init(&mut sockets)));
        if let Err(payload) = declared {
            let err = NodeError::from_panic(payload.as_ref());
            error!(node_type = behavior.type_name(), error = %err, "node init failed");
        }
        let flags = NodeFlags {
            is_interactive: behavior.is_scene_dependent(),
            is_animatable: behavior.is_animation_dependent(),
            muted: false,
        };
        Self {
            id: NodeId::new(),
            name: behavior.type_name().to_string(),
            flags,
            sockets,
            behavior,
            // Start dirty to ensure first computation
            state: UpdateState::Dirty,
        }
    }

    /// Set the user-visible name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn type_name(&self) -> &'static str {
        self.behavior.type_name()
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub(crate) fn flags_mut(&mut self) -> &mut NodeFlags {
        &mut self.flags
    }

    pub fn is_interactive(&self) -> bool {
        self.flags.is_interactive
    }

    pub fn is_animatable(&self) -> bool {
        self.flags.is_animatable
    }

    pub fn is_muted(&self) -> bool {
        self.flags.muted
    }

    pub fn is_scene_dependent(&self) -> bool {
        self.behavior.is_scene_dependent()
    }

    pub fn is_animation_dependent(&self) -> bool {
        self.behavior.is_animation_dependent()
    }

    pub fn sockets(&self) -> &NodeSockets {
        &self.sockets
    }

    pub(crate) fn sockets_mut(&mut self) -> &mut NodeSockets {
        &mut self.sockets
    }

    pub fn input(&self, name: &str) -> Option<&Socket> {
        self.sockets.input(name)
    }

    pub fn output(&self, name: &str) -> Option<&Socket> {
        self.sockets.output(name)
    }

    /// Mutable access to an input, e.g. to change its default value.
    pub fn input_mut(&mut self, name: &str) -> Option<&mut Socket> {
        self.sockets.input_mut(name)
    }

    pub fn behavior(&self) -> &dyn NodeBehavior {
        self.behavior.as_ref()
    }

    pub fn behavior_mut(&mut self) -> &mut dyn NodeBehavior {
        self.behavior.as_mut()
    }

    /// Sockets and behavior borrowed at the same time.
    pub(crate) fn split_mut(&mut self) -> (&NodeSockets, &mut dyn NodeBehavior) {
        (&self.sockets, self.behavior.as_mut())
    }

    /// Get the current update state.
    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Check if the node's last execution succeeded.
    pub fn is_clean(&self) -> bool {
        self.state == UpdateState::Clean
    }

    pub(crate) fn mark_clean(&mut self) {
        self.state = UpdateState::Clean;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.state = UpdateState::Dirty;
    }

    pub(crate) fn mark_failed(&mut self, kind: ErrorKind) {
        self.state = UpdateState::Failed(kind);
    }

    /// Check the node's library requirements against `resolver`.
    pub fn check_dependencies(
        &self,
        resolver: &dyn LibraryResolver,
    ) -> Result<(), DependencyError> {
        let Some(dependent) = self.behavior.as_dependent() else {
            return Ok(());
        };
        let missing: Vec<&str> = dependent
            .required_libraries()
            .iter()
            .copied()
            .filter(|lib| !resolver.is_available(lib))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DependencyError::new(missing))
        }
    }

    /// Run the topology hook. A panic inside it becomes a process error.
    pub(crate) fn topology_update(&mut self) -> Result<(), NodeError> {
        let (behavior, sockets) = (&mut self.behavior, &mut self.sockets);
        panic::catch_unwind(AssertUnwindSafe(|| behavior.on_topology_update(sockets)))
            .map_err(|payload| NodeError::from_panic(payload.as_ref()))
    }

    /// Release everything the node holds before it leaves the tree.
    pub(crate) fn free(&mut self) {
        self.behavior.on_free();
        self.sockets.forget_all();
    }

    /// Copy this node with fresh node and socket identifiers.
    ///
    /// Cached socket values are not copied.
    pub fn duplicate(&self) -> Node {
        let mut behavior = self.behavior.clone();
        behavior.on_copy(self.id);
        let mut sockets = NodeSockets::new();
        for socket in self.sockets.iter() {
            sockets.push(socket.duplicate());
        }
        Node {
            id: NodeId::new(),
            name: self.name.clone(),
            flags: self.flags,
            sockets,
            behavior,
            state: UpdateState::Dirty,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("type_name", &self.type_name())
            .field("flags", &self.flags)
            .field("state", &self.state)
            .field("sockets", &self.sockets)
            .finish_non_exhaustive()
    }
}
