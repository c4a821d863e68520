//! Node Trees
//!
//! A [`NodeTree`] is the topology store: it owns its nodes and the links
//! between their sockets, and keeps the link set acyclic with at most one
//! incoming link per input.
//!
//! # Change tracking
//!
//! Every mutation records an event into the tree's [`EventQueue`]. The tree
//! never evaluates anything itself; an [`UpdateScheduler`] drains the queue
//! and runs passes. While a bulk load is open (see [`NodeTree::bulk_load`])
//! nothing is recorded, and closing the outermost scope records a single
//! forced rebuild instead.
//!
//! # Ordering
//!
//! Nodes are stored in creation order. Topological orders break ties by that
//! order, so evaluation is reproducible.
//!
//! [`UpdateScheduler`]: crate::update::UpdateScheduler

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::error::{GraphError, NodeError};
use crate::update::{EventKind, EventQueue, EventSender, FrameInfo};
use super::id::{LinkId, NodeId, SocketId, TreeId};
use super::link::Link;
use super::node::{InstalledLibraries, LibraryResolver, Node};
use super::socket::{Socket, SocketDirection};

/// How node durations are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeMode {
    /// Each node's own execution time.
    #[default]
    PerNode,
    /// Running total of the pass up to and including the node.
    Cumulative,
}

/// Tree-level switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeSettings {
    /// Master switch. When off only forced rebuilds and refreshes run.
    pub process: bool,
    /// React to frame changes.
    pub animate: bool,
    /// React to scene changes.
    pub scene_update: bool,
    pub draft: bool,
    /// Viewer nodes draw into the viewport.
    pub show: bool,
    /// Report node durations.
    pub show_time: bool,
    pub time_mode: TimeMode,
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self {
            process: true,
            animate: true,
            scene_update: true,
            draft: false,
            show: true,
            show_time: false,
            time_mode: TimeMode::PerNode,
        }
    }
}

/// A graph of nodes joined by links.
pub struct NodeTree {
    id: TreeId,
    name: String,
    settings: TreeSettings,
    nodes: IndexMap<NodeId, Node>,
    links: IndexMap<LinkId, Link>,
    socket_owners: HashMap<SocketId, NodeId>,
    bulk_depth: usize,
    events: EventQueue,
    /// Nodes removed since the scheduler last looked.
    released: Vec<NodeId>,
    libraries: Arc<dyn LibraryResolver>,
}

impl NodeTree {
    pub fn new(name: impl Into<String>) -> Self {
        let id = TreeId::new();
        Self {
            id,
            name: name.into(),
            settings: TreeSettings::default(),
            nodes: IndexMap::new(),
            links: IndexMap::new(),
            socket_owners: HashMap::new(),
            bulk_depth: 0,
            events: EventQueue::new(id),
            released: Vec::new(),
            libraries: Arc::new(InstalledLibraries::default()),
        }
    }

    /// Use `resolver` to answer library requirements of dependent nodes.
    pub fn with_libraries(mut self, resolver: Arc<dyn LibraryResolver>) -> Self {
        self.libraries = resolver;
        self
    }

    pub fn set_libraries(&mut self, resolver: Arc<dyn LibraryResolver>) {
        self.libraries = resolver;
    }

    pub fn libraries(&self) -> &Arc<dyn LibraryResolver> {
        &self.libraries
    }

    pub fn id(&self) -> TreeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn settings(&self) -> &TreeSettings {
        &self.settings
    }

    /// Pending events of this tree.
    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn event_sender(&self) -> EventSender {
        self.events.sender()
    }

    fn record(&self, kind: EventKind) {
        if self.is_bulk_loading() {
            return;
        }
        self.events.record(kind);
    }

    // ---- nodes ---------------------------------------------------------

    /// Add a node to the tree.
    ///
    /// Outside bulk loads, a node whose required libraries are missing is
    /// refused.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        if !self.is_bulk_loading() {
            node.check_dependencies(self.libraries.as_ref())?;
        }
        let id = self.insert_node(node);
        trace!(tree = %self.id, node = %id, "node added");
        self.record(EventKind::TopologyChanged);
        Ok(id)
    }

    /// Remove a node and every link touching it.
    ///
    /// The node's sockets drop their cached data and its `on_free` hook runs
    /// before it is returned.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, GraphError> {
        let node = self.release_node(id).ok_or(GraphError::NodeNotFound(id))?;
        trace!(tree = %self.id, node = %id, "node removed");
        self.record(EventKind::TopologyChanged);
        Ok(node)
    }

    /// Add a copy of `id` with fresh identifiers. Links are not copied.
    pub fn duplicate_node(&mut self, id: NodeId) -> Result<NodeId, GraphError> {
        let copy = self.node(id).ok_or(GraphError::NodeNotFound(id))?.duplicate();
        let new_id = self.insert_node(copy);
        trace!(tree = %self.id, original = %id, node = %new_id, "node duplicated");
        self.record(EventKind::TopologyChanged);
        Ok(new_id)
    }

    /// Swap `old` for `new`, carrying links over by socket name.
    ///
    /// `input_map` and `output_map` rename sockets as `(old name, new name)`
    /// pairs; unlisted sockets keep their names. Links whose socket has no
    /// counterpart on the new node are dropped.
    pub fn replace_node(
        &mut self,
        old: NodeId,
        new: Node,
        input_map: &[(&str, &str)],
        output_map: &[(&str, &str)],
    ) -> Result<NodeId, GraphError> {
        let old_node = self.nodes.get(&old).ok_or(GraphError::NodeNotFound(old))?;
        if !self.is_bulk_loading() {
            new.check_dependencies(self.libraries.as_ref())?;
        }

        let mut incoming: Vec<(SocketId, String)> = Vec::new();
        let mut outgoing: Vec<(String, SocketId)> = Vec::new();
        for link in self.links.values() {
            if link.to_node == old {
                if let Some(socket) = old_node.sockets().get(link.to_socket) {
                    incoming.push((link.from_socket, renamed(input_map, socket.name())));
                }
            }
            if link.from_node == old {
                if let Some(socket) = old_node.sockets().get(link.from_socket) {
                    outgoing.push((renamed(output_map, socket.name()), link.to_socket));
                }
            }
        }

        let new_id = self.insert_node(new);
        self.release_node(old);

        for (from, name) in incoming {
            let to = self.nodes.get(&new_id).and_then(|n| n.input(&name)).map(Socket::id);
            match to {
                Some(to) => self.migrate_link(from, to),
                None => trace!(tree = %self.id, socket = %name, "input dropped during replace"),
            }
        }
        for (name, to) in outgoing {
            let from = self.nodes.get(&new_id).and_then(|n| n.output(&name)).map(Socket::id);
            match from {
                Some(from) => self.migrate_link(from, to),
                None => trace!(tree = %self.id, socket = %name, "output dropped during replace"),
            }
        }

        trace!(tree = %self.id, old = %old, node = %new_id, "node replaced");
        self.record(EventKind::TopologyChanged);
        Ok(new_id)
    }

    fn migrate_link(&mut self, from: SocketId, to: SocketId) {
        if let Err(err) = self.insert_link(from, to, true) {
            trace!(tree = %self.id, error = %err, "link not migrated");
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Mutable access without recording an event.
    ///
    /// Use [`edit_node`](Self::edit_node) for edits that should trigger an
    /// update.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Edit a node and record a property change for it.
    pub fn edit_node<R>(
        &mut self,
        id: NodeId,
        edit: impl FnOnce(&mut Node) -> R,
    ) -> Result<R, GraphError> {
        let node = self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))?;
        let result = edit(node);
        self.record(EventKind::PropertyChanged { nodes: vec![id] });
        Ok(result)
    }

    /// Nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    // ---- links ---------------------------------------------------------

    /// Link an output socket to an input socket.
    ///
    /// An existing link into the input is replaced.
    pub fn add_link(&mut self, from: SocketId, to: SocketId) -> Result<LinkId, GraphError> {
        let id = self.insert_link(from, to, true)?;
        trace!(tree = %self.id, link = %id, "link added");
        self.record(EventKind::TopologyChanged);
        Ok(id)
    }

    /// Like [`add_link`](Self::add_link), but fails with
    /// [`GraphError::FanIn`] if the input is already linked.
    pub fn try_add_link(&mut self, from: SocketId, to: SocketId) -> Result<LinkId, GraphError> {
        let id = self.insert_link(from, to, false)?;
        trace!(tree = %self.id, link = %id, "link added");
        self.record(EventKind::TopologyChanged);
        Ok(id)
    }

    /// Link sockets by node and socket name.
    pub fn connect(
        &mut self,
        from_node: NodeId,
        output: &str,
        to_node: NodeId,
        input: &str,
    ) -> Result<LinkId, GraphError> {
        let from = self
            .nodes
            .get(&from_node)
            .ok_or(GraphError::NodeNotFound(from_node))?
            .output(output)
            .ok_or_else(|| GraphError::SocketNameNotFound {
                node: from_node,
                direction: SocketDirection::Output.as_str(),
                name: output.to_string(),
            })?
            .id();
        let to = self
            .nodes
            .get(&to_node)
            .ok_or(GraphError::NodeNotFound(to_node))?
            .input(input)
            .ok_or_else(|| GraphError::SocketNameNotFound {
                node: to_node,
                direction: SocketDirection::Input.as_str(),
                name: input.to_string(),
            })?
            .id();
        self.add_link(from, to)
    }

    pub fn remove_link(&mut self, id: LinkId) -> Result<Link, GraphError> {
        let link = self.detach_link(id).ok_or(GraphError::LinkNotFound(id))?;
        trace!(tree = %self.id, link = %id, "link removed");
        self.record(EventKind::TopologyChanged);
        Ok(link)
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// The link feeding an input socket, if any.
    pub fn incoming_link(&self, input: SocketId) -> Option<&Link> {
        self.links.values().find(|l| l.to_socket == input)
    }

    /// Links leaving an output socket.
    pub fn links_from(&self, output: SocketId) -> impl Iterator<Item = &Link> {
        self.links.values().filter(move |l| l.from_socket == output)
    }

    pub fn socket(&self, id: SocketId) -> Option<&Socket> {
        let owner = self.socket_owners.get(&id)?;
        self.nodes.get(owner)?.sockets().get(id)
    }

    pub fn socket_owner(&self, id: SocketId) -> Option<NodeId> {
        self.socket_owners.get(&id).copied()
    }

    /// Nodes feeding `id` directly.
    pub fn upstream_nodes(&self, id: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        for link in self.links.values().filter(|l| l.to_node == id) {
            if !found.contains(&link.from_node) {
                found.push(link.from_node);
            }
        }
        found
    }

    /// Nodes fed by `id` directly.
    pub fn downstream_nodes(&self, id: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        for link in self.links.values().filter(|l| l.from_node == id) {
            if !found.contains(&link.to_node) {
                found.push(link.to_node);
            }
        }
        found
    }

    // ---- ordering ------------------------------------------------------

    /// Every node, dependencies before dependents.
    pub fn nodes_in_topological_order(&self) -> Vec<NodeId> {
        let all: HashSet<NodeId> = self.nodes.keys().copied().collect();
        self.topological_order_of(&all)
    }

    /// The given nodes in dependency order, considering only links between
    /// them. Ties are broken by creation order; unknown ids are ignored.
    pub fn topological_order_of(&self, subset: &HashSet<NodeId>) -> Vec<NodeId> {
        let mut in_degree: HashMap<NodeId, usize> = subset
            .iter()
            .filter(|id| self.nodes.contains_key(*id))
            .map(|id| (*id, 0))
            .collect();
        let mut successors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for link in self.links.values() {
            if in_degree.contains_key(&link.from_node) && in_degree.contains_key(&link.to_node) {
                successors.entry(link.from_node).or_default().push(link.to_node);
                if let Some(degree) = in_degree.get_mut(&link.to_node) {
                    *degree += 1;
                }
            }
        }

        // Kahn's algorithm with a creation-order priority queue
        let mut ready: BinaryHeap<Reverse<(usize, NodeId)>> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .filter_map(|(id, _)| self.nodes.get_index_of(id).map(|pos| Reverse((pos, *id))))
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            order.push(id);
            for next in successors.get(&id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        if let Some(pos) = self.nodes.get_index_of(next) {
                            ready.push(Reverse((pos, *next)));
                        }
                    }
                }
            }
        }
        order
    }

    /// The seeds plus every node reachable downstream from them.
    pub fn forward_closure(&self, seeds: impl IntoIterator<Item = NodeId>) -> HashSet<NodeId> {
        let successors = self.successors();
        let mut closure = HashSet::new();
        let mut queue: VecDeque<NodeId> = seeds
            .into_iter()
            .filter(|id| self.nodes.contains_key(id))
            .collect();
        while let Some(id) = queue.pop_front() {
            if !closure.insert(id) {
                continue;
            }
            if let Some(next) = successors.get(&id) {
                queue.extend(next.iter().copied());
            }
        }
        closure
    }

    fn successors(&self) -> HashMap<NodeId, Vec<NodeId>> {
        let mut successors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for link in self.links.values() {
            successors.entry(link.from_node).or_default().push(link.to_node);
        }
        successors
    }

    /// Whether `target` is reachable downstream from `start`.
    fn reaches(&self, start: NodeId, target: NodeId) -> bool {
        let successors = self.successors();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(next) = successors.get(&id) {
                queue.extend(next.iter().copied());
            }
        }
        false
    }

    // ---- node flags ----------------------------------------------------

    /// Toggle scene reaction. Enabling it schedules an update of the node.
    pub fn set_interactive(&mut self, id: NodeId, enabled: bool) -> Result<(), GraphError> {
        let node = self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))?;
        node.flags_mut().is_interactive = enabled;
        if enabled {
            self.record(EventKind::PropertyChanged { nodes: vec![id] });
        }
        Ok(())
    }

    /// Toggle frame reaction. Either way the node is updated once.
    pub fn set_animatable(&mut self, id: NodeId, enabled: bool) -> Result<(), GraphError> {
        let node = self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))?;
        node.flags_mut().is_animatable = enabled;
        self.record(EventKind::PropertyChanged { nodes: vec![id] });
        Ok(())
    }

    /// Mute or unmute a node. Muted nodes pass inputs through.
    pub fn set_muted(&mut self, id: NodeId, muted: bool) -> Result<(), GraphError> {
        let node = self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))?;
        if node.flags().muted != muted {
            node.flags_mut().muted = muted;
            self.record(EventKind::TopologyChanged);
        }
        Ok(())
    }

    /// Ask for an explicit update of one node, even with processing off.
    pub fn refresh_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        if !self.nodes.contains_key(&id) {
            return Err(GraphError::NodeNotFound(id));
        }
        self.record(EventKind::Refresh { nodes: vec![id] });
        Ok(())
    }

    // ---- host notifications --------------------------------------------

    /// Node properties were edited outside the tree API.
    pub fn notify_properties_changed(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        self.record(EventKind::PropertyChanged {
            nodes: nodes.into_iter().collect(),
        });
    }

    pub fn notify_scene_changed(&mut self) {
        self.record(EventKind::SceneChanged);
    }

    pub fn notify_frame_changed(&mut self, frame_changed: bool, playing: bool) {
        self.record(EventKind::FrameChanged(FrameInfo {
            frame_changed,
            playing,
        }));
    }

    pub fn request_full_rebuild(&mut self) {
        self.record(EventKind::ForceFullRebuild);
    }

    // ---- tree settings -------------------------------------------------

    /// Replace all tree settings without side effects.
    pub fn set_settings(&mut self, settings: TreeSettings) {
        self.settings = settings;
    }

    /// Master switch. Turning it back on updates the whole tree.
    pub fn set_process(&mut self, enabled: bool) {
        let was = self.settings.process;
        self.settings.process = enabled;
        if enabled && !was {
            self.record(EventKind::TopologyChanged);
        }
    }

    pub fn set_animate(&mut self, enabled: bool) {
        self.settings.animate = enabled;
    }

    pub fn set_scene_update(&mut self, enabled: bool) {
        self.settings.scene_update = enabled;
    }

    /// Switch draft mode on every node supporting it and update those nodes.
    pub fn set_draft(&mut self, enabled: bool) {
        if self.settings.draft == enabled {
            return;
        }
        self.settings.draft = enabled;
        let mut affected = Vec::new();
        for (id, node) in self.nodes.iter_mut() {
            if let Some(draft) = node.behavior_mut().as_draft_mode() {
                draft.set_draft(enabled);
                affected.push(*id);
            }
        }
        if !affected.is_empty() {
            self.record(EventKind::PropertyChanged { nodes: affected });
        }
    }

    /// Show or hide every viewer node's drawing.
    pub fn set_show(&mut self, visible: bool) {
        self.settings.show = visible;
        for node in self.nodes.values_mut() {
            if let Some(viewer) = node.behavior_mut().as_viewer() {
                viewer.show_viewport(visible);
            }
        }
    }

    pub fn set_show_time(&mut self, enabled: bool) {
        self.settings.show_time = enabled;
        self.record(EventKind::TopologyChanged);
    }

    pub fn set_time_mode(&mut self, mode: TimeMode) {
        self.settings.time_mode = mode;
        self.record(EventKind::TopologyChanged);
    }

    // ---- bulk load -----------------------------------------------------

    /// Open a bulk load scope. Scopes nest.
    pub fn begin_bulk_load(&mut self) {
        self.bulk_depth += 1;
        trace!(tree = %self.id, depth = self.bulk_depth, "bulk load opened");
    }

    /// Close a bulk load scope. Closing the outermost one records a single
    /// forced rebuild.
    pub fn end_bulk_load(&mut self) {
        match self.bulk_depth {
            0 => warn!(tree = %self.id, "end_bulk_load called without an open scope"),
            1 => {
                self.bulk_depth = 0;
                trace!(tree = %self.id, "bulk load closed");
                self.events.record(EventKind::ForceFullRebuild);
            }
            _ => self.bulk_depth -= 1,
        }
    }

    pub fn is_bulk_loading(&self) -> bool {
        self.bulk_depth > 0
    }

    /// Open a bulk load scope closed when the guard drops.
    pub fn bulk_load(&mut self) -> BulkLoad<'_> {
        self.begin_bulk_load();
        BulkLoad { tree: self }
    }

    // ---- internals used by the scheduler --------------------------------

    /// Run every node's topology hook in dependency order, then drop links
    /// whose sockets disappeared. Returns the nodes whose hook failed.
    pub(crate) fn run_topology_updates(&mut self) -> Vec<(NodeId, NodeError)> {
        let mut failures = Vec::new();
        for id in self.nodes_in_topological_order() {
            self.refresh_upstream_kinds(id);
            if let Some(node) = self.nodes.get_mut(&id) {
                if let Err(err) = node.topology_update() {
                    failures.push((id, err));
                }
            }
        }
        self.sync_sockets();
        failures
    }

    /// Removed nodes not yet reported to the feedback sink.
    pub(crate) fn take_released(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.released)
    }

    pub(crate) fn socket_mut(&mut self, node: NodeId, socket: SocketId) -> Option<&mut Socket> {
        self.nodes.get_mut(&node)?.sockets_mut().get_mut(socket)
    }

    fn refresh_upstream_kinds(&mut self, id: NodeId) {
        let kinds: Vec<(SocketId, Option<_>)> = self
            .links
            .values()
            .filter(|l| l.to_node == id)
            .map(|l| (l.to_socket, self.socket(l.from_socket).map(Socket::kind)))
            .collect();
        for (socket, kind) in kinds {
            if let Some(input) = self.socket_mut(id, socket) {
                input.set_upstream_kind(kind);
            }
        }
    }

    fn sync_sockets(&mut self) {
        self.socket_owners = self
            .nodes
            .iter()
            .flat_map(|(id, node)| node.sockets().iter().map(move |s| (s.id(), *id)))
            .collect();
        let dangling: Vec<LinkId> = self
            .links
            .values()
            .filter(|l| {
                !self.socket_owners.contains_key(&l.from_socket)
                    || !self.socket_owners.contains_key(&l.to_socket)
            })
            .map(|l| l.id)
            .collect();
        for id in dangling {
            trace!(tree = %self.id, link = %id, "dropping link to removed socket");
            self.detach_link(id);
        }
    }

    fn insert_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        for socket in node.sockets().iter() {
            self.socket_owners.insert(socket.id(), id);
        }
        self.nodes.insert(id, node);
        id
    }

    /// Detach, remove and free a node without recording anything.
    fn release_node(&mut self, id: NodeId) -> Option<Node> {
        if !self.nodes.contains_key(&id) {
            return None;
        }
        let touching: Vec<LinkId> = self
            .links
            .values()
            .filter(|l| l.involves_node(id))
            .map(|l| l.id)
            .collect();
        for link in touching {
            self.detach_link(link);
        }
        let mut node = self.nodes.shift_remove(&id)?;
        for socket in node.sockets().iter() {
            self.socket_owners.remove(&socket.id());
        }
        node.free();
        self.released.push(id);
        Some(node)
    }

    fn validate_link(&self, from: SocketId, to: SocketId) -> Result<(NodeId, NodeId), GraphError> {
        let from_node = self.socket_owner(from).ok_or(GraphError::SocketNotFound(from))?;
        let to_node = self.socket_owner(to).ok_or(GraphError::SocketNotFound(to))?;
        let output = self.socket(from).ok_or(GraphError::SocketNotFound(from))?;
        let input = self.socket(to).ok_or(GraphError::SocketNotFound(to))?;

        if output.direction() != SocketDirection::Output
            || input.direction() != SocketDirection::Input
        {
            return Err(GraphError::WrongDirection);
        }
        if !input.kind().accepts(output.kind()) {
            return Err(GraphError::IncompatibleKinds {
                from: output.kind(),
                to: input.kind(),
            });
        }
        if from_node == to_node || self.reaches(to_node, from_node) {
            return Err(GraphError::Cycle);
        }
        Ok((from_node, to_node))
    }

    fn insert_link(
        &mut self,
        from: SocketId,
        to: SocketId,
        replace: bool,
    ) -> Result<LinkId, GraphError> {
        let (from_node, to_node) = self.validate_link(from, to)?;
        if let Some(existing) = self.incoming_link(to).map(|l| l.id) {
            if !replace {
                return Err(GraphError::FanIn(to));
            }
            self.detach_link(existing);
        }

        let link = Link::new(from_node, from, to_node, to);
        let id = link.id;
        let upstream_kind = self.socket(from).map(Socket::kind);
        if let Some(input) = self.socket_mut(to_node, to) {
            input.forget();
            input.set_linked(true);
            input.set_upstream_kind(upstream_kind);
        }
        if let Some(output) = self.socket_mut(from_node, from) {
            output.set_linked(true);
        }
        self.links.insert(id, link);
        Ok(id)
    }

    /// Remove a link and reset the socket state it implied.
    fn detach_link(&mut self, id: LinkId) -> Option<Link> {
        let link = self.links.shift_remove(&id)?;
        if let Some(input) = self.socket_mut(link.to_node, link.to_socket) {
            input.set_linked(false);
            input.forget();
        }
        let still_linked = self.links.values().any(|l| l.from_socket == link.from_socket);
        if let Some(output) = self.socket_mut(link.from_node, link.from_socket) {
            output.set_linked(still_linked);
        }
        Some(link)
    }
}

fn renamed(map: &[(&str, &str)], name: &str) -> String {
    map.iter()
        .find(|(from, _)| *from == name)
        .map(|(_, to)| to.to_string())
        .unwrap_or_else(|| name.to_string())
}

impl fmt::Debug for NodeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTree")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("nodes", &self.nodes.len())
            .field("links", &self.links.len())
            .field("bulk_depth", &self.bulk_depth)
            .finish_non_exhaustive()
    }
}

/// An open bulk load scope.
///
/// Dereferences to the tree so construction can go through the guard; the
/// scope closes when the guard is dropped.
pub struct BulkLoad<'a> {
    tree: &'a mut NodeTree,
}

impl Deref for BulkLoad<'_> {
    type Target = NodeTree;

    fn deref(&self) -> &NodeTree {
        self.tree
    }
}

impl DerefMut for BulkLoad<'_> {
    fn deref_mut(&mut self) -> &mut NodeTree {
        self.tree
    }
}

impl Drop for BulkLoad<'_> {
    fn drop(&mut self) {
        self.tree.end_bulk_load();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SocketData;
    use crate::error::NodeError;
    use crate::graph::node::{Dependent, DraftMode, NodeBehavior, NodeSockets};
    use crate::graph::DataKind;
    use crate::update::ProcessContext;

    #[derive(Clone, Default)]
    struct Relay {
        draft: bool,
    }

    impl NodeBehavior for Relay {
        fn type_name(&self) -> &'static str {
            "Relay"
        }

        fn init(&mut self, sockets: &mut NodeSockets) {
            sockets.add_input("in", DataKind::Numbers);
            sockets.add_output("out", DataKind::Numbers);
        }

        fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeError> {
            let value = ctx.input("in")?.clone();
            ctx.set_output("out", value)
        }

        fn as_draft_mode(&mut self) -> Option<&mut dyn DraftMode> {
            Some(self)
        }
    }

    impl DraftMode for Relay {
        fn set_draft(&mut self, enabled: bool) {
            self.draft = enabled;
        }
    }

    #[derive(Clone)]
    struct Words;

    impl NodeBehavior for Words {
        fn type_name(&self) -> &'static str {
            "Words"
        }

        fn init(&mut self, sockets: &mut NodeSockets) {
            sockets.add_output("text", DataKind::Strings);
        }

        fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeError> {
            ctx.set_output("text", SocketData::Strings(vec![vec!["hi".into()]]))
        }
    }

    #[derive(Clone)]
    struct NeedsScipy;

    impl Dependent for NeedsScipy {
        fn required_libraries(&self) -> &[&'static str] {
            &["scipy"]
        }
    }

    impl NodeBehavior for NeedsScipy {
        fn type_name(&self) -> &'static str {
            "NeedsScipy"
        }

        fn init(&mut self, _sockets: &mut NodeSockets) {}

        fn process(&mut self, _ctx: &mut ProcessContext<'_>) -> Result<(), NodeError> {
            Ok(())
        }

        fn as_dependent(&self) -> Option<&dyn Dependent> {
            Some(self)
        }
    }

    fn chain(tree: &mut NodeTree, len: usize) -> Vec<NodeId> {
        let ids: Vec<NodeId> = (0..len)
            .map(|_| tree.add_node(Node::new(Relay::default())).unwrap())
            .collect();
        for pair in ids.windows(2) {
            tree.connect(pair[0], "out", pair[1], "in").unwrap();
        }
        ids
    }

    #[test]
    fn topological_order_respects_links() {
        let mut tree = NodeTree::new("t");
        let c = tree.add_node(Node::new(Relay::default())).unwrap();
        let a = tree.add_node(Node::new(Relay::default())).unwrap();
        let b = tree.add_node(Node::new(Relay::default())).unwrap();
        tree.connect(a, "out", b, "in").unwrap();
        tree.connect(b, "out", c, "in").unwrap();

        assert_eq!(tree.nodes_in_topological_order(), vec![a, b, c]);
    }

    #[test]
    fn ties_follow_creation_order() {
        let mut tree = NodeTree::new("t");
        let ids: Vec<_> = (0..5)
            .map(|_| tree.add_node(Node::new(Relay::default())).unwrap())
            .collect();
        assert_eq!(tree.nodes_in_topological_order(), ids);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut tree = NodeTree::new("t");
        let ids = chain(&mut tree, 3);
        let err = tree.connect(ids[2], "out", ids[0], "in").unwrap_err();
        assert_eq!(err, GraphError::Cycle);

        let err = tree.connect(ids[1], "out", ids[1], "in").unwrap_err();
        assert_eq!(err, GraphError::Cycle);
        assert_eq!(tree.link_count(), 2);
    }

    #[test]
    fn second_link_into_input_replaces_first() {
        let mut tree = NodeTree::new("t");
        let a = tree.add_node(Node::new(Relay::default())).unwrap();
        let b = tree.add_node(Node::new(Relay::default())).unwrap();
        let c = tree.add_node(Node::new(Relay::default())).unwrap();
        tree.connect(a, "out", c, "in").unwrap();
        tree.connect(b, "out", c, "in").unwrap();

        assert_eq!(tree.link_count(), 1);
        assert_eq!(tree.upstream_nodes(c), vec![b]);
        assert!(!tree.node(a).unwrap().output("out").unwrap().is_linked());
    }

    #[test]
    fn strict_link_reports_fan_in() {
        let mut tree = NodeTree::new("t");
        let a = tree.add_node(Node::new(Relay::default())).unwrap();
        let b = tree.add_node(Node::new(Relay::default())).unwrap();
        let c = tree.add_node(Node::new(Relay::default())).unwrap();
        tree.connect(a, "out", c, "in").unwrap();

        let out_b = tree.node(b).unwrap().output("out").unwrap().id();
        let in_c = tree.node(c).unwrap().input("in").unwrap().id();
        assert_eq!(tree.try_add_link(out_b, in_c), Err(GraphError::FanIn(in_c)));
    }

    #[test]
    fn links_need_direction_and_kind() {
        let mut tree = NodeTree::new("t");
        let a = tree.add_node(Node::new(Relay::default())).unwrap();
        let b = tree.add_node(Node::new(Relay::default())).unwrap();
        let w = tree.add_node(Node::new(Words)).unwrap();

        let in_a = tree.node(a).unwrap().input("in").unwrap().id();
        let in_b = tree.node(b).unwrap().input("in").unwrap().id();
        assert_eq!(tree.add_link(in_a, in_b), Err(GraphError::WrongDirection));

        let err = tree.connect(w, "text", b, "in").unwrap_err();
        assert!(matches!(err, GraphError::IncompatibleKinds { .. }));

        let err = tree.connect(a, "nope", b, "in").unwrap_err();
        assert!(matches!(err, GraphError::SocketNameNotFound { .. }));
    }

    #[test]
    fn removing_node_drops_links_and_releases_it() {
        let mut tree = NodeTree::new("t");
        let ids = chain(&mut tree, 3);
        tree.remove_node(ids[1]).unwrap();

        assert_eq!(tree.link_count(), 0);
        assert!(!tree.node(ids[2]).unwrap().input("in").unwrap().is_linked());
        assert_eq!(tree.take_released(), vec![ids[1]]);
        assert_eq!(tree.remove_node(ids[1]).unwrap_err(), GraphError::NodeNotFound(ids[1]));
    }

    #[test]
    fn forward_closure_follows_links() {
        let mut tree = NodeTree::new("t");
        let ids = chain(&mut tree, 4);
        let lone = tree.add_node(Node::new(Relay::default())).unwrap();

        let closure = tree.forward_closure([ids[1]]);
        assert_eq!(closure, HashSet::from([ids[1], ids[2], ids[3]]));
        assert!(!closure.contains(&lone));
    }

    #[test]
    fn mutations_record_events() {
        let mut tree = NodeTree::new("t");
        chain(&mut tree, 2);
        // two insertions and one link
        assert_eq!(tree.events().len(), 3);
    }

    #[test]
    fn bulk_load_records_one_rebuild() {
        let mut tree = NodeTree::new("t");
        {
            let mut bulk = tree.bulk_load();
            {
                let mut inner = bulk.bulk_load();
                chain(&mut inner, 10);
            }
            assert!(bulk.is_bulk_loading());
            assert!(bulk.events().is_empty());
        }
        assert!(!tree.is_bulk_loading());
        assert_eq!(tree.events().drain(), vec![crate::update::Event::force(tree.id())]);
    }

    #[test]
    fn unbalanced_end_is_harmless() {
        let mut tree = NodeTree::new("t");
        tree.end_bulk_load();
        assert!(!tree.is_bulk_loading());
        assert!(tree.events().is_empty());
    }

    #[test]
    fn missing_libraries_refuse_insertion() {
        let mut tree = NodeTree::new("t");
        let err = tree.add_node(Node::new(NeedsScipy)).unwrap_err();
        assert!(matches!(err, GraphError::Dependency(_)));

        let installed = Arc::new(InstalledLibraries::new(["scipy"]));
        let mut tree = NodeTree::new("t").with_libraries(installed);
        assert!(tree.add_node(Node::new(NeedsScipy)).is_ok());
    }

    #[test]
    fn duplicate_gets_fresh_identity_without_links() {
        let mut tree = NodeTree::new("t");
        let ids = chain(&mut tree, 2);
        let copy = tree.duplicate_node(ids[1]).unwrap();

        assert_ne!(copy, ids[1]);
        assert_eq!(tree.node_count(), 3);
        assert!(tree.upstream_nodes(copy).is_empty());
        assert!(tree.node(ids[1]).is_some());
    }

    #[test]
    fn replace_migrates_links_by_name() {
        let mut tree = NodeTree::new("t");
        let ids = chain(&mut tree, 3);
        let new = tree
            .replace_node(ids[1], Node::new(Relay::default()), &[], &[])
            .unwrap();

        assert!(tree.node(ids[1]).is_none());
        assert_eq!(tree.upstream_nodes(new), vec![ids[0]]);
        assert_eq!(tree.downstream_nodes(new), vec![ids[2]]);
        assert_eq!(tree.link_count(), 2);
    }

    #[test]
    fn replace_drops_unmatched_sockets() {
        let mut tree = NodeTree::new("t");
        let ids = chain(&mut tree, 2);
        let new = tree
            .replace_node(ids[1], Node::new(Relay::default()), &[("in", "missing")], &[])
            .unwrap();

        assert!(tree.upstream_nodes(new).is_empty());
        assert_eq!(tree.link_count(), 0);
    }

    #[test]
    fn draft_toggles_capable_nodes() {
        let mut tree = NodeTree::new("t");
        let relay = tree.add_node(Node::new(Relay::default())).unwrap();
        tree.add_node(Node::new(Words)).unwrap();
        tree.events().drain();

        tree.set_draft(true);
        assert_eq!(
            tree.events().drain(),
            vec![crate::update::Event::property(tree.id(), [relay])]
        );

        tree.set_draft(true);
        assert!(tree.events().is_empty());
    }

    #[test]
    fn enabling_process_schedules_update() {
        let mut tree = NodeTree::new("t");
        tree.set_process(false);
        assert!(tree.events().is_empty());
        tree.set_process(true);
        assert_eq!(tree.events().drain(), vec![crate::update::Event::topology(tree.id())]);
    }

    #[test]
    fn flag_setters_record_property_changes() {
        let mut tree = NodeTree::new("t");
        let a = tree.add_node(Node::new(Relay::default())).unwrap();
        tree.events().drain();

        tree.set_interactive(a, false).unwrap();
        assert!(tree.events().is_empty());
        tree.set_interactive(a, true).unwrap();
        tree.set_animatable(a, false).unwrap();
        assert_eq!(tree.events().len(), 2);
        assert!(tree.node(a).unwrap().is_interactive());
    }
}
