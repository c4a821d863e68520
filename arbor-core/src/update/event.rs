//! Update Events
//!
//! An event describes what changed in or around a tree. Events are transient:
//! they are queued on the tree, consumed by the scheduler and dropped.

use crate::graph::{NodeId, TreeId};

/// Frame-change details handed to nodes that consult them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameInfo {
    /// The current frame number moved (as opposed to a redraw on the same
    /// frame).
    pub frame_changed: bool,
    /// Playback is running rather than the user scrubbing.
    pub playing: bool,
}

/// What changed.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Nodes or links were added or removed.
    TopologyChanged,
    /// Properties of the listed nodes were edited.
    PropertyChanged { nodes: Vec<NodeId> },
    /// Something changed in the host scene.
    SceneChanged,
    FrameChanged(FrameInfo),
    /// Re-evaluate everything from scratch.
    ForceFullRebuild,
    /// The user explicitly asked these nodes to update.
    Refresh { nodes: Vec<NodeId> },
}

impl EventKind {
    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::TopologyChanged => "topology",
            Self::PropertyChanged { .. } => "property",
            Self::SceneChanged => "scene",
            Self::FrameChanged(_) => "frame",
            Self::ForceFullRebuild => "force",
            Self::Refresh { .. } => "refresh",
        }
    }

    /// Events that still run while a tree's processing is switched off.
    pub fn bypasses_process_gate(&self) -> bool {
        matches!(self, Self::ForceFullRebuild | Self::Refresh { .. })
    }

    pub fn frame(&self) -> Option<FrameInfo> {
        match self {
            Self::FrameChanged(info) => Some(*info),
            _ => None,
        }
    }
}

/// A change notification addressed to one tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub tree: TreeId,
    pub kind: EventKind,
}

impl Event {
    pub fn new(tree: TreeId, kind: EventKind) -> Self {
        Self { tree, kind }
    }

    pub fn topology(tree: TreeId) -> Self {
        Self::new(tree, EventKind::TopologyChanged)
    }

    pub fn property(tree: TreeId, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self::new(
            tree,
            EventKind::PropertyChanged {
                nodes: nodes.into_iter().collect(),
            },
        )
    }

    pub fn scene(tree: TreeId) -> Self {
        Self::new(tree, EventKind::SceneChanged)
    }

    pub fn frame(tree: TreeId, frame_changed: bool, playing: bool) -> Self {
        Self::new(
            tree,
            EventKind::FrameChanged(FrameInfo {
                frame_changed,
                playing,
            }),
        )
    }

    pub fn force(tree: TreeId) -> Self {
        Self::new(tree, EventKind::ForceFullRebuild)
    }

    pub fn refresh(tree: TreeId, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        Self::new(
            tree,
            EventKind::Refresh {
                nodes: nodes.into_iter().collect(),
            },
        )
    }
}
