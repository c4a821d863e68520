//! Node Graph
//!
//! This module implements the node tree: computation nodes with typed
//! sockets, joined by directed links from outputs to inputs.
//!
//! # Overview
//!
//! The tree is a directed acyclic graph where:
//!
//! - Nodes carry a [`NodeBehavior`] that computes outputs from inputs
//! - Links run from an output socket to an input socket; an input has at most
//!   one incoming link, an output may feed many inputs
//!
//! # Design Decisions
//!
//! 1. A [`NodeTree`] owns its nodes directly. There is no global registry;
//!    name lookups go through a passed-in [`NodeRegistry`] or
//!    [`LibraryResolver`].
//!
//! 2. Identifiers come from process-wide counters and are independent of
//!    where a node is stored. Copies always get fresh identifiers.
//!
//! 3. The tree only records what changed. Evaluation belongs to the
//!    [`UpdateScheduler`](crate::update::UpdateScheduler).

mod id;
mod link;
mod node;
mod snapshot;
mod socket;
mod tree;

pub use id::{LinkId, NodeId, SocketId, TreeId};
pub use link::Link;
pub use node::{
    default_internal_links, BehaviorClone, Dependent, DraftMode, InstalledLibraries,
    LibraryResolver, Node, NodeBehavior, NodeFlags, NodeSockets, UpdateState, Viewer,
};
pub use snapshot::{LinkSnapshot, NodeRegistry, NodeSnapshot, TreeSnapshot};
pub use socket::{DataKind, Socket, SocketDirection};
pub use tree::{BulkLoad, NodeTree, TimeMode, TreeSettings};
