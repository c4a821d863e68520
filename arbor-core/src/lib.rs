//! Arbor Core
//!
//! This crate provides the dataflow update engine behind Arbor node trees.
//! It implements:
//!
//! - Node trees: nodes with typed sockets joined by directed links (a DAG)
//! - Event-driven re-evaluation with partial (forward closure) updates
//! - Mode-gated triggers for scene and frame changes
//! - Per-node failure isolation with error and timing feedback
//!
//! Geometry generators and other leaf computations live outside this crate.
//! They plug in through the [`NodeBehavior`] trait.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Identifiers, sockets, nodes, links and the [`NodeTree`] topology store
//! - `update`: Events, the event queue, the [`UpdateScheduler`] and UI feedback
//! - `data`: Socket payloads and the list broadcast rule used by leaf nodes
//! - `settings`: Engine preferences
//! - `error`: Error types shared by the modules above
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use arbor_core::{NodeTree, Node, UpdateScheduler, FeedbackStore, Settings};
//!
//! let mut tree = NodeTree::new("Layout");
//! let a = tree.add_node(Node::new(NumberSource::new(2.0)))?;
//! let b = tree.add_node(Node::new(Doubler::default()))?;
//! tree.connect(a, "value", b, "value")?;
//!
//! let feedback = Arc::new(FeedbackStore::new(Settings::default()));
//! let mut scheduler = UpdateScheduler::new(Settings::default(), feedback.clone());
//!
//! // Runs the topology events recorded by the edits above
//! scheduler.flush(&mut tree);
//! ```

pub mod data;
pub mod error;
pub mod graph;
pub mod settings;
pub mod update;

pub use data::{match_long_repeat, repeat_last, SocketData};
pub use error::{DependencyError, ErrorKind, GraphError, NodeError, SettingsError, SnapshotError};
pub use graph::{
    BulkLoad, DataKind, Dependent, DraftMode, InstalledLibraries, LibraryResolver, Link, LinkId,
    Node, NodeBehavior, NodeFlags, NodeId, NodeRegistry, NodeSockets, NodeTree, Socket,
    SocketDirection, SocketId, TimeMode, TreeId, TreeSettings, TreeSnapshot, UpdateState, Viewer,
};
pub use settings::{Color, FrameChangeMode, Settings};
pub use update::{
    ErrorRecord, Event, EventKind, EventQueue, EventSender, FeedbackRecord, FeedbackSink,
    FeedbackStore, FrameInfo, NullSink, PassReport, ProcessContext, UpdateScheduler,
};
