//! Error Types
//!
//! Errors fall into two families:
//!
//! - Mutation errors ([`GraphError`]) are returned synchronously to the caller
//!   editing a tree and never reach the scheduler.
//! - Node errors ([`NodeError`]) are produced while a node executes. The
//!   scheduler records them per node and keeps the pass going.

use std::any::Any;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{DataKind, LinkId, NodeId, SocketId};

/// Errors raised while editing the topology of a tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("socket not found: {0}")]
    SocketNotFound(SocketId),

    #[error("node {node} has no {direction} socket named '{name}'")]
    SocketNameNotFound {
        node: NodeId,
        direction: &'static str,
        name: String,
    },

    #[error("link not found: {0}")]
    LinkNotFound(LinkId),

    #[error("links must go from an output socket to an input socket")]
    WrongDirection,

    #[error("cannot link {from:?} data into a {to:?} socket")]
    IncompatibleKinds { from: DataKind, to: DataKind },

    /// The new link would close a directed cycle.
    #[error("link would create a cycle")]
    Cycle,

    /// The destination input already has an incoming link.
    #[error("input socket {0} already has an incoming link")]
    FanIn(SocketId),

    #[error(transparent)]
    Dependency(#[from] DependencyError),
}

/// Errors produced by a node during a pass.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeError {
    /// An input required data that was never produced.
    #[error("no data: {0}")]
    NoData(String),

    /// The computation itself failed.
    #[error("{0}")]
    Process(String),

    #[error(transparent)]
    Dependency(#[from] DependencyError),
}

impl NodeError {
    pub fn no_data(message: impl Into<String>) -> Self {
        Self::NoData(message.into())
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::Process(message.into())
    }

    /// Turn a caught panic payload into a process error.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::Process(format!("panicked: {message}"))
    }

    /// Classify the error for display.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoData(_) => ErrorKind::MissingData,
            Self::Process(_) => ErrorKind::Exception,
            Self::Dependency(_) => ErrorKind::Dependency,
        }
    }
}

/// Display classes of node errors.
///
/// Missing data is expected while a tree is being edited and is rendered with
/// a softer style than exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingData,
    Exception,
    Dependency,
}

/// A node needs external libraries that are not installed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} {} not installed", quoted(.missing), verb(.missing))]
pub struct DependencyError {
    missing: Vec<String>,
}

impl DependencyError {
    pub fn new<I, S>(missing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            missing: missing.into_iter().map(Into::into).collect(),
        }
    }

    /// Names of the libraries that are absent.
    pub fn missing(&self) -> &[String] {
        &self.missing
    }
}

fn quoted(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

fn verb(names: &[String]) -> &'static str {
    if names.len() == 1 {
        "is"
    } else {
        "are"
    }
}

/// Errors while capturing or restoring a tree snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("invalid snapshot json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode snapshot: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    #[error("link references unknown node key {0}")]
    UnknownNodeKey(u64),

    #[error("node '{node}' rejected its properties: {source}")]
    Properties { node: String, source: NodeError },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Errors while loading engine settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}
