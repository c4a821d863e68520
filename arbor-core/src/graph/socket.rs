//! Sockets
//!
//! A socket is a typed connection point on a node. Output sockets cache the
//! last value their node computed; input sockets cache the value resolved
//! from upstream at the start of the node's last execution.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data::SocketData;
use super::id::SocketId;

/// Socket direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketDirection {
    Input,
    Output,
}

impl SocketDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// Declared data kind of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Accepts and produces anything.
    Any,
    Numbers,
    Vertices,
    Edges,
    Faces,
    Matrices,
    Strings,
}

impl DataKind {
    /// Whether a socket of this kind accepts a link carrying `incoming`.
    pub fn accepts(self, incoming: DataKind) -> bool {
        self == DataKind::Any || incoming == DataKind::Any || self == incoming
    }
}

/// A connection point on a node.
#[derive(Debug, Clone)]
pub struct Socket {
    id: SocketId,
    name: String,
    direction: SocketDirection,
    kind: DataKind,
    /// Value used by an unlinked input.
    default: Option<Arc<SocketData>>,
    /// Last computed (outputs) or resolved (inputs) value.
    cache: Option<Arc<SocketData>>,
    linked: bool,
    /// Kind of the output feeding this input, if linked.
    upstream_kind: Option<DataKind>,
}

impl Socket {
    pub fn new(name: impl Into<String>, kind: DataKind, direction: SocketDirection) -> Self {
        Self {
            id: SocketId::new(),
            name: name.into(),
            direction,
            kind,
            default: None,
            cache: None,
            linked: false,
            upstream_kind: None,
        }
    }

    /// Create a new input socket.
    pub fn input(name: impl Into<String>, kind: DataKind) -> Self {
        Self::new(name, kind, SocketDirection::Input)
    }

    /// Create a new output socket.
    pub fn output(name: impl Into<String>, kind: DataKind) -> Self {
        Self::new(name, kind, SocketDirection::Output)
    }

    /// Set the value used while the input is unlinked.
    pub fn with_default(mut self, value: SocketData) -> Self {
        self.default = Some(Arc::new(value));
        self
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> SocketDirection {
        self.direction
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    /// Change the declared kind, e.g. when inferring types from links.
    pub fn set_kind(&mut self, kind: DataKind) {
        self.kind = kind;
    }

    pub fn default_value(&self) -> Option<&SocketData> {
        self.default.as_deref()
    }

    pub fn set_default(&mut self, value: Option<SocketData>) {
        self.default = value.map(Arc::new);
    }

    pub(crate) fn default_shared(&self) -> Option<Arc<SocketData>> {
        self.default.clone()
    }

    /// The cached value, if any.
    pub fn value(&self) -> Option<&SocketData> {
        self.cache.as_deref()
    }

    pub(crate) fn value_shared(&self) -> Option<Arc<SocketData>> {
        self.cache.clone()
    }

    pub(crate) fn set_value(&mut self, value: Option<Arc<SocketData>>) {
        self.cache = value;
    }

    /// Drop the cached value.
    pub fn forget(&mut self) {
        self.cache = None;
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Kind of the output socket feeding this input.
    pub fn upstream_kind(&self) -> Option<DataKind> {
        self.upstream_kind
    }

    pub(crate) fn set_linked(&mut self, linked: bool) {
        self.linked = linked;
        if !linked {
            self.upstream_kind = None;
        }
    }

    pub(crate) fn set_upstream_kind(&mut self, kind: Option<DataKind>) {
        self.upstream_kind = kind;
    }

    /// Copy of this socket with a fresh identity and no cached data or links.
    pub(crate) fn duplicate(&self) -> Self {
        Self {
            id: SocketId::new(),
            name: self.name.clone(),
            direction: self.direction,
            kind: self.kind,
            default: self.default.clone(),
            cache: None,
            linked: false,
            upstream_kind: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_accepts_everything() {
        assert!(DataKind::Any.accepts(DataKind::Vertices));
        assert!(DataKind::Edges.accepts(DataKind::Any));
        assert!(DataKind::Edges.accepts(DataKind::Edges));
        assert!(!DataKind::Edges.accepts(DataKind::Vertices));
    }

    #[test]
    fn duplicate_gets_fresh_id_and_no_cache() {
        let mut socket = Socket::output("verts", DataKind::Vertices);
        socket.set_value(Some(Arc::new(SocketData::Vertices(vec![vec![[1.0, 2.0, 3.0]]]))));
        socket.set_linked(true);

        let copy = socket.duplicate();
        assert_ne!(copy.id(), socket.id());
        assert_eq!(copy.name(), "verts");
        assert!(copy.value().is_none());
        assert!(!copy.is_linked());
    }

    #[test]
    fn unlinking_clears_upstream_kind() {
        let mut socket = Socket::input("x", DataKind::Any);
        socket.set_linked(true);
        socket.set_upstream_kind(Some(DataKind::Numbers));
        socket.set_linked(false);
        assert_eq!(socket.upstream_kind(), None);
    }
}
