//! Identifiers
//!
//! Hosts relocate and duplicate their objects without notice, so memory
//! addresses are useless as keys. Every tree, node, socket and link gets an
//! opaque identifier from a process-wide counter instead. Identifiers are
//! never reused and a copied object always receives a fresh one.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Generate a new unique ID.
            pub fn new() -> Self {
                static COUNTER: AtomicU64 = AtomicU64::new(1);
                Self(COUNTER.fetch_add(1, Ordering::Relaxed))
            }

            /// Get the raw ID value.
            pub fn raw(&self) -> u64 {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a node tree.
    TreeId,
    "tree"
);

define_id!(
    /// Unique identifier for a node.
    NodeId,
    "node"
);

define_id!(
    /// Unique identifier for a socket.
    SocketId,
    "socket"
);

define_id!(
    /// Unique identifier for a link.
    LinkId,
    "link"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn ids_display_with_prefix() {
        let id = SocketId::new();
        assert_eq!(id.to_string(), format!("socket#{}", id.raw()));
    }

    #[test]
    fn ids_serialize_as_plain_numbers() {
        let id = TreeId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, id.raw().to_string());
    }
}
