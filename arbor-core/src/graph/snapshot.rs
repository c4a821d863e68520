//! Tree Snapshots
//!
//! A [`TreeSnapshot`] is the serializable form of a tree: node types, names,
//! flags, input defaults and node properties, plus links by socket name.
//! Node identifiers are not stored; nodes are referred to by snapshot-local
//! keys and restoring a snapshot allocates fresh identifiers.
//!
//! Restoring runs inside a bulk load scope, so building a large tree costs a
//! single forced rebuild once the restore completes.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::SocketData;
use crate::error::SnapshotError;
use super::id::NodeId;
use super::node::{Node, NodeBehavior, NodeFlags};
use super::tree::{NodeTree, TreeSettings};

type Factory = Box<dyn Fn() -> Box<dyn NodeBehavior> + Send + Sync>;

/// Creates node behaviors by type name.
#[derive(Default)]
pub struct NodeRegistry {
    factories: IndexMap<String, Factory>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a behavior type under its own type name.
    pub fn register<B: NodeBehavior + Default>(&mut self) -> &mut Self {
        let name = B::default().type_name();
        self.register_with(name, B::default)
    }

    /// Register a factory under an explicit name.
    pub fn register_with<B, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        B: NodeBehavior,
        F: Fn() -> B + Send + Sync + 'static,
    {
        self.factories.insert(
            name.into(),
            Box::new(move || Box::new(factory()) as Box<dyn NodeBehavior>),
        );
        self
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Registered type names in registration order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Create a fresh node of the given type.
    pub fn create(&self, type_name: &str) -> Result<Node, SnapshotError> {
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| SnapshotError::UnknownNodeType(type_name.to_string()))?;
        Ok(Node::from_boxed(factory()))
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A node as stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Snapshot-local key referenced by links.
    pub key: u64,
    pub type_name: String,
    pub name: String,
    pub flags: NodeFlags,
    /// Default values of inputs, by socket name.
    #[serde(default)]
    pub defaults: BTreeMap<String, SocketData>,
    #[serde(default)]
    pub properties: serde_json::Value,
}

/// A link as stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSnapshot {
    pub from_node: u64,
    pub from_socket: String,
    pub to_node: u64,
    pub to_socket: String,
}

/// Serializable form of a node tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub name: String,
    #[serde(default)]
    pub settings: TreeSettings,
    pub nodes: Vec<NodeSnapshot>,
    #[serde(default)]
    pub links: Vec<LinkSnapshot>,
}

impl TreeSnapshot {
    /// Capture the current structure of a tree. Cached values are not
    /// included.
    pub fn capture(tree: &NodeTree) -> Self {
        let keys: HashMap<NodeId, u64> = tree
            .node_ids()
            .enumerate()
            .map(|(key, id)| (id, key as u64))
            .collect();

        let nodes = tree
            .nodes()
            .enumerate()
            .map(|(key, node)| NodeSnapshot {
                key: key as u64,
                type_name: node.type_name().to_string(),
                name: node.name().to_string(),
                flags: node.flags(),
                defaults: node
                    .sockets()
                    .inputs()
                    .iter()
                    .filter_map(|s| s.default_value().map(|d| (s.name().to_string(), d.clone())))
                    .collect(),
                properties: node.behavior().properties(),
            })
            .collect();

        let links = tree
            .links()
            .filter_map(|link| {
                Some(LinkSnapshot {
                    from_node: *keys.get(&link.from_node)?,
                    from_socket: tree.socket(link.from_socket)?.name().to_string(),
                    to_node: *keys.get(&link.to_node)?,
                    to_socket: tree.socket(link.to_socket)?.name().to_string(),
                })
            })
            .collect();

        Self {
            name: tree.name().to_string(),
            settings: *tree.settings(),
            nodes,
            links,
        }
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, SnapshotError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Build a new tree from the snapshot.
    pub fn build(&self, registry: &NodeRegistry) -> Result<NodeTree, SnapshotError> {
        let mut tree = NodeTree::new(self.name.clone());
        tree.set_settings(self.settings);
        self.restore_into(&mut tree, registry)?;
        Ok(tree)
    }

    /// Add the snapshot's nodes and links to `tree` under a bulk load.
    ///
    /// Returns the identifiers given to each snapshot key. On error the tree
    /// keeps whatever was restored before the failure.
    pub fn restore_into(
        &self,
        tree: &mut NodeTree,
        registry: &NodeRegistry,
    ) -> Result<HashMap<u64, NodeId>, SnapshotError> {
        let mut bulk = tree.bulk_load();
        let mut ids = HashMap::with_capacity(self.nodes.len());

        for snapshot in &self.nodes {
            let mut node = registry.create(&snapshot.type_name)?;
            node.set_name(snapshot.name.clone());
            *node.flags_mut() = snapshot.flags;
            for (name, value) in &snapshot.defaults {
                match node.input_mut(name) {
                    Some(socket) => socket.set_default(Some(value.clone())),
                    None => debug!(
                        node = %snapshot.name,
                        socket = %name,
                        "skipping default of unknown input"
                    ),
                }
            }
            if !snapshot.properties.is_null() {
                node.behavior_mut()
                    .load_properties(&snapshot.properties)
                    .map_err(|source| SnapshotError::Properties {
                        node: snapshot.name.clone(),
                        source,
                    })?;
            }
            let id = bulk.add_node(node)?;
            ids.insert(snapshot.key, id);
        }

        for link in &self.links {
            let from = *ids
                .get(&link.from_node)
                .ok_or(SnapshotError::UnknownNodeKey(link.from_node))?;
            let to = *ids
                .get(&link.to_node)
                .ok_or(SnapshotError::UnknownNodeKey(link.to_node))?;
            bulk.connect(from, &link.from_socket, to, &link.to_socket)?;
        }

        Ok(ids)
    }
}
