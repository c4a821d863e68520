//! Socket Data
//!
//! Values that travel along links. Every payload is a list at the outer
//! level: one entry per object, so a single node invocation can process a
//! whole batch of objects at once.
//!
//! Leaf nodes combine parameter lists of different lengths with the
//! "match long repeat" rule: shorter lists are extended by repeating their
//! last element until every list is as long as the longest one.

use serde::{Deserialize, Serialize};

use crate::graph::DataKind;

/// A payload stored in a socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SocketData {
    /// Nested numbers, one inner list per object.
    Numbers(Vec<Vec<f64>>),
    /// Vertex coordinates, one inner list per object.
    Vertices(Vec<Vec<[f64; 3]>>),
    /// Edges as vertex index pairs, one inner list per object.
    Edges(Vec<Vec<[usize; 2]>>),
    /// Polygons as vertex index loops, one inner list per object.
    Faces(Vec<Vec<Vec<usize>>>),
    /// Row-major 4x4 transformation matrices.
    Matrices(Vec<[[f64; 4]; 4]>),
    Strings(Vec<Vec<String>>),
}

impl SocketData {
    /// The socket kind this payload belongs to.
    pub fn kind(&self) -> DataKind {
        match self {
            Self::Numbers(_) => DataKind::Numbers,
            Self::Vertices(_) => DataKind::Vertices,
            Self::Edges(_) => DataKind::Edges,
            Self::Faces(_) => DataKind::Faces,
            Self::Matrices(_) => DataKind::Matrices,
            Self::Strings(_) => DataKind::Strings,
        }
    }

    /// Number of objects in the payload.
    pub fn len(&self) -> usize {
        match self {
            Self::Numbers(v) => v.len(),
            Self::Vertices(v) => v.len(),
            Self::Edges(v) => v.len(),
            Self::Faces(v) => v.len(),
            Self::Matrices(v) => v.len(),
            Self::Strings(v) => v.len(),
        }
    }

    /// An empty payload counts as missing data downstream.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convenience for a single object holding a single number.
    pub fn scalar(value: f64) -> Self {
        Self::Numbers(vec![vec![value]])
    }

    pub fn as_numbers(&self) -> Option<&[Vec<f64>]> {
        match self {
            Self::Numbers(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vertices(&self) -> Option<&[Vec<[f64; 3]>]> {
        match self {
            Self::Vertices(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_edges(&self) -> Option<&[Vec<[usize; 2]>]> {
        match self {
            Self::Edges(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_faces(&self) -> Option<&[Vec<Vec<usize>>]> {
        match self {
            Self::Faces(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_matrices(&self) -> Option<&[[[f64; 4]; 4]]> {
        match self {
            Self::Matrices(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_strings(&self) -> Option<&[Vec<String>]> {
        match self {
            Self::Strings(v) => Some(v),
            _ => None,
        }
    }
}

/// Extend `list` to `len` items by repeating its last element.
///
/// Lists already at least `len` long are returned unchanged. An empty list
/// has nothing to repeat and stays empty.
pub fn repeat_last<T: Clone>(list: &[T], len: usize) -> Vec<T> {
    let mut out = list.to_vec();
    if let Some(last) = list.last() {
        if out.len() < len {
            out.resize(len, last.clone());
        }
    }
    out
}

/// Bring every list to the length of the longest one by repeating last
/// elements.
pub fn match_long_repeat<T: Clone>(lists: &[Vec<T>]) -> Vec<Vec<T>> {
    let longest = lists.iter().map(Vec::len).max().unwrap_or(0);
    lists.iter().map(|list| repeat_last(list, longest)).collect()
}
