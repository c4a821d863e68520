//! UI Feedback
//!
//! After each node execution the scheduler reports the node's error state
//! and duration through a [`FeedbackSink`]. The editor that draws nodes is
//! outside this crate; [`FeedbackStore`] is a ready-made sink that keeps the
//! latest record per node in a concurrent map so a redraw can read it while
//! a pass is writing.

use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, NodeError};
use crate::graph::NodeId;
use crate::settings::{Color, Settings};

/// Receives per-node feedback.
pub trait FeedbackSink: Send + Sync {
    /// Report the outcome of a node execution.
    ///
    /// `None` clears the corresponding indicator; both `None` forgets the
    /// node entirely.
    fn update_ui(&self, node: NodeId, error: Option<&ErrorRecord>, duration: Option<Duration>);
}

/// Displayable form of a node error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&NodeError> for ErrorRecord {
    fn from(err: &NodeError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Latest feedback of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackRecord {
    pub error: Option<ErrorRecord>,
    pub duration: Option<Duration>,
    /// Display color, if the node should be tinted.
    pub color: Option<Color>,
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl FeedbackSink for NullSink {
    fn update_ui(&self, _node: NodeId, _error: Option<&ErrorRecord>, _duration: Option<Duration>) {}
}

#[derive(Debug, Clone)]
struct Entry {
    error: Option<ErrorRecord>,
    duration: Option<Duration>,
}

/// In-memory feedback keyed by node.
#[derive(Debug)]
pub struct FeedbackStore {
    settings: Settings,
    records: DashMap<NodeId, Entry>,
}

impl FeedbackStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            records: DashMap::new(),
        }
    }

    /// Latest record of a node, with its display color.
    pub fn get(&self, node: NodeId) -> Option<FeedbackRecord> {
        let entry = self.records.get(&node).map(|e| e.value().clone())?;
        let color = self.color_of(&entry);
        Some(FeedbackRecord {
            error: entry.error,
            duration: entry.duration,
            color,
        })
    }

    pub fn error(&self, node: NodeId) -> Option<ErrorRecord> {
        self.records.get(&node).and_then(|e| e.error.clone())
    }

    pub fn duration(&self, node: NodeId) -> Option<Duration> {
        self.records.get(&node).and_then(|e| e.duration)
    }

    /// Every node currently showing an error.
    pub fn errors(&self) -> Vec<(NodeId, ErrorRecord)> {
        let mut errors: Vec<_> = self
            .records
            .iter()
            .filter_map(|e| e.error.clone().map(|err| (*e.key(), err)))
            .collect();
        errors.sort_by_key(|(id, _)| *id);
        errors
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.records.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&self) {
        self.records.clear();
    }

    fn color_of(&self, entry: &Entry) -> Option<Color> {
        if let Some(error) = &entry.error {
            return Some(match error.kind {
                ErrorKind::MissingData => self.settings.no_data_color,
                ErrorKind::Exception | ErrorKind::Dependency => self.settings.exception_color,
            });
        }
        if !self.settings.heat_map {
            return None;
        }
        let duration = entry.duration?;
        let slowest = self
            .records
            .iter()
            .filter_map(|e| e.duration)
            .max()
            .unwrap_or(duration);
        let t = if slowest.is_zero() {
            0.0
        } else {
            duration.as_secs_f32() / slowest.as_secs_f32()
        };
        Some(self.settings.heat_map_cold.lerp(self.settings.heat_map_hot, t))
    }
}

impl Default for FeedbackStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl FeedbackSink for FeedbackStore {
    fn update_ui(&self, node: NodeId, error: Option<&ErrorRecord>, duration: Option<Duration>) {
        if error.is_none() && duration.is_none() {
            self.records.remove(&node);
            return;
        }
        self.records.insert(
            node,
            Entry {
                error: error.cloned(),
                duration,
            },
        );
    }
}
