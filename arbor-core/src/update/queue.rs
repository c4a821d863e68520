//! Event Queue
//!
//! Every tree owns a queue of pending events. Edits to the tree, host
//! notifications and nodes running inside a pass all append to it; the
//! scheduler drains it one pass at a time. Because a running node can only
//! reach the queue (never the scheduler), events raised mid-pass are always
//! handled after the current pass completes.
//!
//! The queue is shared behind a mutex so a host may also post events from
//! a handler thread through an [`EventSender`].

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::graph::{NodeId, TreeId};
use super::event::{Event, EventKind};

/// Pending events of one tree.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tree: TreeId,
    inner: Arc<Mutex<VecDeque<Event>>>,
}

impl EventQueue {
    pub fn new(tree: TreeId) -> Self {
        Self {
            tree,
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// The tree this queue belongs to.
    pub fn tree(&self) -> TreeId {
        self.tree
    }

    pub fn push(&self, event: Event) {
        self.inner.lock().push_back(event);
    }

    /// Queue an event addressed to this queue's tree.
    pub fn record(&self, kind: EventKind) {
        self.push(Event::new(self.tree, kind));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Take every pending event in arrival order.
    pub fn drain(&self) -> Vec<Event> {
        self.inner.lock().drain(..).collect()
    }

    /// Take every pending event, merged by [`coalesce`].
    pub fn drain_coalesced(&self) -> Vec<Event> {
        coalesce(self.drain())
    }

    /// A handle for posting events from elsewhere.
    pub fn sender(&self) -> EventSender {
        EventSender {
            tree: self.tree,
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Posts events into a tree's queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    tree: TreeId,
    inner: Arc<Mutex<VecDeque<Event>>>,
}

impl EventSender {
    pub fn tree(&self) -> TreeId {
        self.tree
    }

    pub fn send(&self, kind: EventKind) {
        self.send_event(Event::new(self.tree, kind));
    }

    pub fn send_event(&self, event: Event) {
        self.inner.lock().push_back(event);
    }
}

/// Merge redundant events while keeping arrival order.
///
/// - Adjacent events of the same kind collapse into one; property and
///   refresh subsets are unioned, frame changes keep the latest playback
///   state.
/// - A forced rebuild absorbs every earlier property, scene and refresh
///   event of its tree since it evaluates all nodes anyway.
pub fn coalesce(events: Vec<Event>) -> Vec<Event> {
    let mut out: Vec<Event> = Vec::with_capacity(events.len());
    for event in events {
        if event.kind == EventKind::ForceFullRebuild {
            out.retain(|queued| queued.tree != event.tree || !absorbed_by_rebuild(&queued.kind));
            out.push(event);
            continue;
        }
        if let Some(last) = out.last_mut() {
            if last.tree == event.tree && merge_into(&mut last.kind, &event.kind) {
                continue;
            }
        }
        out.push(event);
    }
    out
}

fn absorbed_by_rebuild(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::PropertyChanged { .. }
            | EventKind::SceneChanged
            | EventKind::Refresh { .. }
            | EventKind::ForceFullRebuild
    )
}

fn merge_into(last: &mut EventKind, next: &EventKind) -> bool {
    match (last, next) {
        (EventKind::TopologyChanged, EventKind::TopologyChanged)
        | (EventKind::SceneChanged, EventKind::SceneChanged) => true,
        (EventKind::PropertyChanged { nodes }, EventKind::PropertyChanged { nodes: more })
        | (EventKind::Refresh { nodes }, EventKind::Refresh { nodes: more }) => {
            extend_unique(nodes, more);
            true
        }
        (EventKind::FrameChanged(prev), EventKind::FrameChanged(info)) => {
            prev.frame_changed |= info.frame_changed;
            prev.playing = info.playing;
            true
        }
        _ => false,
    }
}

fn extend_unique(nodes: &mut Vec<NodeId>, more: &[NodeId]) {
    for id in more {
        if !nodes.contains(id) {
            nodes.push(*id);
        }
    }
}
