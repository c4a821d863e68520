//! Update Engine
//!
//! This module decides what runs when something changes.
//!
//! # Overview
//!
//! - [`Event`]s describe a change to one tree and wait in its [`EventQueue`].
//! - The [`UpdateScheduler`] drains the queue, selects the affected nodes and
//!   executes them in dependency order, one pass per event.
//! - Each node sees only a [`ProcessContext`] while it runs.
//! - Outcomes are reported per node to a [`FeedbackSink`].

mod context;
mod event;
mod feedback;
mod queue;
mod scheduler;

pub use context::ProcessContext;
pub use event::{Event, EventKind, FrameInfo};
pub use feedback::{ErrorRecord, FeedbackRecord, FeedbackSink, FeedbackStore, NullSink};
pub use queue::{coalesce, EventQueue, EventSender};
pub use scheduler::{PassReport, UpdateScheduler, MAX_FOLLOW_UP_ROUNDS};
