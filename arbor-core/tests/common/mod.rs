//! Fixture nodes and sinks shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use arbor_core::{
    match_long_repeat, DataKind, Dependent, ErrorRecord, FeedbackSink, FrameInfo, NodeBehavior,
    NodeError, NodeId, NodeSockets, ProcessContext, SocketData,
};

/// Counts how often a node ran.
#[derive(Debug, Clone, Default)]
pub struct Runs(Arc<AtomicUsize>);

impl Runs {
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Emits a number that the test can change from outside.
#[derive(Debug, Clone)]
pub struct Source {
    pub value: Arc<Mutex<f64>>,
    pub runs: Runs,
}

impl Source {
    pub fn new(value: f64) -> Self {
        Self {
            value: Arc::new(Mutex::new(value)),
            runs: Runs::default(),
        }
    }
}

impl NodeBehavior for Source {
    fn type_name(&self) -> &'static str {
        "Source"
    }

    fn init(&mut self, sockets: &mut NodeSockets) {
        sockets.add_output("value", DataKind::Numbers);
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeError> {
        self.runs.bump();
        ctx.set_output("value", SocketData::scalar(*self.value.lock()))
    }
}

/// Doubles every number.
#[derive(Debug, Clone, Default)]
pub struct Double {
    pub runs: Runs,
}

impl NodeBehavior for Double {
    fn type_name(&self) -> &'static str {
        "Double"
    }

    fn init(&mut self, sockets: &mut NodeSockets) {
        sockets.add_input("value", DataKind::Numbers);
        sockets.add_output("value", DataKind::Numbers);
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeError> {
        self.runs.bump();
        let numbers = ctx
            .input("value")?
            .as_numbers()
            .ok_or_else(|| NodeError::process("expected numbers"))?;
        let doubled: Vec<Vec<f64>> = numbers
            .iter()
            .map(|obj| obj.iter().map(|v| v * 2.0).collect())
            .collect();
        ctx.set_output("value", SocketData::Numbers(doubled))
    }
}

/// Adds two number lists object by object, repeating the shorter list.
#[derive(Debug, Clone, Default)]
pub struct Add {
    pub runs: Runs,
}

impl NodeBehavior for Add {
    fn type_name(&self) -> &'static str {
        "Add"
    }

    fn init(&mut self, sockets: &mut NodeSockets) {
        sockets.add_input("a", DataKind::Numbers);
        sockets
            .add_input("b", DataKind::Numbers)
            .set_default(Some(SocketData::scalar(0.0)));
        sockets.add_output("sum", DataKind::Numbers);
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeError> {
        self.runs.bump();
        let flat = |data: &SocketData| -> Result<Vec<f64>, NodeError> {
            let numbers = data
                .as_numbers()
                .ok_or_else(|| NodeError::process("expected numbers"))?;
            Ok(numbers.iter().flatten().copied().collect())
        };
        let a = flat(ctx.input("a")?)?;
        let b = flat(ctx.input("b")?)?;
        let matched = match_long_repeat(&[a, b]);
        let sum: Vec<f64> = matched[0].iter().zip(&matched[1]).map(|(x, y)| x + y).collect();
        ctx.set_output("sum", SocketData::Numbers(vec![sum]))
    }
}

/// Forwards its input; fails on demand.
#[derive(Debug, Clone, Default)]
pub struct Flaky {
    pub fail: Arc<AtomicBool>,
    pub runs: Runs,
}

impl Flaky {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl NodeBehavior for Flaky {
    fn type_name(&self) -> &'static str {
        "Flaky"
    }

    fn init(&mut self, sockets: &mut NodeSockets) {
        sockets
            .add_input("value", DataKind::Numbers)
            .set_default(Some(SocketData::scalar(1.0)));
        sockets.add_output("value", DataKind::Numbers);
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeError> {
        self.runs.bump();
        if self.fail.load(Ordering::SeqCst) {
            return Err(NodeError::process("division by zero"));
        }
        let value = ctx.input("value")?.clone();
        ctx.set_output("value", value)
    }
}

/// Reads the host scene.
#[derive(Debug, Clone, Default)]
pub struct SceneReader {
    pub runs: Runs,
}

impl NodeBehavior for SceneReader {
    fn type_name(&self) -> &'static str {
        "SceneReader"
    }

    fn init(&mut self, sockets: &mut NodeSockets) {
        sockets.add_output("value", DataKind::Numbers);
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeError> {
        self.runs.bump();
        ctx.set_output("value", SocketData::scalar(self.runs.get() as f64))
    }

    fn is_scene_dependent(&self) -> bool {
        true
    }
}

/// Records the frame details it was run with.
#[derive(Debug, Clone, Default)]
pub struct FrameReader {
    pub seen: Arc<Mutex<Vec<Option<FrameInfo>>>>,
}

impl NodeBehavior for FrameReader {
    fn type_name(&self) -> &'static str {
        "FrameReader"
    }

    fn init(&mut self, sockets: &mut NodeSockets) {
        sockets.add_output("value", DataKind::Numbers);
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeError> {
        self.seen.lock().push(ctx.frame());
        ctx.set_output("value", SocketData::scalar(0.0))
    }

    fn is_animation_dependent(&self) -> bool {
        true
    }
}

/// Accepts anything and takes on the kind of whatever feeds it.
#[derive(Debug, Clone, Default)]
pub struct Reroute;

impl NodeBehavior for Reroute {
    fn type_name(&self) -> &'static str {
        "Reroute"
    }

    fn init(&mut self, sockets: &mut NodeSockets) {
        sockets.add_input("in", DataKind::Any);
        sockets.add_output("out", DataKind::Any);
    }

    fn on_topology_update(&mut self, sockets: &mut NodeSockets) {
        let kind = sockets
            .input("in")
            .and_then(|s| s.upstream_kind())
            .unwrap_or(DataKind::Any);
        if let Some(out) = sockets.output_mut("out") {
            out.set_kind(kind);
        }
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeError> {
        let value = ctx.input("in")?.clone();
        ctx.set_output("out", value)
    }
}

/// Emits a constant but panics whenever the topology changes.
#[derive(Debug, Clone, Default)]
pub struct Brittle;

impl NodeBehavior for Brittle {
    fn type_name(&self) -> &'static str {
        "Brittle"
    }

    fn init(&mut self, sockets: &mut NodeSockets) {
        sockets.add_output("value", DataKind::Numbers);
    }

    fn on_topology_update(&mut self, _sockets: &mut NodeSockets) {
        panic!("lost track of sockets");
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeError> {
        ctx.set_output("value", SocketData::scalar(1.0))
    }
}

/// Needs an optional library.
#[derive(Debug, Clone, Default)]
pub struct Solver;

impl Dependent for Solver {
    fn required_libraries(&self) -> &[&'static str] {
        &["scipy"]
    }
}

impl NodeBehavior for Solver {
    fn type_name(&self) -> &'static str {
        "Solver"
    }

    fn init(&mut self, sockets: &mut NodeSockets) {
        sockets.add_output("value", DataKind::Numbers);
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeError> {
        ctx.set_output("value", SocketData::scalar(42.0))
    }

    fn as_dependent(&self) -> Option<&dyn Dependent> {
        Some(self)
    }
}

/// One `update_ui` call.
#[derive(Debug, Clone, PartialEq)]
pub struct UiCall {
    pub node: NodeId,
    pub error: Option<ErrorRecord>,
    pub duration: Option<Duration>,
}

/// Sink that remembers every call.
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<UiCall>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<UiCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, node: NodeId) -> Vec<UiCall> {
        let calls = self.calls.lock();
        calls.iter().filter(|c| c.node == node).cloned().collect()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl FeedbackSink for RecordingSink {
    fn update_ui(&self, node: NodeId, error: Option<&ErrorRecord>, duration: Option<Duration>) {
        self.calls.lock().push(UiCall {
            node,
            error: error.cloned(),
            duration,
        });
    }
}
