//! Shared helpers for GPU integration tests

#![allow(dead_code)]

use microcompute::{Context, ContextConfig, DebugLevel, DebugSink};
use parking_lot::Mutex;
use std::sync::Arc;

/// Tolerance for floating point comparisons
pub const FLOAT_TOLERANCE: f32 = 0.0001;

/// Sink that keeps every diagnostic for later inspection
#[derive(Clone, Default)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<(DebugLevel, String)>>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<(DebugLevel, String)> {
        self.messages.lock().clone()
    }

    pub fn count_at(&self, level: DebugLevel) -> usize {
        self.messages.lock().iter().filter(|(l, _)| *l == level).count()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl DebugSink for RecordingSink {
    fn emit(&self, level: DebugLevel, message: &str) {
        self.messages.lock().push((level, message.to_string()));
    }
}

/// Open a context for tests, or `None` when the machine has no usable adapter
pub fn init_gpu() -> Option<Context> {
    init_gpu_with_sink().map(|(context, _)| context)
}

pub fn init_gpu_with_sink() -> Option<(Context, RecordingSink)> {
    let _ = env_logger::builder().is_test(true).try_init();

    let sink = RecordingSink::default();
    match Context::start_with_sink(&ContextConfig::from_env(), sink.clone()) {
        Ok(context) => Some((context, sink)),
        Err(e) => {
            println!("No GPU context: {}", e);
            None
        }
    }
}

pub fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() < FLOAT_TOLERANCE,
            "element {}: got {}, expected {}",
            i,
            a,
            e
        );
    }
}
