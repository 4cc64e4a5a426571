//! Stream sink contract.
//!
//! A sink receives `(chunk, done)` pairs in order. `done = true` is
//! emitted exactly once per successful run; it is not emitted when a run
//! ends in `confirmationNeeded` or an error. Providers without streaming
//! degrade to a single terminal `(text, true)` call.

use parking_lot::Mutex;

pub trait StreamSink: Send + Sync {
    fn emit(&self, chunk: &str, done: bool);
}

impl<F> StreamSink for F
where
    F: Fn(&str, bool) + Send + Sync,
{
    fn emit(&self, chunk: &str, done: bool) {
        self(chunk, done)
    }
}

/// Test sink that records every `(chunk, done)` pair.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<(String, bool)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, bool)> {
        self.events.lock().clone()
    }
}

impl StreamSink for CollectingSink {
    fn emit(&self, chunk: &str, done: bool) {
        self.events.lock().push((chunk.to_string(), done));
    }
}
