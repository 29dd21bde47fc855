use std::{future::Future, io::Write, time::Instant};

use crate::stdio::Sink;

/// Per-call timing, reported on the stderr channel as
/// `<function> took: <ms>ms`. Disabled profilers add no overhead.
#[derive(Clone)]
pub struct Profiler {
    sink: Option<Sink>,
}

impl Profiler {
    pub fn new(enabled: bool, sink: Sink) -> Self {
        Self {
            sink: enabled.then_some(sink),
        }
    }

    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub async fn measure<F: Future>(&self, function: &str, call: F) -> F::Output {
        let Some(sink) = &self.sink else {
            return call.await;
        };
        let start = Instant::now();
        let out = call.await;
        let line = format!("{function} took: {}ms\n", start.elapsed().as_millis());
        let _ = sink.clone().write_all(line.as_bytes());
        out
    }
}
