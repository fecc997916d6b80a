//! Progress reporting for long-running layer operations.

use tracing::{info, warn};

/// Receiver of progress for one operation at a time.
pub trait ProgressSink {
    fn init(&mut self, label: &str);
    fn update(&mut self, fraction: f64);
    fn end(&mut self);
    /// User-visible message, e.g. an error caught at the operation boundary.
    fn message(&mut self, text: &str);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn init(&mut self, _label: &str) {}
    fn update(&mut self, _fraction: f64) {}
    fn end(&mut self) {}
    fn message(&mut self, _text: &str) {}
}

/// Writes progress to the log every 10 %.
#[derive(Debug, Default)]
pub struct LogProgress {
    label: String,
    next_step: u32,
}

impl ProgressSink for LogProgress {
    fn init(&mut self, label: &str) {
        self.label = label.to_string();
        self.next_step = 1;
        info!("{}", label);
    }

    fn update(&mut self, fraction: f64) {
        let step = (fraction * 10.0).floor() as u32;
        if step >= self.next_step {
            info!("{} {}%", self.label, step * 10);
            self.next_step = step + 1;
        }
    }

    fn end(&mut self) {
        info!("{} done", self.label);
    }

    fn message(&mut self, text: &str) {
        warn!("{}", text);
    }
}

/// Scoped progress for one operation: `init` on start, `end` exactly once on
/// drop. Fractions are clamped to [0, 1] and never move backwards.
pub struct ProgressReporter<'a> {
    sink: &'a mut dyn ProgressSink,
    last: f64,
    ended: bool,
}

impl<'a> ProgressReporter<'a> {
    pub fn start(sink: &'a mut dyn ProgressSink, label: &str) -> Self {
        sink.init(label);
        sink.update(0.0);
        Self { sink, last: 0.0, ended: false }
    }

    pub fn update(&mut self, fraction: f64) {
        let fraction = if fraction.is_nan() { self.last } else { fraction.clamp(0.0, 1.0) };
        if fraction > self.last {
            self.last = fraction;
            self.sink.update(fraction);
        }
    }

    pub fn message(&mut self, text: &str) {
        self.sink.message(text);
    }

    /// Finalize now instead of at scope exit.
    pub fn finish(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if !self.ended {
            self.ended = true;
            self.sink.end();
        }
    }
}

impl Drop for ProgressReporter<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
