//! Caller-supplied observability hook for long-running operations.
//!
//! Reporting is best effort: implementations must not influence the
//! computed transform or offset, and a no-op sink is always valid.

use std::time::Instant;

/// Receives stage progress and named scalar metrics.
pub trait ProgressSink: Sync {
    /// `fraction` in `[0, 1]` of the named stage.
    fn progress(&self, _stage: &str, _fraction: f64) {}

    /// A named diagnostic value, e.g. the residual RMS after a stage.
    fn metric(&self, _name: &str, _value: f64) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Emits progress and metrics as `tracing` events, tagged with the time
/// elapsed since the sink was created.
#[derive(Debug, Clone)]
pub struct TracingProgress {
    start: Instant,
}

impl Default for TracingProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl TracingProgress {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Seconds since construction.
    pub fn elapsed_s(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl ProgressSink for TracingProgress {
    fn progress(&self, stage: &str, fraction: f64) {
        if fraction >= 1.0 {
            tracing::info!(stage, elapsed_s = self.elapsed_s(), "stage complete");
        } else {
            tracing::debug!(stage, fraction, elapsed_s = self.elapsed_s(), "progress");
        }
    }

    fn metric(&self, name: &str, value: f64) {
        tracing::info!(metric = name, value, elapsed_s = self.elapsed_s(), "metric");
    }
}
