pub mod batch;
pub mod orchestrator;
pub mod signal;

use crate::errors::SimResult;

/// Receives `(percent, stage)` progress reports from a run.
///
/// Returning an error unwinds the reporting run at its next check point;
/// the controller uses this to stop a canceled run promptly.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: f64, stage: &str) -> SimResult<()>;
}

impl<F> ProgressSink for F
where
    F: Fn(f64, &str) -> SimResult<()> + Send + Sync,
{
    #[inline]
    fn report(&self, progress: f64, stage: &str) -> SimResult<()> {
        self(progress, stage)
    }
}
