use crate::config::EngineConfig;
use crate::engine::signal::RunSignal;
use crate::engine::ProgressSink;
use crate::errors::{SimResult, SimulationError};
use crate::models::jump_diffusion::PathSimulator;
use crate::models::payout::evaluate_payout;
use crate::state::{BatchResult, SimulationParameters, TrialOutcome, MAX_SAMPLE_PATHS};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// One scheduling unit handed to a `BatchRunner`.
#[derive(Debug, Clone, Copy)]
pub struct BatchRequest<'a> {
    pub params: &'a SimulationParameters,
    pub batch_index: usize,
    pub batch_size: usize,
}

/// Explicit batch outcome; the orchestrator decides what to retry.
#[derive(Debug)]
pub enum BatchOutcome {
    Completed(BatchResult),
    Canceled,
    Failed(SimulationError),
}

/// Runs a bounded group of trials synchronously.
pub trait BatchRunner: Send {
    fn run_batch(
        &mut self,
        request: &BatchRequest<'_>,
        progress: Option<&dyn ProgressSink>,
        signal: Option<&RunSignal>,
    ) -> BatchOutcome;
}

/// Production runner: path simulation + payout per trial.
pub struct PathBatchExecutor {
    simulator: PathSimulator,
    rng: StdRng,
}

impl PathBatchExecutor {
    pub fn new(simulator: PathSimulator, rng: StdRng) -> Self {
        Self { simulator, rng }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(PathSimulator::new(config.jump_model()), config.rng())
    }
}

/// Keep every n-th path so at most MAX_SAMPLE_PATHS survive a batch.
#[inline]
pub fn sample_stride(batch_size: usize) -> usize {
    let max_samples = MAX_SAMPLE_PATHS.min(batch_size).max(1);
    batch_size.div_ceil(max_samples).max(1)
}

/// Report roughly every 10% of a batch.
#[inline]
pub fn progress_stride(batch_size: usize) -> usize {
    batch_size.div_ceil(10).max(1)
}

impl BatchRunner for PathBatchExecutor {
    fn run_batch(
        &mut self,
        request: &BatchRequest<'_>,
        progress: Option<&dyn ProgressSink>,
        signal: Option<&RunSignal>,
    ) -> BatchOutcome {
        let params = request.params;
        let batch_size = request.batch_size;
        let max_samples = MAX_SAMPLE_PATHS.min(batch_size);
        let sample_every = sample_stride(batch_size);
        let report_every = progress_stride(batch_size);

        let mut result = BatchResult::with_capacity(batch_size);
        let mut skipped: usize = 0;

        for i in 0..batch_size {
            if signal.is_some_and(RunSignal::is_canceled) {
                return BatchOutcome::Canceled;
            }

            let path = match self.simulator.simulate(params, &mut self.rng) {
                Ok(p) => p,
                Err(e) => {
                    skipped += 1;
                    tracing::debug!(batch = request.batch_index, trial = i, error = %e, "trial skipped");
                    continue;
                }
            };

            let Some(&final_price) = path.last() else {
                skipped += 1;
                continue;
            };
            let payout = evaluate_payout(final_price, params.initial_price, params);
            result.push(TrialOutcome { final_price, payout });

            if result.sample_paths.len() < max_samples && i % sample_every == 0 {
                result.sample_paths.push(path);
            }

            if i % report_every == 0 {
                if let Some(sink) = progress {
                    let pct = i as f64 / batch_size as f64 * 100.0;
                    let stage = format!("processing batch {} ({i}/{batch_size})", request.batch_index + 1);
                    if let Err(e) = sink.report(pct, &stage) {
                        return if e.is_canceled() {
                            BatchOutcome::Canceled
                        } else {
                            BatchOutcome::Failed(e)
                        };
                    }
                }
            }
        }

        if skipped > 0 {
            tracing::warn!(
                batch = request.batch_index,
                skipped,
                completed = result.len(),
                "batch finished with skipped trials"
            );
        }

        BatchOutcome::Completed(result)
    }
}

/// Run one batch with a fresh entropy-seeded RNG.
pub fn run_batch(
    params: &SimulationParameters,
    batch_size: usize,
    on_progress: Option<&dyn ProgressSink>,
    signal: Option<&RunSignal>,
    use_jumps: bool,
) -> SimResult<BatchResult> {
    let simulator = if use_jumps {
        PathSimulator::with_default_jumps()
    } else {
        PathSimulator::diffusion()
    };
    let mut executor = PathBatchExecutor::new(simulator, StdRng::from_entropy());
    let request = BatchRequest {
        params,
        batch_index: 0,
        batch_size,
    };
    match executor.run_batch(&request, on_progress, signal) {
        BatchOutcome::Completed(result) => Ok(result),
        BatchOutcome::Canceled => Err(SimulationError::Canceled {
            completed_simulations: 0,
        }),
        BatchOutcome::Failed(e) => Err(e),
    }
}
