use crate::config::EngineConfig;
use crate::engine::batch::{BatchOutcome, BatchRequest, BatchRunner, PathBatchExecutor};
use crate::engine::signal::RunSignal;
use crate::engine::ProgressSink;
use crate::errors::{SimResult, SimulationError};
use crate::math::stats;
use crate::risk::limits::{self, MemoryCheck, MemoryProbe, SystemMemory};
use crate::risk::metrics::compute_risk_metrics;
use crate::state::{
    PricePath, SimulationParameters, SimulationResult, SimulationStatistics, MIN_SIMULATIONS,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Runs above this size use 2000-trial batches.
pub const LARGE_RUN: usize = 50_000;
/// Runs above this size use 1000-trial batches.
pub const MEDIUM_RUN: usize = 10_000;
/// Runs above this size get a slow-run notice from `optimize_parameters`.
const SLOW_RUN: usize = 100_000;

/// Adaptive batch size: bounds peak per-batch allocation.
#[inline]
pub fn adaptive_batch_size(num_simulations: usize) -> usize {
    if num_simulations > LARGE_RUN {
        2_000
    } else if num_simulations > MEDIUM_RUN {
        1_000
    } else {
        num_simulations.clamp(1, 500)
    }
}

#[inline]
pub fn batch_count(num_simulations: usize) -> usize {
    num_simulations.div_ceil(adaptive_batch_size(num_simulations))
}

/// Partitions a run into sequential batches, retries failed batches and
/// aggregates the merged outputs into a `SimulationResult`.
///
/// Batches never run concurrently. Between batches the orchestrator yields
/// to the runtime and honors a pending pause; cancellation is observed at
/// every trial and batch boundary.
pub struct Orchestrator<B: BatchRunner> {
    runner: B,
    max_retries: u32,
    retry_backoff: Duration,
    memory: Option<Arc<dyn MemoryProbe>>,
}

impl Orchestrator<PathBatchExecutor> {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(PathBatchExecutor::from_config(config), config)
            .with_memory_probe(config.memory_probe())
    }
}

impl<B: BatchRunner> Orchestrator<B> {
    /// Memory checks are skipped until a probe is attached.
    pub fn new(runner: B, config: &EngineConfig) -> Self {
        Self {
            runner,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
            memory: None,
        }
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory = Some(probe);
        self
    }

    fn memory_check(&self, threshold: f64) -> MemoryCheck {
        limits::check_memory_usage(self.memory.as_ref().and_then(|m| m.snapshot()), threshold)
    }

    pub async fn run(
        &mut self,
        params: &SimulationParameters,
        progress: Option<&dyn ProgressSink>,
        signal: Option<&RunSignal>,
    ) -> SimResult<SimulationResult> {
        let started = Instant::now();
        params.validate()?;

        if let MemoryCheck::Blocked { usage_ratio } = self.memory_check(limits::START_USAGE_LIMIT) {
            return Err(SimulationError::InsufficientMemory(format!(
                "memory usage at {:.0}% of limit before start",
                usage_ratio * 100.0
            )));
        }

        let total = params.num_simulations;
        let batch_size = adaptive_batch_size(total);
        let num_batches = batch_count(total);

        tracing::info!(
            simulations = total,
            batch_size,
            batches = num_batches,
            "simulation starting"
        );

        let mut final_prices: Vec<f64> = Vec::with_capacity(total);
        let mut payouts: Vec<f64> = Vec::with_capacity(total);
        let mut price_paths: Vec<PricePath> = Vec::new();
        let mut attempted: usize = 0;
        let mut completed: usize = 0;

        report(progress, 0.0, "initializing simulation", completed)?;

        for batch_index in 0..num_batches {
            if is_canceled(signal) {
                return Err(canceled(completed));
            }

            let current = batch_size.min(total - attempted);
            let request = BatchRequest {
                params,
                batch_index,
                batch_size: current,
            };

            // Batch-local percent -> run-wide percent
            let base = completed;
            let scoped = |pct: f64, stage: &str| -> SimResult<()> {
                match progress {
                    Some(sink) => {
                        let done = base as f64 + pct / 100.0 * current as f64;
                        sink.report((done / total as f64 * 100.0).min(100.0), stage)
                    }
                    None => Ok(()),
                }
            };

            let mut attempt: u32 = 0;
            let batch = loop {
                match self
                    .runner
                    .run_batch(&request, Some(&scoped as &dyn ProgressSink), signal)
                {
                    BatchOutcome::Completed(batch) => break batch,
                    BatchOutcome::Canceled => return Err(canceled(completed)),
                    BatchOutcome::Failed(e) if !e.is_retryable() => {
                        return Err(if e.is_canceled() { canceled(completed) } else { e });
                    }
                    BatchOutcome::Failed(e) => {
                        if attempt >= self.max_retries {
                            tracing::error!(batch = batch_index, attempts = attempt + 1, error = %e, "batch failed");
                            return Err(SimulationError::BatchExecutionFailed {
                                batch_index,
                                attempts: attempt + 1,
                                reason: e.to_string(),
                            });
                        }
                        attempt += 1;
                        tracing::warn!(
                            batch = batch_index,
                            retry = attempt,
                            error = %e,
                            "batch failed, retrying after backoff"
                        );
                        tokio::time::sleep(self.retry_backoff).await;
                        if is_canceled(signal) {
                            return Err(canceled(completed));
                        }
                    }
                }
            };

            attempted += current;
            completed += batch.len();
            final_prices.extend_from_slice(&batch.final_prices);
            payouts.extend_from_slice(&batch.payouts);
            price_paths.extend(batch.sample_paths);

            tracing::debug!(batch = batch_index, completed, attempted, "batch merged");

            report(
                progress,
                completed as f64 / total as f64 * 100.0,
                &format!("simulating ({completed}/{total})"),
                completed,
            )?;

            if let MemoryCheck::Blocked { usage_ratio } = self.memory_check(limits::WARN_USAGE_LIMIT) {
                tracing::warn!(
                    usage_pct = usage_ratio * 100.0,
                    batch = batch_index,
                    "memory usage high"
                );
            }

            if batch_index + 1 < num_batches {
                tokio::task::yield_now().await;
                if let Some(s) = signal {
                    if s.is_paused() {
                        tracing::info!(batch = batch_index, "paused at batch boundary");
                        s.wait_if_paused().await;
                        tracing::info!(batch = batch_index, "continuing after pause");
                    }
                }
            }
        }

        report(progress, 95.0, "analyzing results", completed)?;

        if final_prices.is_empty() {
            tracing::error!(attempted, "every trial failed");
            return Err(SimulationError::EmptyResultSet);
        }

        let result = summarize(params, final_prices, payouts, price_paths, started);

        tracing::info!(
            completed = result.statistics.completed_simulations,
            payout_probability = result.payout_probability,
            seconds = result.statistics.execution_time,
            "simulation finished"
        );

        report(progress, 100.0, "simulation complete", completed)?;
        Ok(result)
    }
}

#[inline]
fn is_canceled(signal: Option<&RunSignal>) -> bool {
    signal.is_some_and(RunSignal::is_canceled)
}

#[inline]
fn canceled(completed: usize) -> SimulationError {
    SimulationError::Canceled {
        completed_simulations: completed,
    }
}

/// Forward a report; a sink-side cancel carries the run's completed count.
fn report(
    progress: Option<&dyn ProgressSink>,
    pct: f64,
    stage: &str,
    completed: usize,
) -> SimResult<()> {
    match progress {
        Some(sink) => sink.report(pct, stage).map_err(|e| {
            if e.is_canceled() {
                canceled(completed)
            } else {
                e
            }
        }),
        None => Ok(()),
    }
}

/// Totals, risk metrics and summary statistics over the merged trials.
/// All ratios use the completed trial count.
fn summarize(
    params: &SimulationParameters,
    final_prices: Vec<f64>,
    payouts: Vec<f64>,
    price_paths: Vec<PricePath>,
    started: Instant,
) -> SimulationResult {
    let trials = payouts.len();
    let n = trials as f64;
    let initial = params.initial_price;

    let total_payout: f64 = payouts.iter().sum();
    let average_payout = total_payout / n;
    let payout_count = payouts.iter().filter(|&&p| p > 0.0).count();
    let payout_probability = payout_count as f64 / n;

    let total_premium = params.premium_per_trial() * n;
    let expected_loss = total_payout - total_premium;

    let risk_metrics = compute_risk_metrics(&final_prices, &payouts, initial);

    let returns: Vec<f64> = final_prices.iter().map(|p| (p - initial) / initial).collect();

    let statistics = SimulationStatistics {
        avg_final_price: stats::mean(&final_prices),
        std_final_price: stats::std_dev(&final_prices),
        min_final_price: stats::min_value(&final_prices),
        max_final_price: stats::max_value(&final_prices),
        avg_return: stats::mean(&returns),
        std_return: stats::std_dev(&returns),
        total_premium,
        net_result: total_premium - total_payout,
        loss_ratio: if total_premium > 0.0 {
            total_payout / total_premium
        } else {
            0.0
        },
        completed_simulations: trials,
        execution_time: started.elapsed().as_secs_f64(),
    };

    SimulationResult {
        final_prices,
        payouts,
        price_paths,
        total_payout,
        average_payout,
        payout_probability,
        expected_loss,
        risk_metrics,
        statistics,
    }
}

/// Primary entry point: one run with default engine settings.
pub async fn run_simulation(
    params: &SimulationParameters,
    on_progress: Option<&dyn ProgressSink>,
    signal: Option<&RunSignal>,
    use_jumps: bool,
) -> SimResult<SimulationResult> {
    let config = EngineConfig {
        use_jumps,
        ..EngineConfig::default()
    };
    Orchestrator::from_config(&config)
        .run(params, on_progress, signal)
        .await
}

/// Fit `num_simulations` to the host's free memory. Never mutates the input.
pub fn optimize_parameters(params: &SimulationParameters) -> SimulationParameters {
    optimize_parameters_with(params, &SystemMemory)
}

/// Fit `num_simulations` to the probe's free memory, never below the
/// minimum run size.
pub fn optimize_parameters_with(
    params: &SimulationParameters,
    probe: &dyn MemoryProbe,
) -> SimulationParameters {
    let mut optimized = *params;

    if let Some(snapshot) = probe.snapshot() {
        let max_trials = limits::max_trials_for(&snapshot, params.time_horizon);
        if params.num_simulations > max_trials {
            let adjusted = max_trials.max(MIN_SIMULATIONS);
            tracing::warn!(
                requested = params.num_simulations,
                adjusted,
                "reducing simulation count to fit memory"
            );
            optimized.num_simulations = adjusted;
        }
    }

    if optimized.num_simulations > SLOW_RUN {
        tracing::info!(
            simulations = optimized.num_simulations,
            "large simulation, expect a long run"
        );
    }

    optimized
}

/// Sanity checks on a finished result. Returns whether it can be trusted.
pub fn validate_result(result: &SimulationResult, params: &SimulationParameters) -> bool {
    match check_result(result, params) {
        Ok(()) => {
            tracing::debug!("simulation result validated");
            true
        }
        Err(reason) => {
            tracing::warn!(reason = %reason, "simulation result rejected");
            false
        }
    }
}

fn check_result(result: &SimulationResult, params: &SimulationParameters) -> Result<(), String> {
    if result.final_prices.is_empty() {
        return Err("no final prices".into());
    }
    if result.payouts.len() != result.final_prices.len() {
        return Err(format!(
            "payouts ({}) and final prices ({}) differ in length",
            result.payouts.len(),
            result.final_prices.len()
        ));
    }
    if result.final_prices.len() > params.num_simulations {
        return Err(format!(
            "{} results exceed the {} requested simulations",
            result.final_prices.len(),
            params.num_simulations
        ));
    }
    let bad_prices = result
        .final_prices
        .iter()
        .filter(|p| !p.is_finite() || **p <= 0.0)
        .count();
    if bad_prices > 0 {
        return Err(format!("{bad_prices} invalid final prices"));
    }
    let bad_payouts = result
        .payouts
        .iter()
        .filter(|p| !p.is_finite() || **p < 0.0)
        .count();
    if bad_payouts > 0 {
        return Err(format!("{bad_payouts} invalid payouts"));
    }
    if !(0.0..=1.0).contains(&result.payout_probability) {
        return Err(format!(
            "payout probability {} outside [0, 1]",
            result.payout_probability
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MIN_PRICE;
    use crate::risk::limits::FixedBudget;
    use crate::state::{BatchResult, TrialOutcome};
    use std::sync::Mutex;

    fn params(num_simulations: usize) -> SimulationParameters {
        SimulationParameters {
            initial_price: 100.0,
            volatility: 30.0,
            drift: 0.0,
            time_horizon: 5,
            num_simulations,
            trigger_threshold: 5.0,
            insurance_premium: 1.0,
            payout_amount: 20.0,
        }
    }

    fn seeded(seed: u64) -> EngineConfig {
        EngineConfig {
            seed: Some(seed),
            ..EngineConfig::default()
        }
    }

    /// Deterministic runner: fixed outcomes, optional scripted failures.
    struct ScriptedRunner {
        sizes: Vec<usize>,
        failures_left: u32,
        outcome: TrialOutcome,
        keep_every: usize,
    }

    impl ScriptedRunner {
        fn new() -> Self {
            Self {
                sizes: Vec::new(),
                failures_left: 0,
                outcome: TrialOutcome { final_price: 90.0, payout: 20.0 },
                keep_every: 1,
            }
        }
    }

    impl BatchRunner for ScriptedRunner {
        fn run_batch(
            &mut self,
            request: &BatchRequest<'_>,
            _progress: Option<&dyn ProgressSink>,
            signal: Option<&RunSignal>,
        ) -> BatchOutcome {
            self.sizes.push(request.batch_size);
            if signal.is_some_and(RunSignal::is_canceled) {
                return BatchOutcome::Canceled;
            }
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return BatchOutcome::Failed(SimulationError::Divergence { step: 1, price: f64::NAN });
            }
            let mut b = BatchResult::with_capacity(request.batch_size);
            for i in 0..request.batch_size {
                if i % self.keep_every == 0 {
                    b.push(self.outcome);
                }
            }
            BatchOutcome::Completed(b)
        }
    }

    #[test]
    fn test_adaptive_batch_sizes() {
        assert_eq!(adaptive_batch_size(100), 100);
        assert_eq!(adaptive_batch_size(500), 500);
        assert_eq!(adaptive_batch_size(10_000), 500);
        assert_eq!(adaptive_batch_size(10_001), 1_000);
        assert_eq!(adaptive_batch_size(50_000), 1_000);
        assert_eq!(adaptive_batch_size(50_001), 2_000);
        assert_eq!(batch_count(100_000), 50);
        assert_eq!(batch_count(5_000), 10);
        assert_eq!(batch_count(1_001), 3);
    }

    #[tokio::test]
    async fn test_run_shapes_and_invariants() {
        let p = params(1_000);
        let mut orch = Orchestrator::from_config(&seeded(1));
        let r = orch.run(&p, None, None).await.expect("run");

        assert_eq!(r.final_prices.len(), r.payouts.len());
        assert_eq!(r.statistics.completed_simulations, r.final_prices.len());
        assert!(r.statistics.completed_simulations <= p.num_simulations);
        assert_eq!(r.price_paths.len(), 20, "10 samples for each of 2 batches");
        assert!(r
            .price_paths
            .iter()
            .flatten()
            .all(|&x| x.is_finite() && x >= MIN_PRICE));

        for (&price, &payout) in r.final_prices.iter().zip(&r.payouts) {
            let decline = (p.initial_price - price) / p.initial_price * 100.0;
            assert_eq!(payout == p.payout_amount, decline >= p.trigger_threshold);
            assert!(payout == 0.0 || payout == p.payout_amount);
        }

        let hits = r.payouts.iter().filter(|&&x| x > 0.0).count();
        assert!((r.payout_probability - hits as f64 / r.payouts.len() as f64).abs() < 1e-12);
        assert!((0.0..=1.0).contains(&r.payout_probability));
        assert!(validate_result(&r, &p));
    }

    #[tokio::test]
    async fn test_zero_volatility_never_pays() {
        let p = SimulationParameters {
            initial_price: 100_000.0,
            volatility: 0.0,
            drift: 0.0,
            time_horizon: 10,
            num_simulations: 100,
            trigger_threshold: 5.0,
            insurance_premium: 1.0,
            payout_amount: 1_000_000.0,
        };
        let r = run_simulation(&p, None, None, false).await.expect("run");
        assert!(r.final_prices.iter().all(|&x| x == 100_000.0));
        assert!(r.price_paths.iter().flatten().all(|&x| x == 100_000.0));
        assert_eq!(r.payout_probability, 0.0);
        assert_eq!(r.total_payout, 0.0);
        assert_eq!(r.statistics.total_premium, p.premium_per_trial() * 100.0);
        assert_eq!(r.expected_loss, -r.statistics.total_premium);
        assert_eq!(r.statistics.loss_ratio, 0.0);
    }

    #[tokio::test]
    async fn test_full_decline_trigger_never_pays() {
        let p = SimulationParameters {
            volatility: 200.0,
            drift: -50.0,
            trigger_threshold: 100.0,
            time_horizon: 252,
            ..params(200)
        };
        let r = run_simulation(&p, None, None, true).await.expect("run");
        assert_eq!(r.payout_probability, 0.0);
    }

    #[tokio::test]
    async fn test_large_run_uses_fifty_batches() {
        let runner = ScriptedRunner::new();
        let mut orch = Orchestrator::new(runner, &EngineConfig::default());
        let r = orch.run(&params(100_000), None, None).await.expect("run");
        assert_eq!(orch.runner.sizes.len(), 50);
        assert!(orch.runner.sizes.iter().all(|&s| s == 2_000));
        assert_eq!(r.statistics.completed_simulations, 100_000);
    }

    #[tokio::test]
    async fn test_last_batch_is_remainder() {
        let mut orch = Orchestrator::new(ScriptedRunner::new(), &EngineConfig::default());
        orch.run(&params(1_250), None, None).await.expect("run");
        assert_eq!(orch.runner.sizes, vec![500, 500, 250]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_retried_then_succeeds() {
        let mut runner = ScriptedRunner::new();
        runner.failures_left = 2;
        let mut orch = Orchestrator::new(runner, &EngineConfig::default());

        let before = Instant::now();
        let r = orch.run(&params(100), None, None).await.expect("retries should recover");
        assert_eq!(orch.runner.sizes.len(), 3);
        assert_eq!(r.statistics.completed_simulations, 100);
        assert!(before.elapsed() >= Duration::from_secs(2), "two 1s backoffs");
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_fails_after_three_retries() {
        let mut runner = ScriptedRunner::new();
        runner.failures_left = u32::MAX;
        let mut orch = Orchestrator::new(runner, &EngineConfig::default());

        let err = orch.run(&params(1_000), None, None).await.expect_err("should fail");
        match err {
            SimulationError::BatchExecutionFailed { batch_index, attempts, .. } => {
                assert_eq!(batch_index, 0);
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(orch.runner.sizes.len(), 4, "first attempt + 3 retries");
    }

    #[tokio::test]
    async fn test_skipped_trials_shrink_the_sample_consistently() {
        let mut runner = ScriptedRunner::new();
        runner.keep_every = 2;
        let mut orch = Orchestrator::new(runner, &EngineConfig::default());
        let p = params(1_000);
        let r = orch.run(&p, None, None).await.expect("run");

        assert_eq!(r.statistics.completed_simulations, 500);
        assert_eq!(r.final_prices.len(), 500);
        assert_eq!(r.payout_probability, 1.0);
        assert!((r.average_payout - 20.0).abs() < 1e-12);
        // premium is charged on the trials that actually completed
        assert!((r.statistics.total_premium - p.premium_per_trial() * 500.0).abs() < 1e-9);
        assert!((r.statistics.loss_ratio - 20.0 * 500.0 / r.statistics.total_premium).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_all_trials_failing_is_empty_result() {
        struct Empty;
        impl BatchRunner for Empty {
            fn run_batch(
                &mut self,
                _request: &BatchRequest<'_>,
                _progress: Option<&dyn ProgressSink>,
                _signal: Option<&RunSignal>,
            ) -> BatchOutcome {
                BatchOutcome::Completed(BatchResult::default())
            }
        }
        let mut orch = Orchestrator::new(Empty, &EngineConfig::default());
        let err = orch.run(&params(300), None, None).await.expect_err("empty");
        assert_eq!(err, SimulationError::EmptyResultSet);
    }

    /// Records which batches were started and reports mid-batch progress.
    struct GatedRunner {
        inner: ScriptedRunner,
        started: Arc<Mutex<Vec<usize>>>,
    }

    impl BatchRunner for GatedRunner {
        fn run_batch(
            &mut self,
            request: &BatchRequest<'_>,
            progress: Option<&dyn ProgressSink>,
            signal: Option<&RunSignal>,
        ) -> BatchOutcome {
            self.started.lock().expect("lock").push(request.batch_index);
            if let Some(sink) = progress {
                if let Err(e) = sink.report(50.0, "mid-batch") {
                    return BatchOutcome::Failed(e);
                }
            }
            self.inner.run_batch(request, progress, signal)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_takes_effect_at_batch_boundary() {
        let signal = RunSignal::new();
        let started = Arc::new(Mutex::new(Vec::new()));
        let stages = Mutex::new(Vec::new());
        let sink = |_pct: f64, stage: &str| -> SimResult<()> {
            stages.lock().expect("lock").push(stage.to_string());
            // pause requested while the first batch is still running
            if stage == "mid-batch" && started.lock().expect("lock").len() == 1 {
                signal.pause();
            }
            Ok(())
        };
        let runner = GatedRunner {
            inner: ScriptedRunner::new(),
            started: started.clone(),
        };
        let mut orch = Orchestrator::new(runner, &EngineConfig::default());
        let p = params(1_000);

        let run = orch.run(&p, Some(&sink), Some(&signal));
        let driver = async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            assert!(signal.is_paused());
            assert_eq!(
                *started.lock().expect("lock"),
                vec![0],
                "second batch must not start while paused"
            );
            assert!(
                stages.lock().expect("lock").iter().any(|s| s == "simulating (500/1000)"),
                "first batch should finish and merge despite the pause"
            );
            signal.resume();
        };

        let (result, ()) = tokio::join!(run, driver);
        let r = result.expect("run completes after resume");
        assert_eq!(r.statistics.completed_simulations, 1_000);
        assert_eq!(*started.lock().expect("lock"), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_cancel_after_second_batch() {
        let signal = RunSignal::new();
        let sink = |pct: f64, stage: &str| -> SimResult<()> {
            if stage.starts_with("simulating") && pct >= 20.0 {
                signal.cancel();
            }
            Ok(())
        };
        let mut orch = Orchestrator::new(ScriptedRunner::new(), &EngineConfig::default());
        let err = orch
            .run(&params(5_000), Some(&sink), Some(&signal))
            .await
            .expect_err("canceled");
        assert_eq!(err, SimulationError::Canceled { completed_simulations: 1_000 });
        assert_eq!(orch.runner.sizes.len(), 2);
    }

    #[tokio::test]
    async fn test_progress_is_run_wide_and_monotonic() {
        let seen = Mutex::new(Vec::new());
        let sink = |pct: f64, stage: &str| -> SimResult<()> {
            seen.lock().expect("lock").push((pct, stage.to_string()));
            Ok(())
        };
        let mut orch = Orchestrator::from_config(&seeded(9));
        orch.run(&params(1_000), Some(&sink), None).await.expect("run");

        let seen = seen.into_inner().expect("lock");
        let analyzing = seen
            .iter()
            .position(|(_, stage)| stage == "analyzing results")
            .expect("analysis stage reported");
        let simulating: Vec<f64> = seen[..analyzing].iter().map(|(p, _)| *p).collect();

        assert_eq!(simulating.first().copied(), Some(0.0));
        assert_eq!(simulating.last().copied(), Some(100.0));
        assert!(
            simulating.windows(2).all(|w| w[0] <= w[1]),
            "progress went backwards: {simulating:?}"
        );
        // batch-local 50% of the second batch is 75% of the run
        assert!(simulating.contains(&75.0));
        assert_eq!(seen[analyzing].0, 95.0);
        assert_eq!(seen.last().map(|(p, s)| (*p, s.as_str())), Some((100.0, "simulation complete")));
    }

    #[tokio::test]
    async fn test_memory_pressure_blocks_start() {
        let probe = Arc::new(FixedBudget { limit_bytes: 100, used_bytes: 90 });
        let mut orch = Orchestrator::new(ScriptedRunner::new(), &EngineConfig::default())
            .with_memory_probe(probe);
        let err = orch.run(&params(100), None, None).await.expect_err("no memory");
        assert_eq!(err.kind(), "insufficient_memory");
        assert!(orch.runner.sizes.is_empty(), "no batch may start");
    }

    #[tokio::test]
    async fn test_invalid_params_rejected_before_running() {
        let mut orch = Orchestrator::new(ScriptedRunner::new(), &EngineConfig::default());
        let err = orch.run(&params(10), None, None).await.expect_err("invalid");
        assert_eq!(err.kind(), "invalid_parameters");
    }

    #[test]
    fn test_optimize_lowers_count_without_mutating_input() {
        let p = SimulationParameters {
            num_simulations: 1_000_000,
            time_horizon: 252,
            ..params(100)
        };
        // 1 MB budget -> 0.8 MB / 2032 B ~ 412 trials
        let probe = FixedBudget::from_mb(1.0);
        let o = optimize_parameters_with(&p, &probe);
        assert_eq!(p.num_simulations, 1_000_000);
        assert_eq!(o.num_simulations, (0.8 * 1024.0 * 1024.0 / 2032.0) as usize);
        assert_eq!(o.time_horizon, p.time_horizon);
    }

    #[test]
    fn test_optimize_respects_minimum() {
        let p = params(10_000);
        let o = optimize_parameters_with(&p, &FixedBudget { limit_bytes: 10, used_bytes: 0 });
        assert_eq!(o.num_simulations, MIN_SIMULATIONS);
    }

    #[test]
    fn test_optimize_without_introspection_is_identity() {
        struct Blind;
        impl MemoryProbe for Blind {
            fn snapshot(&self) -> Option<limits::MemorySnapshot> {
                None
            }
        }
        let p = params(500_000);
        assert_eq!(optimize_parameters_with(&p, &Blind), p);
    }

    #[tokio::test]
    async fn test_validate_result_rejects_corruption() {
        let p = params(200);
        let mut orch = Orchestrator::from_config(&seeded(4));
        let good = orch.run(&p, None, None).await.expect("run");
        assert!(validate_result(&good, &p));

        let mut r = good.clone();
        r.payouts.pop();
        assert!(!validate_result(&r, &p));

        let mut r = good.clone();
        r.final_prices[0] = f64::NAN;
        assert!(!validate_result(&r, &p));

        let mut r = good.clone();
        r.payouts[0] = -1.0;
        assert!(!validate_result(&r, &p));

        let mut r = good.clone();
        r.payout_probability = 1.5;
        assert!(!validate_result(&r, &p));

        let mut r = good;
        r.final_prices.clear();
        r.payouts.clear();
        assert!(!validate_result(&r, &p));
    }

    #[tokio::test]
    async fn test_seeded_runs_repeat() {
        let p = params(300);
        let a = Orchestrator::from_config(&seeded(77)).run(&p, None, None).await.expect("a");
        let b = Orchestrator::from_config(&seeded(77)).run(&p, None, None).await.expect("b");
        assert_eq!(a.final_prices, b.final_prices);
        assert_eq!(a.risk_metrics, b.risk_metrics);
    }
}
