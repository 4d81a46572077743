use crate::errors::{SimResult, SimulationError};
use smallvec::SmallVec;
use std::time::Duration;
use tokio::time::Instant;

// ── Parameter bounds ──

pub const MIN_SIMULATIONS: usize = 100;
pub const MAX_SIMULATIONS: usize = 1_000_000;
pub const MIN_TIME_HORIZON: usize = 1;
pub const MAX_TIME_HORIZON: usize = 10_000;
pub const MAX_VOLATILITY_PCT: f64 = 200.0;
pub const MAX_ABS_DRIFT_PCT: f64 = 50.0;
pub const MAX_PREMIUM_PCT: f64 = 50.0;

/// Sample paths kept per batch for visualization.
pub const MAX_SAMPLE_PATHS: usize = 10;

// ── Simulation input ──

/// Immutable input to a single run. Percent-valued fields are in percent
/// (20.0 = 20%), `time_horizon` is in trading days.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationParameters {
    pub initial_price: f64,
    pub volatility: f64,
    pub drift: f64,
    pub time_horizon: usize,
    pub num_simulations: usize,
    pub trigger_threshold: f64,
    pub insurance_premium: f64,
    pub payout_amount: f64,
}

impl SimulationParameters {
    /// Range checks, applied once at every entry point.
    pub fn validate(&self) -> SimResult<()> {
        if !self.initial_price.is_finite() || self.initial_price <= 0.0 {
            return Err(invalid(format!(
                "initial price must be > 0, got {}",
                self.initial_price
            )));
        }
        if !(0.0..=MAX_VOLATILITY_PCT).contains(&self.volatility) {
            return Err(invalid(format!(
                "volatility must be within 0-{MAX_VOLATILITY_PCT}%, got {}",
                self.volatility
            )));
        }
        if !(-MAX_ABS_DRIFT_PCT..=MAX_ABS_DRIFT_PCT).contains(&self.drift) {
            return Err(invalid(format!(
                "drift must be within -{MAX_ABS_DRIFT_PCT}-{MAX_ABS_DRIFT_PCT}%, got {}",
                self.drift
            )));
        }
        if !(MIN_TIME_HORIZON..=MAX_TIME_HORIZON).contains(&self.time_horizon) {
            return Err(invalid(format!(
                "time horizon must be within {MIN_TIME_HORIZON}-{MAX_TIME_HORIZON} days, got {}",
                self.time_horizon
            )));
        }
        if !(MIN_SIMULATIONS..=MAX_SIMULATIONS).contains(&self.num_simulations) {
            return Err(invalid(format!(
                "number of simulations must be within {MIN_SIMULATIONS}-{MAX_SIMULATIONS}, got {}",
                self.num_simulations
            )));
        }
        // (0, 100]
        if !(self.trigger_threshold > 0.0 && self.trigger_threshold <= 100.0) {
            return Err(invalid(format!(
                "trigger threshold must be within (0, 100]%, got {}",
                self.trigger_threshold
            )));
        }
        if !(0.0..=MAX_PREMIUM_PCT).contains(&self.insurance_premium) {
            return Err(invalid(format!(
                "insurance premium must be within 0-{MAX_PREMIUM_PCT}%, got {}",
                self.insurance_premium
            )));
        }
        if !self.payout_amount.is_finite() || self.payout_amount <= 0.0 {
            return Err(invalid(format!(
                "payout amount must be > 0, got {}",
                self.payout_amount
            )));
        }
        Ok(())
    }

    /// Premium collected per trial.
    #[inline]
    pub fn premium_per_trial(&self) -> f64 {
        self.initial_price * self.insurance_premium / 100.0
    }
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            initial_price: 100_000.0,
            volatility: 20.0,
            drift: 5.0,
            time_horizon: 252,
            num_simulations: 10_000,
            trigger_threshold: 20.0,
            insurance_premium: 2.0,
            payout_amount: 1_000_000.0,
        }
    }
}

fn invalid(msg: String) -> SimulationError {
    SimulationError::InvalidParameters(msg)
}

/// Jump component of the jump-diffusion model.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct JumpParameters {
    /// Expected jumps per year
    pub intensity: f64,
    /// Mean relative jump size (-0.10 = -10%)
    pub mean: f64,
    /// Std dev of the relative jump size
    pub std: f64,
}

impl Default for JumpParameters {
    fn default() -> Self {
        Self {
            intensity: 2.0,
            mean: -0.10,
            std: 0.05,
        }
    }
}

// ── Trial and batch outputs ──

/// Day-0 price followed by one price per simulated trading day.
pub type PricePath = Vec<f64>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialOutcome {
    pub final_price: f64,
    pub payout: f64,
}

/// Output of one batch. Merged into the run accumulators, then dropped.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub final_prices: Vec<f64>,
    pub payouts: Vec<f64>,
    pub sample_paths: SmallVec<[PricePath; MAX_SAMPLE_PATHS]>,
}

impl BatchResult {
    pub fn with_capacity(trials: usize) -> Self {
        Self {
            final_prices: Vec::with_capacity(trials),
            payouts: Vec::with_capacity(trials),
            sample_paths: SmallVec::new(),
        }
    }

    #[inline]
    pub fn push(&mut self, outcome: TrialOutcome) {
        self.final_prices.push(outcome.final_price);
        self.payouts.push(outcome.payout);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.final_prices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.final_prices.is_empty()
    }
}

// ── Aggregate outputs ──

/// Pre-insurance and post-insurance (`net_*`) risk statistics over the
/// whole loss population. Losses are positive amounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskMetrics {
    pub var95: f64,
    pub var99: f64,
    pub expected_shortfall95: f64,
    pub expected_shortfall99: f64,
    pub sharpe_ratio: f64,
    pub max_loss: f64,
    pub avg_loss: f64,
    pub std_loss: f64,

    pub net_var95: f64,
    pub net_var99: f64,
    pub net_expected_shortfall95: f64,
    pub net_expected_shortfall99: f64,
    pub net_sharpe_ratio: f64,
    pub net_max_loss: f64,
    pub net_avg_loss: f64,
    pub net_std_loss: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStatistics {
    pub avg_final_price: f64,
    pub std_final_price: f64,
    pub min_final_price: f64,
    pub max_final_price: f64,
    pub avg_return: f64,
    pub std_return: f64,
    pub total_premium: f64,
    /// Insurer view: premium collected minus payouts
    pub net_result: f64,
    pub loss_ratio: f64,
    pub completed_simulations: usize,
    /// Wall-clock seconds
    pub execution_time: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub final_prices: Vec<f64>,
    pub payouts: Vec<f64>,
    pub price_paths: Vec<PricePath>,
    pub total_payout: f64,
    pub average_payout: f64,
    pub payout_probability: f64,
    pub expected_loss: f64,
    pub risk_metrics: RiskMetrics,
    pub statistics: SimulationStatistics,
}

/// Result without the per-trial arrays, for logs and console output.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub sample_paths: usize,
    pub total_payout: f64,
    pub average_payout: f64,
    pub payout_probability: f64,
    pub expected_loss: f64,
    pub risk_metrics: RiskMetrics,
    pub statistics: SimulationStatistics,
}

impl SimulationResult {
    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            sample_paths: self.price_paths.len(),
            total_payout: self.total_payout,
            average_payout: self.average_payout,
            payout_probability: self.payout_probability,
            expected_loss: self.expected_loss,
            risk_metrics: self.risk_metrics,
            statistics: self.statistics,
        }
    }
}

// ── Controller state machine ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Idle,
    Running,
    Paused,
    Completed,
    Canceled,
    Failed,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Canceled => write!(f, "canceled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Controller bookkeeping. Owned by one controller; reset when a run ends.
#[derive(Debug, Clone)]
pub struct ControllerState {
    pub phase: RunPhase,
    pub is_running: bool,
    pub is_paused: bool,
    /// Percent in [0, 100]
    pub progress: f64,
    pub start_time: Option<Instant>,
    pub pause_time: Option<Instant>,
    pub total_pause_time: Duration,
    pub run_id: Option<uuid::Uuid>,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            phase: RunPhase::Idle,
            is_running: false,
            is_paused: false,
            progress: 0.0,
            start_time: None,
            pause_time: None,
            total_pause_time: Duration::ZERO,
            run_id: None,
        }
    }
}

impl ControllerState {
    /// elapsed = now - start - paused. Frozen at the pause instant while paused.
    pub fn elapsed(&self, now: Instant) -> Duration {
        let Some(start) = self.start_time else {
            return Duration::ZERO;
        };
        let current = match (self.is_paused, self.pause_time) {
            (true, Some(p)) => p,
            _ => now,
        };
        current
            .saturating_duration_since(start)
            .saturating_sub(self.total_pause_time)
    }

    /// remaining = elapsed / progress * 100 - elapsed, 0 without progress.
    pub fn estimated_remaining(&self, now: Instant) -> Duration {
        if self.progress <= 0.0 {
            return Duration::ZERO;
        }
        let elapsed = self.elapsed(now).as_secs_f64();
        let total = elapsed / self.progress * 100.0;
        // A vanishing progress overflows the estimate; saturate instead
        Duration::try_from_secs_f64((total - elapsed).max(0.0)).unwrap_or(Duration::MAX)
    }

    pub fn snapshot(&self, now: Instant) -> ControllerStatus {
        ControllerStatus {
            phase: self.phase,
            is_running: self.is_running,
            is_paused: self.is_paused,
            progress: self.progress,
            elapsed_time: millis(self.elapsed(now)),
            estimated_time_remaining: millis(self.estimated_remaining(now)),
            total_pause_time: millis(self.total_pause_time),
            run_id: self.run_id,
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
#[inline]
pub fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Point-in-time view of the controller. Times in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub phase: RunPhase,
    pub is_running: bool,
    pub is_paused: bool,
    pub progress: f64,
    pub elapsed_time: u64,
    pub estimated_time_remaining: u64,
    pub total_pause_time: u64,
    pub run_id: Option<uuid::Uuid>,
}

// ── Observer payloads ──

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
    pub progress: f64,
    pub stage: String,
    pub elapsed_time: u64,
    pub estimated_time_remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Started,
    Paused,
    Resumed,
    Cancelled,
    Completed,
    Error,
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Paused => write!(f, "paused"),
            Self::Resumed => write!(f, "resumed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub status: StatusKind,
    /// Unix epoch milliseconds
    pub timestamp: i64,
    pub elapsed_time: u64,
    pub run_id: Option<uuid::Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}
