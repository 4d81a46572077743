use crate::errors::{SimResult, SimulationError};
use crate::risk::limits::{FixedBudget, MemoryProbe, SystemMemory};
use crate::state::{JumpParameters, SimulationParameters};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Orchestration knobs shared by the orchestrator and the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub use_jumps: bool,
    pub jump: JumpParameters,
    /// Fixed seed for reproducible runs; entropy when unset
    pub seed: Option<u64>,
    /// Retries after the first failed attempt of a batch
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Caller-imposed memory budget; the host is probed when unset
    pub memory_budget_mb: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_jumps: false,
            jump: JumpParameters::default(),
            seed: None,
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            memory_budget_mb: None,
        }
    }
}

impl EngineConfig {
    #[inline]
    pub fn jump_model(&self) -> Option<JumpParameters> {
        self.use_jumps.then_some(self.jump)
    }

    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    pub fn memory_probe(&self) -> Arc<dyn MemoryProbe> {
        match self.memory_budget_mb {
            Some(mb) => Arc::new(FixedBudget::from_mb(mb)),
            None => Arc::new(SystemMemory),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub params: SimulationParameters,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn from_env() -> SimResult<Self> {
        dotenvy::dotenv().ok();

        let defaults = SimulationParameters::default();
        let engine_defaults = EngineConfig::default();

        let params = SimulationParameters {
            initial_price: parse_or("SIM_INITIAL_PRICE", defaults.initial_price)?,
            volatility: parse_or("SIM_VOLATILITY", defaults.volatility)?,
            drift: parse_or("SIM_DRIFT", defaults.drift)?,
            time_horizon: parse_or("SIM_TIME_HORIZON", defaults.time_horizon)?,
            num_simulations: parse_or("SIM_NUM_SIMULATIONS", defaults.num_simulations)?,
            trigger_threshold: parse_or("SIM_TRIGGER_THRESHOLD", defaults.trigger_threshold)?,
            insurance_premium: parse_or("SIM_INSURANCE_PREMIUM", defaults.insurance_premium)?,
            payout_amount: parse_or("SIM_PAYOUT_AMOUNT", defaults.payout_amount)?,
        };

        let jump = JumpParameters {
            intensity: parse_or("SIM_JUMP_INTENSITY", engine_defaults.jump.intensity)?,
            mean: parse_or("SIM_JUMP_MEAN", engine_defaults.jump.mean)?,
            std: parse_or("SIM_JUMP_STD", engine_defaults.jump.std)?,
        };

        let backoff_ms: u64 = parse_or(
            "SIM_RETRY_BACKOFF_MS",
            engine_defaults.retry_backoff.as_millis() as u64,
        )?;

        let engine = EngineConfig {
            use_jumps: parse_or("SIM_USE_JUMPS", engine_defaults.use_jumps)?,
            jump,
            seed: parse_opt("SIM_SEED")?,
            max_retries: parse_or("SIM_MAX_RETRIES", engine_defaults.max_retries)?,
            retry_backoff: Duration::from_millis(backoff_ms),
            memory_budget_mb: parse_opt("SIM_MEMORY_BUDGET_MB")?,
        };

        Ok(Self { params, engine })
    }
}

fn parse_or<T>(key: &str, default: T) -> SimResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_opt<T>(key: &str) -> SimResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(key, &raw).map(Some),
        _ => Ok(None),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> SimResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| SimulationError::Config(format!("{key}: {e}")))
}
