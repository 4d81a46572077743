use crate::errors::{SimResult, SimulationError};
use crate::math::random::standard_normal;
use crate::models::{MIN_PRICE, TRADING_DAYS_PER_YEAR};
use crate::state::{JumpParameters, PricePath, SimulationParameters};
use rand::Rng;

/// Daily-step diffusion path generator with optional Merton-style jumps.
///
/// Per trading day, with dt = 1/252:
///
///   dS = S * (mu_d * dt + sigma_d * sqrt(dt) * Z)
///
/// where sigma_d = vol / 100 / sqrt(252), mu_d = drift / 100 / 252 and
/// Z ~ N(0, 1). With jumps enabled, each step independently jumps with
/// probability lambda / 252, adding S * (jump_mean + jump_std * Z') to dS.
///
/// The new price is floored at MIN_PRICE, so the left tail is truncated
/// rather than allowed to reach ruin.
#[derive(Debug, Clone, Copy)]
pub struct PathSimulator {
    jumps: Option<JumpParameters>,
}

/// Per-run constants derived once from the parameters. Stack-allocated.
#[derive(Debug, Clone, Copy)]
struct StepCoefficients {
    drift_dt: f64,
    vol_sqrt_dt: f64,
    jump_prob: f64,
}

impl PathSimulator {
    pub fn new(jumps: Option<JumpParameters>) -> Self {
        Self { jumps }
    }

    /// Pure diffusion.
    pub fn diffusion() -> Self {
        Self::new(None)
    }

    /// Diffusion plus jumps with default intensity and size.
    pub fn with_default_jumps() -> Self {
        Self::new(Some(JumpParameters::default()))
    }

    #[inline]
    pub fn uses_jumps(&self) -> bool {
        self.jumps.is_some()
    }

    fn coefficients(&self, params: &SimulationParameters) -> StepCoefficients {
        let dt = 1.0 / TRADING_DAYS_PER_YEAR;
        let vol_daily = params.volatility / 100.0 / TRADING_DAYS_PER_YEAR.sqrt();
        let drift_daily = params.drift / 100.0 / TRADING_DAYS_PER_YEAR;
        let jump_prob = self
            .jumps
            .map(|j| (j.intensity / TRADING_DAYS_PER_YEAR).clamp(0.0, 1.0))
            .unwrap_or(0.0);
        StepCoefficients {
            drift_dt: drift_daily * dt,
            vol_sqrt_dt: vol_daily * dt.sqrt(),
            jump_prob,
        }
    }

    /// Generate one path of `time_horizon + 1` prices starting at the
    /// initial price. Fails with `Divergence` on a non-finite or
    /// non-positive state.
    pub fn simulate<R: Rng + ?Sized>(
        &self,
        params: &SimulationParameters,
        rng: &mut R,
    ) -> SimResult<PricePath> {
        let coef = self.coefficients(params);
        let mut path = Vec::with_capacity(params.time_horizon + 1);
        let mut price = params.initial_price;
        path.push(price);

        for step in 1..=params.time_horizon {
            let shock = standard_normal(rng);
            let mut change = price * (coef.drift_dt + coef.vol_sqrt_dt * shock);

            if let Some(jump) = self.jumps {
                if rng.gen::<f64>() < coef.jump_prob {
                    let size = jump.mean + jump.std * standard_normal(rng);
                    change += price * size;
                }
            }

            let next = price + change;
            // f64::max would swallow a NaN, so check before flooring
            if !next.is_finite() {
                return Err(SimulationError::Divergence { step, price: next });
            }
            price = next.max(MIN_PRICE);
            if price <= 0.0 {
                return Err(SimulationError::Divergence { step, price });
            }

            path.push(price);
        }

        Ok(path)
    }
}

/// Simulate one path with the thread-local RNG.
pub fn simulate_path(params: &SimulationParameters, use_jumps: bool) -> SimResult<PricePath> {
    let sim = if use_jumps {
        PathSimulator::with_default_jumps()
    } else {
        PathSimulator::diffusion()
    };
    sim.simulate(params, &mut rand::thread_rng())
}
