use crate::state::SimulationParameters;

/// Binary parametric payout.
///
/// decline% = (initial - final) / initial * 100
/// payout   = payout_amount if decline% >= trigger_threshold, else 0
///
/// Total function: malformed prices resolve to no payout so one bad trial
/// cannot abort its batch.
#[inline]
pub fn evaluate_payout(final_price: f64, initial_price: f64, params: &SimulationParameters) -> f64 {
    if !final_price.is_finite() || !initial_price.is_finite() || initial_price <= 0.0 {
        return 0.0;
    }
    let decline_pct = (initial_price - final_price) / initial_price * 100.0;
    if decline_pct >= params.trigger_threshold {
        params.payout_amount
    } else {
        0.0
    }
}
