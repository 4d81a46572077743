use crate::math::stats::{self, DEFAULT_RISK_FREE_RATE};
use crate::state::RiskMetrics;

/// Derive pre- and post-insurance risk statistics from the full trial
/// population.
///
///   loss_i     = max(S0 - S_T,i, 0)
///   net_loss_i = max(loss_i - payout_i, 0)
///   return_i   = (S_T,i - S0) / S0
///   net_ret_i  = (S_T,i - S0 + payout_i) / S0
///
/// Best-effort summary: malformed input (empty, mismatched lengths, bad
/// initial price) yields all-zero metrics instead of an error.
/// Pure function, no hidden state.
pub fn compute_risk_metrics(final_prices: &[f64], payouts: &[f64], initial_price: f64) -> RiskMetrics {
    if final_prices.is_empty()
        || final_prices.len() != payouts.len()
        || !initial_price.is_finite()
        || initial_price <= 0.0
    {
        tracing::warn!(
            prices = final_prices.len(),
            payouts = payouts.len(),
            initial_price,
            "risk metrics skipped on malformed input"
        );
        return RiskMetrics::default();
    }

    let n = final_prices.len();
    let mut losses = Vec::with_capacity(n);
    let mut net_losses = Vec::with_capacity(n);
    let mut returns = Vec::with_capacity(n);
    let mut net_returns = Vec::with_capacity(n);

    for (&price, &payout) in final_prices.iter().zip(payouts) {
        let loss = (initial_price - price).max(0.0);
        losses.push(loss);
        net_losses.push((loss - payout).max(0.0));
        returns.push((price - initial_price) / initial_price);
        net_returns.push((price - initial_price + payout) / initial_price);
    }

    RiskMetrics {
        var95: stats::value_at_risk(&losses, 95.0),
        var99: stats::value_at_risk(&losses, 99.0),
        expected_shortfall95: stats::expected_shortfall(&losses, 95.0),
        expected_shortfall99: stats::expected_shortfall(&losses, 99.0),
        sharpe_ratio: stats::sharpe_ratio(&returns, DEFAULT_RISK_FREE_RATE),
        max_loss: stats::max_value(&losses),
        avg_loss: stats::mean(&losses),
        std_loss: stats::std_dev(&losses),

        net_var95: stats::value_at_risk(&net_losses, 95.0),
        net_var99: stats::value_at_risk(&net_losses, 99.0),
        net_expected_shortfall95: stats::expected_shortfall(&net_losses, 95.0),
        net_expected_shortfall99: stats::expected_shortfall(&net_losses, 99.0),
        net_sharpe_ratio: stats::sharpe_ratio(&net_returns, DEFAULT_RISK_FREE_RATE),
        net_max_loss: stats::max_value(&net_losses),
        net_avg_loss: stats::mean(&net_losses),
        net_std_loss: stats::std_dev(&net_losses),
    }
}
