//! Descriptive statistics over `f64` samples.
//!
//! Every function is total: empty input yields 0 (or an empty structure)
//! rather than NaN, so a summary never poisons the serialized result.

use statrs::statistics::Statistics;

/// Annual risk-free rate used by `sharpe_ratio` callers by default.
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.02;

/// Default number of histogram bins.
pub const DEFAULT_HISTOGRAM_BINS: usize = 50;

#[inline]
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.mean()
}

/// Population standard deviation.
#[inline]
pub fn std_dev(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.population_std_dev()
}

pub fn max_value(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

pub fn min_value(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().copied().fold(f64::INFINITY, f64::min)
}

/// Percentile in [0, 100] with linear interpolation between order statistics.
pub fn percentile(data: &[f64], pct: f64) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_of_sorted(&sorted, pct)
}

/// Same as `percentile` for data already sorted ascending.
pub fn percentile_of_sorted(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Value-at-Risk of a loss sample (losses positive, larger is worse).
///
/// The loss level not exceeded with `confidence`% probability: the
/// (100 - confidence)% tail is cut from the worst end, i.e. the
/// `confidence`-th percentile of the ascending losses.
#[inline]
pub fn value_at_risk(losses: &[f64], confidence: f64) -> f64 {
    percentile(losses, confidence)
}

/// Expected Shortfall: mean of the worst (1 - confidence/100) fraction
/// of losses. Falls back to the single worst loss when that tail is empty.
pub fn expected_shortfall(losses: &[f64], confidence: f64) -> f64 {
    if losses.is_empty() {
        return 0.0;
    }
    let mut sorted = losses.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let tail_len = ((1.0 - confidence / 100.0) * sorted.len() as f64).floor() as usize;
    if tail_len == 0 {
        return sorted[0];
    }
    mean(&sorted[..tail_len.min(sorted.len())])
}

/// (mean - rf) / std, defined as 0 for a zero-dispersion sample.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    let sd = std_dev(returns);
    if sd == 0.0 || !sd.is_finite() {
        return 0.0;
    }
    (mean(returns) - risk_free_rate) / sd
}

/// Pearson correlation. 0 for mismatched, empty or constant inputs.
pub fn correlation(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.is_empty() {
        return 0.0;
    }
    let mx = mean(x);
    let my = mean(y);

    let mut num = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (&a, &b) in x.iter().zip(y) {
        let dx = a - mx;
        let dy = b - my;
        num += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    let den = (sxx * syy).sqrt();
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Histogram {
    pub labels: Vec<String>,
    pub counts: Vec<usize>,
}

/// Equal-width histogram over [min, max]; the maximum lands in the last bin.
pub fn histogram(data: &[f64], bins: usize) -> Histogram {
    if data.is_empty() || bins == 0 {
        return Histogram::default();
    }
    let lo = min_value(data);
    let hi = max_value(data);
    let width = (hi - lo) / bins as f64;

    let labels = (0..bins)
        .map(|i| {
            let start = lo + i as f64 * width;
            let end = lo + (i + 1) as f64 * width;
            format!("{start:.0}-{end:.0}")
        })
        .collect();

    let mut counts = vec![0usize; bins];
    for &v in data {
        let idx = if width > 0.0 {
            ((v - lo) / width).floor().max(0.0) as usize
        } else {
            0
        };
        counts[idx.min(bins - 1)] += 1;
    }

    Histogram { labels, counts }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Cdf {
    pub values: Vec<f64>,
    pub probabilities: Vec<f64>,
}

/// Empirical CDF: sorted values with P(X <= x_i) = (i + 1) / n.
pub fn cdf(data: &[f64]) -> Cdf {
    let mut values = data.to_vec();
    values.sort_by(f64::total_cmp);
    let n = values.len() as f64;
    let probabilities = (0..values.len()).map(|i| (i + 1) as f64 / n).collect();
    Cdf {
        values,
        probabilities,
    }
}
