pub mod jump_diffusion;
pub mod payout;

/// Trading days per year; one simulation step is one trading day.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Price floor. Paths are truncated here instead of reaching zero.
pub const MIN_PRICE: f64 = 0.01;
