//! Cost estimation constants.

use std::time::Duration;

/// Time constant of the exponential decay applied to serving statistics.
pub const FACTOR_TIME_CONSTANT: Duration = Duration::from_secs(300);

/// Relative change of the total recharge that triggers a notification.
pub const RECHARGE_NOTIFY_THRESHOLD: f64 = 0.01;

/// Nanoseconds of serving time per cost unit before anything was measured.
pub(crate) const INITIAL_FACTOR: f64 = 1.0;

/// Bounds on the measured factor, so a burst of outliers cannot stall or
/// flood the server.
pub(crate) const MIN_FACTOR: f64 = 0.01;
pub(crate) const MAX_FACTOR: f64 = 1000.0;

/// Decayed cost below which measurements are too thin to trust.
pub(crate) const MIN_COST_SAMPLE: f64 = 100_000.0;
