//! Serving-time feedback and total recharge derivation.

use std::sync::Arc;
use std::time::Duration;

use lumen_flowcontrol::{Clock, MonoTime, constants::NANOS_PER_SEC};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::constants::{
    FACTOR_TIME_CONSTANT, INITIAL_FACTOR, MAX_FACTOR, MIN_COST_SAMPLE, MIN_FACTOR,
    RECHARGE_NOTIFY_THRESHOLD,
};
use crate::{CostTable, RequestKind};

#[derive(Debug)]
struct ServingStats {
    /// Decayed sum of serving time in nanoseconds.
    time_sum: f64,
    /// Decayed sum of estimated cost of the same requests.
    cost_sum: f64,
    last_update: MonoTime,
    /// Nanoseconds of serving time per cost unit.
    factor: f64,
}

impl ServingStats {
    fn decay_to(&mut self, now: MonoTime) {
        let dt = now.saturating_duration_since(self.last_update);
        self.last_update = self.last_update.max(now);
        if dt.is_zero() {
            return;
        }
        let decay = (-dt.as_secs_f64() / FACTOR_TIME_CONSTANT.as_secs_f64()).exp();
        self.time_sum *= decay;
        self.cost_sum *= decay;
    }
}

/// Estimates request cost and tracks how expensive serving really is.
pub struct CostEstimator {
    table: CostTable,
    clock: Arc<dyn Clock>,
    /// Serving time budget per second of wall time.
    budget_nanos: f64,
    stats: Mutex<ServingStats>,
    total_recharge: watch::Sender<u64>,
}

impl CostEstimator {
    /// `light_serve_percent` is the share of one CPU core spent on serving;
    /// values above 100 mean several cores.
    pub fn new(table: CostTable, light_serve_percent: u64, clock: Arc<dyn Clock>) -> Self {
        let budget_nanos = light_serve_percent as f64 / 100.0 * NANOS_PER_SEC as f64;
        let stats = ServingStats {
            time_sum: 0.0,
            cost_sum: 0.0,
            last_update: clock.now(),
            factor: INITIAL_FACTOR,
        };
        let (total_recharge, _) = watch::channel(recharge_for(budget_nanos, INITIAL_FACTOR));
        Self {
            table,
            clock,
            budget_nanos,
            stats: Mutex::new(stats),
            total_recharge,
        }
    }

    pub fn table(&self) -> &CostTable {
        &self.table
    }

    pub fn estimate_cost(&self, kind: RequestKind, size: u64) -> u64 {
        self.table.estimate(kind, size)
    }

    /// Feed back the measured serving time of a completed request.
    pub fn record_served(&self, kind: RequestKind, size: u64, elapsed: Duration) {
        let cost = self.estimate_cost(kind, size);
        let now = self.clock.now();

        let factor = {
            let mut stats = self.stats.lock();
            stats.decay_to(now);
            stats.time_sum += elapsed.as_nanos() as f64;
            stats.cost_sum += cost as f64;
            if stats.cost_sum >= MIN_COST_SAMPLE {
                stats.factor = (stats.time_sum / stats.cost_sum).clamp(MIN_FACTOR, MAX_FACTOR);
            }
            stats.factor
        };

        metrics::gauge!("cost.factor").set(factor);
        self.publish(recharge_for(self.budget_nanos, factor));
    }

    /// Current nanoseconds of serving time per cost unit.
    pub fn factor(&self) -> f64 {
        self.stats.lock().factor
    }

    /// Last published total recharge, in cost units per second.
    pub fn total_recharge(&self) -> u64 {
        *self.total_recharge.borrow()
    }

    /// Notified when the total recharge moves by more than
    /// [`RECHARGE_NOTIFY_THRESHOLD`].
    pub fn subscribe_total_recharge(&self) -> watch::Receiver<u64> {
        self.total_recharge.subscribe()
    }

    /// Cost a request actually incurred, never more than its estimate.
    pub fn real_cost(&self, estimated: u64, elapsed: Duration) -> u64 {
        let real = elapsed.as_nanos() as f64 / self.factor();
        if real >= estimated as f64 {
            estimated
        } else {
            real as u64
        }
    }

    /// Smallest per-client capacity whose buffer (`capacity * buf_limit_ratio`)
    /// covers the most expensive single request.
    pub fn min_capacity(&self, buf_limit_ratio: u64) -> u64 {
        self.table
            .max_request_cost()
            .div_ceil(buf_limit_ratio.max(1))
    }

    fn publish(&self, total: u64) {
        let changed = self.total_recharge.send_if_modified(|current| {
            let delta = total.abs_diff(*current) as f64;
            if delta <= *current as f64 * RECHARGE_NOTIFY_THRESHOLD {
                return false;
            }
            *current = total;
            true
        });
        if changed {
            metrics::gauge!("cost.total_recharge").set(total as f64);
            debug!(total_recharge = total, "total recharge changed");
        }
    }
}

fn recharge_for(budget_nanos: f64, factor: f64) -> u64 {
    (budget_nanos / factor) as u64
}

#[cfg(test)]
mod tests {
    use lumen_flowcontrol::ManualClock;
    use proptest::prelude::*;

    use super::*;

    fn test_estimator(serve: u64) -> (Arc<ManualClock>, CostEstimator) {
        let clock = Arc::new(ManualClock::new());
        let estimator = CostEstimator::new(CostTable::default(), serve, clock.clone());
        (clock, estimator)
    }

    #[test]
    fn test_initial_recharge_from_serve_percent() {
        let (_, estimator) = test_estimator(100);
        assert_eq!(estimator.total_recharge(), 1_000_000_000);
        let (_, estimator) = test_estimator(250);
        assert_eq!(estimator.total_recharge(), 2_500_000_000);
    }

    #[test]
    fn test_record_served_updates_factor() {
        let (_, estimator) = test_estimator(100);
        let mut rx = estimator.subscribe_total_recharge();

        // Estimated 450_000 units, took twice as long in nanoseconds.
        estimator.record_served(RequestKind::BlockHeaders, 10, Duration::from_micros(900));
        assert_eq!(estimator.factor(), 2.0);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 500_000_000);

        // 0.5% drift stays below the notification threshold.
        estimator.record_served(RequestKind::BlockHeaders, 10, Duration::from_micros(909));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(estimator.total_recharge(), 500_000_000);
    }

    #[test]
    fn test_thin_samples_ignored() {
        let (_, estimator) = test_estimator(100);
        estimator.record_served(RequestKind::TxStatus, 0, Duration::from_millis(5));
        assert_eq!(estimator.factor(), INITIAL_FACTOR);
    }

    #[test]
    fn test_old_measurements_decay() {
        let (clock, estimator) = test_estimator(100);
        estimator.record_served(RequestKind::BlockHeaders, 10, Duration::from_micros(900));
        assert_eq!(estimator.factor(), 2.0);

        clock.advance(FACTOR_TIME_CONSTANT * 20);
        estimator.record_served(RequestKind::BlockHeaders, 10, Duration::from_micros(450));
        assert!((estimator.factor() - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_real_cost_capped_at_estimate() {
        let (_, estimator) = test_estimator(100);
        assert_eq!(estimator.real_cost(1000, Duration::from_nanos(400)), 400);
        assert_eq!(estimator.real_cost(1000, Duration::from_secs(1)), 1000);
    }

    #[test]
    fn test_min_capacity() {
        let (_, estimator) = test_estimator(100);
        assert_eq!(estimator.min_capacity(6), 21_333_334);
        assert_eq!(estimator.min_capacity(0), 128_000_000);
    }

    proptest! {
        #[test]
        fn test_factor_stays_bounded(samples in proptest::collection::vec((0u64..300, 0u64..10_000_000, 0u64..60_000), 1..50)) {
            let (clock, estimator) = test_estimator(100);
            for (size, nanos, advance_ms) in samples {
                clock.advance(Duration::from_millis(advance_ms));
                estimator.record_served(RequestKind::Receipts, size, Duration::from_nanos(nanos));
                let factor = estimator.factor();
                prop_assert!((MIN_FACTOR..=MAX_FACTOR).contains(&factor));
                prop_assert!(estimator.total_recharge() > 0);
            }
        }
    }
}
