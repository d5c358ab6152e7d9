//! Piecewise-linear recharge curve.
//!
//! The curve maps the total minimum recharge of clients that are currently
//! recharging (`x`) to the total recharge rate the server hands out (`y`).
//! Beyond the last point the curve stays at the last `y`.

use serde::{Deserialize, Serialize};

use crate::FlowControlError;

/// One control point of a [`RechargeCurve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub x: u64,
    pub y: u64,
}

impl CurvePoint {
    pub const fn new(x: u64, y: u64) -> Self {
        Self { x, y }
    }
}

/// Validated recharge curve.
///
/// Invariants: the first point is `(0, 0)`, `x` is strictly increasing and `y`
/// is non-decreasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RechargeCurve {
    points: Vec<CurvePoint>,
}

impl RechargeCurve {
    /// Validate and build a curve.
    pub fn new(points: Vec<CurvePoint>) -> Result<Self, FlowControlError> {
        match points.first() {
            None => {
                return Err(FlowControlError::InvalidConfiguration(
                    "recharge curve has no points".into(),
                ));
            }
            Some(first) if *first != CurvePoint::new(0, 0) => {
                return Err(FlowControlError::InvalidConfiguration(format!(
                    "recharge curve must start at (0, 0), got ({}, {})",
                    first.x, first.y
                )));
            }
            Some(_) => {}
        }

        for pair in points.windows(2) {
            if let [a, b] = pair {
                if b.x <= a.x || b.y < a.y {
                    return Err(FlowControlError::InvalidConfiguration(format!(
                        "recharge curve not monotonic at ({}, {}) -> ({}, {})",
                        a.x, a.y, b.x, b.y
                    )));
                }
            }
        }

        Ok(Self { points })
    }

    /// Build from `(x, y)` pairs.
    pub fn from_pairs(pairs: &[(u64, u64)]) -> Result<Self, FlowControlError> {
        Self::new(pairs.iter().map(|&(x, y)| CurvePoint::new(x, y)).collect())
    }

    /// Curve used while a block is being processed: full rate only up to
    /// `total_recharge`, then flat.
    pub fn block_processing(total_recharge: u64) -> Self {
        if total_recharge == 0 {
            return Self::zero();
        }
        Self {
            points: vec![
                CurvePoint::new(0, 0),
                CurvePoint::new(total_recharge, total_recharge),
            ],
        }
    }

    /// Curve used during normal operation: lightly loaded servers hand out half
    /// of `total_recharge` early, so few recharging clients refill quickly.
    pub fn normal(total_recharge: u64) -> Self {
        let (low, half) = (total_recharge / 16, total_recharge / 2);
        if low == 0 || low >= half {
            return Self::block_processing(total_recharge);
        }
        Self {
            points: vec![
                CurvePoint::new(0, 0),
                CurvePoint::new(low, half),
                CurvePoint::new(half, half),
                CurvePoint::new(total_recharge, total_recharge),
            ],
        }
    }

    fn zero() -> Self {
        Self {
            points: vec![CurvePoint::new(0, 0)],
        }
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    /// Total recharge rate handed out when `x` recharge is allocated.
    pub fn value_at(&self, x: u64) -> u64 {
        for pair in self.points.windows(2) {
            if let [a, b] = pair {
                if x < b.x {
                    let dx = u128::from(b.x - a.x);
                    let dy = u128::from(b.y - a.y);
                    let offset = u128::from(x.saturating_sub(a.x)) * dy / dx;
                    return a.y + offset as u64;
                }
            }
        }
        self.points.last().map(|p| p.y).unwrap_or(0)
    }

    /// Largest allocation the curve still serves at full rate, i.e. the largest
    /// `x` with `value_at(x) >= x`.
    pub fn max_sustained(&self) -> u64 {
        let mut best = 0u64;
        for pair in self.points.windows(2) {
            if let [a, b] = pair {
                if b.y >= b.x {
                    best = best.max(b.x);
                } else if a.y >= a.x {
                    // value_at(x) - x falls from >= 0 to < 0 inside the segment.
                    let dx = u128::from(b.x - a.x);
                    let dy = u128::from(b.y - a.y);
                    let crossing = u128::from(a.x) + u128::from(a.y - a.x) * dx / (dx - dy);
                    best = best.max(crossing as u64);
                }
            }
        }
        if let Some(last) = self.points.last() {
            if last.y > last.x {
                best = best.max(last.y);
            }
        }
        best
    }
}

impl<'de> Deserialize<'de> for RechargeCurve {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let points = Vec::<CurvePoint>::deserialize(deserializer)?;
        Self::new(points).map_err(serde::de::Error::custom)
    }
}
