//! Capacity limits and the process-wide parameter snapshot.

use serde::{Deserialize, Serialize};

use crate::{FlowControlError, RechargeCurve};

/// Bounds on what the client manager may allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityLimits {
    /// Smallest capacity a single client is admitted with.
    pub min_capacity: u64,
    /// Upper bound on the sum of all clients' minimum recharge.
    pub max_capacity: u64,
    /// Upper bound on a single client's minimum recharge.
    pub max_capacity_per_client: u64,
}

impl CapacityLimits {
    pub fn new(
        min_capacity: u64,
        max_capacity: u64,
        max_capacity_per_client: u64,
    ) -> Result<Self, FlowControlError> {
        if min_capacity > max_capacity_per_client || max_capacity_per_client > max_capacity {
            return Err(FlowControlError::InvalidConfiguration(format!(
                "capacity limits must satisfy min {min_capacity} <= per-client \
                 {max_capacity_per_client} <= max {max_capacity}"
            )));
        }
        Ok(Self {
            min_capacity,
            max_capacity,
            max_capacity_per_client,
        })
    }

    /// Limits that never refuse a connection.
    pub const fn unlimited() -> Self {
        Self {
            min_capacity: 0,
            max_capacity: u64::MAX,
            max_capacity_per_client: u64::MAX,
        }
    }
}

impl Default for CapacityLimits {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Immutable snapshot of the tunable flow parameters.
///
/// Replaced wholesale; readers hold an `Arc` to one snapshot for the duration
/// of an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowParams {
    /// `None` recharges every client at exactly its minimum rate.
    pub curve: Option<RechargeCurve>,
    pub limits: CapacityLimits,
}

impl FlowParams {
    /// Total capacity the current parameters can serve at full rate.
    pub fn total_capacity(&self) -> u64 {
        let sustained = match &self.curve {
            Some(curve) => curve.max_sustained(),
            None => self.limits.max_capacity,
        };
        sustained.clamp(self.limits.min_capacity, self.limits.max_capacity)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_limits_validation() {
        assert!(CapacityLimits::new(10, 1000, 20).is_ok());
        assert!(CapacityLimits::new(10, 1000, 1000).is_ok());
        assert_matches!(
            CapacityLimits::new(30, 1000, 20),
            Err(FlowControlError::InvalidConfiguration(_))
        );
        assert_matches!(
            CapacityLimits::new(10, 100, 200),
            Err(FlowControlError::InvalidConfiguration(_))
        );
    }

    #[test]
    fn test_total_capacity_clamped() {
        let params = FlowParams {
            curve: Some(RechargeCurve::block_processing(5000)),
            limits: CapacityLimits::new(10, 2000, 100).unwrap(),
        };
        assert_eq!(params.total_capacity(), 2000);

        let params = FlowParams {
            curve: Some(RechargeCurve::block_processing(5)),
            limits: CapacityLimits::new(10, 2000, 100).unwrap(),
        };
        assert_eq!(params.total_capacity(), 10);

        let params = FlowParams {
            curve: None,
            limits: CapacityLimits::new(10, 2000, 100).unwrap(),
        };
        assert_eq!(params.total_capacity(), 2000);
    }
}
