//! Resolved server configuration.

use std::time::Duration;

use lumen_cost::{CostEstimator, CostTable};
use lumen_flowcontrol::{CapacityLimits, FlowControlError, constants::BUF_LIMIT_RATIO};

use crate::args::ServerArgs;
use crate::constants::MIN_NORMAL_THREADS;
use crate::error::{Result, ServerError};

/// Server settings, fixed for the server's lifetime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub light_serve: u64,
    pub max_peers: usize,
    /// Floor for the free capacity; zero derives it from request costs.
    pub min_capacity: u64,
    pub priority_share: u64,
    pub free_bias: Duration,
    pub expiry_tick: Duration,
    pub cost_table: CostTable,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerArgs::default())
    }
}

impl From<&ServerArgs> for ServerConfig {
    fn from(args: &ServerArgs) -> Self {
        Self {
            light_serve: args.serve,
            max_peers: args.peers,
            min_capacity: args.min_capacity,
            priority_share: args.priority_share,
            free_bias: Duration::from_secs(args.free_bias_secs),
            expiry_tick: Duration::from_secs(args.expiry_tick_secs),
            cost_table: CostTable::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ServerError::InvalidConfig(msg.to_string()));
        if self.light_serve == 0 {
            return invalid("light serve percentage must be positive");
        }
        if self.max_peers == 0 {
            return invalid("max peers must be positive");
        }
        if self.priority_share > 100 {
            return invalid("priority share is a percentage");
        }
        if self.expiry_tick.is_zero() {
            return invalid("expiry tick must be positive");
        }
        Ok(())
    }

    /// Serving workers outside block processing.
    pub fn thc_normal(&self) -> usize {
        let scaled = usize::try_from(self.light_serve * 4 / 100).unwrap_or(usize::MAX);
        scaled.max(MIN_NORMAL_THREADS)
    }

    /// Serving workers while a block is being processed.
    pub fn thc_block_processing(&self) -> usize {
        usize::try_from(self.light_serve / 100 + 1).unwrap_or(usize::MAX)
    }

    /// Capacity every free client is admitted with.
    pub fn free_capacity(&self, cost: &CostEstimator) -> u64 {
        self.min_capacity.max(cost.min_capacity(BUF_LIMIT_RATIO))
    }

    /// Client manager limits: free clients at the minimum, room for all peers
    /// at free capacity or the whole recharge, whichever is larger, and a
    /// per-client cap of `priority_share` percent of that.
    pub fn capacity_limits(&self, cost: &CostEstimator) -> Result<CapacityLimits, FlowControlError> {
        let free_capacity = self.free_capacity(cost);
        let peers = u64::try_from(self.max_peers).unwrap_or(u64::MAX);
        let max_capacity = free_capacity
            .saturating_mul(peers)
            .max(cost.total_recharge());
        let share = u128::from(max_capacity) * u128::from(self.priority_share) / 100;
        let per_client = u64::try_from(share).unwrap_or(u64::MAX).max(free_capacity);
        CapacityLimits::new(free_capacity, max_capacity, per_client)
    }
}
