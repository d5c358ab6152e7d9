//! CLI arguments for light-client serving.

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Light serving CLI arguments. Capacities are in cost units per second.
#[derive(Debug, Args, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[command(next_help_heading = "Light Serving")]
#[serde(default)]
pub struct ServerArgs {
    /// Percentage of one CPU core to spend serving light clients (may exceed 100)
    #[arg(long = "light.serve", default_value_t = DEFAULT_LIGHT_SERVE)]
    pub serve: u64,

    /// Maximum number of light clients
    #[arg(long = "light.peers", default_value_t = DEFAULT_MAX_PEERS)]
    pub peers: usize,

    /// Capacity granted to free clients (0 derives it from request costs)
    #[arg(long = "light.min-capacity", default_value_t = DEFAULT_MIN_CAPACITY)]
    pub min_capacity: u64,

    /// Largest share of total capacity a single client may reserve, in percent
    #[arg(long = "light.priority-share", default_value_t = DEFAULT_PRIORITY_SHARE)]
    pub priority_share: u64,

    /// Seconds of usage a connected free client keeps over a newcomer
    #[arg(long = "light.free-bias", default_value_t = DEFAULT_FREE_BIAS_SECS)]
    pub free_bias_secs: u64,

    /// Seconds between priority reservation expiry checks
    #[arg(long = "light.expiry-tick", default_value_t = DEFAULT_EXPIRY_TICK_SECS)]
    pub expiry_tick_secs: u64,
}

impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            serve: DEFAULT_LIGHT_SERVE,
            peers: DEFAULT_MAX_PEERS,
            min_capacity: DEFAULT_MIN_CAPACITY,
            priority_share: DEFAULT_PRIORITY_SHARE,
            free_bias_secs: DEFAULT_FREE_BIAS_SECS,
            expiry_tick_secs: DEFAULT_EXPIRY_TICK_SECS,
        }
    }
}

impl ServerArgs {
    /// Validate argument combinations.
    pub fn validate(&self) -> Result<(), String> {
        if self.serve == 0 {
            return Err("light.serve must be positive".to_string());
        }
        if self.peers == 0 {
            return Err("light.peers must be positive".to_string());
        }
        if self.priority_share > 100 {
            return Err(format!(
                "light.priority-share is a percentage, got {}",
                self.priority_share
            ));
        }
        if self.expiry_tick_secs == 0 {
            return Err("light.expiry-tick must be positive".to_string());
        }
        Ok(())
    }

    /// Overlay `overrides` on `self`, keeping values where `overrides` is at
    /// its default.
    pub fn merge(self, overrides: &Self) -> Self {
        let default = Self::default();
        Self {
            serve: pick(self.serve, overrides.serve, default.serve),
            peers: pick(self.peers, overrides.peers, default.peers),
            min_capacity: pick(self.min_capacity, overrides.min_capacity, default.min_capacity),
            priority_share: pick(
                self.priority_share,
                overrides.priority_share,
                default.priority_share,
            ),
            free_bias_secs: pick(
                self.free_bias_secs,
                overrides.free_bias_secs,
                default.free_bias_secs,
            ),
            expiry_tick_secs: pick(
                self.expiry_tick_secs,
                overrides.expiry_tick_secs,
                default.expiry_tick_secs,
            ),
        }
    }
}

fn pick<T: PartialEq>(base: T, over: T, default: T) -> T {
    if over != default { over } else { base }
}
