//! Server defaults.

/// Percentage of one CPU core spent serving light clients.
pub const DEFAULT_LIGHT_SERVE: u64 = 100;

pub const DEFAULT_MAX_PEERS: usize = 100;

/// Zero derives the free capacity from the most expensive request.
pub const DEFAULT_MIN_CAPACITY: u64 = 0;

/// Largest share of the maximum capacity one client may reserve, in percent.
pub const DEFAULT_PRIORITY_SHARE: u64 = 50;

pub const DEFAULT_FREE_BIAS_SECS: u64 = 60;

pub const DEFAULT_EXPIRY_TICK_SECS: u64 = 5;

/// Serving workers outside block processing never drop below this.
pub const MIN_NORMAL_THREADS: usize = 4;
