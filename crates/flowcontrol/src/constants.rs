//! Flow control constants.

/// Buffer limit of a pool-admitted client, in seconds of its minimum recharge.
pub const BUF_LIMIT_RATIO: u64 = 6;

/// Nanoseconds per second, the time base of every rate.
pub const NANOS_PER_SEC: u128 = 1_000_000_000;
