//! Pool constants.

use std::time::Duration;

/// Time constant of the exponential decay applied to free-client usage.
pub const USAGE_TIME_CONSTANT: Duration = Duration::from_secs(3600);

/// Number of disconnected free clients whose usage is remembered.
pub const DEFAULT_USAGE_HISTORY: usize = 1000;

/// Usage advantage an incumbent free client keeps over a newcomer.
pub const DEFAULT_CONNECTED_BIAS: Duration = Duration::from_secs(60);

/// Pool events buffered per subscriber before the oldest are dropped.
pub const EVENT_BUFFER: usize = 256;
