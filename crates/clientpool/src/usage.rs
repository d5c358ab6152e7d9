//! Decaying connection-time usage of free clients.
//!
//! Usage is measured in seconds of connected time. It decays exponentially
//! with [`USAGE_TIME_CONSTANT`], so a client connected for a long time
//! converges towards the time constant and a client that went away slowly
//! loses its record.

use std::time::Duration;

use hashlink::LruCache;
use lumen_flowcontrol::{ClientId, MonoTime};

use crate::constants::USAGE_TIME_CONSTANT;

fn decay_factor(elapsed: Duration) -> f64 {
    (-elapsed.as_secs_f64() / USAGE_TIME_CONSTANT.as_secs_f64()).exp()
}

/// Usage `elapsed` after it was `value`, with no connected time in between.
pub(crate) fn decayed(value: f64, elapsed: Duration) -> f64 {
    value * decay_factor(elapsed)
}

/// Usage after being connected for `elapsed`, starting from `base`.
pub(crate) fn accumulated(base: f64, elapsed: Duration) -> f64 {
    let d = decay_factor(elapsed);
    base * d + USAGE_TIME_CONSTANT.as_secs_f64() * (1.0 - d)
}

/// Usage of recently disconnected clients.
pub(crate) struct UsageHistory {
    entries: LruCache<ClientId, (f64, MonoTime)>,
}

impl UsageHistory {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(capacity.max(1)),
        }
    }

    pub(crate) fn record(&mut self, id: ClientId, usage: f64, now: MonoTime) {
        self.entries.insert(id, (usage, now));
    }

    /// Remove and return the client's usage, decayed to `now`.
    pub(crate) fn take(&mut self, id: &ClientId, now: MonoTime) -> f64 {
        self.entries
            .remove(id)
            .map(|(usage, at)| decayed(usage, now.saturating_duration_since(at)))
            .unwrap_or(0.0)
    }

    /// Usage decayed to `now`, keeping the entry.
    pub(crate) fn get(&mut self, id: &ClientId, now: MonoTime) -> f64 {
        self.entries
            .get(id)
            .map(|&(usage, at)| decayed(usage, now.saturating_duration_since(at)))
            .unwrap_or(0.0)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
