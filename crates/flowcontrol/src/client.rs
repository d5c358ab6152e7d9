//! Per-client buffer state.
//!
//! Each client's state sits behind its own mutex, so concurrent requests from
//! different clients never contend on anything but the brief registry lookup.

use serde::{Deserialize, Serialize};

use crate::constants::{BUF_LIMIT_RATIO, NANOS_PER_SEC};
use crate::{ClientId, ClientTier, MonoTime};

/// Flow parameters negotiated for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientParams {
    /// Maximum buffer level.
    pub buffer_limit: u64,
    /// Guaranteed recharge rate in cost units per second.
    pub min_recharge: u64,
}

impl ClientParams {
    pub const fn new(buffer_limit: u64, min_recharge: u64) -> Self {
        Self {
            buffer_limit,
            min_recharge,
        }
    }

    /// Parameters for a given capacity, with the standard buffer ratio.
    pub const fn from_capacity(capacity: u64) -> Self {
        Self {
            buffer_limit: capacity.saturating_mul(BUF_LIMIT_RATIO),
            min_recharge: capacity,
        }
    }
}

/// Point-in-time view of a client, for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClientSnapshot {
    pub id: ClientId,
    pub tier: ClientTier,
    pub params: ClientParams,
    pub buffer: u64,
    pub recharging: bool,
}

/// Mutable state of one connected client.
#[derive(Debug)]
pub(crate) struct ClientState {
    id: ClientId,
    tier: ClientTier,
    params: ClientParams,
    buffer: u64,
    /// Fractional recharge below one unit, scaled by `NANOS_PER_SEC`.
    carry: u128,
    last_update: MonoTime,
    /// Counted in the manager's recharging sum.
    recharging: bool,
    /// Cleared on disconnect; handles still held by in-flight calls see it.
    connected: bool,
}

impl ClientState {
    /// Fresh connections start fully charged.
    pub(crate) fn new(id: ClientId, tier: ClientTier, params: ClientParams, now: MonoTime) -> Self {
        Self {
            id,
            tier,
            params,
            buffer: params.buffer_limit,
            carry: 0,
            last_update: now,
            recharging: false,
            connected: true,
        }
    }

    pub(crate) fn params(&self) -> ClientParams {
        self.params
    }

    pub(crate) fn buffer(&self) -> u64 {
        self.buffer
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn is_recharging(&self) -> bool {
        self.recharging
    }

    pub(crate) fn set_recharging(&mut self, recharging: bool) {
        self.recharging = recharging;
    }

    pub(crate) fn mark_disconnected(&mut self) {
        self.connected = false;
    }

    /// Replace tier and parameters, clamping the buffer to the new limit.
    pub(crate) fn update(&mut self, tier: ClientTier, params: ClientParams) {
        self.tier = tier;
        self.params = params;
        if self.buffer >= params.buffer_limit {
            self.buffer = params.buffer_limit;
            self.carry = 0;
        }
    }

    /// Add `rate * (now - last_update)` to the buffer, clamped to the limit.
    pub(crate) fn recharge(&mut self, now: MonoTime, rate: u64) {
        let elapsed = now.saturating_duration_since(self.last_update).as_nanos();
        self.last_update = self.last_update.max(now);
        if self.buffer >= self.params.buffer_limit {
            self.carry = 0;
            return;
        }

        let scaled = u128::from(rate) * elapsed + self.carry;
        let amount = u64::try_from(scaled / NANOS_PER_SEC).unwrap_or(u64::MAX);
        self.carry = scaled % NANOS_PER_SEC;
        self.buffer = self.buffer.saturating_add(amount).min(self.params.buffer_limit);
        if self.buffer == self.params.buffer_limit {
            self.carry = 0;
        }
    }

    /// Deduct `cost` if the buffer covers it.
    pub(crate) fn try_deduct(&mut self, cost: u64) -> bool {
        match self.buffer.checked_sub(cost) {
            Some(remaining) => {
                self.buffer = remaining;
                true
            }
            None => false,
        }
    }

    /// Return `amount` to the buffer, clamped to the limit.
    pub(crate) fn refund(&mut self, amount: u64) {
        self.buffer = self.buffer.saturating_add(amount).min(self.params.buffer_limit);
    }

    pub(crate) fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            id: self.id,
            tier: self.tier,
            params: self.params,
            buffer: self.buffer,
            recharging: self.recharging,
        }
    }
}
