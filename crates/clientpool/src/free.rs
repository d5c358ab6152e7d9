//! Bounded pool of free-tier clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lumen_flowcontrol::{ClientId, ClientManager, ClientParams, ClientTier, Clock, MonoTime};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use crate::constants::{DEFAULT_CONNECTED_BIAS, DEFAULT_USAGE_HISTORY};
use crate::usage::{UsageHistory, accumulated};
use crate::{EvictHandler, PoolError, PoolEventEmitter};

/// Free pool settings fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct FreePoolConfig {
    /// Minimum recharge every free client is admitted with.
    pub free_capacity: u64,
    /// Usage advantage members keep over a newcomer.
    pub connected_bias: Duration,
    /// Disconnected clients whose usage is remembered.
    pub history_size: usize,
}

impl FreePoolConfig {
    pub fn new(free_capacity: u64) -> Self {
        Self {
            free_capacity,
            connected_bias: DEFAULT_CONNECTED_BIAS,
            history_size: DEFAULT_USAGE_HISTORY,
        }
    }
}

/// Free pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FreePoolStatus {
    pub members: usize,
    pub max: usize,
    pub capacity: u64,
    pub free_capacity: u64,
    pub remembered: usize,
}

#[derive(Debug, Clone, Copy)]
struct Member {
    connected_at: MonoTime,
    /// Usage carried over from earlier connections, as of `connected_at`.
    base_usage: f64,
}

impl Member {
    fn usage(&self, now: MonoTime) -> f64 {
        accumulated(self.base_usage, now.saturating_duration_since(self.connected_at))
    }
}

struct FreeInner {
    members: HashMap<ClientId, Member>,
    max: usize,
    capacity: u64,
    history: UsageHistory,
}

/// Anonymous clients sharing one fixed allowance.
///
/// When full, the member with the highest biased usage is the eviction
/// candidate; ties go to the oldest connection, then the highest id. A
/// newcomer replaces it only if the newcomer's own usage is strictly lower.
pub struct FreeClientPool {
    manager: Arc<ClientManager>,
    clock: Arc<dyn Clock>,
    config: FreePoolConfig,
    inner: Mutex<FreeInner>,
    on_evict: EvictHandler,
    events: PoolEventEmitter,
}

impl FreeClientPool {
    /// Create an empty pool. Its limits stay at zero until [`Self::set_limits`].
    pub fn new(
        manager: Arc<ClientManager>,
        clock: Arc<dyn Clock>,
        config: FreePoolConfig,
        on_evict: EvictHandler,
        events: PoolEventEmitter,
    ) -> Self {
        Self {
            manager,
            clock,
            config,
            inner: Mutex::new(FreeInner {
                members: HashMap::new(),
                max: 0,
                capacity: 0,
                history: UsageHistory::new(config.history_size),
            }),
            on_evict,
            events,
        }
    }

    pub fn config(&self) -> &FreePoolConfig {
        &self.config
    }

    /// Admit a client, evicting the least useful member if the pool is full
    /// and the candidate is preferable.
    pub fn try_admit(&self, id: ClientId) -> Result<(), PoolError> {
        let mut evicted = Vec::new();
        let result = self.admit(id, &mut evicted);
        self.notify_evicted(&evicted);
        result
    }

    /// Release a member without eviction logic. Returns `false` if it was not
    /// a member.
    pub fn remove(&self, id: &ClientId) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let Some(member) = inner.members.remove(id) else {
            return false;
        };
        inner.history.record(*id, member.usage(now), now);
        self.manager.disconnect(id);
        self.record_metrics(&inner);
        drop(inner);

        debug!(client = %id, "free client removed");
        self.events.removed(*id);
        true
    }

    /// Resize the pool to `min(max_peers, capacity / free_capacity)` members,
    /// evicting the least useful members when it shrinks.
    pub fn set_limits(&self, max_peers: usize, capacity: u64) {
        let evicted = self.apply_limits(max_peers, capacity);
        self.notify_evicted(&evicted);
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.inner.lock().members.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max(&self) -> usize {
        self.inner.lock().max
    }

    pub fn members(&self) -> Vec<ClientId> {
        self.inner.lock().members.keys().copied().collect()
    }

    /// Minimum recharge held by the pool's members.
    pub fn allocated_capacity(&self) -> u64 {
        let members = u64::try_from(self.len()).unwrap_or(u64::MAX);
        members.saturating_mul(self.config.free_capacity)
    }

    /// Current usage of a member in seconds.
    pub fn usage(&self, id: &ClientId) -> Option<f64> {
        let now = self.clock.now();
        self.inner.lock().members.get(id).map(|m| m.usage(now))
    }

    pub fn status(&self) -> FreePoolStatus {
        let inner = self.inner.lock();
        FreePoolStatus {
            members: inner.members.len(),
            max: inner.max,
            capacity: inner.capacity,
            free_capacity: self.config.free_capacity,
            remembered: inner.history.len(),
        }
    }

    /// A client evicted to make room is appended to `evicted`. Nobody is
    /// evicted unless the manager will accept the candidate.
    pub(crate) fn admit(
        &self,
        id: ClientId,
        evicted: &mut Vec<ClientId>,
    ) -> Result<(), PoolError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if inner.members.contains_key(&id) {
            return Err(PoolError::AlreadyConnected(id));
        }

        let victim = self.room_for(&mut inner, &id, now)?;
        let params = ClientParams::from_capacity(self.config.free_capacity);
        self.manager
            .can_connect(&id, &params, self.released_by(victim))?;
        self.evict_for(&mut inner, victim, now, evicted);
        self.manager.connect(id, ClientTier::Free, params)?;
        let base_usage = inner.history.take(&id, now);
        inner.members.insert(
            id,
            Member {
                connected_at: now,
                base_usage,
            },
        );
        self.record_metrics(&inner);
        drop(inner);

        debug!(client = %id, base_usage, "free client admitted");
        self.events.admitted(id, ClientTier::Free);
        Ok(())
    }

    /// Move a member out of the pool by switching it to `tier` and `params`
    /// in the manager. Returns `Ok(false)` if the client is not a member.
    ///
    /// Membership and the manager update change together under the pool lock.
    pub(crate) fn transfer_out(
        &self,
        id: &ClientId,
        tier: ClientTier,
        params: ClientParams,
    ) -> Result<bool, PoolError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let Some(member) = inner.members.get(id).copied() else {
            return Ok(false);
        };
        self.manager.update_params(id, tier, params)?;
        inner.members.remove(id);
        inner.history.record(*id, member.usage(now), now);
        self.record_metrics(&inner);
        Ok(true)
    }

    /// Take over a client that is connected in the manager under another tier,
    /// under normal admission rules.
    pub(crate) fn transfer_in(
        &self,
        id: ClientId,
        evicted: &mut Vec<ClientId>,
    ) -> Result<(), PoolError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if inner.members.contains_key(&id) {
            return Err(PoolError::AlreadyConnected(id));
        }

        let victim = self.room_for(&mut inner, &id, now)?;
        let params = ClientParams::from_capacity(self.config.free_capacity);
        self.manager
            .can_update_params(&id, &params, self.released_by(victim))?;
        self.evict_for(&mut inner, victim, now, evicted);
        self.manager.update_params(&id, ClientTier::Free, params)?;
        let base_usage = inner.history.take(&id, now);
        inner.members.insert(
            id,
            Member {
                connected_at: now,
                base_usage,
            },
        );
        self.record_metrics(&inner);
        Ok(())
    }

    pub(crate) fn apply_limits(&self, max_peers: usize, capacity: u64) -> Vec<ClientId> {
        let max = match capacity.checked_div(self.config.free_capacity) {
            Some(by_capacity) => max_peers.min(usize::try_from(by_capacity).unwrap_or(usize::MAX)),
            None => max_peers,
        };

        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let previous = inner.max;
        inner.max = max;
        inner.capacity = capacity;

        let mut evicted = Vec::new();
        while inner.members.len() > max {
            let Some(victim) = self.eviction_candidate(&inner, now) else {
                break;
            };
            self.evict(&mut inner, victim, now);
            evicted.push(victim);
        }
        self.record_metrics(&inner);
        drop(inner);

        if previous != max {
            debug!(previous, max, capacity, evicted = evicted.len(), "free pool limits changed");
        }
        evicted
    }

    pub(crate) fn notify_evicted(&self, evicted: &[ClientId]) {
        for id in evicted {
            (self.on_evict)(*id);
        }
    }

    /// Find a slot for `candidate`: `None` if one is free, otherwise the
    /// member it would replace.
    fn room_for(
        &self,
        inner: &mut FreeInner,
        candidate: &ClientId,
        now: MonoTime,
    ) -> Result<Option<ClientId>, PoolError> {
        if inner.members.len() < inner.max {
            return Ok(None);
        }

        let Some(victim) = self.eviction_candidate(inner, now) else {
            return Err(self.reject(inner, candidate));
        };
        let candidate_usage = inner.history.get(candidate, now);
        if candidate_usage >= self.biased_usage(inner, &victim, now) {
            return Err(self.reject(inner, candidate));
        }
        Ok(Some(victim))
    }

    fn released_by(&self, victim: Option<ClientId>) -> u64 {
        victim.map_or(0, |_| self.config.free_capacity)
    }

    fn evict_for(
        &self,
        inner: &mut FreeInner,
        victim: Option<ClientId>,
        now: MonoTime,
        evicted: &mut Vec<ClientId>,
    ) {
        if let Some(victim) = victim {
            self.evict(inner, victim, now);
            evicted.push(victim);
        }
    }

    fn reject(&self, inner: &FreeInner, candidate: &ClientId) -> PoolError {
        trace!(client = %candidate, max = inner.max, "free pool full");
        self.events.rejected(*candidate);
        PoolError::PoolFull { max: inner.max }
    }

    fn biased_usage(&self, inner: &FreeInner, id: &ClientId, now: MonoTime) -> f64 {
        inner
            .members
            .get(id)
            .map(|m| m.usage(now) - self.config.connected_bias.as_secs_f64())
            .unwrap_or(f64::NEG_INFINITY)
    }

    /// Member evicted first: highest biased usage, then oldest, then highest id.
    fn eviction_candidate(&self, inner: &FreeInner, now: MonoTime) -> Option<ClientId> {
        let bias = self.config.connected_bias.as_secs_f64();
        inner
            .members
            .iter()
            .max_by(|(a_id, a), (b_id, b)| {
                (a.usage(now) - bias)
                    .total_cmp(&(b.usage(now) - bias))
                    .then_with(|| b.connected_at.cmp(&a.connected_at))
                    .then_with(|| a_id.cmp(b_id))
            })
            .map(|(id, _)| *id)
    }

    fn evict(&self, inner: &mut FreeInner, id: ClientId, now: MonoTime) {
        if let Some(member) = inner.members.remove(&id) {
            inner.history.record(id, member.usage(now), now);
        }
        self.manager.disconnect(&id);
        debug!(client = %id, "free client evicted");
        self.events.evicted(id);
    }

    fn record_metrics(&self, inner: &FreeInner) {
        metrics::gauge!("clientpool.free_members").set(inner.members.len() as f64);
        metrics::gauge!("clientpool.free_max").set(inner.max as f64);
    }
}

impl std::fmt::Debug for FreeClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreeClientPool")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
