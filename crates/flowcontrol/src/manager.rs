//! Client manager: registry, buffer accounting and capacity limits.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::client::ClientState;
use crate::{
    CapacityLimits, ClientId, ClientParams, ClientSnapshot, ClientTier, Clock, CurvePoint,
    FlowControlError, FlowParams, RechargeCurve,
};

type ClientHandle = Arc<Mutex<ClientState>>;

#[derive(Default)]
struct Registry {
    clients: HashMap<ClientId, ClientHandle>,
    /// Sum of every connected client's minimum recharge.
    total_min_recharge: u64,
}

/// Owns the buffer of every admitted client.
///
/// Lookups take the registry lock briefly to clone the client's `Arc`; buffer
/// updates then only lock that client. `connect`, `disconnect` and
/// `update_params` take the registry write lock, which serializes capacity
/// accounting. Lock order is always registry, then client.
pub struct ClientManager {
    clock: Arc<dyn Clock>,
    registry: RwLock<Registry>,
    params: RwLock<Arc<FlowParams>>,
    /// Sum of minimum recharge over clients whose buffer is below its limit.
    recharging_sum: AtomicU64,
    total_capacity: watch::Sender<u64>,
}

impl ClientManager {
    /// Create a manager with no recharge curve and unlimited capacity.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let params = FlowParams::default();
        let (total_capacity, _) = watch::channel(params.total_capacity());
        Self {
            clock,
            registry: RwLock::new(Registry::default()),
            params: RwLock::new(Arc::new(params)),
            recharging_sum: AtomicU64::new(0),
            total_capacity,
        }
    }

    /// Current parameter snapshot.
    pub fn params(&self) -> Arc<FlowParams> {
        Arc::clone(&self.params.read())
    }

    /// Admit a client with a full buffer.
    pub fn connect(
        &self,
        id: ClientId,
        tier: ClientTier,
        params: ClientParams,
    ) -> Result<ClientSnapshot, FlowControlError> {
        let limits = self.params().limits;
        check_per_client(&limits, &params)?;

        let mut registry = self.registry.write();
        if registry.clients.contains_key(&id) {
            return Err(FlowControlError::AlreadyConnected(id));
        }

        let available = limits.max_capacity.saturating_sub(registry.total_min_recharge);
        if params.min_recharge > available {
            return Err(FlowControlError::CapacityExceeded {
                requested: params.min_recharge,
                available,
            });
        }

        let state = ClientState::new(id, tier, params, self.clock.now());
        let snapshot = state.snapshot();
        registry.clients.insert(id, Arc::new(Mutex::new(state)));
        registry.total_min_recharge += params.min_recharge;
        self.record_registry_metrics(&registry);

        debug!(client = %id, %tier, min_recharge = params.min_recharge, "client connected");
        Ok(snapshot)
    }

    /// Check whether [`Self::connect`] would admit the client once other
    /// clients have given back `released` capacity. Changes nothing.
    pub fn can_connect(
        &self,
        id: &ClientId,
        params: &ClientParams,
        released: u64,
    ) -> Result<(), FlowControlError> {
        let limits = self.params().limits;
        check_per_client(&limits, params)?;

        let registry = self.registry.read();
        if registry.clients.contains_key(id) {
            return Err(FlowControlError::AlreadyConnected(*id));
        }
        let allocated = registry.total_min_recharge.saturating_sub(released);
        check_available(&limits, params, allocated)
    }

    /// Check whether [`Self::update_params`] would accept the change once
    /// other clients have given back `released` capacity. Changes nothing.
    pub fn can_update_params(
        &self,
        id: &ClientId,
        params: &ClientParams,
        released: u64,
    ) -> Result<(), FlowControlError> {
        let limits = self.params().limits;
        check_per_client(&limits, params)?;

        let registry = self.registry.read();
        let handle = registry
            .clients
            .get(id)
            .ok_or(FlowControlError::UnknownClient(*id))?;
        let old = handle.lock().params().min_recharge;
        if params.min_recharge <= old {
            return Ok(());
        }
        let allocated = (registry.total_min_recharge - old).saturating_sub(released);
        check_available(&limits, params, allocated)
    }

    /// Release a client's allocation. Returns `false` if it was not connected.
    pub fn disconnect(&self, id: &ClientId) -> bool {
        let mut registry = self.registry.write();
        let Some(handle) = registry.clients.remove(id) else {
            return false;
        };

        let mut state = handle.lock();
        state.mark_disconnected();
        let min_recharge = state.params().min_recharge;
        if state.is_recharging() {
            state.set_recharging(false);
            self.recharging_sum.fetch_sub(min_recharge, Ordering::Relaxed);
        }
        registry.total_min_recharge -= min_recharge;
        self.record_registry_metrics(&registry);

        debug!(client = %id, "client disconnected");
        true
    }

    /// Recharge the client's buffer for the time since its last update, then
    /// deduct `cost`. Returns the remaining buffer.
    pub fn try_consume(&self, id: &ClientId, cost: u64) -> Result<u64, FlowControlError> {
        let handle = self.handle(id)?;
        let params = self.params();
        let now = self.clock.now();

        let mut state = handle.lock();
        if !state.is_connected() {
            return Err(FlowControlError::UnknownClient(*id));
        }

        let rate = self.recharge_rate(&params, state.params().min_recharge);
        state.recharge(now, rate);
        let accepted = state.try_deduct(cost);
        self.sync_recharging(&mut state);

        if accepted {
            trace!(client = %id, cost, buffer = state.buffer(), "request accepted");
            Ok(state.buffer())
        } else {
            metrics::counter!("flowcontrol.rejected_total").increment(1);
            trace!(client = %id, cost, buffer = state.buffer(), "insufficient buffer");
            Err(FlowControlError::InsufficientBuffer {
                client: *id,
                buffer: state.buffer(),
                cost,
            })
        }
    }

    /// Return overcharged cost to a client's buffer, clamped to its limit.
    pub fn refund(&self, id: &ClientId, amount: u64) -> Result<u64, FlowControlError> {
        let handle = self.handle(id)?;
        let params = self.params();
        let now = self.clock.now();

        let mut state = handle.lock();
        if !state.is_connected() {
            return Err(FlowControlError::UnknownClient(*id));
        }

        let rate = self.recharge_rate(&params, state.params().min_recharge);
        state.recharge(now, rate);
        state.refund(amount);
        self.sync_recharging(&mut state);
        Ok(state.buffer())
    }

    /// Atomically change a connected client's tier and parameters.
    ///
    /// Time elapsed so far is credited at the old rate.
    pub fn update_params(
        &self,
        id: &ClientId,
        tier: ClientTier,
        params: ClientParams,
    ) -> Result<ClientSnapshot, FlowControlError> {
        let flow = self.params();
        check_per_client(&flow.limits, &params)?;

        let mut registry = self.registry.write();
        let handle = registry
            .clients
            .get(id)
            .cloned()
            .ok_or(FlowControlError::UnknownClient(*id))?;
        let mut state = handle.lock();

        let old = state.params();
        let base = registry.total_min_recharge - old.min_recharge;
        let available = flow.limits.max_capacity.saturating_sub(base);
        if params.min_recharge > old.min_recharge && params.min_recharge > available {
            return Err(FlowControlError::CapacityExceeded {
                requested: params.min_recharge,
                available,
            });
        }

        let rate = self.recharge_rate(&flow, old.min_recharge);
        state.recharge(self.clock.now(), rate);
        if state.is_recharging() {
            state.set_recharging(false);
            self.recharging_sum.fetch_sub(old.min_recharge, Ordering::Relaxed);
        }
        state.update(tier, params);
        self.sync_recharging(&mut state);
        registry.total_min_recharge = base + params.min_recharge;
        self.record_registry_metrics(&registry);

        debug!(client = %id, %tier, min_recharge = params.min_recharge, "client params updated");
        Ok(state.snapshot())
    }

    /// Swap in a new recharge curve.
    pub fn set_recharge_curve(&self, curve: RechargeCurve) {
        self.swap_params(|current| FlowParams {
            curve: Some(curve),
            limits: current.limits,
        });
    }

    /// Validate raw points and swap them in as the recharge curve. On error the
    /// previous curve stays in effect.
    pub fn try_set_recharge_curve(&self, points: Vec<CurvePoint>) -> Result<(), FlowControlError> {
        let curve = RechargeCurve::new(points).inspect_err(|e| {
            warn!(error = %e, "rejected recharge curve");
        })?;
        self.set_recharge_curve(curve);
        Ok(())
    }

    /// Validate and swap in new capacity limits. On error the previous limits
    /// stay in effect.
    ///
    /// Clients already connected keep their allocation even if it now exceeds
    /// the maximum; new connections are refused until it drains.
    pub fn set_capacity_limits(
        &self,
        min_capacity: u64,
        max_capacity: u64,
        max_capacity_per_client: u64,
    ) -> Result<(), FlowControlError> {
        let limits = CapacityLimits::new(min_capacity, max_capacity, max_capacity_per_client)
            .inspect_err(|e| warn!(error = %e, "rejected capacity limits"))?;
        self.swap_params(|current| FlowParams {
            curve: current.curve.clone(),
            limits,
        });
        Ok(())
    }

    /// Subscribe to total capacity changes.
    pub fn subscribe_total_capacity(&self) -> watch::Receiver<u64> {
        self.total_capacity.subscribe()
    }

    pub fn total_capacity(&self) -> u64 {
        *self.total_capacity.borrow()
    }

    pub fn client(&self, id: &ClientId) -> Option<ClientSnapshot> {
        let handle = self.registry.read().clients.get(id).cloned()?;
        let state = handle.lock();
        Some(state.snapshot())
    }

    pub fn clients(&self) -> Vec<ClientSnapshot> {
        let handles: Vec<ClientHandle> = self.registry.read().clients.values().cloned().collect();
        handles.iter().map(|h| h.lock().snapshot()).collect()
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.registry.read().clients.contains_key(id)
    }

    pub fn client_count(&self) -> usize {
        self.registry.read().clients.len()
    }

    pub fn total_min_recharge(&self) -> u64 {
        self.registry.read().total_min_recharge
    }

    pub fn recharging_sum(&self) -> u64 {
        self.recharging_sum.load(Ordering::Relaxed)
    }

    fn handle(&self, id: &ClientId) -> Result<ClientHandle, FlowControlError> {
        self.registry
            .read()
            .clients
            .get(id)
            .cloned()
            .ok_or(FlowControlError::UnknownClient(*id))
    }

    /// Client's share of the curve, floored at its own minimum.
    fn recharge_rate(&self, params: &FlowParams, min_recharge: u64) -> u64 {
        let Some(curve) = &params.curve else {
            return min_recharge;
        };
        let allocated = self.recharging_sum.load(Ordering::Relaxed);
        if allocated == 0 {
            return min_recharge;
        }
        let share = u128::from(min_recharge) * u128::from(curve.value_at(allocated))
            / u128::from(allocated);
        u64::try_from(share).unwrap_or(u64::MAX).max(min_recharge)
    }

    fn sync_recharging(&self, state: &mut ClientState) {
        let recharging = state.buffer() < state.params().buffer_limit;
        if recharging == state.is_recharging() {
            return;
        }
        let min_recharge = state.params().min_recharge;
        if recharging {
            self.recharging_sum.fetch_add(min_recharge, Ordering::Relaxed);
        } else {
            self.recharging_sum.fetch_sub(min_recharge, Ordering::Relaxed);
        }
        state.set_recharging(recharging);
    }

    fn swap_params(&self, f: impl FnOnce(&FlowParams) -> FlowParams) {
        let total = {
            let mut guard = self.params.write();
            let next = f(&guard);
            let total = next.total_capacity();
            *guard = Arc::new(next);
            total
        };

        metrics::gauge!("flowcontrol.total_capacity").set(total as f64);
        let changed = self.total_capacity.send_if_modified(|current| {
            if *current == total {
                return false;
            }
            *current = total;
            true
        });
        if changed {
            debug!(total, "total capacity changed");
        }
    }

    fn record_registry_metrics(&self, registry: &Registry) {
        metrics::gauge!("flowcontrol.clients").set(registry.clients.len() as f64);
        metrics::gauge!("flowcontrol.allocated_capacity").set(registry.total_min_recharge as f64);
    }
}

fn check_per_client(limits: &CapacityLimits, params: &ClientParams) -> Result<(), FlowControlError> {
    if params.min_recharge > limits.max_capacity_per_client {
        return Err(FlowControlError::CapacityExceeded {
            requested: params.min_recharge,
            available: limits.max_capacity_per_client,
        });
    }
    Ok(())
}

fn check_available(
    limits: &CapacityLimits,
    params: &ClientParams,
    allocated: u64,
) -> Result<(), FlowControlError> {
    let available = limits.max_capacity.saturating_sub(allocated);
    if params.min_recharge > available {
        return Err(FlowControlError::CapacityExceeded {
            requested: params.min_recharge,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use proptest::prelude::*;

    use super::*;
    use crate::ManualClock;

    fn test_client(n: u8) -> ClientId {
        ClientId::from([n; 32])
    }

    fn test_manager() -> (Arc<ManualClock>, ClientManager) {
        let clock = Arc::new(ManualClock::new());
        let manager = ClientManager::new(clock.clone());
        (clock, manager)
    }

    #[test]
    fn test_connect_starts_full() {
        let (_, manager) = test_manager();
        let snapshot = manager
            .connect(test_client(1), ClientTier::Free, ClientParams::new(1000, 10))
            .unwrap();
        assert_eq!(snapshot.buffer, 1000);
        assert_eq!(manager.total_min_recharge(), 10);
    }

    #[test]
    fn test_idle_recharge_at_min_rate() {
        let (clock, manager) = test_manager();
        let id = test_client(1);
        manager
            .connect(id, ClientTier::Free, ClientParams::new(1000, 10))
            .unwrap();

        assert_eq!(manager.try_consume(&id, 400).unwrap(), 600);
        clock.advance(Duration::from_secs(5));
        // 50 units recharged before the next deduction.
        assert_eq!(manager.try_consume(&id, 0).unwrap(), 650);

        clock.advance(Duration::from_secs(3600));
        assert_eq!(manager.try_consume(&id, 0).unwrap(), 1000);
    }

    #[test]
    fn test_insufficient_buffer_is_rejection() {
        let (_, manager) = test_manager();
        let id = test_client(1);
        manager
            .connect(id, ClientTier::Free, ClientParams::new(100, 10))
            .unwrap();

        assert_matches!(
            manager.try_consume(&id, 101),
            Err(FlowControlError::InsufficientBuffer { buffer: 100, cost: 101, .. })
        );
        assert_eq!(manager.client(&id).unwrap().buffer, 100);
    }

    #[test]
    fn test_curve_speeds_up_recharge() {
        let (clock, manager) = test_manager();
        let id = test_client(1);
        manager
            .connect(id, ClientTier::Free, ClientParams::new(1000, 10))
            .unwrap();
        manager.set_recharge_curve(RechargeCurve::normal(1600));

        manager.try_consume(&id, 500).unwrap();
        assert_eq!(manager.recharging_sum(), 10);
        clock.advance(Duration::from_secs(1));
        // curve(10) = 80, the only recharging client gets all of it.
        assert_eq!(manager.try_consume(&id, 0).unwrap(), 580);

        manager.set_recharge_curve(RechargeCurve::block_processing(1600));
        clock.advance(Duration::from_secs(1));
        assert_eq!(manager.try_consume(&id, 0).unwrap(), 590);
    }

    #[test]
    fn test_capacity_exceeded() {
        let (_, manager) = test_manager();
        manager.set_capacity_limits(10, 100, 60).unwrap();

        manager
            .connect(test_client(1), ClientTier::Free, ClientParams::new(600, 60))
            .unwrap();
        assert_matches!(
            manager.connect(test_client(2), ClientTier::Free, ClientParams::new(600, 50)),
            Err(FlowControlError::CapacityExceeded { requested: 50, available: 40 })
        );
        assert_matches!(
            manager.connect(test_client(3), ClientTier::Priority, ClientParams::new(700, 70)),
            Err(FlowControlError::CapacityExceeded { requested: 70, available: 60 })
        );
        assert!(manager.connect(test_client(2), ClientTier::Free, ClientParams::new(400, 40)).is_ok());
        assert_eq!(manager.total_min_recharge(), 100);
    }

    #[test]
    fn test_can_connect_matches_connect() {
        let (_, manager) = test_manager();
        manager.set_capacity_limits(10, 100, 60).unwrap();
        manager
            .connect(test_client(1), ClientTier::Free, ClientParams::new(600, 60))
            .unwrap();

        let params = ClientParams::new(500, 50);
        assert_matches!(
            manager.can_connect(&test_client(2), &params, 0),
            Err(FlowControlError::CapacityExceeded { requested: 50, available: 40 })
        );
        // Fits once the first client's allocation is released.
        assert!(manager.can_connect(&test_client(2), &params, 60).is_ok());
        assert_matches!(
            manager.can_connect(&test_client(2), &ClientParams::new(700, 70), 60),
            Err(FlowControlError::CapacityExceeded { requested: 70, available: 60 })
        );
        assert_matches!(
            manager.can_connect(&test_client(1), &ClientParams::new(100, 10), 60),
            Err(FlowControlError::AlreadyConnected(_))
        );

        assert!(manager.can_update_params(&test_client(1), &ClientParams::new(100, 10), 0).is_ok());
        assert_matches!(
            manager.can_update_params(&test_client(3), &params, 0),
            Err(FlowControlError::UnknownClient(_))
        );
        // Nothing was changed by the checks.
        assert_eq!(manager.client_count(), 1);
        assert_eq!(manager.total_min_recharge(), 60);
    }

    #[test]
    fn test_duplicate_connect() {
        let (_, manager) = test_manager();
        let id = test_client(1);
        manager.connect(id, ClientTier::Free, ClientParams::new(100, 10)).unwrap();
        assert_matches!(
            manager.connect(id, ClientTier::Free, ClientParams::new(100, 10)),
            Err(FlowControlError::AlreadyConnected(_))
        );
        assert_eq!(manager.total_min_recharge(), 10);
    }

    #[test]
    fn test_disconnect_idempotent() {
        let (_, manager) = test_manager();
        let id = test_client(1);
        manager.connect(id, ClientTier::Free, ClientParams::new(100, 10)).unwrap();
        manager.try_consume(&id, 50).unwrap();
        assert_eq!(manager.recharging_sum(), 10);

        assert!(manager.disconnect(&id));
        assert!(!manager.disconnect(&id));
        assert_eq!(manager.total_min_recharge(), 0);
        assert_eq!(manager.recharging_sum(), 0);
        assert_matches!(
            manager.try_consume(&id, 1),
            Err(FlowControlError::UnknownClient(_))
        );
    }

    #[test]
    fn test_invalid_curve_keeps_previous() {
        let (_, manager) = test_manager();
        let curve = RechargeCurve::normal(1600);
        manager.set_recharge_curve(curve.clone());

        let result = manager.try_set_recharge_curve(vec![
            CurvePoint::new(0, 0),
            CurvePoint::new(100, 50),
            CurvePoint::new(50, 60),
        ]);
        assert_matches!(result, Err(FlowControlError::InvalidConfiguration(_)));
        assert_eq!(manager.params().curve.as_ref(), Some(&curve));
    }

    #[test]
    fn test_invalid_limits_keep_previous() {
        let (_, manager) = test_manager();
        manager.set_capacity_limits(10, 1000, 20).unwrap();
        assert_matches!(
            manager.set_capacity_limits(50, 1000, 20),
            Err(FlowControlError::InvalidConfiguration(_))
        );
        assert_eq!(manager.params().limits, CapacityLimits::new(10, 1000, 20).unwrap());
    }

    #[test]
    fn test_total_capacity_notifications() {
        let (_, manager) = test_manager();
        let mut rx = manager.subscribe_total_capacity();
        manager.set_capacity_limits(10, 10_000, 100).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 10_000);

        manager.set_recharge_curve(RechargeCurve::block_processing(4000));
        assert_eq!(*rx.borrow_and_update(), 4000);

        // Same total, no notification.
        manager.set_recharge_curve(RechargeCurve::normal(4000));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_update_params_promotes_atomically() {
        let (_, manager) = test_manager();
        manager.set_capacity_limits(10, 100, 80).unwrap();
        let a = test_client(1);
        let b = test_client(2);
        manager.connect(a, ClientTier::Free, ClientParams::new(100, 10)).unwrap();
        manager.connect(b, ClientTier::Free, ClientParams::new(100, 10)).unwrap();

        let snapshot = manager
            .update_params(&a, ClientTier::Priority, ClientParams::new(800, 80))
            .unwrap();
        assert_eq!(snapshot.tier, ClientTier::Priority);
        assert_eq!(manager.total_min_recharge(), 90);

        // Over the total: refused and nothing changes.
        assert_matches!(
            manager.update_params(&b, ClientTier::Priority, ClientParams::new(500, 50)),
            Err(FlowControlError::CapacityExceeded { .. })
        );
        assert_eq!(manager.client(&b).unwrap().params.min_recharge, 10);
        assert_eq!(manager.total_min_recharge(), 90);
    }

    #[test]
    fn test_refund_clamped() {
        let (_, manager) = test_manager();
        let id = test_client(1);
        manager.connect(id, ClientTier::Free, ClientParams::new(100, 10)).unwrap();
        manager.try_consume(&id, 60).unwrap();
        assert_eq!(manager.refund(&id, 20).unwrap(), 60);
        assert_eq!(manager.refund(&id, 1000).unwrap(), 100);
        assert_eq!(manager.recharging_sum(), 0);
    }

    #[test]
    fn test_concurrent_consume_same_client() {
        let clock = Arc::new(ManualClock::new());
        let manager = Arc::new(ClientManager::new(clock));
        let id = test_client(1);
        manager
            .connect(id, ClientTier::Free, ClientParams::new(10_000, 1))
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    (0..500)
                        .filter(|_| manager.try_consume(&id, 3).is_ok())
                        .count()
                })
            })
            .collect();
        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        // Clock never moves, so exactly floor(10000 / 3) requests fit.
        assert_eq!(accepted, 3333);
        assert_eq!(manager.client(&id).unwrap().buffer, 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Connect(u8, u64),
        Disconnect(u8),
        Consume(u8, u64),
        Advance(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4, 1u64..200).prop_map(|(c, m)| Op::Connect(c, m)),
            (0u8..4).prop_map(Op::Disconnect),
            (0u8..4, 0u64..2000).prop_map(|(c, cost)| Op::Consume(c, cost)),
            (0u64..10_000).prop_map(Op::Advance),
        ]
    }

    proptest! {
        #[test]
        fn test_buffers_stay_in_bounds(ops in proptest::collection::vec(op_strategy(), 1..200)) {
            let clock = Arc::new(ManualClock::new());
            let manager = ClientManager::new(clock.clone());
            manager.set_capacity_limits(1, 400, 200).unwrap();
            manager.set_recharge_curve(RechargeCurve::normal(400));

            for op in ops {
                match op {
                    Op::Connect(c, min) => {
                        let _ = manager.connect(
                            test_client(c),
                            ClientTier::Free,
                            ClientParams::from_capacity(min),
                        );
                    }
                    Op::Disconnect(c) => {
                        manager.disconnect(&test_client(c));
                    }
                    Op::Consume(c, cost) => {
                        let _ = manager.try_consume(&test_client(c), cost);
                    }
                    Op::Advance(ms) => clock.advance(Duration::from_millis(ms)),
                }

                let clients = manager.clients();
                for client in &clients {
                    prop_assert!(client.buffer <= client.params.buffer_limit);
                }
                let sum: u64 = clients.iter().map(|c| c.params.min_recharge).sum();
                prop_assert_eq!(sum, manager.total_min_recharge());
                prop_assert!(sum <= 400);
                let recharging: u64 = clients
                    .iter()
                    .filter(|c| c.recharging)
                    .map(|c| c.params.min_recharge)
                    .sum();
                prop_assert_eq!(recharging, manager.recharging_sum());
            }
        }
    }
}
