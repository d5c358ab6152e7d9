//! Reserved-capacity clients and their promotion out of the free pool.

use std::collections::HashMap;
use std::sync::Arc;

use lumen_flowcontrol::{
    ClientId, ClientManager, ClientParams, ClientTier, Clock, FlowControlError, MonoTime,
};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{FreeClientPool, PoolError, PoolEventEmitter};

/// A negotiated capacity reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reservation {
    pub capacity: u64,
    /// `None` never expires.
    pub expiry: Option<MonoTime>,
    pub connected: bool,
}

/// Priority pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriorityPoolStatus {
    pub reservations: usize,
    pub reserved_capacity: u64,
    pub connected: usize,
    pub connected_capacity: u64,
    pub max_peers: usize,
    pub total_capacity: u64,
}

#[derive(Default)]
struct PriorityInner {
    reservations: HashMap<ClientId, Reservation>,
    /// Sum of all reservations, connected or not.
    reserved: u64,
    max_peers: usize,
    total_capacity: u64,
    connected: usize,
    connected_capacity: u64,
}

/// Clients with individually reserved capacity.
///
/// Reservations are counted against the total whether or not the client is
/// connected. Whatever connected priority clients do not use is handed to the
/// free pool.
pub struct PriorityClientPool {
    manager: Arc<ClientManager>,
    free: Arc<FreeClientPool>,
    clock: Arc<dyn Clock>,
    inner: Mutex<PriorityInner>,
    events: PoolEventEmitter,
}

impl PriorityClientPool {
    pub fn new(
        manager: Arc<ClientManager>,
        free: Arc<FreeClientPool>,
        clock: Arc<dyn Clock>,
        events: PoolEventEmitter,
    ) -> Self {
        Self {
            manager,
            free,
            clock,
            inner: Mutex::new(PriorityInner::default()),
            events,
        }
    }

    pub fn free_pool(&self) -> &Arc<FreeClientPool> {
        &self.free
    }

    /// Set peer and capacity limits, cascading the remainder to the free pool.
    ///
    /// Existing reservations are kept even if they now exceed the total; new
    /// ones are refused until enough of them are released.
    pub fn set_limits(&self, max_peers: usize, total_capacity: u64) {
        let mut evicted = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.max_peers = max_peers;
            inner.total_capacity = total_capacity;
            if inner.reserved > total_capacity {
                warn!(
                    reserved = inner.reserved,
                    total_capacity, "priority reservations exceed total capacity"
                );
            }
            self.update_free_limits(&inner, &mut evicted);
            self.record_metrics(&inner);
        }
        self.free.notify_evicted(&evicted);
    }

    /// Reserve `capacity` for a client until `expiry`. A connected free client
    /// is promoted immediately; re-registering changes the reservation.
    pub fn register(
        &self,
        id: ClientId,
        capacity: u64,
        expiry: Option<MonoTime>,
    ) -> Result<(), PoolError> {
        if capacity == 0 {
            return Err(PoolError::FlowControl(FlowControlError::InvalidConfiguration(
                "zero capacity reservation".into(),
            )));
        }

        let mut evicted = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            self.register_locked(&mut inner, id, capacity, expiry, &mut evicted)
        };
        self.free.notify_evicted(&evicted);
        result
    }

    /// Drop a reservation. A connected client is demoted to the free pool, or
    /// disconnected if the free pool refuses it. Returns `false` if there was
    /// no reservation.
    pub fn release(&self, id: &ClientId) -> bool {
        let mut evicted = Vec::new();
        let released = {
            let mut inner = self.inner.lock();
            self.release_locked(&mut inner, id, &mut evicted)
        };
        self.free.notify_evicted(&evicted);
        released
    }

    /// Release every reservation whose expiry has passed.
    pub fn expire_due(&self) -> Vec<ClientId> {
        let now = self.clock.now();
        let mut evicted = Vec::new();
        let mut due: Vec<ClientId>;
        {
            let mut inner = self.inner.lock();
            due = inner
                .reservations
                .iter()
                .filter(|(_, r)| r.expiry.is_some_and(|expiry| expiry <= now))
                .map(|(id, _)| *id)
                .collect();
            due.sort();
            for id in &due {
                self.release_locked(&mut inner, id, &mut evicted);
                self.events.reservation_expired(*id);
            }
        }
        if !due.is_empty() {
            debug!(count = due.len(), "priority reservations expired");
        }
        self.free.notify_evicted(&evicted);
        due
    }

    /// Admit a connecting client: with its reservation if it has one,
    /// otherwise through the free pool. The announced tier alone grants
    /// nothing.
    pub fn connect(&self, id: ClientId, announced: ClientTier) -> Result<ClientTier, PoolError> {
        let mut evicted = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            self.connect_locked(&mut inner, id, announced, &mut evicted)
        };
        self.free.notify_evicted(&evicted);
        result
    }

    /// Disconnect a client from whichever pool holds it. The reservation, if
    /// any, is kept.
    pub fn disconnect(&self, id: &ClientId) -> bool {
        let mut evicted = Vec::new();
        let removed = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            match inner.reservations.get_mut(id) {
                Some(reservation) if reservation.connected => {
                    reservation.connected = false;
                    let capacity = reservation.capacity;
                    inner.connected -= 1;
                    inner.connected_capacity -= capacity;
                    self.manager.disconnect(id);
                    self.update_free_limits(inner, &mut evicted);
                    self.record_metrics(inner);
                    debug!(client = %id, "priority client disconnected");
                    self.events.removed(*id);
                    true
                }
                _ => self.free.remove(id),
            }
        };
        self.free.notify_evicted(&evicted);
        removed
    }

    pub fn reservation(&self, id: &ClientId) -> Option<Reservation> {
        self.inner.lock().reservations.get(id).copied()
    }

    /// Capacity still available for new reservations.
    pub fn reservable(&self) -> u64 {
        let inner = self.inner.lock();
        inner.total_capacity.saturating_sub(inner.reserved)
    }

    pub fn status(&self) -> PriorityPoolStatus {
        let inner = self.inner.lock();
        PriorityPoolStatus {
            reservations: inner.reservations.len(),
            reserved_capacity: inner.reserved,
            connected: inner.connected,
            connected_capacity: inner.connected_capacity,
            max_peers: inner.max_peers,
            total_capacity: inner.total_capacity,
        }
    }

    fn register_locked(
        &self,
        inner: &mut PriorityInner,
        id: ClientId,
        capacity: u64,
        expiry: Option<MonoTime>,
        evicted: &mut Vec<ClientId>,
    ) -> Result<(), PoolError> {
        let per_client = self.manager.params().limits.max_capacity_per_client;
        if capacity > per_client {
            debug!(client = %id, capacity, per_client, "priority reservation over per-client cap");
            return Err(PoolError::CapacityExceeded {
                requested: capacity,
                available: per_client,
            });
        }

        let existing = inner.reservations.get(&id).copied();
        let others = inner.reserved - existing.map_or(0, |r| r.capacity);
        let available = inner.total_capacity.saturating_sub(others);
        let growing = existing.is_none_or(|r| capacity > r.capacity);
        if growing && capacity > available {
            debug!(client = %id, capacity, available, "priority reservation refused");
            return Err(PoolError::CapacityExceeded {
                requested: capacity,
                available,
            });
        }

        let params = ClientParams::from_capacity(capacity);
        let mut promoted = false;
        let connected = match existing {
            Some(r) if r.connected => {
                self.manager.update_params(&id, ClientTier::Priority, params)?;
                inner.connected_capacity = inner.connected_capacity - r.capacity + capacity;
                true
            }
            _ => {
                promoted = self.free.transfer_out(&id, ClientTier::Priority, params)?;
                if promoted {
                    inner.connected += 1;
                    inner.connected_capacity += capacity;
                }
                promoted
            }
        };

        inner.reserved = others + capacity;
        inner.reservations.insert(
            id,
            Reservation {
                capacity,
                expiry,
                connected,
            },
        );
        if connected {
            self.update_free_limits(inner, evicted);
        }
        self.record_metrics(inner);

        if promoted {
            info!(client = %id, capacity, "free client promoted");
            self.events.promoted(id, capacity);
        } else {
            debug!(client = %id, capacity, connected, "priority reservation registered");
        }
        Ok(())
    }

    fn release_locked(
        &self,
        inner: &mut PriorityInner,
        id: &ClientId,
        evicted: &mut Vec<ClientId>,
    ) -> bool {
        let Some(reservation) = inner.reservations.remove(id) else {
            return false;
        };
        inner.reserved -= reservation.capacity;

        if reservation.connected {
            inner.connected -= 1;
            inner.connected_capacity -= reservation.capacity;
            self.update_free_limits(inner, evicted);
            match self.free.transfer_in(*id, evicted) {
                Ok(()) => {
                    info!(client = %id, "priority client demoted");
                    self.events.demoted(*id);
                }
                Err(e) => {
                    info!(client = %id, error = %e, "demoted client refused by free pool");
                    self.manager.disconnect(id);
                    self.events.evicted(*id);
                    evicted.push(*id);
                }
            }
        }
        self.record_metrics(inner);
        true
    }

    fn connect_locked(
        &self,
        inner: &mut PriorityInner,
        id: ClientId,
        announced: ClientTier,
        evicted: &mut Vec<ClientId>,
    ) -> Result<ClientTier, PoolError> {
        let Some(reservation) = inner.reservations.get(&id).copied() else {
            if announced == ClientTier::Priority {
                debug!(client = %id, "priority announced without reservation");
            }
            self.free.admit(id, evicted)?;
            return Ok(ClientTier::Free);
        };
        if reservation.connected {
            return Err(PoolError::AlreadyConnected(id));
        }

        // Refuse before the free pool gives anything up.
        let params = ClientParams::from_capacity(reservation.capacity);
        self.manager
            .can_connect(&id, &params, self.free.allocated_capacity())?;

        // Shrink the free pool first so the reserved capacity is actually free.
        inner.connected += 1;
        inner.connected_capacity += reservation.capacity;
        self.update_free_limits(inner, evicted);

        if let Err(e) = self.manager.connect(id, ClientTier::Priority, params) {
            inner.connected -= 1;
            inner.connected_capacity -= reservation.capacity;
            self.update_free_limits(inner, evicted);
            return Err(e.into());
        }

        if let Some(r) = inner.reservations.get_mut(&id) {
            r.connected = true;
        }
        self.record_metrics(inner);
        debug!(client = %id, capacity = reservation.capacity, "priority client connected");
        self.events.admitted(id, ClientTier::Priority);
        Ok(ClientTier::Priority)
    }

    fn update_free_limits(&self, inner: &PriorityInner, evicted: &mut Vec<ClientId>) {
        let max_peers = inner.max_peers.saturating_sub(inner.connected);
        let capacity = inner.total_capacity.saturating_sub(inner.connected_capacity);
        evicted.extend(self.free.apply_limits(max_peers, capacity));
    }

    fn record_metrics(&self, inner: &PriorityInner) {
        metrics::gauge!("clientpool.priority_connected").set(inner.connected as f64);
        metrics::gauge!("clientpool.priority_reserved").set(inner.reserved as f64);
    }
}
