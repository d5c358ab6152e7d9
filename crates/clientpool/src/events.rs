//! Pool membership events, broadcast to whoever listens.

use lumen_flowcontrol::{ClientId, ClientTier};
use tokio::sync::broadcast;

use crate::constants::EVENT_BUFFER;

/// Admission and membership changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    Admitted { id: ClientId, tier: ClientTier },
    Rejected { id: ClientId },
    Evicted { id: ClientId },
    Removed { id: ClientId },
    Promoted { id: ClientId, capacity: u64 },
    Demoted { id: ClientId },
    ReservationExpired { id: ClientId },
}

/// Shared by both pools. Sending never blocks; a lagging subscriber loses
/// its oldest events.
#[derive(Debug, Clone)]
pub struct PoolEventEmitter {
    tx: broadcast::Sender<PoolEvent>,
}

impl Default for PoolEventEmitter {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }
}

impl PoolEventEmitter {
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn admitted(&self, id: ClientId, tier: ClientTier) {
        self.send(PoolEvent::Admitted { id, tier });
    }

    pub(crate) fn rejected(&self, id: ClientId) {
        self.send(PoolEvent::Rejected { id });
    }

    pub(crate) fn evicted(&self, id: ClientId) {
        self.send(PoolEvent::Evicted { id });
    }

    pub(crate) fn removed(&self, id: ClientId) {
        self.send(PoolEvent::Removed { id });
    }

    pub(crate) fn promoted(&self, id: ClientId, capacity: u64) {
        self.send(PoolEvent::Promoted { id, capacity });
    }

    pub(crate) fn demoted(&self, id: ClientId) {
        self.send(PoolEvent::Demoted { id });
    }

    pub(crate) fn reservation_expired(&self, id: ClientId) {
        self.send(PoolEvent::ReservationExpired { id });
    }

    fn send(&self, event: PoolEvent) {
        match &event {
            PoolEvent::Admitted { tier, .. } => {
                metrics::counter!("clientpool.admitted_total", "tier" => tier.to_string())
                    .increment(1);
            }
            PoolEvent::Rejected { .. } => metrics::counter!("clientpool.rejected_total").increment(1),
            PoolEvent::Evicted { .. } => metrics::counter!("clientpool.evicted_total").increment(1),
            _ => {}
        }
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}
