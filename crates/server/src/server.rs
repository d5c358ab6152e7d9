//! Light-client server: wires flow control, admission, serving and load
//! coordination together.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lumen_clientpool::{
    EvictHandler, FreeClientPool, FreePoolConfig, FreePoolStatus, PoolEvent, PoolEventEmitter,
    PriorityClientPool, PriorityPoolStatus, Reservation,
};
use lumen_cost::{CostEstimator, RequestKind};
use lumen_flowcontrol::{
    ClientId, ClientManager, ClientSnapshot, ClientTier, Clock, FlowControlError, SystemClock,
};
use lumen_serving::{Served, ServingQueue, ServingStatus};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::announce::{HeadAnnouncer, HeadInfo, NoopAnnouncer};
use crate::config::ServerConfig;
use crate::coordinator::{Coordinator, CoordinatorHandle, CoordinatorStatus};
use crate::error::Result;
use crate::metrics::ServerMetrics;

/// Everything known about one client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientInfo {
    /// `None` when the client is not connected.
    pub snapshot: Option<ClientSnapshot>,
    pub reservation: Option<Reservation>,
    /// Decayed usage in seconds, for free pool members.
    pub free_usage: Option<f64>,
}

/// Occupancy of the pools and the serving queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub free: FreePoolStatus,
    pub priority: PriorityPoolStatus,
    pub serving: ServingStatus,
}

/// Configures and spawns a [`LightServer`].
pub struct LightServerBuilder {
    config: ServerConfig,
    clock: Arc<dyn Clock>,
    announcer: Arc<dyn HeadAnnouncer>,
    on_drop: Option<EvictHandler>,
    block_feed: Option<mpsc::UnboundedReceiver<bool>>,
}

impl LightServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock::default()),
            announcer: Arc::new(NoopAnnouncer),
            on_drop: None,
            block_feed: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn announcer(mut self, announcer: Arc<dyn HeadAnnouncer>) -> Self {
        self.announcer = announcer;
        self
    }

    /// Called for every client the server disconnects on its own.
    pub fn on_drop(mut self, on_drop: EvictHandler) -> Self {
        self.on_drop = Some(on_drop);
        self
    }

    /// Block processing notifications: `true` when a block starts processing,
    /// `false` when it is done.
    pub fn block_feed(mut self, feed: mpsc::UnboundedReceiver<bool>) -> Self {
        self.block_feed = Some(feed);
        self
    }

    /// Build the server and spawn its coordinator on the current tokio
    /// runtime.
    pub fn spawn(self) -> Result<LightServer> {
        let Self {
            config,
            clock,
            announcer,
            on_drop,
            block_feed,
        } = self;
        config.validate()?;
        let runtime = Handle::try_current()?;

        let cost = Arc::new(CostEstimator::new(
            config.cost_table.clone(),
            config.light_serve,
            Arc::clone(&clock),
        ));
        let manager = Arc::new(ClientManager::new(Arc::clone(&clock)));
        let limits = config.capacity_limits(&cost)?;
        manager.set_capacity_limits(
            limits.min_capacity,
            limits.max_capacity,
            limits.max_capacity_per_client,
        )?;

        let queue = Arc::new(ServingQueue::new(runtime.clone()));
        let events = PoolEventEmitter::default();
        let on_evict: EvictHandler = {
            let queue = Arc::clone(&queue);
            Arc::new(move |id: ClientId| {
                queue.drop_client(&id);
                if let Some(on_drop) = &on_drop {
                    on_drop(id);
                }
            })
        };
        let free_pool_config = FreePoolConfig {
            connected_bias: config.free_bias,
            ..FreePoolConfig::new(limits.min_capacity)
        };
        let free = Arc::new(FreeClientPool::new(
            Arc::clone(&manager),
            Arc::clone(&clock),
            free_pool_config,
            on_evict,
            events.clone(),
        ));
        let priority = Arc::new(PriorityClientPool::new(
            Arc::clone(&manager),
            free,
            Arc::clone(&clock),
            events.clone(),
        ));

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let mut coordinator = Coordinator::new(
            &config,
            limits.min_capacity,
            command_rx,
            block_feed,
            cost.subscribe_total_recharge(),
            Arc::clone(&manager),
            Arc::clone(&queue),
            Arc::clone(&priority),
        );
        coordinator.start();
        let task = runtime.spawn(coordinator.run());

        info!(
            light_serve = config.light_serve,
            max_peers = config.max_peers,
            free_capacity = limits.min_capacity,
            max_capacity = limits.max_capacity,
            total_capacity = manager.total_capacity(),
            "Light server started"
        );

        Ok(LightServer {
            config,
            clock,
            cost,
            manager,
            queue,
            priority,
            events,
            announcer,
            coordinator: CoordinatorHandle::new(command_tx),
            task: Mutex::new(Some(task)),
            last_td: Mutex::new(0),
            metrics: ServerMetrics::default(),
        })
    }
}

/// Serves light clients within the configured CPU budget.
///
/// Requests are charged against the client's buffer before they are queued
/// and partially refunded once their real cost is known.
pub struct LightServer {
    config: ServerConfig,
    clock: Arc<dyn Clock>,
    cost: Arc<CostEstimator>,
    manager: Arc<ClientManager>,
    queue: Arc<ServingQueue>,
    priority: Arc<PriorityClientPool>,
    events: PoolEventEmitter,
    announcer: Arc<dyn HeadAnnouncer>,
    coordinator: CoordinatorHandle,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Highest total difficulty announced.
    last_td: Mutex<u128>,
    metrics: ServerMetrics,
}

impl LightServer {
    pub fn builder(config: ServerConfig) -> LightServerBuilder {
        LightServerBuilder::new(config)
    }

    /// Admit a connecting client. Returns the tier it was admitted with; the
    /// announced tier is only a hint.
    pub fn on_connect(&self, id: ClientId, announced: ClientTier) -> Result<ClientTier> {
        let tier = self.priority.connect(id, announced).inspect_err(|e| {
            self.metrics.connect_rejected_total.increment(1);
            debug!(client = %id, error = %e, "connection refused");
        })?;
        debug!(client = %id, %tier, "client connected");
        Ok(tier)
    }

    /// Forget a disconnected client and drop its queued requests. Returns
    /// `false` if it was not connected.
    pub fn on_disconnect(&self, id: &ClientId) -> bool {
        let dropped = self.queue.drop_client(id);
        let removed = self.priority.disconnect(id);
        if removed {
            debug!(client = %id, dropped, "client disconnected");
        }
        removed
    }

    /// Charge, queue and run a request.
    ///
    /// The estimated cost is deducted up front; a request the buffer cannot
    /// cover fails with [`FlowControlError::InsufficientBuffer`] without being
    /// queued. After serving, the difference to the real cost is refunded.
    pub async fn serve<F, T>(
        &self,
        id: ClientId,
        kind: RequestKind,
        size: u64,
        job: F,
    ) -> Result<Served<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let tier = self
            .manager
            .client(&id)
            .map(|client| client.tier)
            .ok_or(FlowControlError::UnknownClient(id))?;
        let estimated = self.cost.estimate_cost(kind, size);

        let remaining = self.manager.try_consume(&id, estimated).inspect_err(|e| {
            if matches!(e, FlowControlError::InsufficientBuffer { .. }) {
                self.metrics.insufficient_buffer_total.increment(1);
            }
        })?;
        self.metrics.requests_total.increment(1);
        trace!(client = %id, %kind, size, estimated, remaining, "request charged");

        let served = match self.queue.enqueue(id, tier, job).await {
            Ok(served) => served,
            Err(e) => {
                // The client may be gone already; nothing to refund then.
                let _ = self.manager.refund(&id, estimated);
                return Err(e.into());
            }
        };

        let real = self.cost.real_cost(estimated, served.report.elapsed);
        self.cost.record_served(kind, size, served.report.elapsed);
        let refund = estimated - real;
        if refund > 0 && self.manager.refund(&id, refund).is_ok() {
            self.metrics.refunded_total.increment(refund);
        }
        trace!(
            client = %id,
            %kind,
            estimated,
            real,
            elapsed = ?served.report.elapsed,
            "request served"
        );
        Ok(served)
    }

    pub fn on_block_processing_start(&self) -> Result<()> {
        self.coordinator.block_processing_start()
    }

    pub fn on_block_processing_stop(&self) -> Result<()> {
        self.coordinator.block_processing_stop()
    }

    /// Announce a new head if anyone is connected and its total difficulty
    /// beats every head announced so far. Returns whether it was announced.
    pub fn on_new_head(&self, head: HeadInfo, total_difficulty: u128) -> bool {
        if self.manager.client_count() == 0 {
            trace!(%head, total_difficulty, "no clients, head not announced");
            return false;
        }
        {
            let mut last = self.last_td.lock();
            if total_difficulty <= *last {
                trace!(%head, total_difficulty, "head not heavier, skipped");
                return false;
            }
            *last = total_difficulty;
        }

        self.announcer.announce(&head, total_difficulty);
        self.metrics.heads_announced_total.increment(1);
        debug!(%head, total_difficulty, "head announced");
        true
    }

    /// Reserve `capacity` for a client, for `duration` or indefinitely.
    pub fn register_priority(
        &self,
        id: ClientId,
        capacity: u64,
        duration: Option<Duration>,
    ) -> Result<()> {
        let expiry = duration.map(|d| self.clock.now().saturating_add(d));
        self.priority.register(id, capacity, expiry)?;
        info!(client = %id, capacity, ?duration, "priority reservation registered");
        Ok(())
    }

    pub fn release_priority(&self, id: &ClientId) -> bool {
        self.priority.release(id)
    }

    pub fn client_info(&self, id: &ClientId) -> Option<ClientInfo> {
        let info = ClientInfo {
            snapshot: self.manager.client(id),
            reservation: self.priority.reservation(id),
            free_usage: self.priority.free_pool().usage(id),
        };
        let known = info.snapshot.is_some() || info.reservation.is_some();
        known.then_some(info)
    }

    pub fn pool_status(&self) -> PoolStatus {
        PoolStatus {
            free: self.priority.free_pool().status(),
            priority: self.priority.status(),
            serving: self.queue.status(),
        }
    }

    /// Load state as seen by the coordinator.
    pub async fn status(&self) -> Result<CoordinatorStatus> {
        self.coordinator.status().await
    }

    pub fn subscribe_pool_events(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ClientManager> {
        &self.manager
    }

    pub fn cost(&self) -> &Arc<CostEstimator> {
        &self.cost
    }

    /// Stop the coordinator and the serving workers. Requests already running
    /// complete; queued ones are cancelled.
    pub async fn shutdown(&self) {
        if self.coordinator.shutdown().is_err() {
            debug!("coordinator already stopped");
        }
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "coordinator task failed");
        }
        self.queue.close();
        info!("Light server stopped");
    }
}

impl std::fmt::Debug for LightServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightServer")
            .field("config", &self.config)
            .field("pools", &self.pool_status())
            .finish_non_exhaustive()
    }
}
