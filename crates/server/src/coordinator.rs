//! Load coordinator actor (runs in its own tokio task).
//!
//! Owns the server's load state. Block processing shrinks the serving pool and
//! flattens the recharge curve; changes to the measured total recharge redraw
//! the curve; changes to the total capacity are cascaded to the client pools.

use std::sync::Arc;
use std::time::Duration;

use lumen_clientpool::PriorityClientPool;
use lumen_flowcontrol::{ClientManager, RechargeCurve};
use lumen_serving::ServingQueue;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::metrics::ServerMetrics;

/// Commands from the handle to the coordinator.
#[derive(Debug)]
pub(crate) enum CoordinatorCommand {
    /// Block processing started (`true`) or stopped (`false`).
    BlockProcessing(bool),
    Status {
        response_tx: oneshot::Sender<CoordinatorStatus>,
    },
    Shutdown,
}

/// Snapshot of the coordinator's load state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinatorStatus {
    pub block_processing: bool,
    /// Target serving worker count.
    pub threads: usize,
    pub curve: Option<RechargeCurve>,
    pub total_recharge: u64,
    pub total_capacity: u64,
    /// Free clients the current capacity can hold.
    pub max_free_peers: usize,
}

pub(crate) struct Coordinator {
    command_rx: mpsc::UnboundedReceiver<CoordinatorCommand>,
    /// `None` once the feed has closed.
    block_feed: Option<mpsc::UnboundedReceiver<bool>>,
    recharge_rx: watch::Receiver<u64>,
    capacity_rx: watch::Receiver<u64>,
    manager: Arc<ClientManager>,
    queue: Arc<ServingQueue>,
    priority: Arc<PriorityClientPool>,
    thc_normal: usize,
    thc_block_processing: usize,
    max_peers: usize,
    free_capacity: u64,
    expiry_tick: Duration,
    block_processing: bool,
    total_recharge: u64,
    max_free_peers: usize,
    metrics: ServerMetrics,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: &ServerConfig,
        free_capacity: u64,
        command_rx: mpsc::UnboundedReceiver<CoordinatorCommand>,
        block_feed: Option<mpsc::UnboundedReceiver<bool>>,
        recharge_rx: watch::Receiver<u64>,
        manager: Arc<ClientManager>,
        queue: Arc<ServingQueue>,
        priority: Arc<PriorityClientPool>,
    ) -> Self {
        let capacity_rx = manager.subscribe_total_capacity();
        let total_recharge = *recharge_rx.borrow();
        Self {
            command_rx,
            block_feed,
            recharge_rx,
            capacity_rx,
            manager,
            queue,
            priority,
            thc_normal: config.thc_normal(),
            thc_block_processing: config.thc_block_processing(),
            max_peers: config.max_peers,
            free_capacity,
            expiry_tick: config.expiry_tick,
            block_processing: false,
            total_recharge,
            max_free_peers: 0,
            metrics: ServerMetrics::default(),
        }
    }

    /// Apply the initial load state and pool limits. Runs before the task is
    /// spawned so the server is usable as soon as it is returned.
    pub(crate) fn start(&mut self) {
        self.apply_load();
        self.on_capacity_changed();
    }

    /// Run the coordinator event loop until shut down or every handle is
    /// dropped.
    pub(crate) async fn run(mut self) {
        let mut expiry = tokio::time::interval(self.expiry_tick);
        expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(CoordinatorCommand::Shutdown) | None => {
                        debug!("Coordinator shutting down");
                        break;
                    }
                    Some(command) => self.handle_command(command),
                },
                event = next_block_event(&mut self.block_feed) => match event {
                    Some(processing) => self.set_block_processing(processing),
                    None => {
                        warn!(
                            block_processing = self.block_processing,
                            "block processing feed closed, keeping current load state"
                        );
                        self.block_feed = None;
                    }
                },
                Ok(()) = self.recharge_rx.changed() => self.on_recharge_changed(),
                Ok(()) = self.capacity_rx.changed() => self.on_capacity_changed(),
                _ = expiry.tick() => {
                    self.priority.expire_due();
                }
            }
        }
    }

    fn handle_command(&mut self, command: CoordinatorCommand) {
        match command {
            CoordinatorCommand::BlockProcessing(processing) => {
                self.set_block_processing(processing)
            }
            CoordinatorCommand::Status { response_tx } => {
                let _ = response_tx.send(self.status());
            }
            CoordinatorCommand::Shutdown => {}
        }
    }

    fn set_block_processing(&mut self, processing: bool) {
        if self.block_processing == processing {
            return;
        }
        self.block_processing = processing;
        self.apply_load();
    }

    fn on_recharge_changed(&mut self) {
        let total = *self.recharge_rx.borrow_and_update();
        if total == self.total_recharge {
            return;
        }
        debug!(previous = self.total_recharge, total, "total recharge changed");
        self.total_recharge = total;
        self.apply_load();
    }

    fn on_capacity_changed(&mut self) {
        let total = *self.capacity_rx.borrow_and_update();
        self.priority.set_limits(self.max_peers, total);

        let max_free_peers = match self.free_capacity {
            0 => self.max_peers,
            free => usize::try_from(total / free)
                .unwrap_or(usize::MAX)
                .min(self.max_peers),
        };
        if max_free_peers < self.max_free_peers {
            warn!(
                previous = self.max_free_peers,
                max_free_peers, total, "free client capacity dropped"
            );
        }
        self.max_free_peers = max_free_peers;
        self.metrics.max_free_peers.set(max_free_peers as f64);
    }

    fn apply_load(&mut self) {
        let (threads, curve) = if self.block_processing {
            (
                self.thc_block_processing,
                RechargeCurve::block_processing(self.total_recharge),
            )
        } else {
            (self.thc_normal, RechargeCurve::normal(self.total_recharge))
        };
        self.queue.set_threads(threads);
        self.manager.set_recharge_curve(curve);

        self.metrics
            .block_processing
            .set(if self.block_processing { 1.0 } else { 0.0 });
        self.metrics.serving_threads.set(threads as f64);
        info!(
            block_processing = self.block_processing,
            threads,
            total_recharge = self.total_recharge,
            "serving load updated"
        );
    }

    fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            block_processing: self.block_processing,
            threads: self.queue.threads(),
            curve: self.manager.params().curve.clone(),
            total_recharge: self.total_recharge,
            total_capacity: self.manager.total_capacity(),
            max_free_peers: self.max_free_peers,
        }
    }
}

async fn next_block_event(feed: &mut Option<mpsc::UnboundedReceiver<bool>>) -> Option<bool> {
    match feed {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Cloneable handle for driving the coordinator.
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
    command_tx: mpsc::UnboundedSender<CoordinatorCommand>,
}

impl CoordinatorHandle {
    pub(crate) fn new(command_tx: mpsc::UnboundedSender<CoordinatorCommand>) -> Self {
        Self { command_tx }
    }

    pub fn block_processing_start(&self) -> Result<()> {
        self.send(CoordinatorCommand::BlockProcessing(true))
    }

    pub fn block_processing_stop(&self) -> Result<()> {
        self.send(CoordinatorCommand::BlockProcessing(false))
    }

    /// Current load state, answered after every command sent before it.
    pub async fn status(&self) -> Result<CoordinatorStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorCommand::Status { response_tx: tx })?;
        rx.await.map_err(|_| ServerError::CoordinatorStopped)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(CoordinatorCommand::Shutdown)
    }

    pub fn is_stopped(&self) -> bool {
        self.command_tx.is_closed()
    }

    fn send(&self, command: CoordinatorCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| ServerError::CoordinatorStopped)
    }
}
