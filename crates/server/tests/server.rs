use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use lumen_clientpool::{PoolError, PoolEvent};
use lumen_cost::RequestKind;
use lumen_flowcontrol::{ClientId, ClientTier, FlowControlError, ManualClock, RechargeCurve};
use lumen_serving::ServingError;
use lumen_server::{HeadAnnouncer, HeadInfo, LightServer, ServerConfig, ServerError};
use parking_lot::Mutex;
use tokio::sync::{Semaphore, mpsc};

const TOTAL_RECHARGE: u64 = 1_000_000_000;
const FREE_CAPACITY: u64 = 21_333_334;
const FREE_BUFFER: u64 = FREE_CAPACITY * 6;

fn client(n: u8) -> ClientId {
    ClientId::from([n; 32])
}

fn spawn_server(config: ServerConfig, clock: &Arc<ManualClock>) -> LightServer {
    LightServer::builder(config)
        .clock(clock.clone())
        .spawn()
        .unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

#[derive(Default)]
struct RecordingAnnouncer {
    heads: Mutex<Vec<(u64, u128)>>,
}

impl HeadAnnouncer for RecordingAnnouncer {
    fn announce(&self, head: &HeadInfo, total_difficulty: u128) {
        self.heads.lock().push((head.number, total_difficulty));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_block_processing_switches_load() {
    let clock = Arc::new(ManualClock::new());
    let server = spawn_server(ServerConfig::default(), &clock);

    let status = server.status().await.unwrap();
    assert!(!status.block_processing);
    assert_eq!(status.threads, 4);
    assert_eq!(status.total_recharge, TOTAL_RECHARGE);
    assert_eq!(status.curve, Some(RechargeCurve::normal(TOTAL_RECHARGE)));

    server.on_block_processing_start().unwrap();
    let status = server.status().await.unwrap();
    assert!(status.block_processing);
    assert_eq!(status.threads, 2);
    assert_eq!(
        status.curve,
        Some(RechargeCurve::block_processing(TOTAL_RECHARGE))
    );

    server.on_block_processing_stop().unwrap();
    let status = server.status().await.unwrap();
    assert!(!status.block_processing);
    assert_eq!(status.threads, 4);
    assert_eq!(status.curve, Some(RechargeCurve::normal(TOTAL_RECHARGE)));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_serve_charges_and_refunds() {
    let clock = Arc::new(ManualClock::new());
    let server = spawn_server(ServerConfig::default(), &clock);
    let id = client(1);

    assert_eq!(
        server.on_connect(id, ClientTier::Free).unwrap(),
        ClientTier::Free
    );
    let before = server.client_info(&id).unwrap().snapshot.unwrap();
    assert_eq!(before.buffer, FREE_BUFFER);

    let estimated = RequestKind::BlockHeaders.default_cost().cost(10);
    let served = server
        .serve(id, RequestKind::BlockHeaders, 10, async { 7 })
        .await
        .unwrap();
    assert_eq!(served.output, 7);

    let after = server.client_info(&id).unwrap().snapshot.unwrap();
    assert!(after.buffer >= FREE_BUFFER - estimated);
    assert!(after.buffer <= FREE_BUFFER);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_insufficient_buffer_not_queued() {
    let clock = Arc::new(ManualClock::new());
    let server = Arc::new(spawn_server(ServerConfig::default(), &clock));
    let id = client(1);
    server.on_connect(id, ClientTier::Free).unwrap();

    let cost = RequestKind::BlockBodies.default_cost().cost(32);
    let gate = Arc::new(Semaphore::new(0));
    let mut pending = Vec::new();
    for _ in 0..5 {
        let server = Arc::clone(&server);
        let gate = Arc::clone(&gate);
        pending.push(tokio::spawn(async move {
            server
                .serve(id, RequestKind::BlockBodies, 32, async move {
                    let _permit = gate.acquire().await;
                })
                .await
        }));
    }
    wait_until(|| server.manager().client(&id).unwrap().buffer == FREE_BUFFER - 5 * cost).await;

    let refused = server
        .serve(id, RequestKind::BlockBodies, 32, async {})
        .await
        .unwrap_err();
    assert!(refused.is_insufficient_buffer());
    assert_matches!(
        refused,
        ServerError::FlowControl(FlowControlError::InsufficientBuffer { buffer, cost: c, .. })
            if buffer == FREE_BUFFER - 5 * cost && c == cost
    );

    gate.add_permits(5);
    for handle in pending {
        handle.await.unwrap().unwrap();
    }
    server.shutdown().await;
}

#[tokio::test]
async fn test_serve_unknown_client() {
    let clock = Arc::new(ManualClock::new());
    let server = spawn_server(ServerConfig::default(), &clock);

    let result = server
        .serve(client(9), RequestKind::Code, 1, async {})
        .await;
    assert_matches!(
        result,
        Err(ServerError::FlowControl(FlowControlError::UnknownClient(id))) if id == client(9)
    );
    server.shutdown().await;
}

#[tokio::test]
async fn test_head_announced_on_heavier_td() {
    let clock = Arc::new(ManualClock::new());
    let announcer = Arc::new(RecordingAnnouncer::default());
    let server = LightServer::builder(ServerConfig::default())
        .clock(clock.clone())
        .announcer(announcer.clone())
        .spawn()
        .unwrap();

    // Nobody to announce to; the difficulty is not remembered either.
    assert!(!server.on_new_head(HeadInfo::new(1, [1; 32]), 10));

    server.on_connect(client(1), ClientTier::Free).unwrap();
    assert!(server.on_new_head(HeadInfo::new(1, [1; 32]), 10));
    assert!(!server.on_new_head(HeadInfo::new(1, [1; 32]), 10));
    assert!(server.on_new_head(HeadInfo::new(2, [2; 32]), 11));
    assert!(!server.on_new_head(HeadInfo::new(3, [3; 32]), 5));

    assert_eq!(*announcer.heads.lock(), vec![(1, 10), (2, 11)]);
    server.shutdown().await;
}

#[tokio::test]
async fn test_eviction_reported_to_protocol() {
    let clock = Arc::new(ManualClock::new());
    let dropped = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&dropped);
    let config = ServerConfig {
        max_peers: 2,
        ..Default::default()
    };
    let server = LightServer::builder(config)
        .clock(clock.clone())
        .on_drop(Arc::new(move |id: ClientId| sink.lock().push(id)))
        .spawn()
        .unwrap();
    let mut events = server.subscribe_pool_events();

    server.on_connect(client(1), ClientTier::Free).unwrap();
    server.on_connect(client(2), ClientTier::Free).unwrap();
    clock.advance(Duration::from_secs(600));

    // Equal usage and connection time: the highest id goes.
    assert_eq!(
        server.on_connect(client(3), ClientTier::Free).unwrap(),
        ClientTier::Free
    );
    assert_eq!(*dropped.lock(), vec![client(2)]);
    assert!(server.manager().client(&client(2)).is_none());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&PoolEvent::Evicted { id: client(2) }));
    assert_eq!(server.pool_status().free.members, 2);

    server.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let clock = Arc::new(ManualClock::new());
    let server = spawn_server(ServerConfig::default(), &clock);
    let id = client(1);

    server.on_connect(id, ClientTier::Free).unwrap();
    assert!(server.on_disconnect(&id));
    assert!(!server.on_disconnect(&id));
    assert!(server.client_info(&id).is_none());
    assert_eq!(server.pool_status().free.members, 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_priority_reservation_connects_as_priority() {
    let clock = Arc::new(ManualClock::new());
    let server = spawn_server(ServerConfig::default(), &clock);
    let id = client(1);

    server.register_priority(id, 100_000_000, None).unwrap();
    assert_eq!(
        server.on_connect(id, ClientTier::Free).unwrap(),
        ClientTier::Priority
    );
    let info = server.client_info(&id).unwrap();
    assert_eq!(info.snapshot.unwrap().tier, ClientTier::Priority);
    assert_eq!(info.snapshot.unwrap().params.min_recharge, 100_000_000);
    assert!(info.reservation.unwrap().connected);

    // Announcing priority without a reservation grants nothing.
    assert_eq!(
        server.on_connect(client(2), ClientTier::Priority).unwrap(),
        ClientTier::Free
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_reservation_over_per_client_cap_refused() {
    let clock = Arc::new(ManualClock::new());
    let config = ServerConfig {
        priority_share: 10,
        ..Default::default()
    };
    let server = spawn_server(config, &clock);
    let id = client(1);

    assert_matches!(
        server.register_priority(id, 500_000_000, None),
        Err(ServerError::Pool(PoolError::CapacityExceeded {
            requested: 500_000_000,
            available: 213_333_340,
        }))
    );
    assert_eq!(server.pool_status().priority.reserved_capacity, 0);
    assert_eq!(
        server.on_connect(id, ClientTier::Priority).unwrap(),
        ClientTier::Free
    );

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_expired_reservation_demoted() {
    let clock = Arc::new(ManualClock::new());
    let config = ServerConfig {
        expiry_tick: Duration::from_millis(10),
        ..Default::default()
    };
    let server = spawn_server(config, &clock);
    let id = client(1);

    server
        .register_priority(id, 100_000_000, Some(Duration::from_secs(10)))
        .unwrap();
    server.on_connect(id, ClientTier::Free).unwrap();

    clock.advance(Duration::from_secs(11));
    wait_until(|| {
        server
            .client_info(&id)
            .is_some_and(|info| info.reservation.is_none())
    })
    .await;

    let snapshot = server.client_info(&id).unwrap().snapshot.unwrap();
    assert_eq!(snapshot.tier, ClientTier::Free);
    assert_eq!(snapshot.params.min_recharge, FREE_CAPACITY);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_closed_block_feed_keeps_state() {
    let clock = Arc::new(ManualClock::new());
    let (feed_tx, feed_rx) = mpsc::unbounded_channel();
    let server = LightServer::builder(ServerConfig::default())
        .clock(clock.clone())
        .block_feed(feed_rx)
        .spawn()
        .unwrap();

    feed_tx.send(true).unwrap();
    let mut processing = false;
    for _ in 0..1000 {
        if server.status().await.unwrap().block_processing {
            processing = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(processing);

    drop(feed_tx);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let status = server.status().await.unwrap();
    assert!(status.block_processing);
    assert_eq!(status.threads, 2);

    server.on_block_processing_stop().unwrap();
    assert_eq!(server.status().await.unwrap().threads, 4);

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_refuses_requests() {
    let clock = Arc::new(ManualClock::new());
    let server = spawn_server(ServerConfig::default(), &clock);
    let id = client(1);
    server.on_connect(id, ClientTier::Free).unwrap();

    server.shutdown().await;
    assert_matches!(server.status().await, Err(ServerError::CoordinatorStopped));
    assert!(server.coordinator().is_stopped());

    let result = server.serve(id, RequestKind::Code, 1, async {}).await;
    assert_matches!(result, Err(ServerError::Serving(ServingError::Closed)));
    // The charge is returned.
    assert_eq!(server.manager().client(&id).unwrap().buffer, FREE_BUFFER);
}
