//! Full nodes on the wall clock.

use std::sync::Arc;
use std::time::Duration;

use moonroute::{
    ActorId, ClusterConfig, DispatchSettings, InMemoryTransport, LeaseSettings, MembershipSettings,
    NodeConfig, NodeLifecycle, NodeStatus, PreferLocalPlacement, RoutingNode, RoutingSettings,
    SendOutcome,
};

use crate::support::{init_tracing, node};

fn fast_settings() -> RoutingSettings {
    RoutingSettings {
        membership: MembershipSettings {
            heartbeat_interval_ms: 20,
            missed_heartbeats: 2,
            suspicion_timeout_ms: 40,
            sweep_interval_ms: 10,
        },
        lease: LeaseSettings { ttl_ms: 200 },
        ..RoutingSettings::default()
    }
}

fn cluster() -> ClusterConfig {
    init_tracing();
    ClusterConfig::builder()
        .name("lifecycle")
        .settings(fast_settings())
        .build()
        .expect("valid cluster")
}

async fn start(
    cluster: &ClusterConfig,
    transport: &Arc<InMemoryTransport>,
    config: NodeConfig,
) -> RoutingNode {
    RoutingNode::new(cluster.clone(), config)
        .with_transport(transport.clone())
        .start()
        .await
        .expect("node starts")
}

async fn wait_until_left(cluster: &ClusterConfig, id: &str) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while cluster.directory().status(&node(id)) != Ok(NodeStatus::Left) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "{id} was never declared departed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_heartbeats_keep_nodes_active() {
    let cluster = cluster();
    let transport = Arc::new(InMemoryTransport::new());
    let mut a = start(&cluster, &transport, NodeConfig::for_node(node("a"))).await;
    let mut b = start(&cluster, &transport, NodeConfig::for_node(node("b"))).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(a.member_status(&node("a")), Ok(NodeStatus::Active));
    assert_eq!(a.member_status(&node("b")), Ok(NodeStatus::Active));
    assert_eq!(b.list_active().len(), 2);

    b.shutdown().await.expect("shutdown b");
    a.shutdown().await.expect("shutdown a");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_keeper_renews_leases_past_ttl() {
    let cluster = cluster();
    let transport = Arc::new(InMemoryTransport::new());
    let mut a = start(&cluster, &transport, NodeConfig::for_node(node("a"))).await;
    let room = ActorId::new("Chat", "room1");

    let first = a.resolve(&room, None).await.expect("resolve");
    tokio::time::sleep(Duration::from_millis(500)).await;

    let lease = cluster.leases().current(&room).await.expect("lease still held");
    assert_eq!(Some(lease.lease_id), first.binding().map(|binding| binding.lease_id));
    a.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_crashed_owner_is_replaced() {
    let cluster = cluster();
    let transport = Arc::new(InMemoryTransport::new());
    let mut a = start(&cluster, &transport, NodeConfig::for_node(node("a"))).await;
    let b = start(
        &cluster,
        &transport,
        NodeConfig::builder()
            .node_id(node("b"))
            .placement(Arc::new(PreferLocalPlacement::new(
                node("b"),
                cluster.placement().clone(),
            )))
            .failure_detector(false)
            .build(),
    )
    .await;
    let room = ActorId::new("Chat", "room1");

    let placed = b.call(&room, "post", b"first".to_vec()).await.expect("call on b");
    assert_eq!(placed.route().destination(), &node("b"));
    let seen = a.call(&room, "post", b"second".to_vec()).await.expect("call on a");
    assert_eq!(seen.route().destination(), &node("b"));

    drop(b);
    wait_until_left(&cluster, "b").await;
    assert!(cluster.leases().held_by(&node("b")).await.is_empty());

    match a.call(&room, "post", b"third".to_vec()).await.expect("call after crash") {
        SendOutcome::Redirected { from, to } => {
            assert_eq!(from.destination(), &node("b"));
            assert_eq!(to.destination(), &node("a"));
        }
        other => panic!("expected redirect away from b, got {other:?}"),
    }
    a.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_graceful_shutdown_hands_actors_over() {
    let cluster = cluster();
    let transport = Arc::new(InMemoryTransport::new());
    let mut a = start(&cluster, &transport, NodeConfig::for_node(node("a"))).await;
    let mut b = start(
        &cluster,
        &transport,
        NodeConfig::builder()
            .node_id(node("b"))
            .placement(Arc::new(PreferLocalPlacement::new(
                node("b"),
                cluster.placement().clone(),
            )))
            .build(),
    )
    .await;
    let room = ActorId::new("Chat", "room1");

    b.resolve(&room, None).await.expect("resolve on b");
    let held = a.resolve(&room, None).await.expect("resolve on a");
    assert_eq!(held.destination(), &node("b"));

    b.shutdown().await.expect("shutdown b");
    assert_eq!(b.lifecycle(), NodeLifecycle::Stopped);
    assert_eq!(a.member_status(&node("b")), Ok(NodeStatus::Left));
    assert!(cluster.leases().current(&room).await.is_none());
    assert!(a.router().cache().get(&room).is_none());

    let moved = a.resolve(&room, None).await.expect("resolve after shutdown");
    assert_eq!(moved.destination(), &node("a"));
    a.shutdown().await.expect("shutdown a");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_expired_routes_are_purged_from_cache() {
    let cluster = cluster();
    let transport = Arc::new(InMemoryTransport::new());
    let mut a = start(&cluster, &transport, NodeConfig::for_node(node("a"))).await;
    let rooms: Vec<ActorId> = (0..5).map(|n| ActorId::new("Chat", format!("room{n}"))).collect();

    for room in &rooms {
        a.resolve(room, None).await.expect("resolve");
    }
    assert_eq!(a.router().cache().len(), rooms.len());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(a.router().cache().is_empty());
    for room in &rooms {
        assert!(cluster.leases().current(room).await.is_some(), "{room} lost its lease");
    }
    a.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_idle_dispatch_queues_are_dropped() {
    init_tracing();
    let cluster = ClusterConfig::builder()
        .settings(RoutingSettings {
            dispatch: DispatchSettings {
                idle_timeout_ms: 50,
                ..DispatchSettings::default()
            },
            ..fast_settings()
        })
        .build()
        .expect("valid cluster");
    let transport = Arc::new(InMemoryTransport::new());
    let mut a = start(&cluster, &transport, NodeConfig::for_node(node("a"))).await;

    for n in 0..10_i64 {
        let room = ActorId::new("Chat", n);
        a.call(&room, "post", Vec::new()).await.expect("call");
    }
    assert_eq!(a.dispatcher().active_queues(), 10);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(a.dispatcher().active_queues(), 0);

    a.call(&ActorId::new("Chat", 3_i64), "post", Vec::new())
        .await
        .expect("call after idle");
    assert_eq!(a.dispatcher().active_queues(), 1);
    assert_eq!(transport.deliveries().len(), 11);
    a.shutdown().await.expect("shutdown");
}
