//! Per-actor ordering across route changes.

use std::sync::Arc;

use moonroute::{
    ActorId, CorrelationId, DispatchConfig, InMemoryTransport, MessageDispatcher,
    MessageEnvelope, NodeId, SendOutcome,
};

use crate::support::Cluster;

fn envelope(actor: &ActorId, n: u64) -> MessageEnvelope {
    MessageEnvelope::new(actor, "post", n.to_be_bytes().to_vec(), CorrelationId(n))
}

fn sequence_for(transport: &InMemoryTransport, node: &NodeId, actor: &ActorId) -> Vec<u64> {
    transport
        .delivered_to(node)
        .into_iter()
        .filter(|envelope| &envelope.target() == actor)
        .map(|envelope| envelope.correlation_id.0)
        .collect()
}

#[tokio::test]
async fn test_order_is_kept_across_reroute() {
    let cluster = Cluster::new(&["n1", "n2", "n3"]).await;
    let transport = Arc::new(InMemoryTransport::new());
    let dispatcher = MessageDispatcher::new(
        cluster.router("n1"),
        transport.clone(),
        DispatchConfig::default(),
    );
    let room = ActorId::new("Chat", "room1");

    let mut pending = Vec::new();
    for n in 1..=3 {
        pending.push(dispatcher.submit(&room, envelope(&room, n)).expect("submit"));
    }
    let mut outcomes = Vec::new();
    for delivery in pending {
        outcomes.push(delivery.wait().await.expect("delivered"));
    }
    let old_owner = outcomes[0].route().destination().clone();
    assert!(outcomes
        .iter()
        .all(|outcome| matches!(outcome, SendOutcome::Delivered { .. })));

    cluster.directory.leave(&old_owner).await.expect("leave");
    transport.set_unreachable(&old_owner, true);

    let mut pending = Vec::new();
    for n in 4..=8 {
        pending.push(dispatcher.submit(&room, envelope(&room, n)).expect("submit"));
    }
    let mut outcomes = Vec::new();
    for delivery in pending {
        outcomes.push(delivery.wait().await.expect("delivered"));
    }

    let new_owner = outcomes[0].route().destination().clone();
    assert_ne!(new_owner, old_owner);
    match &outcomes[0] {
        SendOutcome::Redirected { from, to } => {
            assert_eq!(from.destination(), &old_owner);
            assert_eq!(to.destination(), &new_owner);
        }
        other => panic!("expected the first message after departure to redirect, got {other:?}"),
    }
    assert!(outcomes[1..]
        .iter()
        .all(|outcome| matches!(outcome, SendOutcome::Delivered { .. })));

    assert_eq!(sequence_for(&transport, &old_owner, &room), vec![1, 2, 3]);
    assert_eq!(sequence_for(&transport, &new_owner, &room), vec![4, 5, 6, 7, 8]);
}

#[tokio::test]
async fn test_order_survives_not_owner_rejections() {
    let cluster = Cluster::new(&["n1"]).await;
    let transport = Arc::new(InMemoryTransport::new());
    let dispatcher = MessageDispatcher::new(
        cluster.router("n1"),
        transport.clone(),
        DispatchConfig::default(),
    );
    let room = ActorId::new("Chat", "room1");
    transport.reject_as_not_owner(&crate::support::node("n1"), 2);

    let pending: Vec<_> = (1..=5)
        .map(|n| dispatcher.submit(&room, envelope(&room, n)).expect("submit"))
        .collect();
    for delivery in pending {
        delivery.wait().await.expect("delivered");
    }

    assert_eq!(
        sequence_for(&transport, &crate::support::node("n1"), &room),
        vec![1, 2, 3, 4, 5]
    );
}

#[tokio::test]
async fn test_actors_are_ordered_independently() {
    let cluster = Cluster::new(&["n1", "n2"]).await;
    let transport = Arc::new(InMemoryTransport::new());
    let dispatcher = MessageDispatcher::new(
        cluster.router("n2"),
        transport.clone(),
        DispatchConfig::default(),
    );
    let rooms = [ActorId::new("Chat", "a"), ActorId::new("Chat", "b")];

    let mut pending = Vec::new();
    for n in 1..=6 {
        for room in &rooms {
            pending.push(dispatcher.submit(room, envelope(room, n)).expect("submit"));
        }
    }
    let mut owners = Vec::new();
    for delivery in pending {
        owners.push(delivery.wait().await.expect("delivered"));
    }
    assert_eq!(dispatcher.active_queues(), 2);

    for room in &rooms {
        let owner = cluster
            .router("n2")
            .resolve(room, None)
            .await
            .expect("resolve")
            .destination()
            .clone();
        assert_eq!(sequence_for(&transport, &owner, room), vec![1, 2, 3, 4, 5, 6]);
    }
}

#[tokio::test]
async fn test_full_queue_is_reported() {
    let cluster = Cluster::new(&["n1"]).await;
    let transport = Arc::new(InMemoryTransport::new());
    let dispatcher = MessageDispatcher::new(
        cluster.router("n1"),
        transport,
        DispatchConfig {
            queue_capacity: 2,
            ..DispatchConfig::default()
        },
    );
    let room = ActorId::new("Chat", "room1");

    // The worker has not run yet on this single-threaded runtime.
    let first = dispatcher.submit(&room, envelope(&room, 1)).expect("first");
    let second = dispatcher.submit(&room, envelope(&room, 2)).expect("second");
    let third = dispatcher.submit(&room, envelope(&room, 3));
    assert!(matches!(third, Err(moonroute::DispatchError::QueueFull { .. })));

    first.wait().await.expect("first delivered");
    second.wait().await.expect("second delivered");
}

#[tokio::test]
async fn test_send_waits_for_room_in_full_queue() {
    let cluster = Cluster::new(&["n1"]).await;
    let transport = Arc::new(InMemoryTransport::new());
    let dispatcher = MessageDispatcher::new(
        cluster.router("n1"),
        transport.clone(),
        DispatchConfig {
            queue_capacity: 1,
            ..DispatchConfig::default()
        },
    );
    let room = ActorId::new("Chat", "room1");

    let first = dispatcher.submit(&room, envelope(&room, 1)).expect("first");
    dispatcher
        .send(&room, envelope(&room, 2))
        .await
        .expect("second waits for room");
    first.wait().await.expect("first delivered");

    assert_eq!(sequence_for(&transport, &NodeId::new("n1").expect("id"), &room), vec![1, 2]);
}
