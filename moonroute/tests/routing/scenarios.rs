//! End-to-end resolution scenarios on a three-node cluster.

use std::time::Duration;

use moonroute::{ActorId, NodeStatus, RouterError};

use crate::support::{node, Cluster};

const NODES: [&str; 3] = ["n1", "n2", "n3"];

#[tokio::test]
async fn test_chat_room_moves_off_departed_owner() {
    let cluster = Cluster::new(&NODES).await;
    let router = cluster.router("n1");
    let room = ActorId::new("Chat", "room1");

    let first = router.resolve(&room, None).await.expect("first resolve");
    assert_eq!(first.len(), 1);
    assert!(NODES.contains(&first.destination().as_str()));

    let second = router.resolve(&room, None).await.expect("second resolve");
    assert_eq!(second, first);

    let owner = first.destination().clone();
    let survivors: Vec<&str> = NODES
        .iter()
        .copied()
        .filter(|id| *id != owner.as_str())
        .collect();

    cluster.advance(cluster.departure_delay() + Duration::from_secs(1), &survivors);
    assert_eq!(cluster.directory.sweep().await, vec![owner.clone()]);
    assert_eq!(cluster.directory.status(&owner), Ok(NodeStatus::Left));
    assert!(cluster.leases.held_by(&owner).await.is_empty());

    let third = router.resolve(&room, None).await.expect("third resolve");
    assert_ne!(third.destination(), &owner);
    assert!(survivors.contains(&third.destination().as_str()));
}

#[tokio::test]
async fn test_route_to_departed_owner_is_stale() {
    let cluster = Cluster::new(&NODES).await;
    let router = cluster.router("n2");
    let room = ActorId::new("Chat", "room1");

    let held = router.resolve(&room, None).await.expect("resolve");
    let owner = held.destination().clone();
    cluster.directory.leave(&owner).await.expect("leave");

    assert!(matches!(
        router.resolve(&room, Some(&held)).await,
        Err(RouterError::StaleRoute { .. })
    ));
    let fresh = router.resolve(&room, None).await.expect("fresh resolve");
    assert_ne!(fresh.destination(), &owner);
}

#[tokio::test]
async fn test_suspect_owner_keeps_its_actors() {
    let cluster = Cluster::new(&NODES).await;
    let router = cluster.router("n1");
    let room = ActorId::new("Chat", "room1");

    let held = router.resolve(&room, None).await.expect("resolve");
    let owner = held.destination().clone();
    let others: Vec<&str> = NODES
        .iter()
        .copied()
        .filter(|id| *id != owner.as_str())
        .collect();

    let suspicion = cluster.directory.config().suspect_after() + Duration::from_secs(1);
    cluster.advance(suspicion, &others);
    assert_eq!(cluster.directory.status(&owner), Ok(NodeStatus::Suspect));

    router.cache().invalidate(&room);
    let again = router.resolve(&room, None).await.expect("resolve while suspect");
    assert_eq!(again.destination(), &owner);
    assert_eq!(
        again.binding().map(|binding| binding.lease_id),
        held.binding().map(|binding| binding.lease_id)
    );
}

#[tokio::test]
async fn test_concurrent_resolves_of_new_actor_agree() {
    let cluster = Cluster::new(&NODES).await;
    let room = ActorId::new("Chat", "brand-new");
    assert!(cluster.leases.current(&room).await.is_none());

    let r1 = cluster.router("n1");
    let r3 = cluster.router("n3");
    let (a, b) = tokio::join!(r1.resolve(&room, None), r3.resolve(&room, None));
    let a = a.expect("resolve on n1");
    let b = b.expect("resolve on n3");

    assert_eq!(a.destination(), b.destination());
    assert_eq!(
        a.binding().map(|binding| binding.lease_id),
        b.binding().map(|binding| binding.lease_id)
    );
}

#[tokio::test]
async fn test_routers_on_different_nodes_agree() {
    let cluster = Cluster::new(&NODES).await;
    let room = ActorId::new("Chat", "room7");

    let routes = [
        cluster.router("n1").resolve(&room, None).await.expect("n1"),
        cluster.router("n2").resolve(&room, None).await.expect("n2"),
        cluster.router("n3").resolve(&room, None).await.expect("n3"),
    ];
    assert!(routes.iter().all(|route| route == &routes[0]));
}

#[tokio::test]
async fn test_empty_cluster_is_unroutable() {
    let cluster = Cluster::new(&NODES).await;
    for id in NODES {
        cluster.directory.leave(&node(id)).await.expect("leave");
    }
    let err = cluster
        .router("n1")
        .resolve(&ActorId::new("Chat", "room1"), None)
        .await
        .expect_err("no active nodes");
    assert!(matches!(err, RouterError::Unroutable { .. }));
}

#[tokio::test]
async fn test_expired_lease_is_replaced_with_higher_epoch() {
    let cluster = Cluster::new(&NODES).await;
    let router = cluster.router("n1");
    let room = ActorId::new("Chat", "room1");

    let held = router.resolve(&room, None).await.expect("resolve");
    let old = held.binding().cloned().expect("bound route");

    cluster.advance(crate::support::TTL + Duration::from_secs(1), &NODES);
    assert!(matches!(
        router.resolve(&room, Some(&held)).await,
        Err(RouterError::StaleRoute { .. })
    ));

    let fresh = router.resolve(&room, None).await.expect("fresh resolve");
    let new = fresh.binding().cloned().expect("bound route");
    assert_ne!(new.lease_id, old.lease_id);
    assert!(new.epoch > old.epoch);
}
