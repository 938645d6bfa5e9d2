//! Single-winner lease acquisition under real parallelism.

use std::collections::BTreeSet;
use std::sync::Arc;

use moonroute::{
    ActorId, LeaseError, LeaseId, LeaseManager, LeaseTable, ManualTimeProvider, NodeId,
};

use crate::support::{node, Cluster, TTL};

const RACERS: usize = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquires_have_one_winner() {
    let leases = Arc::new(LeaseTable::new(TTL, Arc::new(ManualTimeProvider::new())));
    let actor = ActorId::new("Chat", "contended");
    let barrier = Arc::new(tokio::sync::Barrier::new(RACERS));

    let mut handles = Vec::new();
    for i in 0..RACERS {
        let leases = leases.clone();
        let actor = actor.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            let requester = node(&format!("n{i}"));
            barrier.wait().await;
            leases.acquire(&actor, &requester).await
        }));
    }

    let mut winners = Vec::new();
    let mut observed = Vec::new();
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(lease) => winners.push(lease),
            Err(LeaseError::Conflict { winner }) => observed.push(*winner),
            Err(other) => panic!("unexpected lease error: {other}"),
        }
    }

    assert_eq!(winners.len(), 1, "exactly one acquire succeeds");
    let winner = &winners[0];
    assert_eq!(observed.len(), RACERS - 1);
    assert!(observed.iter().all(|lease| lease == winner));
    assert_eq!(leases.current(&actor).await.as_ref(), Some(winner));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_actors_do_not_contend() {
    let leases = Arc::new(LeaseTable::new(TTL, Arc::new(ManualTimeProvider::new())));
    let owner = node("n1");

    let mut handles = Vec::new();
    for i in 0..RACERS as i64 {
        let leases = leases.clone();
        let owner = owner.clone();
        handles.push(tokio::spawn(async move {
            leases.acquire(&ActorId::new("Counter", i), &owner).await
        }));
    }

    let mut ids = BTreeSet::new();
    for handle in handles {
        let lease = handle.await.expect("task panicked").expect("acquire");
        ids.insert(lease.lease_id);
    }
    assert_eq!(ids.len(), RACERS);
    assert_eq!(leases.held_by(&owner).await.len(), RACERS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_resolvers_converge() {
    let ids = ["n1", "n2", "n3", "n4"];
    let cluster = Cluster::new(&ids).await;
    let actor = ActorId::new("Chat", "busy-room");

    let mut handles = Vec::new();
    for round in 0..RACERS {
        let router = cluster.router(ids[round % ids.len()]);
        let actor = actor.clone();
        handles.push(tokio::spawn(async move { router.resolve(&actor, None).await }));
    }

    let mut destinations: BTreeSet<NodeId> = BTreeSet::new();
    let mut grants: BTreeSet<LeaseId> = BTreeSet::new();
    for handle in handles {
        let route = handle.await.expect("task panicked").expect("resolve");
        destinations.insert(route.destination().clone());
        grants.insert(route.binding().expect("bound route").lease_id);
    }
    assert_eq!(destinations.len(), 1);
    assert_eq!(grants.len(), 1);
}
