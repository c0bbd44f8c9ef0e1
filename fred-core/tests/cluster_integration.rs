/*
    Cluster Integration Tests

    Drives an in-process cluster through the external handlers and checks
    what every node ends up holding:
    - replication of updates, deletes and appends
    - conflicting writes during a partition and their resolution
    - replica bootstrap and removal
    - node membership changes
    - keygroup deletion retries and expiry on bootstrapped replicas
*/

use fred_core::core_replication::NameService;
use fred_core::core_types::{ErrorKind, FredError, KeygroupName, VectorClock};
use fred_core::test_utils::{clock, keygroup, LoopbackCluster};
use std::time::Duration;

const NODES: [&str; 3] = ["A", "B", "C"];

/// Cluster of A, B and C where `kg` is replicated on all three
async fn replicated_cluster(kg: &KeygroupName) -> LoopbackCluster {
    let cluster = LoopbackCluster::start(&NODES).await.unwrap();
    cluster.connect_all(&NODES).await.unwrap();

    let a = cluster.external("A");
    a.create_keygroup(kg, true, None).await.unwrap();
    a.add_replica(kg, "B", None).await.unwrap();
    a.add_replica(kg, "C", None).await.unwrap();
    cluster
}

async fn versions_at(
    cluster: &LoopbackCluster,
    node: &str,
    kg: &KeygroupName,
    id: &str,
) -> Vec<VectorClock> {
    let mut versions: Vec<VectorClock> = cluster
        .external(node)
        .read(kg, id)
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.version)
        .collect();
    versions.sort_by_key(|v| v.to_string());
    versions
}

#[tokio::test]
async fn test_membership_is_symmetric_after_setup() {
    let kg = keygroup("orders");
    let cluster = replicated_cluster(&kg).await;

    for id in NODES {
        let mut expected: Vec<&str> = NODES.iter().copied().filter(|n| *n != id).collect();
        expected.sort_unstable();

        let nodes = cluster.external(id).get_nodes().await.unwrap();
        let known: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(known, expected, "node table of {id}");

        let replicas = cluster.external(id).get_replica(&kg).await.unwrap();
        let replicas: Vec<&str> = replicas.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(replicas, expected, "replicas seen by {id}");
    }
}

#[tokio::test]
async fn test_update_replicates_with_same_version() {
    let kg = keygroup("orders");
    let cluster = replicated_cluster(&kg).await;

    let version = cluster.external("A").update(&kg, "o1", b"pending", &[]).await.unwrap();
    assert_eq!(version, clock(&[("A", 1)]));

    for id in NODES {
        let items = cluster.external(id).read(&kg, "o1").await.unwrap();
        assert_eq!(items.len(), 1, "items at {id}");
        assert_eq!(items[0].val, b"pending");
        assert_eq!(items[0].version, version);
    }

    // A follow-up write at another replica descends from the first one
    let next =
        cluster.external("C").update(&kg, "o1", b"shipped", &[version.clone()]).await.unwrap();
    assert_eq!(next, clock(&[("A", 1), ("C", 1)]));
    for id in NODES {
        assert_eq!(versions_at(&cluster, id, &kg, "o1").await, vec![next.clone()]);
    }
}

#[tokio::test]
async fn test_stale_conditional_write_is_rejected_everywhere() {
    let kg = keygroup("orders");
    let cluster = replicated_cluster(&kg).await;

    let v1 = cluster.external("A").update(&kg, "o1", b"one", &[]).await.unwrap();
    let v2 = cluster.external("B").update(&kg, "o1", b"two", &[v1.clone()]).await.unwrap();

    let err = cluster.external("C").update(&kg, "o1", b"late", &[v1]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    for id in NODES {
        assert_eq!(versions_at(&cluster, id, &kg, "o1").await, vec![v2.clone()]);
    }
}

#[tokio::test]
async fn test_partitioned_writes_become_siblings_then_resolve() {
    let kg = keygroup("carts");
    let cluster = LoopbackCluster::start(&["A", "B"]).await.unwrap();
    cluster.connect_all(&["A", "B"]).await.unwrap();
    cluster.external("A").create_keygroup(&kg, true, None).await.unwrap();
    cluster.external("A").add_replica(&kg, "B", None).await.unwrap();

    // A writes while B is cut off: applied locally, relay fails
    cluster.client.set_reachable("B", false);
    let err = cluster.external("A").update(&kg, "c1", b"from-a", &[]).await.unwrap_err();
    assert!(matches!(err, FredError::Transport { ref node, .. } if node == "B"));
    cluster.client.set_reachable("B", true);

    // B writes while A is cut off
    cluster.client.set_reachable("A", false);
    let err = cluster.external("B").update(&kg, "c1", b"from-b", &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    cluster.client.set_reachable("A", true);

    // B's next write reaches A and sits next to A's version
    let b2 = cluster.external("B").update(&kg, "c1", b"from-b-again", &[]).await.unwrap();
    assert_eq!(b2, clock(&[("B", 2)]));
    let at_a = versions_at(&cluster, "A", &kg, "c1").await;
    assert_eq!(at_a, vec![clock(&[("A", 1)]), b2.clone()]);

    // A resolves both siblings and the result replaces them on B as well
    let resolved = cluster.external("A").update(&kg, "c1", b"merged", &at_a).await.unwrap();
    assert_eq!(resolved, clock(&[("A", 2), ("B", 2)]));
    for id in ["A", "B"] {
        assert_eq!(versions_at(&cluster, id, &kg, "c1").await, vec![resolved.clone()]);
    }
}

#[tokio::test]
async fn test_delete_replicates_tombstone() {
    let kg = keygroup("orders");
    let cluster = replicated_cluster(&kg).await;

    let v1 = cluster.external("B").update(&kg, "o9", b"x", &[]).await.unwrap();
    let deleted = cluster.external("C").delete(&kg, "o9", &[v1]).await.unwrap();

    for id in NODES {
        let items = cluster.external(id).read(&kg, "o9").await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].tombstoned, "tombstone at {id}");
        assert_eq!(items[0].version, deleted);
    }
}

#[tokio::test]
async fn test_immutable_keygroup_only_accepts_appends() {
    let cluster = LoopbackCluster::start(&["A", "B"]).await.unwrap();
    cluster.connect_all(&["A", "B"]).await.unwrap();
    let log = keygroup("audit");
    let a = cluster.external("A");
    a.create_keygroup(&log, false, None).await.unwrap();
    a.add_replica(&log, "B", None).await.unwrap();

    let first = a.append(&log, b"login").await.unwrap();
    let second = a.append(&log, b"logout").await.unwrap();
    assert!(first < second);

    let at_b = cluster.external("B").scan(&log, &first, 10).await.unwrap();
    let vals: Vec<&[u8]> = at_b.iter().map(|i| i.val.as_slice()).collect();
    assert_eq!(vals, vec![b"login".as_slice(), b"logout".as_slice()]);

    let err = a.update(&log, &first, b"rewrite", &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = a.delete(&log, &first, &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let mutable = keygroup("notes");
    a.create_keygroup(&mutable, true, None).await.unwrap();
    let err = a.append(&mutable, b"nope").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn test_new_replica_is_bootstrapped_with_existing_items() {
    let kg = keygroup("orders");
    let cluster = LoopbackCluster::start(&["A", "B", "C", "D"]).await.unwrap();
    cluster.connect_all(&["A", "B", "C", "D"]).await.unwrap();

    let a = cluster.external("A");
    a.create_keygroup(&kg, true, None).await.unwrap();
    a.add_replica(&kg, "B", None).await.unwrap();

    let kept = a.update(&kg, "o1", b"kept", &[]).await.unwrap();
    let v = a.update(&kg, "o2", b"doomed", &[]).await.unwrap();
    let gone = cluster.external("B").delete(&kg, "o2", &[v]).await.unwrap();

    // B brings in D
    cluster.external("B").add_replica(&kg, "D", None).await.unwrap();

    let d = cluster.external("D");
    assert_eq!(versions_at(&cluster, "D", &kg, "o1").await, vec![kept]);
    let o2 = d.read(&kg, "o2").await.unwrap();
    assert!(o2[0].tombstoned);
    assert_eq!(o2[0].version, gone);

    let replicas = d.get_replica(&kg).await.unwrap();
    let replicas: Vec<&str> = replicas.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(replicas, vec!["A", "B"]);

    // Writes at D now reach the older replicas, but not C
    let from_d = d.update(&kg, "o3", b"new", &[]).await.unwrap();
    assert_eq!(versions_at(&cluster, "A", &kg, "o3").await, vec![from_d]);
    assert!(!cluster.node("C").unwrap().store.exists_keygroup(&kg).await.unwrap());

    let members = cluster.name_service.get_keygroup_members(&kg).await.unwrap();
    assert!(members.contains_key("D"));
}

#[tokio::test]
async fn test_removed_replica_drops_its_copy() {
    let kg = keygroup("orders");
    let cluster = replicated_cluster(&kg).await;
    cluster.external("A").update(&kg, "o1", b"x", &[]).await.unwrap();

    cluster.external("A").remove_replica(&kg, "C").await.unwrap();

    let c = cluster.node("C").unwrap();
    assert!(!c.store.exists_keygroup(&kg).await.unwrap());
    assert!(!c.replication.exists_keygroup(&kg).await);

    let replicas = cluster.external("B").get_replica(&kg).await.unwrap();
    let replicas: Vec<&str> = replicas.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(replicas, vec!["A"]);

    // Further writes only travel to B
    let v = cluster.external("B").update(&kg, "o2", b"y", &[]).await.unwrap();
    assert_eq!(versions_at(&cluster, "A", &kg, "o2").await, vec![v]);
}

#[tokio::test]
async fn test_removed_node_is_forgotten_everywhere() {
    let kg = keygroup("orders");
    let cluster = replicated_cluster(&kg).await;

    cluster.external("A").remove_node("C").await.unwrap();

    for id in ["A", "B"] {
        let handler = cluster.external(id);
        assert!(handler.get_node("C").await.unwrap_err().is_not_found(), "C still known at {id}");
        let replicas = handler.get_replica(&kg).await.unwrap();
        assert!(replicas.iter().all(|n| n.id != "C"));
    }
}

#[tokio::test]
async fn test_keygroup_deletion_reaches_all_replicas() {
    let kg = keygroup("orders");
    let cluster = replicated_cluster(&kg).await;
    cluster.external("B").update(&kg, "o1", b"x", &[]).await.unwrap();

    cluster.external("A").delete_keygroup(&kg).await.unwrap();

    for id in NODES {
        let err = cluster.external(id).read(&kg, "o1").await.unwrap_err();
        assert!(err.is_not_found(), "keygroup still readable at {id}");
    }

    // The name can be reused with a fresh membership
    cluster.external("B").create_keygroup(&kg, true, None).await.unwrap();
    assert!(cluster.external("B").get_replica(&kg).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_keygroup_deletion_can_be_retried_after_relay_failure() {
    let kg = keygroup("orders");
    let cluster = replicated_cluster(&kg).await;
    let a = cluster.external("A");

    cluster.client.set_reachable("B", false);
    let err = a.delete_keygroup(&kg).await.unwrap_err();
    assert!(matches!(err, FredError::Transport { .. }));
    assert!(cluster.node("A").unwrap().store.exists_keygroup(&kg).await.unwrap());

    cluster.client.set_reachable("B", true);
    a.delete_keygroup(&kg).await.unwrap();

    for id in NODES {
        let node = cluster.node(id).unwrap();
        assert!(!node.store.exists_keygroup(&kg).await.unwrap(), "store of {id}");
        assert!(!node.replication.exists_keygroup(&kg).await, "replication of {id}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_bootstrapped_items_expire_with_the_keygroup() {
    let kg = keygroup("sessions");
    let ttl = Some(Duration::from_secs(10));
    let cluster = LoopbackCluster::start(&["A", "B"]).await.unwrap();
    cluster.connect_all(&["A", "B"]).await.unwrap();

    let a = cluster.external("A");
    a.create_keygroup(&kg, true, ttl).await.unwrap();
    a.update(&kg, "s1", b"token", &[]).await.unwrap();
    a.add_replica(&kg, "B", ttl).await.unwrap();
    assert_eq!(cluster.external("B").read_all(&kg).await.unwrap().len(), 1);

    tokio::time::advance(Duration::from_secs(11)).await;

    for id in ["A", "B"] {
        let rows = cluster.external(id).read_all(&kg).await.unwrap();
        assert!(rows.is_empty(), "{id} still holds {} row(s)", rows.len());
    }
}
