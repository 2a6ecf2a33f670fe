//! Follower selection and read/write routing

use std::collections::HashMap;
use std::sync::Arc;

use sqlkit::{CallScope, DbError, EndpointRole};

use crate::{host_of, Cluster};

#[tokio::test]
async fn test_round_robin_visits_every_follower() {
    let cluster = Cluster::new(3);
    let manager = cluster.connect().await;

    let hosts: Vec<String> = (0..6).map(|_| host_of(&manager.follower())).collect();
    assert_eq!(
        hosts,
        vec!["replica-0", "replica-1", "replica-2", "replica-0", "replica-1", "replica-2"]
    );
}

#[tokio::test]
async fn test_unhealthy_follower_skipped_rotation_continues() {
    let cluster = Cluster::new(3);
    let manager = cluster.connect().await;

    assert_eq!(host_of(&manager.follower()), "replica-0");
    manager
        .health_table()
        .mark_unhealthy(EndpointRole::Follower(1), "lagging");

    let hosts: Vec<String> = (0..4).map(|_| host_of(&manager.follower())).collect();
    assert_eq!(hosts, vec!["replica-2", "replica-0", "replica-2", "replica-0"]);
}

#[tokio::test]
async fn test_all_followers_unhealthy_returns_leader() {
    let cluster = Cluster::new(2);
    let manager = cluster.connect().await;
    manager
        .health_table()
        .mark_unhealthy(EndpointRole::Follower(0), "down");
    manager
        .health_table()
        .mark_unhealthy(EndpointRole::Follower(1), "down");

    for _ in 0..3 {
        assert!(Arc::ptr_eq(&manager.follower(), &manager.leader()));
    }
}

#[tokio::test]
async fn test_no_followers_returns_leader() {
    let cluster = Cluster::new(0);
    let manager = cluster.connect().await;

    for _ in 0..3 {
        let (role, conn) = manager.select_follower();
        assert_eq!(role, EndpointRole::Leader);
        assert!(Arc::ptr_eq(&conn, &manager.leader()));
    }
}

#[tokio::test]
async fn test_only_healthy_follower_serves_every_read() {
    let cluster = Cluster::new(2);
    let manager = cluster.connect().await;
    manager
        .health_table()
        .mark_unhealthy(EndpointRole::Follower(0), "maintenance");

    for _ in 0..3 {
        let conn = manager.follower();
        assert_eq!(host_of(&conn), "replica-1");
        assert!(!Arc::ptr_eq(&conn, &manager.leader()));
    }
}

#[tokio::test]
async fn test_follower_recovers_into_rotation() {
    let cluster = Cluster::new(2);
    let manager = cluster.connect().await;
    let table = manager.health_table();

    table.mark_unhealthy(EndpointRole::Follower(0), "down");
    assert_eq!(host_of(&manager.follower()), "replica-1");

    table.mark_healthy(EndpointRole::Follower(0));
    assert_eq!(host_of(&manager.follower()), "replica-0");
    assert_eq!(host_of(&manager.follower()), "replica-1");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_never_fall_back() {
    let cluster = Cluster::new(3);
    let manager = Arc::new(cluster.connect().await);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            (0..50)
                .map(|_| manager.select_follower().0)
                .collect::<Vec<_>>()
        }));
    }

    let mut counts: HashMap<EndpointRole, usize> = HashMap::new();
    for task in tasks {
        for role in task.await.unwrap() {
            *counts.entry(role).or_default() += 1;
        }
    }
    assert!(!counts.contains_key(&EndpointRole::Leader));
    assert_eq!(counts.values().sum::<usize>(), 400);
}

#[tokio::test]
async fn test_read_and_write_targets_outside_transaction() {
    let cluster = Cluster::new(1);
    let manager = cluster.connect().await;
    let scope = CallScope::new();

    let write = manager.connection(&scope);
    assert_eq!(write.role(), EndpointRole::Leader);
    assert!(!write.is_transaction());
    write.execute("INSERT INTO t VALUES (1)").await.unwrap();

    let read = manager.read_connection(&scope);
    assert_eq!(read.role(), EndpointRole::Follower(0));
    read.execute("SELECT 1").await.unwrap();

    assert_eq!(cluster.leader_state().executed(), 1);
    assert_eq!(cluster.follower_state(0).executed(), 1);
}

#[tokio::test]
async fn test_reads_inside_transaction_use_the_transaction() {
    let cluster = Cluster::new(1);
    let manager = cluster.connect().await;

    manager
        .with_transaction(&CallScope::new(), |scope| {
            let manager = &manager;
            async move {
                let read = manager.read_connection(&scope);
                assert!(read.is_transaction());
                read.execute("SELECT 1").await?;
                Ok::<_, DbError>(())
            }
        })
        .await
        .unwrap();

    assert_eq!(cluster.follower_state(0).executed(), 0);
    assert_eq!(cluster.leader_state().executed(), 1);
}
