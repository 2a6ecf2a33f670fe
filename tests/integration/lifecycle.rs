//! Construction, health monitoring and shutdown

use std::time::Duration;

use sqlkit::{DbError, EndpointRole, PoolConfig};

use crate::{host_of, Cluster};

#[tokio::test(start_paused = true)]
async fn test_leader_connect_failure_is_fatal() {
    let mut cluster = Cluster::new(1);
    cluster.config.leader.max_retries = 3;
    cluster.leader_state().refuse_open(true);

    let err = cluster.try_connect().await.unwrap_err();
    match err {
        DbError::Connect { role, attempts, .. } => {
            assert_eq!(role, EndpointRole::Leader);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected connect error, got {other}"),
    }
    // No follower is attempted once the leader is lost
    assert_eq!(cluster.follower_state(0).opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exactly_max_with_increasing_backoff() {
    let mut cluster = Cluster::new(0);
    cluster.config.leader.max_retries = 4;
    cluster.leader_state().refuse_open(true);

    assert!(cluster.try_connect().await.is_err());

    let attempts = cluster.driver.open_attempts();
    assert_eq!(attempts.len(), 4);
    let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(gaps[0] >= Duration::from_millis(100));
    assert!(gaps[1] >= Duration::from_millis(200));
    assert!(gaps[2] >= Duration::from_millis(300));
    assert!(gaps.windows(2).all(|w| w[1] > w[0]), "backoff must grow: {gaps:?}");
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_endpoint_retries_and_closes_each_handle() {
    let mut cluster = Cluster::new(0);
    cluster.config.leader.max_retries = 2;
    let leader = cluster.leader_state();
    leader.set_reachable(false);

    let err = cluster.try_connect().await.unwrap_err();
    assert!(err.to_string().contains("unreachable"));
    assert_eq!(leader.pings(), 2);
    assert_eq!(leader.closes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_follower_connect_failure_is_not_fatal() {
    let mut cluster = Cluster::new(2);
    cluster.config.followers[0].max_retries = 2;
    cluster.follower_state(0).refuse_open(true);

    let manager = cluster.connect().await;

    assert!(manager.follower_slots()[0].is_none());
    assert!(manager.follower_slots()[1].is_some());
    assert_eq!(cluster.follower_state(0).opens(), 2);

    let health = manager.health();
    assert!(health.leader.healthy);
    assert_eq!(health.followers.len(), 2);
    assert!(!health.followers[0].healthy);
    assert!(health.followers[1].healthy);

    for _ in 0..3 {
        assert_eq!(host_of(&manager.follower()), "replica-1");
    }
}

#[tokio::test]
async fn test_pool_policy_applied_to_every_endpoint() {
    let mut cluster = Cluster::new(2);
    cluster.config.pool = PoolConfig {
        max_open_conns: 40,
        max_idle_conns: 0,
        conn_max_lifetime_ms: 0,
        conn_max_idle_time_ms: 30_000,
    };
    let _manager = cluster.connect().await;

    let expected = PoolConfig {
        max_open_conns: 40,
        max_idle_conns: 5,
        conn_max_lifetime_ms: 300_000,
        conn_max_idle_time_ms: 30_000,
    };
    assert_eq!(cluster.leader_state().pool_config(), Some(expected.clone()));
    assert_eq!(cluster.follower_state(0).pool_config(), Some(expected.clone()));
    assert_eq!(cluster.follower_state(1).pool_config(), Some(expected));
}

#[tokio::test(start_paused = true)]
async fn test_monitor_tracks_follower_health() {
    let cluster = Cluster::new(2).with_health_interval(1000);
    let manager = cluster.connect().await;
    let follower = cluster.follower_state(0);

    follower.set_reachable(false);
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let health = manager.health();
    assert!(!health.followers[0].healthy);
    assert!(health.followers[0].error.contains("unreachable"));
    assert!(health.followers[1].healthy);
    assert_eq!(host_of(&manager.follower()), "replica-1");
    assert_eq!(host_of(&manager.follower()), "replica-1");

    follower.set_reachable(true);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(manager.health().followers[0].healthy);

    manager.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_monitor_stops_after_close() {
    let cluster = Cluster::new(1).with_health_interval(1000);
    let manager = cluster.connect().await;
    let leader = cluster.leader_state();
    assert_eq!(leader.pings(), 1); // connect

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(leader.pings(), 3);

    manager.close().await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(leader.pings(), 3);
    assert_eq!(cluster.follower_state(0).pings(), 3);
}

#[tokio::test]
async fn test_leader_health_reported() {
    let cluster = Cluster::new(0);
    let manager = cluster.connect().await;
    assert!(manager.is_healthy());

    cluster.leader_state().set_reachable(false);
    assert!(manager.is_healthy()); // unchanged until the next probe

    manager.check_health_now().await;
    assert!(!manager.is_healthy());
    assert!(!manager.health().leader.error.is_empty());
}

#[tokio::test]
async fn test_close_closes_every_endpoint() {
    let mut cluster = Cluster::new(2);
    cluster.config.followers[1].max_retries = 1;
    cluster.follower_state(1).refuse_open(true);
    let manager = cluster.connect().await;

    manager.close().await.unwrap();
    assert!(cluster.leader_state().is_closed());
    assert!(cluster.follower_state(0).is_closed());
    // The absent follower never had a handle to close
    assert_eq!(cluster.follower_state(1).closes(), 0);
}

#[tokio::test]
async fn test_close_reports_every_failure() {
    let cluster = Cluster::new(2);
    let manager = cluster.connect().await;
    cluster.leader_state().fail_close(true);
    cluster.follower_state(1).fail_close(true);

    let err = manager.close().await.unwrap_err();
    match &err {
        DbError::Close(failures) => {
            let roles: Vec<EndpointRole> = failures.iter().map(|f| f.role).collect();
            assert_eq!(roles, vec![EndpointRole::Leader, EndpointRole::Follower(1)]);
        }
        other => panic!("expected close error, got {other}"),
    }
    let msg = err.to_string();
    assert!(msg.contains("leader close error"));
    assert!(msg.contains("follower 1 close error"));

    // The healthy follower was still closed
    assert!(cluster.follower_state(0).is_closed());
}

#[tokio::test]
async fn test_close_twice_is_noop() {
    let cluster = Cluster::new(1);
    let manager = cluster.connect().await;

    manager.close().await.unwrap();
    manager.close().await.unwrap();
    assert_eq!(cluster.leader_state().closes(), 1);
    assert_eq!(cluster.follower_state(0).closes(), 1);
}
