//! Transaction integration tests

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use sqlkit::{
    CallScope, DbError, EndpointRole, IsolationLevel, RollbackAfterPanic, TransactionError,
    TxHandle, TxOptions,
};

use crate::Cluster;

#[tokio::test]
async fn test_success_commits_on_leader() {
    let cluster = Cluster::new(1);
    let manager = cluster.connect().await;

    let rows = manager
        .with_transaction(&CallScope::new(), |scope| async move {
            let tx = scope.transaction().expect("scope carries the transaction");
            assert_eq!(tx.role(), EndpointRole::Leader);
            tx.execute("INSERT INTO orders VALUES (1)").await?;
            Ok::<_, DbError>(1)
        })
        .await
        .unwrap();

    assert_eq!(rows, 1);
    let leader = cluster.leader_state();
    assert_eq!(leader.committed(), 1);
    assert_eq!(leader.rolled_back(), 0);
    assert_eq!(leader.active_transactions(), 0);
    assert_eq!(cluster.follower_state(0).begun(), 0);
}

#[tokio::test]
async fn test_body_error_rolls_back() {
    let cluster = Cluster::new(0);
    let manager = cluster.connect().await;

    let err = manager
        .with_transaction(&CallScope::new(), |_| async {
            Err::<(), _>(DbError::NoRows)
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TransactionError::Body(DbError::NoRows)));
    assert!(err.into_body().unwrap().is_no_rows());
    let leader = cluster.leader_state();
    assert_eq!(leader.committed(), 0);
    assert_eq!(leader.rolled_back(), 1);
}

#[tokio::test]
async fn test_rollback_failure_reported_with_body_error() {
    let cluster = Cluster::new(0);
    let manager = cluster.connect().await;
    cluster.leader_state().fail_rollback(true);

    let err = manager
        .with_transaction(&CallScope::new(), |_| async {
            Err::<(), _>(DbError::Driver("constraint violated".into()))
        })
        .await
        .unwrap_err();

    match &err {
        TransactionError::Rollback { body, rollback } => {
            assert!(body.to_string().contains("constraint violated"));
            assert!(rollback.to_string().contains("rollback failed"));
        }
        other => panic!("expected rollback error, got {other}"),
    }
}

#[tokio::test]
async fn test_commit_failure_is_the_result() {
    let cluster = Cluster::new(0);
    let manager = cluster.connect().await;
    cluster.leader_state().fail_commit(true);

    let err = manager
        .with_transaction(&CallScope::new(), |_| async { Ok::<_, DbError>(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, TransactionError::Commit(_)));
    assert!(err.body().is_none());
}

#[tokio::test]
async fn test_nested_transaction_rejected() {
    let cluster = Cluster::new(1);
    let manager = cluster.connect().await;
    let leader = cluster.leader_state();

    manager
        .with_transaction(&CallScope::new(), |scope| {
            let manager = &manager;
            let leader = leader.clone();
            async move {
                let nested = manager
                    .with_transaction(&scope, |_| async { Ok::<_, DbError>(()) })
                    .await;
                assert!(nested.unwrap_err().is_nested());

                let nested_ro = manager
                    .with_read_only_transaction(&scope, |_| async { Ok::<_, DbError>(()) })
                    .await;
                assert!(nested_ro.unwrap_err().is_nested());

                assert_eq!(leader.active_transactions(), 1);
                Ok::<_, DbError>(())
            }
        })
        .await
        .unwrap();

    assert_eq!(leader.begun(), 1);
    assert_eq!(leader.committed(), 1);
    assert_eq!(cluster.follower_state(0).begun(), 0);
}

#[tokio::test]
async fn test_panic_rolls_back_and_propagates() {
    let cluster = Cluster::new(0);
    let manager = cluster.connect().await;

    let result = AssertUnwindSafe(manager.with_transaction(&CallScope::new(), |_| async {
        if true {
            panic!("handler bug");
        }
        Ok::<_, DbError>(())
    }))
    .catch_unwind()
    .await;

    let payload = result.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"handler bug"));
    let leader = cluster.leader_state();
    assert_eq!(leader.rolled_back(), 1);
    assert_eq!(leader.committed(), 0);
    assert_eq!(leader.active_transactions(), 0);
}

#[tokio::test]
async fn test_panic_with_failed_rollback_keeps_both() {
    let cluster = Cluster::new(0);
    let manager = cluster.connect().await;
    cluster.leader_state().fail_rollback(true);

    let result = AssertUnwindSafe(manager.with_transaction(&CallScope::new(), |_| async {
        if true {
            panic!("handler bug");
        }
        Ok::<_, DbError>(())
    }))
    .catch_unwind()
    .await;

    let payload = result.unwrap_err();
    let wrapped = payload
        .downcast_ref::<RollbackAfterPanic>()
        .expect("rollback failure travels with the panic");
    assert_eq!(wrapped.message(), Some("handler bug"));
    assert!(matches!(wrapped.rollback, DbError::Driver(_)));
}

#[tokio::test]
async fn test_read_only_commits_on_follower() {
    let cluster = Cluster::new(2);
    let manager = cluster.connect().await;

    manager
        .with_read_only_transaction(&CallScope::new(), |scope| async move {
            let tx = scope.transaction().unwrap();
            assert!(tx.is_read_only());
            assert_eq!(tx.role(), EndpointRole::Follower(0));
            Ok::<_, DbError>(())
        })
        .await
        .unwrap();

    let follower = cluster.follower_state(0);
    assert_eq!(follower.committed(), 1);
    assert_eq!(follower.rolled_back(), 0);
    assert_eq!(follower.begin_options(), vec![TxOptions::read_only()]);
    assert_eq!(cluster.leader_state().begun(), 0);

    // The next read-only transaction continues the rotation
    manager
        .with_read_only_transaction(&CallScope::new(), |_| async { Ok::<_, DbError>(()) })
        .await
        .unwrap();
    assert_eq!(cluster.follower_state(1).committed(), 1);
}

#[tokio::test]
async fn test_read_only_falls_back_to_leader() {
    let cluster = Cluster::new(1);
    let manager = cluster.connect().await;
    manager
        .health_table()
        .mark_unhealthy(EndpointRole::Follower(0), "down");

    manager
        .with_read_only_transaction(&CallScope::new(), |scope| async move {
            assert_eq!(scope.transaction().unwrap().role(), EndpointRole::Leader);
            Ok::<_, DbError>(())
        })
        .await
        .unwrap();

    let leader = cluster.leader_state();
    assert_eq!(leader.committed(), 1);
    assert!(leader.begin_options()[0].read_only);
}

#[tokio::test]
async fn test_read_only_forced_over_caller_options() {
    let cluster = Cluster::new(1);
    let manager = cluster.connect().await;
    let options = TxOptions::default().with_isolation(IsolationLevel::RepeatableRead);

    manager
        .with_read_only_transaction_options(&CallScope::new(), options, |_| async {
            Ok::<_, DbError>(())
        })
        .await
        .unwrap();

    let begun = cluster.follower_state(0).begin_options();
    assert_eq!(begun.len(), 1);
    assert!(begun[0].read_only);
    assert_eq!(begun[0].isolation, Some(IsolationLevel::RepeatableRead));
}

#[tokio::test]
async fn test_transaction_options_reach_driver() {
    let cluster = Cluster::new(0);
    let manager = cluster.connect().await;
    let options = TxOptions::default().with_isolation(IsolationLevel::Serializable);

    manager
        .with_transaction_options(&CallScope::new(), options, |_| async { Ok::<_, DbError>(()) })
        .await
        .unwrap();

    assert_eq!(cluster.leader_state().begin_options(), vec![options]);
}

#[tokio::test]
async fn test_transaction_invisible_outside_body() {
    let cluster = Cluster::new(0);
    let manager = cluster.connect().await;
    let outer = CallScope::new();

    let leaked: TxHandle = manager
        .with_transaction(&outer, |scope| async move {
            Ok::<_, DbError>(scope.transaction().unwrap().clone())
        })
        .await
        .unwrap();

    assert!(!outer.in_transaction());
    assert!(!manager.connection(&outer).is_transaction());
    assert!(leaked.is_finished().await);
    assert!(matches!(
        leaked.execute("UPDATE t SET x = 1").await,
        Err(DbError::TransactionDone)
    ));
}

#[tokio::test]
async fn test_sequential_transactions_on_same_scope() {
    let cluster = Cluster::new(0);
    let manager = cluster.connect().await;
    let scope = CallScope::new();

    for _ in 0..3 {
        manager
            .with_transaction(&scope, |_| async { Ok::<_, DbError>(()) })
            .await
            .unwrap();
    }
    assert_eq!(cluster.leader_state().committed(), 3);
}

#[tokio::test]
async fn test_begin_failure_surfaces() {
    let cluster = Cluster::new(0);
    let manager = cluster.connect().await;
    cluster.leader_state().fail_begin(true);

    let err = manager
        .with_transaction(&CallScope::new(), |_| async { Ok::<_, DbError>(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, TransactionError::Begin(_)));
    assert!(err.to_string().starts_with("failed to begin transaction"));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_passing_during_body_rolls_back() {
    let cluster = Cluster::new(0);
    let manager = cluster.connect().await;
    let scope = CallScope::new().with_timeout(Duration::from_millis(50));

    let err = manager
        .with_transaction(&scope, |_| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, DbError>(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TransactionError::Commit(DbError::DeadlineExceeded)));
    let leader = cluster.leader_state();
    assert_eq!(leader.begun(), 1);
    assert_eq!(leader.committed(), 0);
    assert_eq!(leader.rolled_back(), 1);
    assert_eq!(leader.active_transactions(), 0);
}
