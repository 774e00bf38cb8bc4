//! RedisStore against a real Redis server.
//!
//! Requires Docker; run with `cargo test -- --ignored`.

mod common;

use common::TestRedis;
use serde_json::json;
use std::sync::Arc;
use workq_jobs::{QueueKeys, SortedSetStore};

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_pop_min_returns_lowest_score_once() {
    let redis = TestRedis::new().await;
    let store = redis.store().await;
    let keys = QueueKeys::new("workq_test");
    let key = keys.queue("default");

    store.add(&key, "b", 5.0).await.unwrap();
    store.add(&key, "a", 1.0).await.unwrap();
    store.add(&key, "c", 9.0).await.unwrap();
    assert_eq!(store.cardinality(&key).await.unwrap(), 3);

    assert_eq!(store.pop_min(&key).await.unwrap(), Some(("a".to_string(), 1.0)));
    assert_eq!(store.pop_min(&key).await.unwrap(), Some(("b".to_string(), 5.0)));
    assert_eq!(store.pop_min(&key).await.unwrap(), Some(("c".to_string(), 9.0)));
    assert_eq!(store.pop_min(&key).await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_pops_never_share_a_member() {
    let redis = TestRedis::new().await;
    let store = Arc::new(redis.store().await);
    let key = QueueKeys::new("workq_test").queue("race");

    for i in 0..100 {
        store.add(&key, &format!("job-{i}"), f64::from(i)).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..6 {
        let store = Arc::clone(&store);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            let mut popped = Vec::new();
            while let Some((member, _)) = store.pop_min(&key).await.unwrap() {
                popped.push(member);
            }
            popped
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 100);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_range_remove_and_keys() {
    let redis = TestRedis::new().await;
    let store = redis.store().await;
    let keys = QueueKeys::new("workq_test");

    store.add(&keys.queue("email"), "x", 1.0).await.unwrap();
    store.add(&keys.queue("images"), "y", 2.0).await.unwrap();
    store.add(&keys.delayed(), "z", 100.0).await.unwrap();

    let found = store.keys(&keys.queue_pattern()).await.unwrap();
    assert_eq!(
        found,
        vec![keys.queue("email"), keys.queue("images")]
    );

    assert_eq!(
        store
            .range_by_score(&keys.delayed(), f64::NEG_INFINITY, 100.0, Some(10))
            .await
            .unwrap(),
        vec!["z".to_string()]
    );
    assert!(store
        .range_by_score(&keys.delayed(), f64::NEG_INFINITY, 99.0, None)
        .await
        .unwrap()
        .is_empty());

    assert!(store.remove(&keys.delayed(), "z").await.unwrap());
    assert!(!store.remove(&keys.delayed(), "z").await.unwrap());
    assert!(store.delete(&keys.queue("email")).await.unwrap());
    assert!(!store.delete(&keys.queue("email")).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_promote_due_moves_ready_entries_by_priority() {
    let redis = TestRedis::new().await;
    let store = redis.store().await;
    let keys = QueueKeys::new("workq_test");

    let due = json!({"job_id": "1", "queue_name": "email", "priority": 3}).to_string();
    let later = json!({"job_id": "2", "queue_name": "email", "priority": 1}).to_string();
    store.add(&keys.delayed(), &due, 50.0).await.unwrap();
    store.add(&keys.delayed(), &later, 500.0).await.unwrap();
    store.add(&keys.delayed(), "garbage", 10.0).await.unwrap();

    let promotion = store
        .promote_due(&keys.delayed(), &keys.queue_prefix(), 100.0, 10)
        .await
        .unwrap();

    assert_eq!(promotion.moved, 1);
    assert_eq!(promotion.dropped, 1);
    assert_eq!(store.cardinality(&keys.delayed()).await.unwrap(), 1);
    assert_eq!(
        store.pop_min(&keys.queue("email")).await.unwrap(),
        Some((due, 3.0))
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_ping_and_reconnect() {
    let redis = TestRedis::new().await;
    let store = redis.store().await;

    store.ping().await.unwrap();
    store.reconnect().await.unwrap();
    store.ping().await.unwrap();
}
