#![allow(clippy::disallowed_methods)]

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use lease_core::LeaseConfig;
use serde_json::json;
use store::{FetchedJob, MemoryPool, MemoryStore, StoreConfig, StoreError};

fn setup(config: StoreConfig) -> (MemoryStore, Arc<MemoryPool>) {
    let store = MemoryStore::new(config);
    let pool = Arc::new(MemoryPool::new(store.clone()));
    (store, pool)
}

fn fetch_one(pool: &Arc<MemoryPool>, queue: &str) -> Result<FetchedJob, Box<dyn Error>> {
    pool.fetch(queue, &LeaseConfig::default())?
        .ok_or_else(|| format!("expected a job in {queue}").into())
}

#[tokio::test]
async fn acknowledge_removes_the_row() -> Result<(), Box<dyn Error>> {
    let (store, pool) = setup(StoreConfig::memory());
    let item = store.enqueue("default", "echo", json!({ "msg": "hi" }))?;

    let job = fetch_one(&pool, "default")?;
    assert_eq!(job.lease.item_id(), &item);
    assert_eq!(job.lease.queue().as_str(), "default");
    assert_eq!(job.job_type, "echo");
    assert_eq!(job.payload, json!({ "msg": "hi" }));
    assert!(job.lease.has_keep_alive());
    assert!(store.fetched_at(&item).is_some());

    job.lease.acknowledge().await?;
    job.lease.release().await;

    assert!(!store.contains(&item));
    let stats = store.stats();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.in_progress, 0);
    assert_eq!(stats.connections_closed, stats.connections_opened);
    Ok(())
}

#[tokio::test]
async fn requeue_makes_the_row_fetchable_again() -> Result<(), Box<dyn Error>> {
    let (store, pool) = setup(StoreConfig::memory());
    let item = store.enqueue("default", "echo", json!(null))?;

    let job = fetch_one(&pool, "default")?;
    job.lease.requeue().await?;
    job.lease.release().await;

    assert!(store.fetched_at(&item).is_none());
    assert_eq!(store.stats().pending, 1);

    let again = fetch_one(&pool, "default")?;
    assert_eq!(again.lease.item_id(), &item);
    again.lease.release().await;
    Ok(())
}

#[tokio::test]
async fn second_acknowledge_fails_at_the_store() -> Result<(), Box<dyn Error>> {
    let (store, pool) = setup(StoreConfig::memory());
    store.enqueue("default", "echo", json!(null))?;

    let job = fetch_one(&pool, "default")?;
    job.lease.acknowledge().await?;
    let second = job.lease.acknowledge().await;
    assert!(matches!(second, Err(StoreError::TransactionCompleted(_))));
    job.lease.release().await;
    Ok(())
}

#[tokio::test]
async fn locked_rows_are_skipped() -> Result<(), Box<dyn Error>> {
    let (store, pool) = setup(StoreConfig::memory());
    let first = store.enqueue("default", "echo", json!(1))?;
    let second = store.enqueue("default", "echo", json!(2))?;
    store.enqueue("other", "echo", json!(3))?;

    let a = fetch_one(&pool, "default")?;
    let b = fetch_one(&pool, "default")?;
    assert_eq!(a.lease.item_id(), &first);
    assert_eq!(b.lease.item_id(), &second);
    assert!(pool.fetch("default", &LeaseConfig::default())?.is_none());

    a.lease.release().await;
    b.lease.release().await;
    assert_eq!(store.stats().pending, 3);
    Ok(())
}

#[tokio::test]
async fn release_without_acknowledge_redelivers() -> Result<(), Box<dyn Error>> {
    let (store, pool) = setup(StoreConfig::memory());
    let item = store.enqueue("default", "echo", json!(null))?;

    let job = fetch_one(&pool, "default")?;
    job.lease.release().await;
    job.lease.release().await;

    let again = fetch_one(&pool, "default")?;
    assert_eq!(again.lease.item_id(), &item);
    again.lease.release().await;
    Ok(())
}

#[tokio::test]
async fn dropped_lease_returns_row_and_connection() -> Result<(), Box<dyn Error>> {
    let (store, pool) = setup(StoreConfig::memory());
    let item = store.enqueue("default", "echo", json!(null))?;

    let job = fetch_one(&pool, "default")?;
    drop(job);

    let stats = store.stats();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.connections_closed, stats.connections_opened);
    assert!(store.fetched_at(&item).is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn keep_alive_holds_the_lease_past_the_idle_timeout() -> Result<(), Box<dyn Error>> {
    let (store, pool) =
        setup(StoreConfig::memory().with_idle_timeout(Duration::from_secs(90)));
    let item = store.enqueue("default", "echo", json!(null))?;

    let job = fetch_one(&pool, "default")?;
    tokio::time::sleep(Duration::from_secs(200)).await;

    assert!(pool.fetch("default", &LeaseConfig::default())?.is_none());
    assert_eq!(store.stats().keep_alive_queries, 3);
    assert_eq!(store.stats().connections_severed, 0);

    job.lease.acknowledge().await?;
    job.lease.release().await;
    assert!(!store.contains(&item));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unwatched_dedicated_session_loses_its_lease() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new(StoreConfig::memory().with_idle_timeout(Duration::from_secs(90)));
    let pool = Arc::new(MemoryPool::with_dedicated_connection(store.clone()));
    let item = store.enqueue("default", "echo", json!(null))?;

    let job = fetch_one(&pool, "default")?;
    assert!(!job.lease.has_keep_alive());
    tokio::time::sleep(Duration::from_secs(200)).await;

    let redelivered = fetch_one(&pool, "default")?;
    assert_eq!(redelivered.lease.item_id(), &item);
    assert_eq!(store.stats().connections_severed, 1);

    let late = job.lease.acknowledge().await;
    assert!(matches!(late, Err(StoreError::ConnectionClosed(_))));
    job.lease.release().await;

    redelivered.lease.acknowledge().await?;
    redelivered.lease.release().await;
    assert!(!store.contains(&item));
    Ok(())
}
