//! Demo consumer: enqueues a few jobs into the memory store and works them off.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::json;
use store::{MemoryPool, MemoryStore, StoreConfig};
use worker::{FnHandler, HandlerFuture, Job, JobHandlerRegistry, Outcome, Worker, WorkerConfig, job_handler};

const QUEUE: &str = "default";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = WorkerConfig::from_env()?;
    let store = MemoryStore::new(StoreConfig::from_env()?);
    let pool = Arc::new(MemoryPool::new(store.clone()));

    for n in 0..4 {
        store.enqueue(QUEUE, "echo", json!({ "n": n }))?;
    }
    store.enqueue(QUEUE, "flaky", json!({ "n": 4 }))?;

    // Fails the first time it runs, then succeeds on redelivery.
    let flaky_attempts = Arc::new(AtomicU32::new(0));

    let mut handlers = JobHandlerRegistry::new();
    handlers.register(job_handler!("echo", |job| {
        tracing::info!(item_id = %job.item_id, payload = %job.payload, "echo");
        Ok(())
    }));
    handlers.register(FnHandler::new("flaky", move |job: &Job| {
        let attempt = flaky_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let item_id = job.item_id.clone();
        Box::pin(async move {
            if attempt == 1 {
                Err(format!("item {item_id} failed on attempt {attempt}"))
            } else {
                Ok(())
            }
        }) as HandlerFuture
    }));

    let worker = Worker::new("worker-1", pool, Arc::new(handlers), config);

    let mut acknowledged = 0;
    let mut requeued = 0;
    while let Some(outcome) = worker.process_next(QUEUE).await? {
        match outcome {
            Outcome::Acknowledged { .. } => acknowledged += 1,
            Outcome::Requeued { .. } => requeued += 1,
        }
    }

    let stats = store.stats();
    tracing::info!(
        acknowledged,
        requeued,
        pending = stats.pending,
        connections_opened = stats.connections_opened,
        connections_closed = stats.connections_closed,
        "Queue drained"
    );
    Ok(())
}
