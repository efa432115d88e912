//! Worker that processes leased jobs.

use std::sync::Arc;

use lease_core::{ItemId, LeaseError};
use store::{FetchedJob, MemoryPool, StoreError};
use thiserror::Error;
use tokio::sync::watch;

use crate::handler::{Job, JobHandlerRegistry};
use crate::WorkerConfig;

/// Worker errors.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Lease error: {0}")]
    Lease(#[from] LeaseError),
    #[error("Invalid worker config: {0}")]
    InvalidConfig(String),
}

/// How a processed job was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The handler succeeded and the job was removed from the queue.
    Acknowledged { item_id: ItemId },
    /// The job went back to the queue for another attempt.
    Requeued { item_id: ItemId, reason: String },
}

/// Fetches jobs from one pool and runs them through registered handlers.
pub struct Worker {
    worker_id: String,
    pool: Arc<MemoryPool>,
    handlers: Arc<JobHandlerRegistry>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        worker_id: impl Into<String>,
        pool: Arc<MemoryPool>,
        handlers: Arc<JobHandlerRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            pool,
            handlers,
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Fetch and process a single job from `queue`.
    ///
    /// Returns `None` if the queue had nothing to lease. The lease is released
    /// on every path; a failed acknowledge or requeue is returned as is and
    /// not retried, so the store will deliver the job again.
    pub async fn process_next(&self, queue: &str) -> Result<Option<Outcome>, WorkerError> {
        let Some(FetchedJob {
            lease,
            job_type,
            payload,
        }) = self.pool.fetch(queue, &self.config.lease)?
        else {
            return Ok(None);
        };

        let job = Job {
            item_id: lease.item_id().clone(),
            queue: lease.queue().clone(),
            job_type,
            payload,
        };

        let verdict = self.execute(&job).await;
        let settled = match &verdict {
            Ok(()) => lease.acknowledge().await,
            Err(_) => lease.requeue().await,
        };
        lease.release().await;
        settled?;

        let outcome = match verdict {
            Ok(()) => {
                tracing::info!(worker_id = %self.worker_id, item_id = %job.item_id, "Job acknowledged");
                Outcome::Acknowledged {
                    item_id: job.item_id,
                }
            }
            Err(reason) => {
                tracing::warn!(worker_id = %self.worker_id, item_id = %job.item_id, %reason, "Job requeued");
                Outcome::Requeued {
                    item_id: job.item_id,
                    reason,
                }
            }
        };
        Ok(Some(outcome))
    }

    async fn execute(&self, job: &Job) -> Result<(), String> {
        let Some(handler) = self.handlers.get(&job.job_type) else {
            return Err(format!("No handler for job type: {}", job.job_type));
        };

        match tokio::time::timeout(self.config.job_timeout(), handler.handle(job)).await {
            Ok(result) => result,
            Err(_) => Err("Job timed out".into()),
        }
    }

    /// Process `queue` until `shutdown` flips to `true` or its sender goes away.
    ///
    /// Moves straight on after an acknowledged job. Sleeps for the poll interval
    /// when the queue is empty, a job was requeued or processing failed, so a
    /// job that keeps failing is not fetched again in a tight loop.
    pub async fn run(&self, queue: &str, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Starting worker: {}", self.worker_id);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.process_next(queue).await {
                Ok(Some(Outcome::Acknowledged { .. })) => continue,
                Ok(Some(Outcome::Requeued { .. }) | None) => {}
                Err(e) => tracing::warn!(worker_id = %self.worker_id, error = %e, "Processing failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Shutting down worker: {}", self.worker_id);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use std::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use store::{MemoryStore, StoreConfig};

    use super::*;
    use crate::{FnHandler, HandlerFuture, job_handler};

    fn registry() -> JobHandlerRegistry {
        let mut handlers = JobHandlerRegistry::new();
        handlers.register(job_handler!("echo", |job| {
            tracing::debug!(payload = %job.payload, "echo");
            Ok(())
        }));
        handlers.register(job_handler!("fail", |_job| Err("boom".to_string())));
        handlers.register(FnHandler::new("slow", |_job: &Job| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(())
            }) as HandlerFuture
        }));
        handlers
    }

    fn setup() -> (MemoryStore, Worker) {
        let store = MemoryStore::new(StoreConfig::memory());
        let pool = Arc::new(MemoryPool::new(store.clone()));
        let config = WorkerConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_job_timeout(Duration::from_secs(30));
        let worker = Worker::new("worker-1", pool, Arc::new(registry()), config);
        (store, worker)
    }

    #[tokio::test]
    async fn successful_job_is_acknowledged() -> Result<(), Box<dyn Error>> {
        let (store, worker) = setup();
        let item = store.enqueue("default", "echo", json!({ "msg": "hi" }))?;

        let outcome = worker.process_next("default").await?;

        assert_eq!(outcome, Some(Outcome::Acknowledged { item_id: item.clone() }));
        assert!(!store.contains(&item));
        let stats = store.stats();
        assert_eq!(stats.connections_closed, stats.connections_opened);
        Ok(())
    }

    #[tokio::test]
    async fn failed_job_is_requeued() -> Result<(), Box<dyn Error>> {
        let (store, worker) = setup();
        let item = store.enqueue("default", "fail", json!(null))?;

        let outcome = worker.process_next("default").await?;

        assert_eq!(
            outcome,
            Some(Outcome::Requeued {
                item_id: item.clone(),
                reason: "boom".to_string()
            })
        );
        assert!(store.contains(&item));
        assert_eq!(store.stats().pending, 1);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_job_type_is_requeued() -> Result<(), Box<dyn Error>> {
        let (store, worker) = setup();
        store.enqueue("default", "mystery", json!(null))?;

        let outcome = worker.process_next("default").await?;

        assert!(matches!(
            outcome,
            Some(Outcome::Requeued { reason, .. }) if reason.contains("mystery")
        ));
        assert_eq!(store.stats().pending, 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn slow_job_times_out_and_is_requeued() -> Result<(), Box<dyn Error>> {
        let (store, worker) = setup();
        store.enqueue("default", "slow", json!(null))?;

        let outcome = worker.process_next("default").await?;

        assert!(matches!(
            outcome,
            Some(Outcome::Requeued { reason, .. }) if reason == "Job timed out"
        ));
        assert_eq!(store.stats().pending, 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_queue_yields_nothing() -> Result<(), Box<dyn Error>> {
        let (_store, worker) = setup();
        assert_eq!(worker.process_next("default").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn run_drains_queue_until_shutdown() -> Result<(), Box<dyn Error>> {
        let (store, worker) = setup();
        for n in 0..3 {
            store.enqueue("default", "echo", json!({ "n": n }))?;
        }

        let worker = Arc::new(worker);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run("default", rx).await }
        });

        while store.stats().pending > 0 || store.stats().in_progress > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true)?;
        handle.await?;

        assert_eq!(store.stats().pending, 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn run_waits_a_poll_interval_after_a_requeue() -> Result<(), Box<dyn Error>> {
        let store = MemoryStore::new(StoreConfig::memory());
        let pool = Arc::new(MemoryPool::new(store.clone()));
        let attempts = Arc::new(AtomicUsize::new(0));

        let mut handlers = JobHandlerRegistry::new();
        handlers.register(FnHandler::new("fail", {
            let attempts = Arc::clone(&attempts);
            move |_job: &Job| {
                attempts.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Err("boom".to_string()) }) as HandlerFuture
            }
        }));
        let config = WorkerConfig::default().with_poll_interval(Duration::from_millis(10));
        let worker = Arc::new(Worker::new("worker-1", pool, Arc::new(handlers), config));
        store.enqueue("default", "fail", json!(null))?;

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run("default", rx).await }
        });

        tokio::time::sleep(Duration::from_millis(95)).await;
        tx.send(true)?;
        handle.await?;

        // One attempt right away, then one per 10ms poll interval.
        let attempts = attempts.load(Ordering::SeqCst);
        assert!((9..=11).contains(&attempts), "attempts = {attempts}");
        assert_eq!(store.stats().pending, 1);
        Ok(())
    }
}
