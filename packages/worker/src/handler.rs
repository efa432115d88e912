//! Job handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use lease_core::{ItemId, QueueName};

/// A fetched job as seen by its handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub item_id: ItemId,
    pub queue: QueueName,
    pub job_type: String,
    pub payload: serde_json::Value,
}

/// Result type for job handlers. An error requeues the job.
pub type HandlerResult = Result<(), String>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Trait for job handlers.
///
/// Implement this trait to define how jobs of a specific type are processed.
pub trait JobHandler: Send + Sync + 'static {
    /// The job type this handler processes.
    fn job_type(&self) -> &str;

    /// Process a leased job. An `Err` sends it back to the queue.
    fn handle(&self, job: &Job) -> HandlerFuture;
}

/// Registry for job handlers.
///
/// Looks up the handler for a fetched job by its job type.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Create a registry with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any previous one for the same job type.
    pub fn register<H: JobHandler>(&mut self, handler: H) {
        let job_type = handler.job_type().to_string();
        self.handlers.insert(job_type, Arc::new(handler));
    }

    /// Get the handler for a job type, if one is registered.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Check whether a job type has a handler.
    pub fn has_handler(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// List the registered job types, in no particular order.
    pub fn job_types(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    job_type: String,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    /// Wrap `handler` as the handler for `job_type`.
    pub fn new(job_type: impl Into<String>, handler: F) -> Self {
        Self {
            job_type: job_type.into(),
            handler,
        }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&Job) -> HandlerFuture + Send + Sync + 'static,
{
    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn handle(&self, job: &Job) -> HandlerFuture {
        (self.handler)(job)
    }
}

/// Build a [`FnHandler`] from an async body over a cloned job.
#[macro_export]
macro_rules! job_handler {
    ($job_type:expr, |$job:ident| $body:expr) => {
        $crate::FnHandler::new($job_type, |$job: &$crate::Job| {
            let $job = $job.clone();
            Box::pin(async move {
                let result: $crate::HandlerResult = $body;
                result
            }) as $crate::HandlerFuture
        })
    };
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    fn job(job_type: &str) -> Job {
        Job {
            item_id: ItemId::new("1"),
            queue: QueueName::new("default"),
            job_type: job_type.to_string(),
            payload: serde_json::json!({ "n": 2 }),
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_job_type() {
        let mut registry = JobHandlerRegistry::new();
        registry.register(crate::job_handler!("double", |job| {
            match job.payload["n"].as_i64() {
                Some(2) => Ok(()),
                other => Err(format!("unexpected payload {other:?}")),
            }
        }));
        registry.register(FnHandler::new("fail", |_job: &Job| {
            Box::pin(async { Err("boom".to_string()) }) as HandlerFuture
        }));

        assert!(registry.has_handler("double"));
        assert!(!registry.has_handler("missing"));
        let mut types = registry.job_types();
        types.sort();
        assert_eq!(types, vec!["double", "fail"]);

        let double = registry.get("double").expect("double handler");
        assert_eq!(double.handle(&job("double")).await, Ok(()));

        let fail = registry.get("fail").expect("fail handler");
        assert_eq!(fail.handle(&job("fail")).await, Err("boom".to_string()));
    }
}
