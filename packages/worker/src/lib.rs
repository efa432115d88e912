//! Consumers for leased queue items.
//!
//! # Architecture
//!
//! - `JobHandlerRegistry` - Maps job types to handlers
//! - `Worker` - Fetches a job under a lease, runs its handler, then
//!   acknowledges or requeues and always releases the lease
//!
//! # Usage
//!
//! ```ignore
//! use worker::{JobHandlerRegistry, Worker, WorkerConfig, job_handler};
//!
//! let mut handlers = JobHandlerRegistry::new();
//! handlers.register(job_handler!("echo", |job| Ok(())));
//!
//! let worker = Worker::new("worker-1", pool, Arc::new(handlers), WorkerConfig::default());
//! worker.process_next("default").await?;
//! ```

mod config;
mod handler;
mod worker;

pub use config::WorkerConfig;
pub use handler::{FnHandler, HandlerFuture, HandlerResult, Job, JobHandler, JobHandlerRegistry};
pub use worker::{Outcome, Worker, WorkerError};
