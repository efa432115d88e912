//! Connection pool and transactional fetch.

use std::sync::{Arc, Mutex, PoisonError};

use lease_core::{ConnectionPool, LeaseConfig, LeasedItem, StoreTransaction};

use crate::{ConnectionId, MemoryConnection, MemoryStore, StoreError};

/// A job fetched under a row lock, together with its lease.
#[derive(Debug)]
pub struct FetchedJob {
    pub lease: LeasedItem<MemoryPool>,
    pub job_type: String,
    pub payload: serde_json::Value,
}

/// Hands out sessions on a [`MemoryStore`].
///
/// A pool may own one dedicated session that its owner keeps alive. Leases
/// taken on that session skip their own keep-alive, and releasing it puts
/// it back in the pool instead of closing it.
pub struct MemoryPool {
    store: MemoryStore,
    dedicated_id: Option<ConnectionId>,
    dedicated: Mutex<Option<MemoryConnection>>,
}

impl MemoryPool {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            dedicated_id: None,
            dedicated: Mutex::new(None),
        }
    }

    /// A pool that serves its dedicated session first.
    pub fn with_dedicated_connection(store: MemoryStore) -> Self {
        let connection = MemoryConnection::open(&store);
        Self {
            store,
            dedicated_id: Some(connection.id()),
            dedicated: Mutex::new(Some(connection)),
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Take the dedicated session if it is free and alive, else open a new one.
    pub fn acquire(&self) -> MemoryConnection {
        let dedicated = self
            .dedicated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match dedicated {
            Some(connection) if connection.is_open() => connection,
            _ => MemoryConnection::open(&self.store),
        }
    }

    /// Claim the oldest free job of `queue` inside a new transaction.
    ///
    /// Returns `None` when every row of the queue is taken. The returned lease
    /// keeps the row locked until it is acknowledged, requeued or released.
    pub fn fetch(
        self: &Arc<Self>,
        queue: &str,
        config: &LeaseConfig,
    ) -> Result<Option<FetchedJob>, StoreError> {
        if queue.is_empty() {
            return Err(StoreError::EmptyQueueName);
        }
        self.store.reap_idle_connections();

        let mut connection = self.acquire();
        let mut transaction = connection.begin()?;

        let Some(row) = connection.claim_next(&transaction, queue)? else {
            transaction.dispose();
            self.release_connection(connection);
            return Ok(None);
        };

        let lease = LeasedItem::<MemoryPool>::builder()
            .pool(Arc::clone(self))
            .connection(connection)
            .transaction(transaction)
            .item_id(row.id.to_string())
            .queue(queue)
            .config(config.clone())
            .start()?;

        tracing::info!(item_id = %lease.item_id(), queue, job_type = %row.job_type, "Job fetched");

        Ok(Some(FetchedJob {
            lease,
            job_type: row.job_type,
            payload: row.payload,
        }))
    }
}

impl ConnectionPool for MemoryPool {
    type Connection = MemoryConnection;

    fn is_externally_monitored(&self, connection: &MemoryConnection) -> bool {
        self.dedicated_id == Some(connection.id())
    }

    fn release_connection(&self, connection: MemoryConnection) {
        if self.is_externally_monitored(&connection) && connection.is_open() {
            *self
                .dedicated
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(connection);
            return;
        }
        tracing::debug!(connection = %connection.id(), "Connection closed");
        drop(connection);
    }
}
