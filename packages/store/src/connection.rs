//! Sessions and transactions against the memory store.

use lease_core::{StoreConnection, StoreTransaction};

use crate::memory::{ClaimedRow, MemoryStore};
use crate::{ConnectionId, StoreError, TransactionId};

/// A session on the memory store. Dropping it closes the session.
pub struct MemoryConnection {
    id: ConnectionId,
    store: MemoryStore,
}

impl MemoryConnection {
    pub(crate) fn open(store: &MemoryStore) -> Self {
        let id = store.open_session();
        tracing::debug!(connection = %id, "Connection opened");
        Self {
            id,
            store: store.clone(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.store.is_open(self.id)
    }

    /// Start a transaction on this session.
    pub fn begin(&mut self) -> Result<MemoryTransaction, StoreError> {
        let id = self.store.begin(self.id)?;
        Ok(MemoryTransaction {
            id,
            connection: self.id,
            store: self.store.clone(),
            disposed: false,
        })
    }

    pub(crate) fn claim_next(
        &mut self,
        transaction: &MemoryTransaction,
        queue: &str,
    ) -> Result<Option<ClaimedRow>, StoreError> {
        self.store.claim_next(self.id, transaction.id, queue)
    }
}

impl StoreConnection for MemoryConnection {
    type Transaction = MemoryTransaction;

    async fn execute(
        &mut self,
        query: &str,
        transaction: &mut MemoryTransaction,
    ) -> Result<u64, StoreError> {
        self.store.execute(self.id, transaction.id, query)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.store.close_session(self.id);
    }
}

/// A transaction on a memory session. Dropping it rolls back if still open.
pub struct MemoryTransaction {
    id: TransactionId,
    connection: ConnectionId,
    store: MemoryStore,
    disposed: bool,
}

impl MemoryTransaction {
    pub fn id(&self) -> TransactionId {
        self.id
    }
}

impl StoreTransaction for MemoryTransaction {
    type Error = StoreError;

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.store.commit(self.connection, self.id)
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.store.rollback(self.connection, self.id)
    }

    fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.store.dispose(self.id);
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.dispose();
    }
}
