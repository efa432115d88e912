//! Queue table, sessions and transactions held in memory.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use lease_core::ItemId;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{ConnectionId, StoreConfig, StoreError, TransactionId};

/// Counters describing the current state of the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Rows visible to fetchers.
    pub pending: u64,
    /// Rows locked by an open transaction.
    pub in_progress: u64,
    pub keep_alive_queries: u64,
    pub connections_opened: u64,
    pub connections_closed: u64,
    /// Sessions cut for being idle too long.
    pub connections_severed: u64,
}

/// A row claimed by a transaction.
#[derive(Debug, Clone)]
pub(crate) struct ClaimedRow {
    pub id: u64,
    pub job_type: String,
    pub payload: serde_json::Value,
}

#[derive(Debug)]
struct QueueRow {
    queue: String,
    job_type: String,
    payload: serde_json::Value,
    fetched_at: Option<DateTime<Utc>>,
    locked_by: Option<TransactionId>,
}

#[derive(Debug)]
struct Session {
    last_active: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxStatus {
    Open,
    Committed,
    RolledBack,
}

#[derive(Debug)]
struct TxRecord {
    connection: ConnectionId,
    status: TxStatus,
    claimed: Vec<u64>,
}

#[derive(Debug, Default)]
struct Tables {
    next_row: u64,
    rows: BTreeMap<u64, QueueRow>,
    sessions: HashMap<ConnectionId, Session>,
    transactions: HashMap<TransactionId, TxRecord>,
    stats: StoreStats,
}

impl Tables {
    /// Undo the claims of an open transaction.
    fn revert(&mut self, tx_id: TransactionId) {
        let Some(tx) = self.transactions.get_mut(&tx_id) else {
            return;
        };
        if tx.status != TxStatus::Open {
            return;
        }
        tx.status = TxStatus::RolledBack;
        for row_id in tx.claimed.drain(..) {
            if let Some(row) = self.rows.get_mut(&row_id) {
                row.fetched_at = None;
                row.locked_by = None;
            }
        }
    }

    fn close_session(&mut self, connection: ConnectionId) {
        if self.sessions.remove(&connection).is_none() {
            return;
        }
        let open: Vec<TransactionId> = self
            .transactions
            .iter()
            .filter(|(_, tx)| tx.connection == connection && tx.status == TxStatus::Open)
            .map(|(id, _)| *id)
            .collect();
        for tx_id in open {
            self.revert(tx_id);
        }
    }

    fn sever(&mut self, connection: ConnectionId) {
        tracing::info!(connection = %connection, "Idle session cut");
        self.close_session(connection);
        self.stats.connections_severed += 1;
    }

    fn is_idle(&self, session: &Session, now: Instant, config: &StoreConfig) -> bool {
        config
            .idle_timeout()
            .is_some_and(|timeout| now.duration_since(session.last_active) > timeout)
    }

    /// Mark the session active, or fail if it is gone or has idled out.
    fn touch(&mut self, connection: ConnectionId, config: &StoreConfig) -> Result<(), StoreError> {
        let now = Instant::now();
        let idle = match self.sessions.get(&connection) {
            Some(session) => self.is_idle(session, now, config),
            None => return Err(StoreError::ConnectionClosed(connection)),
        };
        if idle {
            self.sever(connection);
            return Err(StoreError::ConnectionClosed(connection));
        }
        if let Some(session) = self.sessions.get_mut(&connection) {
            session.last_active = now;
        }
        Ok(())
    }

    fn open_tx(
        &mut self,
        connection: ConnectionId,
        tx_id: TransactionId,
    ) -> Result<&mut TxRecord, StoreError> {
        match self.transactions.get_mut(&tx_id) {
            Some(tx) if tx.status == TxStatus::Open && tx.connection == connection => Ok(tx),
            _ => Err(StoreError::TransactionCompleted(tx_id)),
        }
    }
}

struct StoreInner {
    config: StoreConfig,
    tables: Mutex<Tables>,
}

/// A queue table with row-level locking, shared by every session.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                tables: Mutex::new(Tables::default()),
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.inner
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a job to a queue and return its item id.
    pub fn enqueue(
        &self,
        queue: &str,
        job_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<ItemId, StoreError> {
        if queue.is_empty() {
            return Err(StoreError::EmptyQueueName);
        }
        let mut tables = self.tables();
        tables.next_row += 1;
        let id = tables.next_row;
        tables.rows.insert(
            id,
            QueueRow {
                queue: queue.to_string(),
                job_type: job_type.into(),
                payload,
                fetched_at: None,
                locked_by: None,
            },
        );
        tracing::debug!(item_id = id, queue, "Job enqueued");
        Ok(ItemId::new(id.to_string()))
    }

    /// Whether the item is still in the queue table, locked or not.
    pub fn contains(&self, item_id: &ItemId) -> bool {
        item_id
            .as_str()
            .parse::<u64>()
            .is_ok_and(|id| self.tables().rows.contains_key(&id))
    }

    /// When the item was claimed by a fetcher, if it is currently claimed.
    pub fn fetched_at(&self, item_id: &ItemId) -> Option<DateTime<Utc>> {
        let id = item_id.as_str().parse::<u64>().ok()?;
        self.tables().rows.get(&id).and_then(|row| row.fetched_at)
    }

    pub fn stats(&self) -> StoreStats {
        let tables = self.tables();
        let in_progress = tables
            .rows
            .values()
            .filter(|row| row.locked_by.is_some())
            .count() as u64;
        StoreStats {
            pending: tables.rows.len() as u64 - in_progress,
            in_progress,
            ..tables.stats.clone()
        }
    }

    /// Cut every session that has been idle longer than the configured timeout.
    ///
    /// Returns the number of sessions cut.
    pub fn reap_idle_connections(&self) -> usize {
        let now = Instant::now();
        let config = &self.inner.config;
        let mut tables = self.tables();
        let idle: Vec<ConnectionId> = tables
            .sessions
            .iter()
            .filter(|(_, session)| tables.is_idle(session, now, config))
            .map(|(id, _)| *id)
            .collect();
        for connection in &idle {
            tables.sever(*connection);
        }
        idle.len()
    }

    pub(crate) fn open_session(&self) -> ConnectionId {
        let id = ConnectionId::new();
        let mut tables = self.tables();
        tables.sessions.insert(
            id,
            Session {
                last_active: Instant::now(),
            },
        );
        tables.stats.connections_opened += 1;
        id
    }

    pub(crate) fn is_open(&self, connection: ConnectionId) -> bool {
        self.tables().sessions.contains_key(&connection)
    }

    pub(crate) fn close_session(&self, connection: ConnectionId) {
        let mut tables = self.tables();
        if tables.sessions.contains_key(&connection) {
            tables.close_session(connection);
            tables.stats.connections_closed += 1;
        }
    }

    pub(crate) fn begin(&self, connection: ConnectionId) -> Result<TransactionId, StoreError> {
        let mut tables = self.tables();
        tables.touch(connection, &self.inner.config)?;
        let id = TransactionId::new();
        tables.transactions.insert(
            id,
            TxRecord {
                connection,
                status: TxStatus::Open,
                claimed: Vec::new(),
            },
        );
        Ok(id)
    }

    /// Lock the oldest unlocked row of `queue` for the transaction.
    pub(crate) fn claim_next(
        &self,
        connection: ConnectionId,
        tx_id: TransactionId,
        queue: &str,
    ) -> Result<Option<ClaimedRow>, StoreError> {
        let mut tables = self.tables();
        tables.touch(connection, &self.inner.config)?;
        tables.open_tx(connection, tx_id)?;

        let Some((&id, row)) = tables
            .rows
            .iter_mut()
            .find(|(_, row)| row.queue == queue && row.locked_by.is_none())
        else {
            return Ok(None);
        };
        row.locked_by = Some(tx_id);
        row.fetched_at = Some(Utc::now());
        let claimed = ClaimedRow {
            id,
            job_type: row.job_type.clone(),
            payload: row.payload.clone(),
        };

        tables.open_tx(connection, tx_id)?.claimed.push(id);
        Ok(Some(claimed))
    }

    pub(crate) fn execute(
        &self,
        connection: ConnectionId,
        tx_id: TransactionId,
        query: &str,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables();
        tables.touch(connection, &self.inner.config)?;
        tables.open_tx(connection, tx_id)?;
        if !is_select_literal(query) {
            return Err(StoreError::UnsupportedQuery(query.to_string()));
        }
        tables.stats.keep_alive_queries += 1;
        Ok(1)
    }

    pub(crate) fn commit(
        &self,
        connection: ConnectionId,
        tx_id: TransactionId,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables();
        tables.touch(connection, &self.inner.config)?;
        let tx = tables.open_tx(connection, tx_id)?;
        tx.status = TxStatus::Committed;
        let claimed = std::mem::take(&mut tx.claimed);
        for row_id in claimed {
            tables.rows.remove(&row_id);
        }
        Ok(())
    }

    pub(crate) fn rollback(
        &self,
        connection: ConnectionId,
        tx_id: TransactionId,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables();
        tables.touch(connection, &self.inner.config)?;
        tables.open_tx(connection, tx_id)?;
        tables.revert(tx_id);
        Ok(())
    }

    /// Forget the transaction, rolling it back first if still open.
    pub(crate) fn dispose(&self, tx_id: TransactionId) {
        let mut tables = self.tables();
        tables.revert(tx_id);
        tables.transactions.remove(&tx_id);
    }
}

/// Accepts `SELECT <integer>` with an optional trailing semicolon.
fn is_select_literal(query: &str) -> bool {
    let query = query.trim().trim_end_matches(';').trim_end();
    let mut parts = query.split_whitespace();
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(keyword), Some(value), None)
            if keyword.eq_ignore_ascii_case("select") && value.parse::<i64>().is_ok()
    )
}
