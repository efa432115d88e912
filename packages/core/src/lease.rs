//! The leased item handle and its keep-alive heartbeat.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::store::{ConnectionPool, StoreConnection, StoreErrorOf, StoreTransaction, TransactionOf};
use crate::{ItemId, LeaseConfig, LeaseError, QueueName};

/// Connection and transaction of a lease. Only touched while the lease lock is held.
struct LeaseState<C: StoreConnection> {
    connection: Option<C>,
    transaction: C::Transaction,
    /// Set by the one teardown that disposed the transaction and returned the connection.
    released: bool,
}

type SharedState<P> = Arc<Mutex<LeaseState<<P as ConnectionPool>::Connection>>>;

/// A queue item dequeued inside an open transaction.
///
/// The row stays locked until the consumer calls [`acknowledge`](Self::acknowledge)
/// or [`requeue`](Self::requeue), and the connection goes back to the pool on
/// [`release`](Self::release). While the lease is open a background task sends
/// a keep-alive statement so proxies and poolers don't drop the idle session.
///
/// Acknowledge, requeue, release and the keep-alive tick all take the same
/// lock, so a tick can never run against a connection that is being torn down.
pub struct LeasedItem<P: ConnectionPool> {
    item_id: ItemId,
    queue: QueueName,
    pool: Arc<P>,
    state: SharedState<P>,
    keep_alive: Option<AbortHandle>,
    released: AtomicBool,
}

/// Collects the parts of a lease before it starts.
pub struct LeaseBuilder<P: ConnectionPool> {
    pool: Option<Arc<P>>,
    connection: Option<P::Connection>,
    transaction: Option<TransactionOf<P>>,
    item_id: Option<ItemId>,
    queue: Option<QueueName>,
    config: LeaseConfig,
}

impl<P: ConnectionPool> Default for LeaseBuilder<P> {
    fn default() -> Self {
        Self {
            pool: None,
            connection: None,
            transaction: None,
            item_id: None,
            queue: None,
            config: LeaseConfig::default(),
        }
    }
}

impl<P: ConnectionPool> LeaseBuilder<P> {
    /// Set the pool that lent the connection. It gets the connection back on release.
    pub fn pool(mut self, pool: Arc<P>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set the connection the item was fetched on.
    pub fn connection(mut self, connection: P::Connection) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Set the open transaction that holds the item's row lock.
    pub fn transaction(mut self, transaction: TransactionOf<P>) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// Set the id of the leased item. Must not be empty.
    pub fn item_id(mut self, item_id: impl Into<ItemId>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    /// Set the queue the item was fetched from. Must not be empty.
    pub fn queue(mut self, queue: impl Into<QueueName>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Set the keep-alive settings (default: [`LeaseConfig::default`]).
    pub fn config(mut self, config: LeaseConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the parts and open the lease.
    ///
    /// Unless the pool already keeps the connection alive, this spawns the
    /// keep-alive task on the current tokio runtime. Its first tick comes one
    /// full period after the lease starts.
    ///
    /// On any error the transaction is disposed and the connection goes back
    /// to the pool, as far as both were given.
    pub fn start(self) -> Result<LeasedItem<P>, LeaseError> {
        let LeaseBuilder {
            pool,
            connection,
            transaction,
            item_id,
            queue,
            config,
        } = self;
        let item_id = item_id.filter(|id| !id.is_empty());
        let queue = queue.filter(|queue| !queue.is_empty());

        let (pool, connection, transaction, item_id, queue) =
            match (pool, connection, transaction, item_id, queue) {
                (Some(pool), Some(connection), Some(transaction), Some(item_id), Some(queue)) => {
                    (pool, connection, transaction, item_id, queue)
                }
                (pool, connection, transaction, item_id, _) => {
                    let missing = if pool.is_none() {
                        "pool"
                    } else if connection.is_none() {
                        "connection"
                    } else if transaction.is_none() {
                        "transaction"
                    } else if item_id.is_none() {
                        "item_id"
                    } else {
                        "queue"
                    };
                    hand_back(pool.as_deref(), connection, transaction);
                    return Err(LeaseError::MissingArgument(missing));
                }
            };

        if let Err(e) = config.validate() {
            hand_back(Some(pool.as_ref()), Some(connection), Some(transaction));
            return Err(e);
        }

        let runtime = if pool.is_externally_monitored(&connection) {
            None
        } else {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => Some(runtime),
                Err(_) => {
                    hand_back(Some(pool.as_ref()), Some(connection), Some(transaction));
                    return Err(LeaseError::NoRuntime);
                }
            }
        };

        let state = Arc::new(Mutex::new(LeaseState {
            connection: Some(connection),
            transaction,
            released: false,
        }));

        let keep_alive = runtime.map(|runtime| {
            let period = config.keep_alive_interval();
            let task = runtime.spawn(keep_alive_loop(
                Arc::clone(&state),
                Instant::now() + period,
                period,
                config.keep_alive_query.clone(),
                item_id.clone(),
            ));
            task.abort_handle()
        });

        tracing::debug!(
            item_id = %item_id,
            queue = %queue,
            keep_alive = keep_alive.is_some(),
            "Lease opened"
        );

        Ok(LeasedItem {
            item_id,
            queue,
            pool,
            state,
            keep_alive,
            released: AtomicBool::new(false),
        })
    }
}

impl<P: ConnectionPool> LeasedItem<P> {
    pub fn builder() -> LeaseBuilder<P> {
        LeaseBuilder::default()
    }

    /// Open a lease with the default keep-alive settings.
    pub fn new(
        pool: Arc<P>,
        connection: P::Connection,
        transaction: TransactionOf<P>,
        item_id: impl Into<ItemId>,
        queue: impl Into<QueueName>,
    ) -> Result<Self, LeaseError> {
        Self::builder()
            .pool(pool)
            .connection(connection)
            .transaction(transaction)
            .item_id(item_id)
            .queue(queue)
            .start()
    }

    pub fn item_id(&self) -> &ItemId {
        &self.item_id
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Whether this lease runs its own keep-alive task.
    pub fn has_keep_alive(&self) -> bool {
        self.keep_alive.is_some()
    }

    /// Commit the transaction, removing the item from the queue for good.
    ///
    /// Call at most once. A second call goes straight to the transaction,
    /// which normally refuses it.
    pub async fn acknowledge(&self) -> Result<(), StoreErrorOf<P>> {
        let mut state = self.state.lock().await;
        state.transaction.commit().await?;
        tracing::debug!(item_id = %self.item_id, queue = %self.queue, "Leased item acknowledged");
        Ok(())
    }

    /// Roll the transaction back so other consumers can fetch the item again.
    pub async fn requeue(&self) -> Result<(), StoreErrorOf<P>> {
        let mut state = self.state.lock().await;
        state.transaction.rollback().await?;
        tracing::debug!(item_id = %self.item_id, queue = %self.queue, "Leased item requeued");
        Ok(())
    }

    /// Stop the keep-alive, dispose the transaction and return the connection.
    ///
    /// Only the first call does anything, and every call waits for a running
    /// keep-alive tick. Once this returns no tick will touch the connection
    /// again. Dropping the future before it returns leaves the lease open.
    pub async fn release(&self) {
        let mut state = self.state.lock().await;
        if state.released {
            return;
        }

        teardown(self.pool.as_ref(), &mut state, self.keep_alive.as_ref());
        self.released.store(true, Ordering::Release);
        tracing::debug!(item_id = %self.item_id, queue = %self.queue, "Lease released");
    }
}

impl<P: ConnectionPool> Drop for LeasedItem<P> {
    fn drop(&mut self) {
        if self.is_released() {
            return;
        }

        tracing::warn!(
            item_id = %self.item_id,
            queue = %self.queue,
            "Lease dropped without release, releasing now"
        );

        let keep_alive = self.keep_alive.take();
        if let Ok(mut state) = self.state.try_lock() {
            teardown(self.pool.as_ref(), &mut state, keep_alive.as_ref());
            return;
        }

        // A tick still holds the lock; finish once it lets go.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let pool = Arc::clone(&self.pool);
                let state = Arc::clone(&self.state);
                runtime.spawn(async move {
                    let mut state = state.lock().await;
                    teardown(pool.as_ref(), &mut state, keep_alive.as_ref());
                });
            }
            Err(_) => tracing::warn!(
                item_id = %self.item_id,
                "No runtime to finish release, connection dropped with the lease"
            ),
        }
    }
}

impl<P: ConnectionPool> std::fmt::Debug for LeasedItem<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeasedItem")
            .field("item_id", &self.item_id)
            .field("queue", &self.queue)
            .field("keep_alive", &self.keep_alive.is_some())
            .field("released", &self.is_released())
            .finish()
    }
}

/// Dispose the transaction and return the connection, once. Runs under the lease lock.
fn teardown<P: ConnectionPool>(
    pool: &P,
    state: &mut LeaseState<P::Connection>,
    keep_alive: Option<&AbortHandle>,
) {
    if state.released {
        return;
    }
    if let Some(keep_alive) = keep_alive {
        keep_alive.abort();
    }
    state.transaction.dispose();
    if let Some(connection) = state.connection.take() {
        pool.release_connection(connection);
    }
    state.released = true;
}

/// Give back whatever parts a lease that failed to start was handed.
fn hand_back<P: ConnectionPool>(
    pool: Option<&P>,
    connection: Option<P::Connection>,
    transaction: Option<TransactionOf<P>>,
) {
    if let Some(mut transaction) = transaction {
        transaction.dispose();
    }
    if let (Some(pool), Some(connection)) = (pool, connection) {
        pool.release_connection(connection);
    }
}

async fn keep_alive_loop<C: StoreConnection>(
    state: Arc<Mutex<LeaseState<C>>>,
    first_tick: Instant,
    period: Duration,
    query: String,
    item_id: ItemId,
) {
    let mut ticker = tokio::time::interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        keep_alive_tick(&state, &query, &item_id).await;
    }
}

/// Send one keep-alive statement if the lease still has its connection.
///
/// Returns whether a statement was attempted. Failures are dropped: a dead
/// connection only means the item will be delivered again later.
async fn keep_alive_tick<C: StoreConnection>(
    state: &Mutex<LeaseState<C>>,
    query: &str,
    item_id: &ItemId,
) -> bool {
    let mut guard = state.lock().await;
    let LeaseState {
        connection,
        transaction,
        ..
    } = &mut *guard;

    let Some(connection) = connection.as_mut() else {
        return false;
    };

    match connection.execute(query, transaction).await {
        Ok(_) => tracing::trace!(item_id = %item_id, "Keep-alive sent"),
        Err(e) => tracing::debug!(item_id = %item_id, error = %e, "Keep-alive failed"),
    }
    true
}
