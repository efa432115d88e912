//! Backing store contract consumed by a lease.
//!
//! A lease never talks SQL itself. It drives an open transaction, sends a
//! keep-alive statement over the connection, and hands the connection back
//! to the pool once it is done.

use std::future::Future;

/// An open transaction holding the row lock on a queue record.
pub trait StoreTransaction: Send + 'static {
    /// Store-level failure, surfaced unchanged to the consumer.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Make the dequeue permanent.
    fn commit(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Undo the dequeue so the item becomes visible again.
    fn rollback(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Free the transaction. Rolls back if it is still open.
    fn dispose(&mut self);
}

/// A live database session bound to one lease.
pub trait StoreConnection: Send + 'static {
    type Transaction: StoreTransaction;

    /// Execute a statement inside `transaction`, returning affected rows.
    fn execute(
        &mut self,
        query: &str,
        transaction: &mut Self::Transaction,
    ) -> impl Future<Output = Result<u64, <Self::Transaction as StoreTransaction>::Error>> + Send;
}

/// The pool that lent the connection out.
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: StoreConnection;

    /// Whether something outside the lease already keeps this connection warm.
    fn is_externally_monitored(&self, connection: &Self::Connection) -> bool;

    /// Take the connection back, either to reuse or to close it.
    fn release_connection(&self, connection: Self::Connection);
}

/// Transaction type used by connections of pool `P`.
pub type TransactionOf<P> =
    <<P as ConnectionPool>::Connection as StoreConnection>::Transaction;

/// Error type returned by the backing store behind pool `P`.
pub type StoreErrorOf<P> = <TransactionOf<P> as StoreTransaction>::Error;
