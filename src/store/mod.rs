//! Storage collaborator contract.
//!
//! The engine never holds a connection beyond one request: it calls
//! [`Store::acquire`], runs its reads, and drops the connection, which
//! returns it to the pool. Streaming exports hand the connection to a
//! [`RowStream`] cursor instead, so dropping the stream releases it.

pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::data::model::Row;
use crate::query::Query;

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Every pooled connection is checked out. Acquisition does not wait.
    #[error("connection pool exhausted ({size} connections in use)")]
    PoolExhausted { size: usize },

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("query failed: {0}")]
    Query(String),
}

/// Rows produced lazily by a cursor. The stream owns its connection.
pub type RowStream = BoxStream<'static, Result<Row, StorageError>>;

pub type PooledConnection = Box<dyn Connection>;

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Check a connection out of the pool, failing fast when saturated.
    async fn acquire(&self) -> Result<PooledConnection, StorageError>;
}

/// One checked-out connection. Dropping it returns it to the pool.
#[async_trait]
pub trait Connection: Send {
    async fn fetch_all(&mut self, query: &Query) -> Result<Vec<Row>, StorageError>;

    async fn fetch_one(&mut self, query: &Query) -> Result<Option<Row>, StorageError>;

    /// Turn the connection into a forward-only cursor over `query`'s rows.
    /// Dropping the stream before it ends abandons the remaining rows.
    fn into_rows(self: Box<Self>, query: Query) -> RowStream;
}
