//! Persistent view counters.
//!
//! The tracker needs exactly one capability from storage: execute a
//! parameterized increment and report how many rows it touched. Anything that
//! can do that is a [`CounterStore`]; adapters for Postgres and SQLite are
//! provided here.
//!
//! SQL identifiers cannot be bound as parameters, so the table name is only
//! ever spliced into a statement after it has been checked against the
//! allow-list fixed at adapter construction. The object id is always a bound
//! parameter.

use async_trait::async_trait;
use sqlx::{PgPool, SqlitePool};
use std::{collections::HashSet, sync::Arc};

/// Errors from a counter store.
#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    /// The table was not registered at adapter construction.
    #[error("table {0:?} is not an allowed view counter table")]
    TableNotAllowed(String),
    /// The underlying database call failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Storage capability for incrementing a named, persisted view counter.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the `view_count` of one object by 1, returning the number of
    /// rows affected (0 when no object with that id exists).
    async fn increment(&self, table: &str, object_id: i64) -> Result<u64, CounterError>;
}

#[async_trait]
impl<T: CounterStore + ?Sized> CounterStore for Arc<T> {
    async fn increment(&self, table: &str, object_id: i64) -> Result<u64, CounterError> {
        (**self).increment(table, object_id).await
    }
}

/// Postgres-backed view counters.
pub struct PgCounterStore {
    pool: PgPool,
    allowed_tables: HashSet<String>,
}

impl PgCounterStore {
    /// Create an adapter over a pool, with the set of tables whose counters
    /// may be incremented.
    pub fn new<I, S>(pool: PgPool, allowed_tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pool,
            allowed_tables: allowed_tables.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn increment(&self, table: &str, object_id: i64) -> Result<u64, CounterError> {
        if !self.allowed_tables.contains(table) {
            return Err(CounterError::TableNotAllowed(table.to_owned()));
        }
        let query = format!("UPDATE {table} SET view_count = view_count + 1 WHERE id = $1");
        let result = sqlx::query(&query).bind(object_id).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

/// SQLite-backed view counters.
pub struct SqliteCounterStore {
    pool: SqlitePool,
    allowed_tables: HashSet<String>,
}

impl SqliteCounterStore {
    /// Create an adapter over a pool, with the set of tables whose counters
    /// may be incremented.
    pub fn new<I, S>(pool: SqlitePool, allowed_tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pool,
            allowed_tables: allowed_tables.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn increment(&self, table: &str, object_id: i64) -> Result<u64, CounterError> {
        if !self.allowed_tables.contains(table) {
            return Err(CounterError::TableNotAllowed(table.to_owned()));
        }
        let query = format!("UPDATE {table} SET view_count = view_count + 1 WHERE id = ?1");
        let result = sqlx::query(&query).bind(object_id).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
