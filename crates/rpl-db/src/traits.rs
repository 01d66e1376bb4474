//! Database trait definition

use crate::error::DbResult;
use async_trait::async_trait;

/// Database abstraction used by the migrator.
///
/// Implementations must be Send + Sync for async operation. A backend owns
/// a single connection, so `begin`/`commit`/`rollback` bracket everything
/// executed in between.
#[async_trait]
pub trait Database: Send + Sync {
    /// Execute SQL that modifies data, returns affected rows
    async fn execute(&self, sql: &str) -> DbResult<usize>;

    /// Execute multiple SQL statements
    async fn execute_batch(&self, sql: &str) -> DbResult<()>;

    /// Run a query and return every row. Values are read as text; `None` is
    /// SQL NULL. Queries should CAST non-text columns to VARCHAR.
    async fn query_rows(&self, sql: &str) -> DbResult<Vec<Vec<Option<String>>>>;

    /// Number of rows a query returns
    async fn query_count(&self, sql: &str) -> DbResult<usize>;

    /// Check if a table or view exists
    async fn relation_exists(&self, name: &str) -> DbResult<bool>;

    /// Start a transaction
    async fn begin(&self) -> DbResult<()>;

    /// Commit the open transaction
    async fn commit(&self) -> DbResult<()>;

    /// Roll back the open transaction
    async fn rollback(&self) -> DbResult<()>;

    /// Database type identifier for logging
    fn db_type(&self) -> &'static str;
}
