//! DuckDB database backend implementation

use crate::error::{DbError, DbResult};
use crate::traits::Database;
use async_trait::async_trait;
use duckdb::Connection;
use rpl_core::sql_utils::escape_sql_string;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// DuckDB database backend
pub struct DuckDbBackend {
    conn: Mutex<Connection>,
}

impl DuckDbBackend {
    /// Create a new in-memory DuckDB connection
    pub fn in_memory() -> DbResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create a new DuckDB connection from a file path
    pub fn from_path(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path).map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create from path string (handles :memory: special case)
    pub fn new(path: &str) -> DbResult<Self> {
        if path == ":memory:" {
            Self::in_memory()
        } else {
            Self::from_path(Path::new(path))
        }
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DbError::MutexPoisoned(e.to_string()))
    }

    /// Execute SQL synchronously
    fn execute_sync(&self, sql: &str) -> DbResult<usize> {
        let conn = self.lock()?;
        conn.execute(sql, [])
            .map_err(|e| DbError::ExecutionError(format!("{}: {}", e, sql)))
    }

    /// Execute batch SQL synchronously
    fn execute_batch_sync(&self, sql: &str) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql)
            .map_err(|e| DbError::ExecutionError(format!("{}: {}", e, sql)))
    }

    /// Query rows synchronously.
    ///
    /// Rows are collected through `query_map` before anything else is read
    /// from the statement.
    fn query_rows_sync(&self, sql: &str) -> DbResult<Vec<Vec<Option<String>>>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| DbError::ExecutionError(format!("{}: {}", e, sql)))?;
        let rows = stmt
            .query_map([], |row| {
                let col_count = row.as_ref().column_count();
                Ok((0..col_count).map(|i| column_as_string(row, i)).collect())
            })
            .map_err(|e| DbError::ExecutionError(format!("{}: {}", e, sql)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DbError::ExecutionError(format!("row error: {}", e)))?;
        Ok(rows)
    }

    /// Query count synchronously
    fn query_count_sync(&self, sql: &str) -> DbResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM ({})", sql), [], |row| {
                row.get(0)
            })
            .map_err(|e| DbError::ExecutionError(format!("{}: {}", e, sql)))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Check if relation exists synchronously
    fn relation_exists_sync(&self, name: &str) -> DbResult<bool> {
        let conn = self.lock()?;

        let (schema, table) = match name.rfind('.') {
            Some(pos) => (&name[..pos], &name[pos + 1..]),
            None => ("main", name),
        };

        let sql = format!(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = '{}' AND table_name = '{}'",
            escape_sql_string(schema),
            escape_sql_string(table)
        );

        let count: i64 = conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| DbError::ExecutionError(e.to_string()))?;

        Ok(count > 0)
    }

    fn transaction_sync(&self, statement: &str) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(statement)
            .map_err(|e| DbError::TransactionError(format!("{statement} failed: {e}")))
    }
}

/// Read a column as text. DuckDB integer columns return `None` for
/// `Option<String>`, so the numeric and boolean readers are tried as well.
fn column_as_string(row: &duckdb::Row<'_>, idx: usize) -> Option<String> {
    if let Ok(Some(s)) = row.get::<_, Option<String>>(idx) {
        return Some(s);
    }
    if let Ok(Some(n)) = row.get::<_, Option<i64>>(idx) {
        return Some(n.to_string());
    }
    if let Ok(Some(f)) = row.get::<_, Option<f64>>(idx) {
        return Some(f.to_string());
    }
    if let Ok(Some(b)) = row.get::<_, Option<bool>>(idx) {
        return Some(b.to_string());
    }
    None
}

#[async_trait]
impl Database for DuckDbBackend {
    async fn execute(&self, sql: &str) -> DbResult<usize> {
        self.execute_sync(sql)
    }

    async fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.execute_batch_sync(sql)
    }

    async fn query_rows(&self, sql: &str) -> DbResult<Vec<Vec<Option<String>>>> {
        self.query_rows_sync(sql)
    }

    async fn query_count(&self, sql: &str) -> DbResult<usize> {
        self.query_count_sync(sql)
    }

    async fn relation_exists(&self, name: &str) -> DbResult<bool> {
        self.relation_exists_sync(name)
    }

    async fn begin(&self) -> DbResult<()> {
        self.transaction_sync("BEGIN TRANSACTION")
    }

    async fn commit(&self) -> DbResult<()> {
        self.transaction_sync("COMMIT")
    }

    async fn rollback(&self) -> DbResult<()> {
        self.transaction_sync("ROLLBACK")
    }

    fn db_type(&self) -> &'static str {
        "duckdb"
    }
}

#[cfg(test)]
#[path = "duckdb_test.rs"]
mod tests;
