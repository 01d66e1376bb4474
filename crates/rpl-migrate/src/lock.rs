//! The migration lock: a table holding at most one row.

use crate::error::{MigrateError, MigrateResult};
use chrono::Utc;
use rpl_core::sql_utils::{quote_ident, quote_string};
use rpl_core::value::TIMESTAMP_FORMAT;
use rpl_db::{Database, DbResult};
use uuid::Uuid;

/// The run currently holding the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub owner: String,
    pub acquired_at: String,
}

/// A held lock. Release it with [`MigrationLock::release`].
#[derive(Debug)]
pub(crate) struct MigrationLock {
    table: String,
    owner: Uuid,
}

async fn ensure_table(db: &dyn Database, table: &str) -> DbResult<()> {
    db.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
             id          INTEGER PRIMARY KEY,
             owner       VARCHAR NOT NULL,
             acquired_at TIMESTAMP NOT NULL
         )",
        quote_ident(table)
    ))
    .await
}

/// Current holder of the lock, if any.
pub(crate) async fn holder(db: &dyn Database, table: &str) -> DbResult<Option<LockHolder>> {
    if !db.relation_exists(table).await? {
        return Ok(None);
    }
    let rows = db
        .query_rows(&format!(
            "SELECT owner, CAST(acquired_at AS VARCHAR) FROM {} WHERE id = 1",
            quote_ident(table)
        ))
        .await?;
    Ok(rows.into_iter().next().map(|row| {
        let mut values = row.into_iter().map(Option::unwrap_or_default);
        LockHolder {
            owner: values.next().unwrap_or_default(),
            acquired_at: values.next().unwrap_or_default(),
        }
    }))
}

/// Remove the lock regardless of its owner. Returns the removed holder.
pub(crate) async fn force_unlock(db: &dyn Database, table: &str) -> DbResult<Option<LockHolder>> {
    let current = holder(db, table).await?;
    if current.is_some() {
        db.execute(&format!("DELETE FROM {}", quote_ident(table)))
            .await?;
    }
    Ok(current)
}

impl MigrationLock {
    /// Take the lock or fail with `LockHeld` naming the current holder.
    pub(crate) async fn acquire(db: &dyn Database, table: &str) -> MigrateResult<Self> {
        ensure_table(db, table).await?;
        if let Some(h) = holder(db, table).await? {
            return Err(MigrateError::LockHeld {
                owner: h.owner,
                acquired_at: h.acquired_at,
            });
        }

        let owner = Uuid::new_v4();
        let insert = format!(
            "INSERT INTO {} (id, owner, acquired_at) VALUES (1, {}, TIMESTAMP '{}')",
            quote_ident(table),
            quote_string(&owner.to_string()),
            Utc::now().naive_utc().format(TIMESTAMP_FORMAT)
        );
        if let Err(e) = db.execute(&insert).await {
            // Lost a race with another run
            return match holder(db, table).await? {
                Some(h) => Err(MigrateError::LockHeld {
                    owner: h.owner,
                    acquired_at: h.acquired_at,
                }),
                None => Err(e.into()),
            };
        }
        log::debug!("Acquired migration lock {owner}");
        Ok(Self {
            table: table.to_string(),
            owner,
        })
    }

    pub(crate) async fn release(self, db: &dyn Database) -> DbResult<()> {
        db.execute(&format!(
            "DELETE FROM {} WHERE id = 1 AND owner = {}",
            quote_ident(&self.table),
            quote_string(&self.owner.to_string())
        ))
        .await?;
        log::debug!("Released migration lock {}", self.owner);
        Ok(())
    }
}
