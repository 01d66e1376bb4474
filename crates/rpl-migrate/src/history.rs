//! The history table: one row per applied unit.

use crate::error::{MigrateError, MigrateResult};
use chrono::NaiveDateTime;
use rpl_core::sql_utils::{quote_ident, quote_string};
use rpl_core::value::{parse_timestamp, TIMESTAMP_FORMAT};
use rpl_core::{MigrationId, MigrationUnit};
use rpl_db::{Database, DbResult};

/// A history row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedUnit {
    pub id: String,
    pub checksum: String,
    pub applied_at: NaiveDateTime,
}

/// Access to the history table named in the configuration.
#[derive(Debug, Clone)]
pub(crate) struct History {
    name: String,
}

impl History {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub(crate) async fn ensure(&self, db: &dyn Database) -> DbResult<()> {
        db.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                 id         VARCHAR PRIMARY KEY,
                 checksum   VARCHAR NOT NULL,
                 applied_at TIMESTAMP NOT NULL
             )",
            quote_ident(&self.name)
        ))
        .await
    }

    /// Applied units ordered by id. A database that was never migrated has
    /// no history table and no applied units.
    pub(crate) async fn read(&self, db: &dyn Database) -> MigrateResult<Vec<AppliedUnit>> {
        if !db.relation_exists(&self.name).await? {
            return Ok(Vec::new());
        }
        let rows = db
            .query_rows(&format!(
                "SELECT id, checksum, CAST(applied_at AS VARCHAR) FROM {} ORDER BY id",
                quote_ident(&self.name)
            ))
            .await?;
        rows.into_iter()
            .map(|row| match row.as_slice() {
                [Some(id), Some(checksum), Some(at)] => {
                    let applied_at = parse_timestamp(at).ok_or_else(|| {
                        MigrateError::CorruptHistory(format!("{id}: unreadable applied_at '{at}'"))
                    })?;
                    Ok(AppliedUnit {
                        id: id.clone(),
                        checksum: checksum.clone(),
                        applied_at,
                    })
                }
                other => Err(MigrateError::CorruptHistory(format!(
                    "unexpected row {other:?}"
                ))),
            })
            .collect()
    }

    pub(crate) fn insert_sql(&self, unit: &MigrationUnit, at: NaiveDateTime) -> String {
        format!(
            "INSERT INTO {} (id, checksum, applied_at) VALUES ({}, {}, TIMESTAMP '{}')",
            quote_ident(&self.name),
            quote_string(unit.id.as_str()),
            quote_string(&unit.checksum()),
            at.format(TIMESTAMP_FORMAT)
        )
    }

    pub(crate) fn delete_sql(&self, id: &MigrationId) -> String {
        format!(
            "DELETE FROM {} WHERE id = {}",
            quote_ident(&self.name),
            quote_string(id.as_str())
        )
    }
}
