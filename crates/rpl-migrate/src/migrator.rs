//! Applying ledger units to a database.
//!
//! Every unit runs in its own transaction together with its history row.
//! Before anything is executed the unit is replayed in memory on top of the
//! applied prefix, so structural errors never reach the database.

use crate::checks::{self, CheckFailure};
use crate::error::{MigrateError, MigrateResult};
use crate::history::{AppliedUnit, History};
use crate::lock::{self, LockHolder, MigrationLock};
use chrono::{NaiveDateTime, Utc};
use rpl_core::{
    key_of, ApplyContext, ApplyError, Config, CoreResult, Direction, Ledger, MigrationId, MigrationUnit, Operation,
    OperationError, ReferenceSet, RowUpdate, SchemaState, TableName, UnitError, Value,
};
use rpl_db::{dialect_for, key_filter, render_operation, Database, SqlDialect};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Table names and limits used by a [`Migrator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratorSettings {
    pub history_table: String,
    pub lock_table: String,
    /// Longest a single unit may run before it is rolled back
    pub unit_timeout: Option<Duration>,
}

impl Default for MigratorSettings {
    fn default() -> Self {
        let config = Config::builtin();
        Self {
            history_table: config.history_table,
            lock_table: config.lock_table,
            unit_timeout: None,
        }
    }
}

impl MigratorSettings {
    /// Settings from the project configuration, with target overrides.
    pub fn from_config(config: &Config, target: Option<&str>) -> CoreResult<Self> {
        Ok(Self {
            history_table: config.history_table.clone(),
            lock_table: config.lock_table.clone(),
            unit_timeout: config
                .get_unit_timeout(target)?
                .map(Duration::from_secs),
        })
    }
}

/// Whether a unit has been applied to the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Applied,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Pending => write!(f, "Pending"),
            UnitState::Applied => write!(f, "Applied"),
        }
    }
}

/// Status of one ledger unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitStatus {
    pub id: MigrationId,
    pub state: UnitState,
    pub applied_at: Option<NaiveDateTime>,
    /// `false` when the unit was edited after it was applied
    pub checksum_matches: bool,
}

/// Result of [`Migrator::status`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusReport {
    pub units: Vec<UnitStatus>,
    /// History rows naming units the ledger does not contain
    pub unknown: Vec<AppliedUnit>,
}

impl StatusReport {
    pub fn applied_count(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.state == UnitState::Applied)
            .count()
    }
}

/// How far `rollback` goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackTarget {
    /// The last N applied units
    Steps(usize),
    /// Every unit after this one; the unit itself stays applied
    To(String),
    /// Every applied unit
    All,
}

/// Rows written for one reference set by [`Migrator::seed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub table: TableName,
    pub inserted: usize,
    pub updated: usize,
}

/// Applies a ledger to one database.
pub struct Migrator {
    db: Arc<dyn Database>,
    ledger: Ledger,
    settings: MigratorSettings,
    dialect: Box<dyn SqlDialect>,
    history: History,
}

impl Migrator {
    /// A migrator for a DuckDB database.
    pub fn new(db: Arc<dyn Database>, ledger: Ledger, settings: MigratorSettings) -> Self {
        let history = History::new(&settings.history_table);
        Self {
            db,
            ledger,
            settings,
            dialect: dialect_for(rpl_core::Dialect::DuckDb),
            history,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Pending/applied state of every unit. Takes no lock and never fails on
    /// drifted checksums; they are reported instead.
    pub async fn status(&self) -> MigrateResult<StatusReport> {
        let applied = self.history.read(self.db.as_ref()).await?;
        let mut by_id: HashMap<&str, &AppliedUnit> =
            applied.iter().map(|a| (a.id.as_str(), a)).collect();

        let units = self
            .ledger
            .units()
            .iter()
            .map(|unit| match by_id.remove(unit.id.as_str()) {
                Some(entry) => UnitStatus {
                    id: unit.id.clone(),
                    state: UnitState::Applied,
                    applied_at: Some(entry.applied_at),
                    checksum_matches: entry.checksum == unit.checksum(),
                },
                None => UnitStatus {
                    id: unit.id.clone(),
                    state: UnitState::Pending,
                    applied_at: None,
                    checksum_matches: true,
                },
            })
            .collect();
        let mut unknown: Vec<AppliedUnit> = by_id.into_values().cloned().collect();
        unknown.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(StatusReport { units, unknown })
    }

    /// Apply pending units in order, all of them or up to and including
    /// `to`. Returns the applied ids.
    pub async fn migrate(&self, to: Option<&str>) -> MigrateResult<Vec<MigrationId>> {
        let lock = MigrationLock::acquire(self.db.as_ref(), &self.settings.lock_table).await?;
        let result = self.migrate_locked(to).await;
        self.release(lock).await;
        result
    }

    /// Roll back applied units, last first. Returns the reverted ids.
    pub async fn rollback(&self, target: RollbackTarget) -> MigrateResult<Vec<MigrationId>> {
        let lock = MigrationLock::acquire(self.db.as_ref(), &self.settings.lock_table).await?;
        let result = self.rollback_locked(target).await;
        self.release(lock).await;
        result
    }

    /// The run holding the migration lock, if any.
    pub async fn lock_holder(&self) -> MigrateResult<Option<LockHolder>> {
        Ok(lock::holder(self.db.as_ref(), &self.settings.lock_table).await?)
    }

    /// Remove a lock left behind by a crashed run.
    pub async fn unlock(&self) -> MigrateResult<Option<LockHolder>> {
        Ok(lock::force_unlock(self.db.as_ref(), &self.settings.lock_table).await?)
    }

    /// Upsert reference data sets on top of the applied schema, all in one
    /// transaction.
    pub async fn seed(&self, sets: &[ReferenceSet]) -> MigrateResult<Vec<SeedReport>> {
        let lock = MigrationLock::acquire(self.db.as_ref(), &self.settings.lock_table).await?;
        let result = self.seed_locked(sets).await;
        self.release(lock).await;
        result
    }

    async fn release(&self, lock: MigrationLock) {
        if let Err(e) = lock.release(self.db.as_ref()).await {
            log::warn!("Failed to release the migration lock: {e}");
        }
    }

    async fn migrate_locked(&self, to: Option<&str>) -> MigrateResult<Vec<MigrationId>> {
        self.history.ensure(self.db.as_ref()).await?;
        let applied = self.verified_prefix().await?;
        let end = match to {
            None => self.ledger.len(),
            Some(id) => {
                let position = self.ledger.require_position(id)?;
                if position < applied {
                    return Err(MigrateError::OutOfOrder {
                        detail: format!("{id} is already applied; use rollback to go back"),
                    });
                }
                position + 1
            }
        };
        if applied == end {
            log::info!("Database is up to date");
            return Ok(Vec::new());
        }

        let mut state = self.ledger.replay(applied)?;
        let mut done = Vec::new();
        for unit in &self.ledger.units()[applied..end] {
            self.run_unit(unit, Direction::Up, &mut state).await?;
            done.push(unit.id.clone());
        }
        Ok(done)
    }

    async fn rollback_locked(&self, target: RollbackTarget) -> MigrateResult<Vec<MigrationId>> {
        self.history.ensure(self.db.as_ref()).await?;
        let applied = self.verified_prefix().await?;
        let count = match target {
            RollbackTarget::All => applied,
            RollbackTarget::Steps(n) if n > applied => {
                return Err(MigrateError::OutOfOrder {
                    detail: format!("cannot roll back {n} units, only {applied} applied"),
                });
            }
            RollbackTarget::Steps(n) => n,
            RollbackTarget::To(id) => {
                let position = self.ledger.require_position(&id)?;
                if position >= applied {
                    return Err(MigrateError::OutOfOrder {
                        detail: format!("{id} is not applied"),
                    });
                }
                applied - position - 1
            }
        };
        if count == 0 {
            log::info!("Nothing to roll back");
            return Ok(Vec::new());
        }

        let mut state = self.ledger.replay(applied)?;
        let mut done = Vec::new();
        for unit in self.ledger.units()[applied - count..applied].iter().rev() {
            self.run_unit(unit, Direction::Down, &mut state).await?;
            done.push(unit.id.clone());
        }
        Ok(done)
    }

    /// Number of applied units, after checking that the history is a prefix
    /// of the ledger with unchanged checksums.
    async fn verified_prefix(&self) -> MigrateResult<usize> {
        let applied = self.history.read(self.db.as_ref()).await?;
        for (index, entry) in applied.iter().enumerate() {
            let Some(position) = self.ledger.position(&entry.id) else {
                return Err(MigrateError::UnknownAppliedUnit {
                    id: entry.id.clone(),
                });
            };
            if position != index {
                return Err(MigrateError::OutOfOrder {
                    detail: format!(
                        "{} is applied but the earlier unit {} is not",
                        entry.id,
                        self.ledger.units()[index].id
                    ),
                });
            }
            let current = self.ledger.units()[position].checksum();
            if entry.checksum != current {
                return Err(MigrateError::ChecksumMismatch {
                    id: entry.id.clone(),
                    recorded: entry.checksum.clone(),
                    current,
                });
            }
        }
        Ok(applied.len())
    }

    /// Apply one direction of a unit in a transaction. `state` is the schema
    /// before the unit and is advanced only when the unit commits.
    async fn run_unit(&self, unit: &MigrationUnit, direction: Direction, state: &mut SchemaState) -> MigrateResult<()> {
        let mut after = state.clone();
        after.apply_unit(unit, direction)?;
        if direction == Direction::Down {
            for lossy in &unit.lossy_down {
                log::warn!(
                    "{}: rolling back does not restore {}.{} exactly",
                    unit.id,
                    lossy.table,
                    lossy.column
                );
            }
        }

        log::info!("Applying {} ({direction})", unit.id);
        let started = Instant::now();
        self.db.begin().await?;
        match self.execute_unit(unit, direction, state, started).await {
            Ok(()) => {
                if let Err(e) = self.db.commit().await {
                    self.rollback_quietly(unit).await;
                    return Err(e.into());
                }
            }
            Err(e) => {
                self.rollback_quietly(unit).await;
                return Err(e);
            }
        }
        *state = after;
        Ok(())
    }

    async fn rollback_quietly(&self, unit: &MigrationUnit) {
        if let Err(e) = self.db.rollback().await {
            log::warn!("Rolling back {} failed: {e}", unit.id);
        }
    }

    async fn execute_unit(
        &self,
        unit: &MigrationUnit,
        direction: Direction,
        before: &SchemaState,
        started: Instant,
    ) -> MigrateResult<()> {
        let db = self.db.as_ref();
        let d = self.dialect.as_ref();
        let ctx = ApplyContext::for_unit(&unit.id);
        let mut working = before.clone();

        for (index, op) in unit.operations(direction).iter().enumerate() {
            let fail = |failure: CheckFailure| locate(unit, direction, index, op, failure);
            checks::before(db, d, op, &working).await.map_err(fail)?;

            let statements = render_operation(d, op, &working, &ctx)
                .map_err(|e| fail(CheckFailure::Db(e)))?;
            working
                .apply(op, &ctx)
                .map_err(|e| fail(CheckFailure::Violation(e)))?;
            for sql in &statements {
                log::debug!("{sql}");
                db.execute(sql)
                    .await
                    .map_err(|e| fail(CheckFailure::Db(e)))?;
                self.check_deadline(unit, started)?;
            }

            checks::after(db, d, op, &working).await.map_err(fail)?;
        }

        let record = match direction {
            Direction::Up => self.history.insert_sql(unit, Utc::now().naive_utc()),
            Direction::Down => self.history.delete_sql(&unit.id),
        };
        db.execute(&record).await?;
        self.check_deadline(unit, started)
    }

    fn check_deadline(&self, unit: &MigrationUnit, started: Instant) -> MigrateResult<()> {
        match self.settings.unit_timeout {
            Some(limit) if started.elapsed() > limit => Err(MigrateError::UnitTimeout {
                unit: unit.id.to_string(),
                limit_secs: limit.as_secs(),
            }),
            _ => Ok(()),
        }
    }

    async fn seed_locked(&self, sets: &[ReferenceSet]) -> MigrateResult<Vec<SeedReport>> {
        let applied = self.verified_prefix().await?;
        let state = self.ledger.replay(applied)?;
        let ctx = ApplyContext::at(Utc::now().naive_utc());

        self.db.begin().await?;
        let mut reports = Vec::new();
        for set in sets {
            match self.seed_set(set, &state, &ctx).await {
                Ok(report) => {
                    log::info!(
                        "{}: {} inserted, {} updated",
                        report.table,
                        report.inserted,
                        report.updated
                    );
                    reports.push(report);
                }
                Err(e) => {
                    if let Err(rb) = self.db.rollback().await {
                        log::warn!("Rolling back reference data failed: {rb}");
                    }
                    return Err(e);
                }
            }
        }
        if let Err(e) = self.db.commit().await {
            if let Err(rb) = self.db.rollback().await {
                log::warn!("Rolling back reference data failed: {rb}");
            }
            return Err(e.into());
        }
        Ok(reports)
    }

    async fn seed_set(&self, set: &ReferenceSet, state: &SchemaState, ctx: &ApplyContext) -> MigrateResult<SeedReport> {
        let db = self.db.as_ref();
        let d = self.dialect.as_ref();
        let rejected = |source: ApplyError| MigrateError::Seed {
            table: set.table.to_string(),
            source,
        };
        let schema = &state
            .table(&set.table)
            .ok_or_else(|| {
                rejected(ApplyError::UnknownTable {
                    table: set.table.to_string(),
                })
            })?
            .schema;

        let value_columns: Vec<_> = set
            .columns
            .iter()
            .filter(|c| !set.key.contains(c) && !schema.primary_key.contains(c))
            .cloned()
            .collect();
        let mut report = SeedReport {
            table: set.table.clone(),
            inserted: 0,
            updated: 0,
        };
        for row in &set.rows {
            if row.len() != set.columns.len() {
                return Err(rejected(ApplyError::ConstraintViolation {
                    table: set.table.to_string(),
                    detail: format!("row of {} values for {} columns", row.len(), set.columns.len()),
                }));
            }
            let named: rpl_core::Row = set.columns.iter().cloned().zip(row.iter().cloned()).collect();
            let key = key_of(&named, &set.key);
            let filter = key_filter(d, schema, &set.key, &[key.clone()])?;
            let exists = db
                .query_count(&format!("SELECT 1 FROM {} WHERE {filter}", d.quote(&set.table)))
                .await?
                > 0;

            let op = if exists {
                report.updated += 1;
                if value_columns.is_empty() {
                    continue;
                }
                Operation::UpdateData {
                    table: set.table.clone(),
                    key_columns: set.key.clone(),
                    columns: value_columns.clone(),
                    rows: vec![RowUpdate {
                        key,
                        values: key_of(&named, &value_columns),
                    }],
                }
            } else {
                report.inserted += 1;
                Operation::InsertData {
                    table: set.table.clone(),
                    columns: set.columns.clone(),
                    rows: vec![row.clone()],
                }
            };
            for sql in render_operation(d, &op, state, ctx)? {
                log::debug!("{sql}");
                db.execute(&sql).await?;
            }
        }

        let probe = Operation::InsertData {
            table: set.table.clone(),
            columns: Vec::new(),
            rows: Vec::<Vec<Value>>::new(),
        };
        match checks::after(db, d, &probe, state).await {
            Ok(()) => Ok(report),
            Err(CheckFailure::Violation(e)) => Err(rejected(e)),
            Err(CheckFailure::Db(e)) => Err(e.into()),
        }
    }
}

fn locate(unit: &MigrationUnit, direction: Direction, index: usize, op: &Operation, failure: CheckFailure) -> MigrateError {
    match failure {
        CheckFailure::Violation(source) => MigrateError::Unit(UnitError {
            unit: unit.id.clone(),
            direction,
            source: OperationError {
                index,
                kind: op.kind(),
                source,
            },
        }),
        CheckFailure::Db(source) => MigrateError::Statement {
            unit: unit.id.to_string(),
            index,
            source,
        },
    }
}

#[cfg(test)]
#[path = "migrator_test.rs"]
mod tests;
