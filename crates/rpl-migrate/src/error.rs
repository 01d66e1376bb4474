//! Error types for rpl-migrate

use rpl_core::{ApplyError, CoreError, UnitError};
use rpl_db::DbError;
use thiserror::Error;

/// Errors raised while applying the ledger to a database.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Another run holds the migration lock (MG001)
    #[error("[MG001] Migration lock is held by {owner} since {acquired_at}")]
    LockHeld { owner: String, acquired_at: String },

    /// An applied unit was edited after it was applied (MG002)
    #[error("[MG002] Checksum mismatch for applied unit {id}: history has {recorded}, ledger has {current}")]
    ChecksumMismatch {
        id: String,
        recorded: String,
        current: String,
    },

    /// The history names a unit the ledger does not contain (MG003)
    #[error("[MG003] Applied unit {id} is not in the ledger")]
    UnknownAppliedUnit { id: String },

    /// A transition that would break ledger order (MG004)
    #[error("[MG004] Out of order: {detail}")]
    OutOfOrder { detail: String },

    /// A unit ran longer than the configured limit and was rolled back (MG005)
    #[error("[MG005] Unit {unit} exceeded the {limit_secs}s timeout and was rolled back")]
    UnitTimeout { unit: String, limit_secs: u64 },

    /// An operation was rejected; the unit was rolled back (MG006)
    #[error("[MG006] {0}")]
    Unit(#[from] UnitError),

    /// A statement of a unit failed in the database (MG007)
    #[error("[MG007] Unit {unit} failed at operation #{index}: {source}")]
    Statement {
        unit: String,
        index: usize,
        #[source]
        source: DbError,
    },

    /// The history table holds rows that cannot be read (MG008)
    #[error("[MG008] Corrupt migration history: {0}")]
    CorruptHistory(String),

    /// Database error outside a unit (MG009)
    #[error("[MG009] {0}")]
    Db(#[from] DbError),

    /// Ledger or configuration error (MG010)
    #[error("[MG010] {0}")]
    Core(#[from] CoreError),

    /// A reference data set does not fit the schema (MG011)
    #[error("[MG011] Reference data for '{table}' rejected: {source}")]
    Seed {
        table: String,
        #[source]
        source: ApplyError,
    },
}

/// Result type alias for MigrateError
pub type MigrateResult<T> = Result<T, MigrateError>;
