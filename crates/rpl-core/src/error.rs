//! Error types for rpl-core

use crate::unit::{Direction, MigrationId};
use thiserror::Error;

/// Errors raised while applying a single operation to a schema.
///
/// Every variant is fatal to the unit being applied: the unit is rolled back
/// as a whole and stays in its previous state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApplyError {
    /// A001: The operation conflicts with the existing schema
    #[error("[A001] Schema conflict on '{table}': {detail}")]
    SchemaConflict { table: String, detail: String },

    /// A002: Referenced table does not exist
    #[error("[A002] Unknown table '{table}'")]
    UnknownTable { table: String },

    /// A003: Referenced column does not exist
    #[error("[A003] Unknown column '{table}.{column}'")]
    UnknownColumn { table: String, column: String },

    /// A004: Column cannot be altered to the requested shape
    #[error("[A004] Incompatible alter of '{table}.{column}': {detail}")]
    IncompatibleAlter {
        table: String,
        column: String,
        detail: String,
    },

    /// A005: Existing or inserted rows violate a primary key or unique index
    #[error("[A005] Uniqueness violation on '{table}' ({constraint}): duplicate key {key}")]
    UniquenessViolation {
        table: String,
        constraint: String,
        key: String,
    },

    /// A006: A foreign key value has no matching target row
    #[error("[A006] Orphaned reference in '{table}' ({constraint}): key {key} has no row in '{target}'")]
    OrphanedReference {
        table: String,
        constraint: String,
        target: String,
        key: String,
    },

    /// A007: UpdateData/DeleteData targets a key that does not exist
    #[error("[A007] Row not found in '{table}': key {key}")]
    RowNotFound { table: String, key: String },

    /// A008: An index with this name already exists somewhere in the schema
    #[error("[A008] Duplicate index name '{name}' (already defined on '{table}')")]
    DuplicateIndexName { name: String, table: String },

    /// A009: DropIndex names an index that does not exist
    #[error("[A009] Unknown index '{name}' on '{table}'")]
    UnknownIndex { table: String, name: String },

    /// A010: DropForeignKey names a constraint that does not exist
    #[error("[A010] Unknown foreign key '{name}' on '{table}'")]
    UnknownForeignKey { table: String, name: String },

    /// A011: Row-level constraint (NOT NULL, key immutability, on-delete restrict)
    #[error("[A011] Constraint violation on '{table}': {detail}")]
    ConstraintViolation { table: String, detail: String },

    /// A012: A literal value cannot be coerced to the column type
    #[error("[A012] Value {value} is not valid for '{table}.{column}' ({expected})")]
    TypeMismatch {
        table: String,
        column: String,
        value: String,
        expected: String,
    },
}

impl ApplyError {
    /// Stable error code (e.g. `A005`) for reporting.
    pub fn code(&self) -> &'static str {
        match self {
            ApplyError::SchemaConflict { .. } => "A001",
            ApplyError::UnknownTable { .. } => "A002",
            ApplyError::UnknownColumn { .. } => "A003",
            ApplyError::IncompatibleAlter { .. } => "A004",
            ApplyError::UniquenessViolation { .. } => "A005",
            ApplyError::OrphanedReference { .. } => "A006",
            ApplyError::RowNotFound { .. } => "A007",
            ApplyError::DuplicateIndexName { .. } => "A008",
            ApplyError::UnknownIndex { .. } => "A009",
            ApplyError::UnknownForeignKey { .. } => "A010",
            ApplyError::ConstraintViolation { .. } => "A011",
            ApplyError::TypeMismatch { .. } => "A012",
        }
    }

    /// The table the error is about.
    pub fn table(&self) -> &str {
        match self {
            ApplyError::SchemaConflict { table, .. }
            | ApplyError::UnknownTable { table }
            | ApplyError::UnknownColumn { table, .. }
            | ApplyError::IncompatibleAlter { table, .. }
            | ApplyError::UniquenessViolation { table, .. }
            | ApplyError::OrphanedReference { table, .. }
            | ApplyError::RowNotFound { table, .. }
            | ApplyError::DuplicateIndexName { table, .. }
            | ApplyError::UnknownIndex { table, .. }
            | ApplyError::UnknownForeignKey { table, .. }
            | ApplyError::ConstraintViolation { table, .. }
            | ApplyError::TypeMismatch { table, .. } => table,
        }
    }
}

/// An [`ApplyError`] located at a position within an operation list.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("operation #{index} ({kind}) failed: {source}")]
pub struct OperationError {
    /// Zero-based position of the failing operation
    pub index: usize,
    /// Operation kind (e.g. `add_column`)
    pub kind: &'static str,
    /// The underlying failure
    pub source: ApplyError,
}

/// An [`OperationError`] attributed to a migration unit and direction.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("unit {unit} ({direction}): {source}")]
pub struct UnitError {
    /// The unit being applied
    pub unit: MigrationId,
    /// Whether the Up or Down list was being applied
    pub direction: Direction,
    /// The failing operation
    pub source: OperationError,
}

/// Core error type for rpl
#[derive(Error, Debug)]
pub enum CoreError {
    /// E001: Configuration file not found
    #[error("[E001] Config file not found: {path}")]
    ConfigNotFound { path: String },

    /// E002: Invalid configuration value
    #[error("[E002] Invalid config: {message}")]
    ConfigInvalid { message: String },

    /// E003: Ledger directory not found
    #[error("[E003] Ledger directory not found: {path}")]
    LedgerNotFound { path: String },

    /// E004: A unit file could not be parsed
    #[error("[E004] Failed to parse unit file {path}: {details}")]
    UnitParseError { path: String, details: String },

    /// E005: Unit file name does not match the id it declares
    #[error("[E005] Unit file {path} declares id '{id}' (file name must be '{id}.yml')")]
    UnitIdMismatch { path: String, id: String },

    /// E006: Invalid migration id
    #[error("[E006] Invalid migration id '{id}': expected <YYYYMMDDHHMMSS>_<Name>")]
    InvalidMigrationId { id: String },

    /// E007: Two units share an id
    #[error("[E007] Duplicate migration id '{id}'")]
    DuplicateUnit { id: String },

    /// E008: Units are not in strictly increasing id order
    #[error("[E008] Ledger out of order: '{later}' is listed after '{earlier}'")]
    LedgerOutOfOrder { earlier: String, later: String },

    /// E009: Unit index outside the ledger
    #[error("[E009] Unit index {index} is outside the ledger ({len} units)")]
    UnitIndexOutOfRange { index: usize, len: usize },

    /// E010: Replaying the ledger failed
    #[error("[E010] Ledger replay failed: {0}")]
    Replay(#[from] UnitError),

    /// E011: A schema model file is invalid
    #[error("[E011] Invalid schema model: {message}")]
    InvalidModel { message: String },

    /// E012: The diff between two schemas cannot be expressed as operations
    #[error("[E012] Unsupported schema change on '{table}': {reason}")]
    UnsupportedDiff { table: String, reason: String },

    /// E013: IO error
    #[error("[E013] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// E014: IO error with file path context
    #[error("[E014] Failed to read '{path}': {source}")]
    IoWithPath {
        path: String,
        source: std::io::Error,
    },

    /// E015: YAML parse error
    #[error("[E015] YAML error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// E016: JSON serialization/deserialization error
    #[error("[E016] JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// E017: A unit id that is not part of the ledger
    #[error("[E017] Unit '{id}' is not in the ledger")]
    UnknownUnit { id: String },

    /// E018: A reference data file could not be parsed
    #[error("[E018] Failed to parse reference data {path}: {details}")]
    ReferenceParseError { path: String, details: String },
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;
