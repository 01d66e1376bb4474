//! rpl-core - Core library for the Regularizador Polizas schema ledger
//!
//! This crate provides the declarative schema model (columns, tables, keys,
//! indexes, seed rows), the migration operations and units that make up the
//! ledger, an in-memory application engine that replays operations against a
//! [`SchemaState`], the ledger consistency checker, and the schema diff used
//! to generate new units.

pub mod checker;
pub mod checksum;
pub mod column;
pub mod config;
pub mod dag;
pub mod diff;
pub mod error;
pub mod ledger;
pub mod loader;
pub mod model;
mod newtype_string;
pub mod operation;
pub mod reference;
pub mod sql_utils;
pub mod state;
pub mod table;
pub mod unit;
pub mod value;

mod names;

pub use checker::{compute_schema_at, validate, Severity, ValidationError, ValidationKind};
pub use checksum::compute_checksum;
pub use column::{ColumnDef, ColumnShape, ColumnType, DefaultValue};
pub use config::{Config, DatabaseConfig, DbType, Dialect};
pub use dag::TableDag;
pub use error::{ApplyError, CoreError, CoreResult, OperationError, UnitError};
pub use ledger::Ledger;
pub use loader::{load_ledger_dir, load_unit, parse_unit, write_unit};
pub use model::SchemaModel;
pub use names::{ColumnName, TableName};
pub use operation::{Operation, RowUpdate};
pub use reference::{load_reference_dir, ReferenceSet};
pub use state::{evaluate_default, key_of, ApplyContext, Row, SchemaState, TableState};
pub use table::{ForeignKeyDef, IndexDef, OnDelete, TableSchema};
pub use unit::{Direction, LossyColumn, MigrationId, MigrationUnit};
pub use value::Value;
