//! rpl-db - Database layer for the Regularizador Polizas schema ledger
//!
//! This crate provides the `Database` trait, its DuckDB implementation, and
//! the SQL dialects that turn ledger operations into statements.

pub mod dialect;
pub mod duckdb;
pub mod error;
pub mod traits;

pub use dialect::{
    dialect_for, key_filter, render_operation, render_unit, restrict_probes, DuckDbDialect, MySqlDialect,
    PostgresDialect, RestrictProbe, SqlDialect,
};
pub use duckdb::DuckDbBackend;
pub use error::{DbError, DbResult};
pub use traits::Database;
