//! Strongly-typed table and column names.

use crate::newtype_string::define_identifier;

define_identifier! {
    /// Name of a table in the ledger's schema (e.g. `Polizas`).
    pub struct TableName;
}

define_identifier! {
    /// Name of a column within a table (e.g. `Clinro`).
    pub struct ColumnName;
}
