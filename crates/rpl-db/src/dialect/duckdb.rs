//! DuckDB dialect: the dialect `rpl migrate` executes.
//!
//! Foreign keys are not declared (DuckDB cannot alter or delete from tables
//! with constraints the way the ledger needs) and identity values are
//! computed by the insert statements. DuckDB only allows a plain
//! `ADD COLUMN` on a table with indexes; other alters rebuild the table.

use super::{default_sql, SqlDialect};
use rpl_core::{ColumnDef, ColumnType, DefaultValue, TableName, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDbDialect;

impl SqlDialect for DuckDbDialect {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn column_type(&self, ty: &ColumnType) -> String {
        match ty {
            ColumnType::Bool => "BOOLEAN".to_string(),
            ColumnType::SmallInt => "SMALLINT".to_string(),
            ColumnType::Int => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Decimal { precision, scale } => format!("DECIMAL({precision},{scale})"),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::Varchar(n) => format!("VARCHAR({n})"),
            ColumnType::Text => "VARCHAR".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::Blob => "BLOB".to_string(),
        }
    }

    fn native_foreign_keys(&self) -> bool {
        false
    }

    fn identity_clause(&self) -> Option<&'static str> {
        None
    }

    fn rebuilds_indexed_tables(&self) -> bool {
        true
    }

    /// DuckDB rejects constraints in `ADD COLUMN`, so NOT NULL is set
    /// afterwards. Existing rows get `fill` explicitly when the default is
    /// an expression.
    fn add_column(&self, table: &TableName, column: &ColumnDef, fill: &Value) -> Vec<String> {
        let table_sql = self.quote(table);
        let column_sql = self.quote(&column.name);
        let mut head = format!(
            "ALTER TABLE {table_sql} ADD COLUMN {column_sql} {}",
            self.column_type(&column.ty)
        );
        let mut out = Vec::new();
        match &column.default {
            Some(DefaultValue::Literal(_)) | None => {
                if let Some(default) = &column.default {
                    head.push_str(" DEFAULT ");
                    head.push_str(&default_sql(self, default));
                }
                out.push(head);
            }
            Some(expression) => {
                out.push(head);
                if !fill.is_null() {
                    out.push(format!(
                        "UPDATE {table_sql} SET {column_sql} = {}",
                        self.literal(fill)
                    ));
                }
                out.push(format!(
                    "ALTER TABLE {table_sql} ALTER COLUMN {column_sql} SET DEFAULT {}",
                    default_sql(self, expression)
                ));
            }
        }
        if !column.nullable {
            out.push(format!(
                "ALTER TABLE {table_sql} ALTER COLUMN {column_sql} SET NOT NULL"
            ));
        }
        out
    }
}
