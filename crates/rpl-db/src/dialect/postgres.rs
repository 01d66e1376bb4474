//! PostgreSQL dialect (render only).

use super::SqlDialect;
use rpl_core::ColumnType;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn column_type(&self, ty: &ColumnType) -> String {
        match ty {
            ColumnType::Bool => "BOOLEAN".to_string(),
            ColumnType::SmallInt => "SMALLINT".to_string(),
            ColumnType::Int => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Decimal { precision, scale } => format!("NUMERIC({precision},{scale})"),
            ColumnType::Double => "DOUBLE PRECISION".to_string(),
            ColumnType::Varchar(n) => format!("VARCHAR({n})"),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::Uuid => "UUID".to_string(),
            ColumnType::Blob => "BYTEA".to_string(),
        }
    }

    fn identity_clause(&self) -> Option<&'static str> {
        Some("GENERATED BY DEFAULT AS IDENTITY")
    }
}
