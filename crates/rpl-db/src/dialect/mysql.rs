//! MySQL dialect (render only).

use super::{column_definition, SqlDialect};
use rpl_core::sql_utils::quote_ident_backtick;
use rpl_core::{ColumnDef, ColumnName, ColumnShape, ColumnType, TableName};

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote(&self, ident: &str) -> String {
        quote_ident_backtick(ident)
    }

    fn column_type(&self, ty: &ColumnType) -> String {
        match ty {
            ColumnType::Bool => "TINYINT(1)".to_string(),
            ColumnType::SmallInt => "SMALLINT".to_string(),
            ColumnType::Int => "INT".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Decimal { precision, scale } => format!("DECIMAL({precision},{scale})"),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::Varchar(n) => format!("VARCHAR({n})"),
            ColumnType::Text => "LONGTEXT".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::Timestamp => "DATETIME(6)".to_string(),
            ColumnType::Uuid => "CHAR(36)".to_string(),
            ColumnType::Blob => "LONGBLOB".to_string(),
        }
    }

    fn identity_clause(&self) -> Option<&'static str> {
        Some("AUTO_INCREMENT")
    }

    fn drop_index(&self, table: &TableName, name: &str) -> String {
        format!("DROP INDEX {} ON {}", self.quote(name), self.quote(table))
    }

    fn drop_foreign_key(&self, table: &TableName, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP FOREIGN KEY {}",
            self.quote(table),
            self.quote(name)
        )
    }

    /// MySQL restates the whole column.
    fn alter_column(&self, table: &TableName, column: &ColumnName, from: &ColumnShape, to: &ColumnShape) -> Vec<String> {
        if from == to {
            return Vec::new();
        }
        let def = ColumnDef {
            name: column.clone(),
            ty: to.ty,
            nullable: to.nullable,
            default: to.default.clone(),
            identity: false,
        };
        vec![format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            self.quote(table),
            column_definition(self, &def)
        )]
    }
}
