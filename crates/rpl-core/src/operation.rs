//! Schema and data operations, the building blocks of a migration unit.

use crate::column::{ColumnDef, ColumnShape};
use crate::names::{ColumnName, TableName};
use crate::table::{ForeignKeyDef, IndexDef, TableSchema};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// New values for one row of an `update_data` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowUpdate {
    /// Values of the key columns identifying the row
    pub key: Vec<Value>,
    /// New values, one per updated column
    pub values: Vec<Value>,
}

/// A single schema or data change.
///
/// Serialized with an `op` tag:
///
/// ```yaml
/// - op: add_column
///   table: Polizas
///   column: { name: Seccion, type: varchar(50), default: "" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create a table with its columns, keys and indexes.
    CreateTable(TableSchema),

    DropTable {
        table: TableName,
    },

    AddColumn {
        table: TableName,
        column: ColumnDef,
    },

    DropColumn {
        table: TableName,
        column: ColumnName,
    },

    /// Change type, nullability or default of a column. `from` records the
    /// shape the unit was written against so the operation can be checked
    /// and inverted without consulting the database.
    AlterColumn {
        table: TableName,
        column: ColumnName,
        to: ColumnShape,
        from: ColumnShape,
        /// Allow a narrowing change when every existing value fits
        #[serde(default)]
        coerce: bool,
    },

    RenameColumn {
        table: TableName,
        from: ColumnName,
        to: ColumnName,
    },

    CreateIndex {
        table: TableName,
        index: IndexDef,
    },

    DropIndex {
        table: TableName,
        name: String,
    },

    AddForeignKey {
        table: TableName,
        foreign_key: ForeignKeyDef,
    },

    DropForeignKey {
        table: TableName,
        name: String,
    },

    /// Insert rows; omitted columns take their default or identity value.
    InsertData {
        table: TableName,
        columns: Vec<ColumnName>,
        rows: Vec<Vec<Value>>,
    },

    /// Update rows identified by `key_columns`. Applying the same update
    /// twice leaves the table unchanged.
    UpdateData {
        table: TableName,
        key_columns: Vec<ColumnName>,
        columns: Vec<ColumnName>,
        rows: Vec<RowUpdate>,
    },

    DeleteData {
        table: TableName,
        key_columns: Vec<ColumnName>,
        keys: Vec<Vec<Value>>,
    },
}

impl Operation {
    /// The serialized tag of this operation (e.g. `add_column`).
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::CreateTable(_) => "create_table",
            Operation::DropTable { .. } => "drop_table",
            Operation::AddColumn { .. } => "add_column",
            Operation::DropColumn { .. } => "drop_column",
            Operation::AlterColumn { .. } => "alter_column",
            Operation::RenameColumn { .. } => "rename_column",
            Operation::CreateIndex { .. } => "create_index",
            Operation::DropIndex { .. } => "drop_index",
            Operation::AddForeignKey { .. } => "add_foreign_key",
            Operation::DropForeignKey { .. } => "drop_foreign_key",
            Operation::InsertData { .. } => "insert_data",
            Operation::UpdateData { .. } => "update_data",
            Operation::DeleteData { .. } => "delete_data",
        }
    }

    /// The table this operation acts on.
    pub fn table(&self) -> &TableName {
        match self {
            Operation::CreateTable(schema) => &schema.name,
            Operation::DropTable { table }
            | Operation::AddColumn { table, .. }
            | Operation::DropColumn { table, .. }
            | Operation::AlterColumn { table, .. }
            | Operation::RenameColumn { table, .. }
            | Operation::CreateIndex { table, .. }
            | Operation::DropIndex { table, .. }
            | Operation::AddForeignKey { table, .. }
            | Operation::DropForeignKey { table, .. }
            | Operation::InsertData { table, .. }
            | Operation::UpdateData { table, .. }
            | Operation::DeleteData { table, .. } => table,
        }
    }

    /// Returns `true` for operations that only touch rows.
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            Operation::InsertData { .. } | Operation::UpdateData { .. } | Operation::DeleteData { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnType;

    #[test]
    fn test_parse_alter_column() {
        let yaml = r#"
op: alter_column
table: Polizas
column: Observaciones
from: { type: varchar(100), nullable: true }
to: { type: varchar(1000), nullable: true }
"#;
        let op: Operation = serde_yaml::from_str(yaml).unwrap();
        match &op {
            Operation::AlterColumn { to, from, coerce, .. } => {
                assert_eq!(from.ty, ColumnType::Varchar(100));
                assert_eq!(to.ty, ColumnType::Varchar(1000));
                assert!(!coerce);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(op.kind(), "alter_column");
        assert_eq!(op.table(), "Polizas");
    }

    #[test]
    fn test_parse_create_table() {
        let yaml = r#"
op: create_table
name: Currencies
columns:
  - { name: Id, type: int, identity: true }
  - { name: Codigo, type: varchar(3) }
primary_key: [Id]
indexes:
  - { name: IX_Currencies_Codigo, columns: [Codigo], unique: true }
"#;
        let op: Operation = serde_yaml::from_str(yaml).unwrap();
        let Operation::CreateTable(schema) = op else {
            panic!("expected create_table");
        };
        assert_eq!(schema.columns.len(), 2);
        assert!(schema.indexes[0].unique);
        assert!(schema.foreign_keys.is_empty());
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        let yaml = "op: truncate_table\ntable: Polizas\n";
        assert!(serde_yaml::from_str::<Operation>(yaml).is_err());
    }

    #[test]
    fn test_data_ops() {
        let op = Operation::DeleteData {
            table: TableName::new("Companies"),
            key_columns: vec![ColumnName::new("Id")],
            keys: vec![vec![Value::Int(1)]],
        };
        assert!(op.is_data());
        assert_eq!(op.kind(), "delete_data");
    }
}
