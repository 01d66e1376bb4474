//! Declarative schema models: the target of `rpl make`.
//!
//! A model file lists tables in the same shape as `create_table` operations
//! plus their seed rows:
//!
//! ```yaml
//! tables:
//!   - name: Currencies
//!     columns:
//!       - { name: Id, type: int, identity: true }
//!       - { name: Codigo, type: varchar(3) }
//!     primary_key: [Id]
//!     rows:
//!       - { Id: 1, Codigo: UYU }
//! ```

use crate::error::{CoreError, CoreResult};
use crate::loader::read_file;
use crate::names::ColumnName;
use crate::operation::Operation;
use crate::state::{ApplyContext, Row, SchemaState};
use crate::table::TableSchema;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One table of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTable {
    #[serde(flatten)]
    pub schema: TableSchema,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Row>,
}

/// A complete target schema.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaModel {
    #[serde(default)]
    pub tables: Vec<ModelTable>,
}

impl SchemaModel {
    /// Load a model from a YAML file
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = read_file(path)?;
        serde_yaml::from_str(&content).map_err(|e| CoreError::InvalidModel {
            message: format!("{}: {}", path.display(), e),
        })
    }

    /// Snapshot a state as a model (rows in key order).
    pub fn from_state(state: &SchemaState) -> Self {
        let tables = state
            .tables()
            .map(|t| ModelTable {
                schema: t.schema.clone(),
                rows: t.sorted_rows().into_iter().cloned().collect(),
            })
            .collect();
        Self { tables }
    }

    /// Build the schema state the model describes.
    ///
    /// Tables are created and filled first, foreign keys are added last, so
    /// tables may be listed in any order. Row values go through the same
    /// coercion and constraint checks as `insert_data`.
    pub fn into_state(&self, ctx: &ApplyContext) -> CoreResult<SchemaState> {
        let mut ops = Vec::new();
        let mut foreign_keys = Vec::new();
        for table in &self.tables {
            let schema = &table.schema;
            ops.push(Operation::CreateTable(TableSchema {
                foreign_keys: Vec::new(),
                ..schema.clone()
            }));
            push_inserts(table, &mut ops);
            for fk in &schema.foreign_keys {
                foreign_keys.push(Operation::AddForeignKey {
                    table: schema.name.clone(),
                    foreign_key: fk.clone(),
                });
            }
        }
        ops.extend(foreign_keys);

        let mut state = SchemaState::new();
        state
            .apply_ops(&ops, ctx)
            .map_err(|e| CoreError::InvalidModel {
                message: e.source.to_string(),
            })?;
        Ok(state)
    }
}

/// One `insert_data` per run of rows that name the same columns.
fn push_inserts(table: &ModelTable, ops: &mut Vec<Operation>) {
    let mut current: Option<(Vec<ColumnName>, Vec<Vec<Value>>)> = None;
    for row in &table.rows {
        let columns: Vec<ColumnName> = row.keys().cloned().collect();
        let values = row.values().cloned().collect();
        match &mut current {
            Some((cols, rows)) if *cols == columns => rows.push(values),
            _ => {
                if let Some((columns, rows)) = current.take() {
                    ops.push(insert(table, columns, rows));
                }
                current = Some((columns, vec![values]));
            }
        }
    }
    if let Some((columns, rows)) = current {
        ops.push(insert(table, columns, rows));
    }
}

fn insert(table: &ModelTable, columns: Vec<ColumnName>, rows: Vec<Vec<Value>>) -> Operation {
    Operation::InsertData {
        table: table.schema.name.clone(),
        columns,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::parse_timestamp;
    use tempfile::TempDir;

    const MODEL: &str = r#"
tables:
  - name: Polizas
    columns:
      - { name: Id, type: int, identity: true }
      - { name: Clinro, type: int }
      - { name: Observaciones, type: varchar(100), nullable: true }
    primary_key: [Id]
    foreign_keys:
      - name: FK_Polizas_Clients_Clinro
        columns: [Clinro]
        references_table: Clients
        references_columns: [Id]
    rows:
      - { Id: 1, Clinro: 7 }
  - name: Clients
    columns:
      - { name: Id, type: int, identity: true }
      - { name: Nombre, type: varchar(100) }
    primary_key: [Id]
    rows:
      - { Id: 7, Nombre: Ana }
      - { Id: 8, Nombre: Bruno }
"#;

    fn ctx() -> ApplyContext {
        ApplyContext::at(parse_timestamp("2024-06-01 00:00:00").unwrap())
    }

    #[test]
    fn test_model_into_state_any_table_order() {
        let model: SchemaModel = serde_yaml::from_str(MODEL).unwrap();
        let state = model.into_state(&ctx()).unwrap();
        assert_eq!(state.row_count("Clients"), 2);
        assert_eq!(state.row_count("Polizas"), 1);
        let polizas = state.table("Polizas").unwrap();
        assert_eq!(polizas.schema.foreign_keys.len(), 1);
        assert_eq!(
            polizas.rows[0].get("Observaciones"),
            Some(&Value::Null)
        );
    }

    #[test]
    fn test_model_orphan_is_invalid() {
        let yaml = MODEL.replace("{ Id: 1, Clinro: 7 }", "{ Id: 1, Clinro: 99 }");
        let model: SchemaModel = serde_yaml::from_str(&yaml).unwrap();
        let err = model.into_state(&ctx()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidModel { .. }));
        assert!(err.to_string().contains("A006"), "{err}");
    }

    #[test]
    fn test_state_snapshot_round_trips() {
        let model: SchemaModel = serde_yaml::from_str(MODEL).unwrap();
        let state = model.into_state(&ctx()).unwrap();
        let again = SchemaModel::from_state(&state).into_state(&ctx()).unwrap();
        assert!(state.same_as(&again), "{:?}", state.differences(&again));
    }

    #[test]
    fn test_load_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("target.yml");
        std::fs::write(&path, "tables: 3\n").unwrap();
        let err = SchemaModel::load(&path).unwrap_err();
        assert!(err.to_string().contains("target.yml"), "{err}");
    }
}
