//! Table declarations: columns, primary key, foreign keys and indexes.

use crate::column::ColumnDef;
use crate::names::{ColumnName, TableName};
use serde::{Deserialize, Serialize};

/// What happens to referencing rows when a referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    /// Deletion is rejected while referencing rows exist
    #[default]
    Restrict,
    /// Referencing rows are deleted as well
    Cascade,
    /// Referencing columns are set to NULL
    SetNull,
}

impl std::fmt::Display for OnDelete {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OnDelete::Restrict => write!(f, "restrict"),
            OnDelete::Cascade => write!(f, "cascade"),
            OnDelete::SetNull => write!(f, "set_null"),
        }
    }
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    /// Constraint name (e.g. `FK_Polizas_Clients_Clinro`)
    pub name: String,

    /// Referencing columns in the owning table
    pub columns: Vec<ColumnName>,

    /// Referenced table
    pub references_table: TableName,

    /// Referenced columns, one per referencing column
    pub references_columns: Vec<ColumnName>,

    #[serde(default)]
    pub on_delete: OnDelete,
}

/// A secondary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name, unique across the whole schema
    pub name: String,

    pub columns: Vec<ColumnName>,

    #[serde(default)]
    pub unique: bool,
}

/// Structure of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: TableName,

    pub columns: Vec<ColumnDef>,

    pub primary_key: Vec<ColumnName>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyDef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDef>,
}

impl TableSchema {
    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnDef> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn foreign_key(&self, name: &str) -> Option<&ForeignKeyDef> {
        self.foreign_keys.iter().find(|fk| fk.name == name)
    }

    /// Returns `true` if `column` takes part in the primary key, a foreign
    /// key or an index of this table.
    pub fn column_is_referenced(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
            || self
                .foreign_keys
                .iter()
                .any(|fk| fk.columns.iter().any(|c| c == column))
            || self
                .indexes
                .iter()
                .any(|ix| ix.columns.iter().any(|c| c == column))
    }

    /// Compare two declarations structurally: column order and the order of
    /// constraint lists do not matter.
    pub fn same_structure(&self, other: &TableSchema) -> bool {
        if self.name != other.name
            || self.primary_key != other.primary_key
            || self.columns.len() != other.columns.len()
            || self.foreign_keys.len() != other.foreign_keys.len()
            || self.indexes.len() != other.indexes.len()
        {
            return false;
        }
        self.columns
            .iter()
            .all(|c| other.column(&c.name) == Some(c))
            && self
                .foreign_keys
                .iter()
                .all(|fk| other.foreign_key(&fk.name) == Some(fk))
            && self
                .indexes
                .iter()
                .all(|ix| other.index(&ix.name) == Some(ix))
    }

    /// Describe the first structural difference from `other`, if any.
    pub fn describe_difference(&self, other: &TableSchema) -> Option<String> {
        if self.same_structure(other) {
            return None;
        }
        if self.primary_key != other.primary_key {
            return Some(format!(
                "primary key ({}) vs ({})",
                join(&self.primary_key),
                join(&other.primary_key)
            ));
        }
        for col in &self.columns {
            match other.column(&col.name) {
                None => return Some(format!("column '{}' missing", col.name)),
                Some(o) if o != col => {
                    return Some(format!(
                        "column '{}' is {} (expected {})",
                        col.name,
                        o.shape(),
                        col.shape()
                    ))
                }
                Some(_) => {}
            }
        }
        if let Some(extra) = other.columns.iter().find(|c| !self.has_column(&c.name)) {
            return Some(format!("unexpected column '{}'", extra.name));
        }
        for fk in &self.foreign_keys {
            if other.foreign_key(&fk.name) != Some(fk) {
                return Some(format!("foreign key '{}' differs", fk.name));
            }
        }
        for ix in &self.indexes {
            if other.index(&ix.name) != Some(ix) {
                return Some(format!("index '{}' differs", ix.name));
            }
        }
        Some("constraint lists differ".to_string())
    }
}

fn join(names: &[ColumnName]) -> String {
    names
        .iter()
        .map(|n| n.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
