//! Schema diff: the operations that turn one schema state into another.
//!
//! `diff_schemas(from, to)` emits, in order:
//! 1. dropped or changed foreign keys and indexes of kept tables
//! 2. dropped tables (referencing tables first)
//! 3. deleted seed rows (referencing tables first)
//! 4. created tables (referenced tables first)
//! 5. added, altered and dropped columns of kept tables
//! 6. inserted and updated seed rows (referenced tables first)
//! 7. created indexes and foreign keys
//!
//! Renames cannot be told apart from a drop plus an add and are emitted as
//! such.

use crate::column::{ColumnDef, DefaultValue};
use crate::dag::TableDag;
use crate::error::{CoreError, CoreResult};
use crate::names::{ColumnName, TableName};
use crate::operation::{Operation, RowUpdate};
use crate::state::{key_of, ApplyContext, SchemaState, TableState};
use crate::table::{ForeignKeyDef, TableSchema};
use crate::unit::{MigrationId, MigrationUnit};
use crate::value::Value;
use std::collections::{BTreeMap, HashSet};

/// Compute the operations transforming `from` into `to`.
pub fn diff_schemas(from: &SchemaState, to: &SchemaState) -> CoreResult<Vec<Operation>> {
    let from_order = TableDag::from_state(from).children_first();
    let to_order = TableDag::from_state(to).parents_first();
    let kept: Vec<(&TableState, &TableState)> = to_order
        .iter()
        .filter_map(|name| Some((from.table(name)?, to.table(name)?)))
        .collect();

    let mut ops = Vec::new();

    // 1. constraints that go away or change
    for (old, new) in &kept {
        for fk in &old.schema.foreign_keys {
            if new.schema.foreign_key(&fk.name) != Some(fk) {
                ops.push(Operation::DropForeignKey {
                    table: old.name().clone(),
                    name: fk.name.clone(),
                });
            }
        }
    }
    for (old, new) in &kept {
        for index in &old.schema.indexes {
            if new.schema.index(&index.name) != Some(index) {
                ops.push(Operation::DropIndex {
                    table: old.name().clone(),
                    name: index.name.clone(),
                });
            }
        }
    }

    // 2. dropped tables
    for name in &from_order {
        if to.table(name).is_none() {
            ops.push(Operation::DropTable {
                table: name.clone(),
            });
        }
    }

    // 3. rows that disappear from kept tables
    for name in &from_order {
        let (Some(old), Some(new)) = (from.table(name), to.table(name)) else {
            continue;
        };
        if old.schema.primary_key != new.schema.primary_key {
            return Err(unsupported(name, "primary key changes are not supported"));
        }
        let pk = &old.schema.primary_key;
        let keys: Vec<Vec<Value>> = old
            .sorted_rows()
            .into_iter()
            .map(|r| key_of(r, pk))
            .filter(|key| new.find_row(pk, key).is_none())
            .collect();
        if !keys.is_empty() {
            ops.push(Operation::DeleteData {
                table: name.clone(),
                key_columns: pk.clone(),
                keys,
            });
        }
    }

    // 4. created tables; foreign keys to tables that are not settled yet are
    // added at the end
    let mut created: HashSet<&TableName> = HashSet::new();
    let mut deferred_fks: Vec<(TableName, ForeignKeyDef)> = Vec::new();
    for name in &to_order {
        if from.table(name).is_some() {
            continue;
        }
        let Some(new) = to.table(name) else {
            continue;
        };
        let mut schema = TableSchema {
            foreign_keys: Vec::new(),
            ..new.schema.clone()
        };
        for fk in &new.schema.foreign_keys {
            let target = &fk.references_table;
            let settled = target == name
                || created.contains(target)
                || target_unchanged(from, to, fk);
            if settled {
                schema.foreign_keys.push(fk.clone());
            } else {
                deferred_fks.push((name.clone(), fk.clone()));
            }
        }
        ops.push(Operation::CreateTable(schema));
        created.insert(name);
    }

    // 5. columns of kept tables
    for (old, new) in &kept {
        column_ops(old, new, &mut ops)?;
    }

    // 6. seed rows
    for name in &to_order {
        let Some(new) = to.table(name) else {
            continue;
        };
        row_ops(from.table(name), new, &mut ops);
    }

    // 7. constraints that are new or changed
    for (old, new) in &kept {
        for index in &new.schema.indexes {
            if old.schema.index(&index.name) != Some(index) {
                ops.push(Operation::CreateIndex {
                    table: new.name().clone(),
                    index: index.clone(),
                });
            }
        }
    }
    for (old, new) in &kept {
        for fk in &new.schema.foreign_keys {
            if old.schema.foreign_key(&fk.name) != Some(fk) {
                ops.push(Operation::AddForeignKey {
                    table: new.name().clone(),
                    foreign_key: fk.clone(),
                });
            }
        }
    }
    for (table, foreign_key) in deferred_fks {
        ops.push(Operation::AddForeignKey { table, foreign_key });
    }

    Ok(ops)
}

/// Returns `true` if the target of `fk` exists in `from` with the referenced
/// columns declared exactly as in `to`.
fn target_unchanged(from: &SchemaState, to: &SchemaState, fk: &ForeignKeyDef) -> bool {
    let (Some(old), Some(new)) = (from.table(&fk.references_table), to.table(&fk.references_table)) else {
        return false;
    };
    fk.references_columns
        .iter()
        .all(|c| old.schema.column(c).is_some() && old.schema.column(c) == new.schema.column(c))
        && old.schema.primary_key == new.schema.primary_key
}

fn unsupported(table: &str, reason: impl Into<String>) -> CoreError {
    CoreError::UnsupportedDiff {
        table: table.to_string(),
        reason: reason.into(),
    }
}

fn column_ops(old: &TableState, new: &TableState, ops: &mut Vec<Operation>) -> CoreResult<()> {
    let table = new.name();
    for col in &new.schema.columns {
        match old.schema.column(&col.name) {
            None => {
                if col.identity {
                    return Err(unsupported(
                        table,
                        format!("identity column '{}' cannot be added to an existing table", col.name),
                    ));
                }
                ops.push(Operation::AddColumn {
                    table: table.clone(),
                    column: col.clone(),
                });
            }
            Some(prev) if prev != col => alter_op(table, prev, col, ops)?,
            Some(_) => {}
        }
    }
    for col in &old.schema.columns {
        if !new.schema.has_column(&col.name) {
            ops.push(Operation::DropColumn {
                table: table.clone(),
                column: col.name.clone(),
            });
        }
    }
    Ok(())
}

fn alter_op(table: &TableName, prev: &ColumnDef, col: &ColumnDef, ops: &mut Vec<Operation>) -> CoreResult<()> {
    if prev.identity != col.identity {
        return Err(unsupported(
            table,
            format!("identity of column '{}' cannot change", col.name),
        ));
    }
    if !prev.ty.is_convertible_to(&col.ty) {
        return Err(unsupported(
            table,
            format!("column '{}' cannot change from {} to {}", col.name, prev.ty, col.ty),
        ));
    }
    ops.push(Operation::AlterColumn {
        table: table.clone(),
        column: col.name.clone(),
        to: col.shape(),
        from: prev.shape(),
        coerce: !prev.ty.widens_to(&col.ty),
    });
    Ok(())
}

fn row_ops(old: Option<&TableState>, new: &TableState, ops: &mut Vec<Operation>) {
    let table = new.name();
    let schema = &new.schema;
    let pk = &schema.primary_key;
    let columns: Vec<ColumnName> = schema.columns.iter().map(|c| c.name.clone()).collect();

    let mut inserts = Vec::new();
    let mut updates: BTreeMap<Vec<ColumnName>, Vec<RowUpdate>> = BTreeMap::new();
    for row in new.sorted_rows() {
        let key = key_of(row, pk);
        let previous = old.and_then(|o| o.find_row(pk, &key).map(|i| &o.rows[i]));
        match previous {
            None => inserts.push(key_of(row, &columns)),
            Some(prev) => {
                let mut changed = Vec::new();
                let mut values = Vec::new();
                for def in schema.columns.iter().filter(|c| !pk.contains(&c.name)) {
                    let now = row.get(&def.name).cloned().unwrap_or(Value::Null);
                    let added = old.is_some_and(|o| !o.schema.has_column(&def.name));
                    let before = if added {
                        // Filled with the default by add_column
                        match &def.default {
                            Some(DefaultValue::Literal(v)) => def.ty.coerce(v),
                            _ => None,
                        }
                    } else {
                        prev.get(&def.name).and_then(|v| def.ty.coerce(v))
                    }
                    .unwrap_or(Value::Null);
                    if now != before {
                        changed.push(def.name.clone());
                        values.push(now);
                    }
                }
                if !changed.is_empty() {
                    updates.entry(changed).or_default().push(RowUpdate { key, values });
                }
            }
        }
    }

    if !inserts.is_empty() {
        ops.push(Operation::InsertData {
            table: table.clone(),
            columns,
            rows: inserts,
        });
    }
    for (columns, rows) in updates {
        ops.push(Operation::UpdateData {
            table: table.clone(),
            key_columns: pk.clone(),
            columns,
            rows,
        });
    }
}

/// Build a unit whose Up turns `from` into `to` and whose Down turns it back.
///
/// Both directions are replayed against `from` before the unit is returned,
/// so a generated unit always round-trips.
pub fn generate_unit(id: MigrationId, from: &SchemaState, to: &SchemaState) -> CoreResult<MigrationUnit> {
    let up = diff_schemas(from, to)?;
    let down = diff_schemas(to, from)?;
    let unit = MigrationUnit::new(id, up, down);

    let ctx = ApplyContext::for_unit(&unit.id);
    let mut state = from.clone();
    state
        .apply_ops(&unit.up, &ctx)
        .map_err(|e| unsupported(e.source.table(), format!("generated Up does not apply: {e}")))?;
    if let Some(diff) = to.differences(&state).into_iter().next() {
        return Err(unsupported(&diff.table, format!("generated Up misses {diff}")));
    }
    state
        .apply_ops(&unit.down, &ctx)
        .map_err(|e| unsupported(e.source.table(), format!("generated Down does not apply: {e}")))?;
    if let Some(diff) = from.differences(&state).into_iter().next() {
        return Err(unsupported(&diff.table, format!("generated Down misses {diff}")));
    }
    Ok(unit)
}

#[cfg(test)]
#[path = "diff_test.rs"]
mod tests;
