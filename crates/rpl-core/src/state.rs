//! In-memory schema state and the operation application engine.
//!
//! [`SchemaState`] holds every table's declaration together with its rows
//! (seed data). Operations are checked and applied against it exactly as
//! they would be against a database, which makes the state the reference
//! for ledger validation, SQL rendering and pre-flight checks before a
//! unit touches a live database.

use crate::column::{ColumnDef, ColumnShape, ColumnType, DefaultValue};
use crate::error::{ApplyError, OperationError, UnitError};
use crate::names::{ColumnName, TableName};
use crate::operation::{Operation, RowUpdate};
use crate::table::{ForeignKeyDef, IndexDef, OnDelete, TableSchema};
use crate::unit::{Direction, MigrationId, MigrationUnit};
use crate::value::{format_key, Value};
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;

/// A row: column name to value.
pub type Row = BTreeMap<ColumnName, Value>;

type ApplyResult<T> = Result<T, ApplyError>;

/// Evaluation context for an operation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyContext {
    /// Value of `CURRENT_TIMESTAMP` and friends in default expressions
    pub now: NaiveDateTime,
}

impl ApplyContext {
    pub fn at(now: NaiveDateTime) -> Self {
        Self { now }
    }

    /// Context of a unit: its clock is the timestamp encoded in the id, so
    /// replay is deterministic.
    pub fn for_unit(id: &MigrationId) -> Self {
        Self { now: id.timestamp() }
    }
}

/// A table declaration and its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TableState {
    pub schema: TableSchema,
    pub rows: Vec<Row>,
}

impl TableState {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &TableName {
        &self.schema.name
    }

    /// Primary key values of a row.
    pub fn primary_key_of(&self, row: &Row) -> Vec<Value> {
        key_of(row, &self.schema.primary_key)
    }

    /// Position of the row whose `columns` equal `key`.
    pub fn find_row(&self, columns: &[ColumnName], key: &[Value]) -> Option<usize> {
        find_row_in(&self.rows, columns, key)
    }

    /// Rows sorted by primary key, for stable output.
    pub fn sorted_rows(&self) -> Vec<&Row> {
        let mut rows: Vec<&Row> = self.rows.iter().collect();
        rows.sort_by_cached_key(|r| key_string(&self.primary_key_of(r)));
        rows
    }
}

/// Values of `columns` in `row` (missing columns read as NULL).
pub fn key_of(row: &Row, columns: &[ColumnName]) -> Vec<Value> {
    columns
        .iter()
        .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
        .collect()
}

fn key_string(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::key_repr)
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

fn find_row_in(rows: &[Row], columns: &[ColumnName], key: &[Value]) -> Option<usize> {
    rows.iter().position(|row| key_of(row, columns) == key)
}

/// First key tuple occurring twice among `rows`. Tuples containing NULL are
/// skipped when `skip_nulls` is set (NULLs never collide in unique indexes).
fn find_duplicate(rows: &[Row], columns: &[ColumnName], skip_nulls: bool) -> Option<Vec<Value>> {
    let mut seen = HashSet::new();
    for row in rows {
        let key = key_of(row, columns);
        if skip_nulls && key.iter().any(Value::is_null) {
            continue;
        }
        if !seen.insert(key_string(&key)) {
            return Some(key);
        }
    }
    None
}

/// First non-null `fk` tuple in `rows` without a matching row in `targets`.
fn find_orphan(rows: &[Row], fk: &ForeignKeyDef, targets: &[Row]) -> Option<Vec<Value>> {
    let existing: HashSet<String> = targets
        .iter()
        .map(|r| key_string(&key_of(r, &fk.references_columns)))
        .collect();
    rows.iter()
        .map(|r| key_of(r, &fk.columns))
        .filter(|key| !key.iter().any(Value::is_null))
        .find(|key| !existing.contains(&key_string(key)))
}

fn same_column_set(a: &[ColumnName], b: &[ColumnName]) -> bool {
    let a: BTreeSet<&str> = a.iter().map(|c| c.as_str()).collect();
    let b: BTreeSet<&str> = b.iter().map(|c| c.as_str()).collect();
    a == b
}

fn rename_in(columns: &mut [ColumnName], from: &str, to: &ColumnName) {
    for c in columns.iter_mut().filter(|c| *c == from) {
        *c = to.clone();
    }
}

fn conflict(table: &str, detail: impl Into<String>) -> ApplyError {
    ApplyError::SchemaConflict {
        table: table.to_string(),
        detail: detail.into(),
    }
}

fn violation(table: &str, detail: impl Into<String>) -> ApplyError {
    ApplyError::ConstraintViolation {
        table: table.to_string(),
        detail: detail.into(),
    }
}

fn unknown_column(table: &str, column: &str) -> ApplyError {
    ApplyError::UnknownColumn {
        table: table.to_string(),
        column: column.to_string(),
    }
}

fn require_column<'a>(schema: &'a TableSchema, column: &str) -> ApplyResult<&'a ColumnDef> {
    schema
        .column(column)
        .ok_or_else(|| unknown_column(&schema.name, column))
}

fn coerce_value(table: &str, column: &ColumnDef, value: &Value) -> ApplyResult<Value> {
    column
        .ty
        .coerce(value)
        .ok_or_else(|| ApplyError::TypeMismatch {
            table: table.to_string(),
            column: column.name.to_string(),
            value: value.to_string(),
            expected: column.ty.to_string(),
        })
}

/// Evaluate the SQL default expressions the engine understands.
fn evaluate_expression(sql: &str, ctx: &ApplyContext) -> Option<Value> {
    let lowered = sql.trim().to_ascii_lowercase();
    match lowered.trim_end_matches("()") {
        "current_timestamp" | "now" | "getdate" | "getutcdate" | "utc_timestamp"
        | "localtimestamp" => Some(Value::Timestamp(ctx.now)),
        "current_date" | "curdate" => Some(Value::Date(ctx.now.date())),
        _ => None,
    }
}

/// Value a row receives for `column` when an insert omits it.
pub fn evaluate_default(table: &str, column: &ColumnDef, ctx: &ApplyContext) -> ApplyResult<Value> {
    match &column.default {
        None => Ok(Value::Null),
        Some(DefaultValue::Literal(v)) => coerce_value(table, column, v),
        Some(DefaultValue::Expression { sql }) => evaluate_expression(sql, ctx)
            .and_then(|v| column.ty.coerce(&v))
            .ok_or_else(|| {
                violation(
                    table,
                    format!("cannot evaluate default '{sql}' of column '{}'", column.name),
                )
            }),
    }
}

fn normalize_default(
    table: &str,
    column: &str,
    ty: &ColumnType,
    default: &Option<DefaultValue>,
) -> ApplyResult<Option<DefaultValue>> {
    match default {
        None => Ok(None),
        Some(d) => d
            .normalized_for(ty)
            .map(Some)
            .ok_or_else(|| ApplyError::TypeMismatch {
                table: table.to_string(),
                column: column.to_string(),
                value: match d {
                    DefaultValue::Literal(v) => v.to_string(),
                    DefaultValue::Expression { sql } => sql.clone(),
                },
                expected: ty.to_string(),
            }),
    }
}

/// Validate a column declaration and normalize its default.
fn normalize_column(table: &str, column: &ColumnDef) -> ApplyResult<ColumnDef> {
    let mut col = column.clone();
    col.default = normalize_default(table, &column.name, &column.ty, &column.default)?;
    if col.identity {
        if !matches!(
            col.ty,
            ColumnType::SmallInt | ColumnType::Int | ColumnType::BigInt
        ) {
            return Err(conflict(
                table,
                format!("identity column '{}' must be an integer", col.name),
            ));
        }
        if col.default.is_some() {
            return Err(conflict(
                table,
                format!("identity column '{}' cannot have a default", col.name),
            ));
        }
    }
    Ok(col)
}

fn shape_matches(current: &ColumnDef, expected: &ColumnShape) -> bool {
    if current.ty != expected.ty || current.nullable != expected.nullable {
        return false;
    }
    match (&expected.default, &current.default) {
        (None, None) => true,
        (Some(d), Some(c)) => d.normalized_for(&expected.ty).as_ref() == Some(c),
        _ => false,
    }
}

/// One structural or data difference between two schema states.
#[derive(Debug, Clone, PartialEq)]
pub struct StateDifference {
    pub table: TableName,
    /// The column the difference is confined to, if any
    pub column: Option<ColumnName>,
    pub detail: String,
}

impl fmt::Display for StateDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(c) => write!(f, "{}.{}: {}", self.table, c, self.detail),
            None => write!(f, "{}: {}", self.table, self.detail),
        }
    }
}

/// The schema and seed data at some point of ledger replay.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SchemaState {
    tables: BTreeMap<TableName, TableState>,
}

impl SchemaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableState> {
        self.tables.get(name)
    }

    /// Tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableState> {
        self.tables.values()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(|k| k.as_str()).collect()
    }

    /// Declarations only, keyed by table name.
    pub fn schemas(&self) -> BTreeMap<TableName, TableSchema> {
        self.tables
            .iter()
            .map(|(name, t)| (name.clone(), t.schema.clone()))
            .collect()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.table(table).map_or(0, |t| t.rows.len())
    }

    /// Foreign keys of other tables (and self references) pointing at `table`.
    pub fn incoming_foreign_keys(&self, table: &str) -> Vec<(&TableName, &ForeignKeyDef)> {
        incoming_in(&self.tables, table)
    }

    /// Table owning the index `name`.
    pub fn index_owner(&self, name: &str) -> Option<&TableName> {
        self.tables
            .values()
            .find(|t| t.schema.index(name).is_some())
            .map(|t| t.name())
    }

    fn require_table(&self, name: &str) -> ApplyResult<&TableState> {
        self.tables.get(name).ok_or_else(|| ApplyError::UnknownTable {
            table: name.to_string(),
        })
    }

    fn table_mut(&mut self, name: &str) -> ApplyResult<&mut TableState> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| ApplyError::UnknownTable {
                table: name.to_string(),
            })
    }

    /// Apply a single operation. The state is unchanged when an error is
    /// returned.
    pub fn apply(&mut self, op: &Operation, ctx: &ApplyContext) -> ApplyResult<()> {
        match op {
            Operation::CreateTable(schema) => self.create_table(schema),
            Operation::DropTable { table } => self.drop_table(table),
            Operation::AddColumn { table, column } => self.add_column(table, column, ctx),
            Operation::DropColumn { table, column } => self.drop_column(table, column),
            Operation::AlterColumn {
                table,
                column,
                to,
                from,
                coerce,
            } => self.alter_column(table, column, to, from, *coerce),
            Operation::RenameColumn { table, from, to } => self.rename_column(table, from, to),
            Operation::CreateIndex { table, index } => self.create_index(table, index),
            Operation::DropIndex { table, name } => self.drop_index(table, name),
            Operation::AddForeignKey { table, foreign_key } => {
                self.add_foreign_key(table, foreign_key)
            }
            Operation::DropForeignKey { table, name } => self.drop_foreign_key(table, name),
            Operation::InsertData {
                table,
                columns,
                rows,
            } => self.insert_data(table, columns, rows, ctx),
            Operation::UpdateData {
                table,
                key_columns,
                columns,
                rows,
            } => self.update_data(table, key_columns, columns, rows),
            Operation::DeleteData {
                table,
                key_columns,
                keys,
            } => self.delete_data(table, key_columns, keys),
        }
    }

    /// Apply an operation list atomically: either every operation succeeds
    /// or the state is left untouched.
    pub fn apply_ops(&mut self, ops: &[Operation], ctx: &ApplyContext) -> Result<(), OperationError> {
        let mut next = self.clone();
        for (index, op) in ops.iter().enumerate() {
            log::debug!("Applying #{} {} on {}", index, op.kind(), op.table());
            next.apply(op, ctx).map_err(|source| OperationError {
                index,
                kind: op.kind(),
                source,
            })?;
        }
        *self = next;
        Ok(())
    }

    /// Apply one direction of a unit atomically.
    pub fn apply_unit(&mut self, unit: &MigrationUnit, direction: Direction) -> Result<(), UnitError> {
        let ctx = ApplyContext::for_unit(&unit.id);
        self.apply_ops(unit.operations(direction), &ctx)
            .map_err(|source| UnitError {
                unit: unit.id.clone(),
                direction,
                source,
            })
    }

    /// Insert a table wholesale (used when loading schema models). Foreign
    /// keys are checked once every table is present, see
    /// [`SchemaState::check_integrity`].
    pub fn insert_table(&mut self, table: TableState) -> ApplyResult<()> {
        if self.tables.contains_key(table.name()) {
            return Err(conflict(table.name(), "table already exists"));
        }
        self.tables.insert(table.name().clone(), table);
        Ok(())
    }

    /// Check keys, uniqueness and foreign keys of every table.
    pub fn check_integrity(&self) -> ApplyResult<()> {
        for table in self.tables.values() {
            let name = table.name();
            check_uniqueness(name, &table.schema, &table.rows)?;
            for fk in &table.schema.foreign_keys {
                let target = self.require_table(&fk.references_table)?;
                self.check_foreign_key(&table.schema, fk)?;
                if let Some(key) = find_orphan(&table.rows, fk, &target.rows) {
                    return Err(ApplyError::OrphanedReference {
                        table: name.to_string(),
                        constraint: fk.name.clone(),
                        target: fk.references_table.to_string(),
                        key: format_key(&key),
                    });
                }
            }
        }
        Ok(())
    }

    fn create_table(&mut self, schema: &TableSchema) -> ApplyResult<()> {
        let name = &schema.name;
        if self.tables.contains_key(name) {
            return Err(conflict(name, "table already exists"));
        }

        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(schema.columns.len());
        for col in &schema.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(conflict(name, format!("duplicate column '{}'", col.name)));
            }
            columns.push(normalize_column(name, col)?);
        }

        if schema.primary_key.is_empty() {
            return Err(conflict(name, "table has no primary key"));
        }
        for pk in &schema.primary_key {
            let col = columns
                .iter()
                .find(|c| c.name == *pk)
                .ok_or_else(|| unknown_column(name, pk))?;
            if col.nullable {
                return Err(conflict(
                    name,
                    format!("primary key column '{pk}' cannot be nullable"),
                ));
            }
        }

        let mut table = TableSchema {
            name: name.clone(),
            columns,
            primary_key: schema.primary_key.clone(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        };
        for index in &schema.indexes {
            self.check_new_index(&table, index)?;
            table.indexes.push(index.clone());
        }
        for fk in &schema.foreign_keys {
            self.check_foreign_key(&table, fk)?;
            table.foreign_keys.push(fk.clone());
        }

        self.tables.insert(name.clone(), TableState::new(table));
        Ok(())
    }

    fn drop_table(&mut self, table: &TableName) -> ApplyResult<()> {
        self.require_table(table)?;
        if let Some((owner, fk)) = self
            .incoming_foreign_keys(table)
            .into_iter()
            .find(|(owner, _)| *owner != table)
        {
            return Err(conflict(
                table,
                format!("table is still referenced by foreign key '{}' on '{}'", fk.name, owner),
            ));
        }
        self.tables.remove(table);
        Ok(())
    }

    fn add_column(&mut self, table: &TableName, column: &ColumnDef, ctx: &ApplyContext) -> ApplyResult<()> {
        let state = self.require_table(table)?;
        if state.schema.has_column(&column.name) {
            return Err(conflict(table, format!("column '{}' already exists", column.name)));
        }
        let col = normalize_column(table, column)?;
        if col.identity {
            return Err(conflict(
                table,
                format!("identity column '{}' can only be declared by create_table", col.name),
            ));
        }
        if !col.nullable && col.default.is_none() && !state.rows.is_empty() {
            return Err(violation(
                table,
                format!(
                    "NOT NULL column '{}' needs a default: the table has {} rows",
                    col.name,
                    state.rows.len()
                ),
            ));
        }
        let fill = evaluate_default(table, &col, ctx)?;

        let state = self.table_mut(table)?;
        for row in &mut state.rows {
            row.insert(col.name.clone(), fill.clone());
        }
        state.schema.columns.push(col);
        Ok(())
    }

    fn drop_column(&mut self, table: &TableName, column: &ColumnName) -> ApplyResult<()> {
        let state = self.require_table(table)?;
        require_column(&state.schema, column)?;
        if state.schema.column_is_referenced(column) {
            return Err(conflict(
                table,
                format!("column '{column}' is part of a key, foreign key or index"),
            ));
        }
        if let Some((owner, fk)) = self
            .incoming_foreign_keys(table)
            .into_iter()
            .find(|(_, fk)| fk.references_columns.iter().any(|c| c == column))
        {
            return Err(conflict(
                table,
                format!("column '{column}' is referenced by foreign key '{}' on '{owner}'", fk.name),
            ));
        }

        let state = self.table_mut(table)?;
        state.schema.columns.retain(|c| c.name != *column);
        for row in &mut state.rows {
            row.remove(column);
        }
        Ok(())
    }

    fn alter_column(
        &mut self,
        table: &TableName,
        column: &ColumnName,
        to: &ColumnShape,
        from: &ColumnShape,
        coerce: bool,
    ) -> ApplyResult<()> {
        let state = self.require_table(table)?;
        let current = require_column(&state.schema, column)?;
        let incompatible = |detail: String| ApplyError::IncompatibleAlter {
            table: table.to_string(),
            column: column.to_string(),
            detail,
        };

        if !shape_matches(current, from) {
            return Err(incompatible(format!(
                "column is {} but the operation expects {}",
                current.shape(),
                from
            )));
        }
        if !current.ty.is_convertible_to(&to.ty) {
            return Err(incompatible(format!("cannot convert {} to {}", current.ty, to.ty)));
        }
        let widening = current.ty.widens_to(&to.ty);
        if !widening && !coerce {
            return Err(incompatible(format!(
                "narrowing {} to {} requires coerce: true",
                current.ty, to.ty
            )));
        }
        let default = normalize_default(table, column, &to.ty, &to.default)?;

        let mut values = Vec::with_capacity(state.rows.len());
        for row in &state.rows {
            let value = row.get(column).cloned().unwrap_or(Value::Null);
            if value.is_null() && !to.nullable {
                return Err(incompatible(format!(
                    "row {} holds NULL",
                    format_key(&state.primary_key_of(row))
                )));
            }
            let converted = to.ty.coerce(&value).ok_or_else(|| {
                incompatible(format!(
                    "value {} of row {} does not fit {}",
                    value,
                    format_key(&state.primary_key_of(row)),
                    to.ty
                ))
            })?;
            values.push(converted);
        }

        let state = self.table_mut(table)?;
        if let Some(col) = state.schema.column_mut(column) {
            col.ty = to.ty;
            col.nullable = to.nullable;
            col.default = default;
        }
        for (row, value) in state.rows.iter_mut().zip(values) {
            row.insert(column.clone(), value);
        }
        Ok(())
    }

    fn rename_column(&mut self, table: &TableName, from: &ColumnName, to: &ColumnName) -> ApplyResult<()> {
        let state = self.require_table(table)?;
        require_column(&state.schema, from)?;
        if state.schema.has_column(to) {
            return Err(conflict(table, format!("column '{to}' already exists")));
        }

        for other in self.tables.values_mut() {
            let self_table = other.schema.name == *table;
            for fk in &mut other.schema.foreign_keys {
                if fk.references_table == *table {
                    rename_in(&mut fk.references_columns, from, to);
                }
                if self_table {
                    rename_in(&mut fk.columns, from, to);
                }
            }
        }

        let state = self.table_mut(table)?;
        if let Some(col) = state.schema.column_mut(from) {
            col.name = to.clone();
        }
        rename_in(&mut state.schema.primary_key, from, to);
        for index in &mut state.schema.indexes {
            rename_in(&mut index.columns, from, to);
        }
        for row in &mut state.rows {
            if let Some(v) = row.remove(from) {
                row.insert(to.clone(), v);
            }
        }
        Ok(())
    }

    fn check_new_index(&self, table: &TableSchema, index: &IndexDef) -> ApplyResult<()> {
        if let Some(owner) = table
            .index(&index.name)
            .map(|_| &table.name)
            .or_else(|| self.index_owner(&index.name))
        {
            return Err(ApplyError::DuplicateIndexName {
                name: index.name.clone(),
                table: owner.to_string(),
            });
        }
        if index.columns.is_empty() {
            return Err(conflict(&table.name, format!("index '{}' has no columns", index.name)));
        }
        for c in &index.columns {
            require_column(table, c)?;
        }
        Ok(())
    }

    fn create_index(&mut self, table: &TableName, index: &IndexDef) -> ApplyResult<()> {
        let state = self.require_table(table)?;
        self.check_new_index(&state.schema, index)?;
        if index.unique {
            if let Some(key) = find_duplicate(&state.rows, &index.columns, true) {
                return Err(ApplyError::UniquenessViolation {
                    table: table.to_string(),
                    constraint: index.name.clone(),
                    key: format_key(&key),
                });
            }
        }
        self.table_mut(table)?.schema.indexes.push(index.clone());
        Ok(())
    }

    fn drop_index(&mut self, table: &TableName, name: &str) -> ApplyResult<()> {
        let state = self.require_table(table)?;
        let index = state
            .schema
            .index(name)
            .ok_or_else(|| ApplyError::UnknownIndex {
                table: table.to_string(),
                name: name.to_string(),
            })?;
        if index.unique && !same_column_set(&index.columns, &state.schema.primary_key) {
            if let Some((owner, fk)) = self
                .incoming_foreign_keys(table)
                .into_iter()
                .find(|(_, fk)| same_column_set(&fk.references_columns, &index.columns))
            {
                return Err(conflict(
                    table,
                    format!("index '{name}' backs foreign key '{}' on '{owner}'", fk.name),
                ));
            }
        }
        self.table_mut(table)?
            .schema
            .indexes
            .retain(|i| i.name != name);
        Ok(())
    }

    /// Structural checks of a foreign key declared on `table`.
    fn check_foreign_key(&self, table: &TableSchema, fk: &ForeignKeyDef) -> ApplyResult<()> {
        let name = &table.name;
        if table.foreign_keys.iter().any(|f| f.name == fk.name && f != fk) {
            return Err(conflict(name, format!("foreign key '{}' already exists", fk.name)));
        }
        if fk.columns.is_empty() || fk.columns.len() != fk.references_columns.len() {
            return Err(conflict(
                name,
                format!("foreign key '{}' must pair each column with one target column", fk.name),
            ));
        }
        for c in &fk.columns {
            let col = require_column(table, c)?;
            if fk.on_delete == OnDelete::SetNull && !col.nullable {
                return Err(conflict(
                    name,
                    format!("foreign key '{}' sets '{c}' to NULL but the column is NOT NULL", fk.name),
                ));
            }
        }
        let target = if fk.references_table == *name {
            table
        } else {
            &self.require_table(&fk.references_table)?.schema
        };
        for c in &fk.references_columns {
            require_column(target, c)?;
        }
        let keyed = same_column_set(&fk.references_columns, &target.primary_key)
            || target
                .indexes
                .iter()
                .any(|ix| ix.unique && same_column_set(&ix.columns, &fk.references_columns));
        if !keyed {
            return Err(conflict(
                name,
                format!(
                    "foreign key '{}' targets '{}' columns that are neither its primary key nor a unique index",
                    fk.name, fk.references_table
                ),
            ));
        }
        Ok(())
    }

    fn add_foreign_key(&mut self, table: &TableName, fk: &ForeignKeyDef) -> ApplyResult<()> {
        let state = self.require_table(table)?;
        if state.schema.foreign_key(&fk.name).is_some() {
            return Err(conflict(table, format!("foreign key '{}' already exists", fk.name)));
        }
        self.check_foreign_key(&state.schema, fk)?;
        let targets = &self.require_table(&fk.references_table)?.rows;
        if let Some(key) = find_orphan(&state.rows, fk, targets) {
            return Err(ApplyError::OrphanedReference {
                table: table.to_string(),
                constraint: fk.name.clone(),
                target: fk.references_table.to_string(),
                key: format_key(&key),
            });
        }
        self.table_mut(table)?.schema.foreign_keys.push(fk.clone());
        Ok(())
    }

    fn drop_foreign_key(&mut self, table: &TableName, name: &str) -> ApplyResult<()> {
        let state = self.table_mut(table)?;
        if state.schema.foreign_key(name).is_none() {
            return Err(ApplyError::UnknownForeignKey {
                table: table.to_string(),
                name: name.to_string(),
            });
        }
        state.schema.foreign_keys.retain(|fk| fk.name != name);
        Ok(())
    }

    /// Check that `key_columns` identify at most one row.
    fn check_key_columns(schema: &TableSchema, key_columns: &[ColumnName]) -> ApplyResult<()> {
        for c in key_columns {
            require_column(schema, c)?;
        }
        let keyed = same_column_set(key_columns, &schema.primary_key)
            || schema
                .indexes
                .iter()
                .any(|ix| ix.unique && same_column_set(&ix.columns, key_columns));
        if keyed {
            Ok(())
        } else {
            Err(conflict(
                &schema.name,
                "key columns must be the primary key or a unique index",
            ))
        }
    }

    fn coerce_key(table: &str, schema: &TableSchema, columns: &[ColumnName], key: &[Value]) -> ApplyResult<Vec<Value>> {
        if key.len() != columns.len() {
            return Err(conflict(
                table,
                format!("key {} has {} values, expected {}", format_key(key), key.len(), columns.len()),
            ));
        }
        columns
            .iter()
            .zip(key)
            .map(|(c, v)| coerce_value(table, require_column(schema, c)?, v))
            .collect()
    }

    /// Outgoing foreign keys of `table` hold for `rows`.
    fn check_outgoing(&self, table: &TableName, schema: &TableSchema, rows: &[Row]) -> ApplyResult<()> {
        for fk in &schema.foreign_keys {
            let targets = if fk.references_table == *table {
                rows
            } else {
                &self.require_table(&fk.references_table)?.rows
            };
            if let Some(key) = find_orphan(rows, fk, targets) {
                return Err(ApplyError::OrphanedReference {
                    table: table.to_string(),
                    constraint: fk.name.clone(),
                    target: fk.references_table.to_string(),
                    key: format_key(&key),
                });
            }
        }
        Ok(())
    }

    /// Incoming foreign keys of other tables still hold when `table` has `rows`.
    fn check_incoming(&self, table: &TableName, rows: &[Row]) -> ApplyResult<()> {
        for (owner, fk) in self.incoming_foreign_keys(table) {
            if owner == table {
                continue;
            }
            if let Some(key) = find_orphan(&self.tables[owner].rows, fk, rows) {
                return Err(violation(
                    table,
                    format!(
                        "row {} of '{owner}' would lose its target through foreign key '{}'",
                        format_key(&key),
                        fk.name
                    ),
                ));
            }
        }
        Ok(())
    }

    fn insert_data(
        &mut self,
        table: &TableName,
        columns: &[ColumnName],
        rows: &[Vec<Value>],
        ctx: &ApplyContext,
    ) -> ApplyResult<()> {
        let state = self.require_table(table)?;
        let schema = &state.schema;
        let mut seen = HashSet::new();
        for c in columns {
            require_column(schema, c)?;
            if !seen.insert(c.as_str()) {
                return Err(conflict(table, format!("column '{c}' listed twice")));
            }
        }

        let mut new_rows = state.rows.clone();
        for values in rows {
            if values.len() != columns.len() {
                return Err(conflict(
                    table,
                    format!("row {} has {} values, expected {}", format_key(values), values.len(), columns.len()),
                ));
            }
            let mut row = Row::new();
            for (c, v) in columns.iter().zip(values) {
                row.insert(c.clone(), coerce_value(table, require_column(schema, c)?, v)?);
            }
            for def in &schema.columns {
                if row.contains_key(&def.name) {
                    continue;
                }
                let value = if def.identity {
                    next_identity(&new_rows, &def.name)
                } else {
                    evaluate_default(table, def, ctx)?
                };
                row.insert(def.name.clone(), value);
            }
            if let Some(def) = schema
                .columns
                .iter()
                .find(|d| !d.nullable && row.get(&d.name).is_none_or(Value::is_null))
            {
                return Err(violation(
                    table,
                    format!(
                        "column '{}' cannot be NULL (row {})",
                        def.name,
                        format_key(&key_of(&row, &schema.primary_key))
                    ),
                ));
            }
            new_rows.push(row);
        }

        check_uniqueness(table, schema, &new_rows)?;
        self.check_outgoing(table, schema, &new_rows)?;

        self.table_mut(table)?.rows = new_rows;
        Ok(())
    }

    fn update_data(
        &mut self,
        table: &TableName,
        key_columns: &[ColumnName],
        columns: &[ColumnName],
        rows: &[RowUpdate],
    ) -> ApplyResult<()> {
        let state = self.require_table(table)?;
        let schema = &state.schema;
        Self::check_key_columns(schema, key_columns)?;
        for c in columns {
            require_column(schema, c)?;
            if schema.primary_key.contains(c) || key_columns.contains(c) {
                return Err(violation(table, format!("key column '{c}' cannot be updated")));
            }
        }

        let mut new_rows = state.rows.clone();
        for update in rows {
            let key = Self::coerce_key(table, schema, key_columns, &update.key)?;
            if update.values.len() != columns.len() {
                return Err(conflict(
                    table,
                    format!(
                        "update of {} has {} values, expected {}",
                        format_key(&key),
                        update.values.len(),
                        columns.len()
                    ),
                ));
            }
            let idx = find_row_in(&new_rows, key_columns, &key).ok_or_else(|| ApplyError::RowNotFound {
                table: table.to_string(),
                key: format_key(&key),
            })?;
            for (c, v) in columns.iter().zip(&update.values) {
                let def = require_column(schema, c)?;
                let value = coerce_value(table, def, v)?;
                if value.is_null() && !def.nullable {
                    return Err(violation(
                        table,
                        format!("column '{c}' cannot be NULL (row {})", format_key(&key)),
                    ));
                }
                new_rows[idx].insert(c.clone(), value);
            }
        }

        check_uniqueness(table, schema, &new_rows)?;
        self.check_outgoing(table, schema, &new_rows)?;
        self.check_incoming(table, &new_rows)?;

        self.table_mut(table)?.rows = new_rows;
        Ok(())
    }

    fn delete_data(&mut self, table: &TableName, key_columns: &[ColumnName], keys: &[Vec<Value>]) -> ApplyResult<()> {
        let state = self.require_table(table)?;
        Self::check_key_columns(&state.schema, key_columns)?;
        let keys = keys
            .iter()
            .map(|k| Self::coerce_key(table, &state.schema, key_columns, k))
            .collect::<ApplyResult<Vec<_>>>()?;

        let mut tables = self.tables.clone();
        let mut removed = Vec::with_capacity(keys.len());
        {
            let rows = &mut tables
                .get_mut(table)
                .ok_or_else(|| ApplyError::UnknownTable {
                    table: table.to_string(),
                })?
                .rows;
            for key in &keys {
                let idx = find_row_in(rows, key_columns, key).ok_or_else(|| ApplyError::RowNotFound {
                    table: table.to_string(),
                    key: format_key(key),
                })?;
                removed.push(rows.remove(idx));
            }
        }

        let mut queue = VecDeque::from([(table.clone(), removed)]);
        while let Some((parent, gone)) = queue.pop_front() {
            let incoming: Vec<(TableName, ForeignKeyDef)> = incoming_in(&tables, &parent)
                .into_iter()
                .filter(|(_, fk)| fk.on_delete != OnDelete::Restrict)
                .map(|(owner, fk)| (owner.clone(), fk.clone()))
                .collect();
            for (owner, fk) in incoming {
                let gone_keys: HashSet<String> = gone
                    .iter()
                    .map(|r| key_string(&key_of(r, &fk.references_columns)))
                    .collect();
                let Some(child) = tables.get_mut(&owner) else {
                    continue;
                };
                let hit = |row: &Row| gone_keys.contains(&key_string(&key_of(row, &fk.columns)));
                match fk.on_delete {
                    OnDelete::Cascade => {
                        let (dropped, kept): (Vec<Row>, Vec<Row>) =
                            std::mem::take(&mut child.rows).into_iter().partition(|r| hit(r));
                        child.rows = kept;
                        if !dropped.is_empty() {
                            log::debug!("Cascading delete of {} rows from {}", dropped.len(), owner);
                            queue.push_back((owner.clone(), dropped));
                        }
                    }
                    OnDelete::SetNull => {
                        for row in child.rows.iter_mut().filter(|r| hit(r)) {
                            for c in &fk.columns {
                                row.insert(c.clone(), Value::Null);
                            }
                        }
                    }
                    OnDelete::Restrict => {}
                }
            }
        }

        for child in tables.values() {
            for fk in &child.schema.foreign_keys {
                let Some(target) = tables.get(&fk.references_table) else {
                    continue;
                };
                if let Some(key) = find_orphan(&child.rows, fk, &target.rows) {
                    return Err(violation(
                        table,
                        format!(
                            "delete is restricted by foreign key '{}' on '{}' (row {})",
                            fk.name,
                            child.name(),
                            format_key(&key)
                        ),
                    ));
                }
            }
            for c in child.schema.columns.iter().filter(|c| !c.nullable) {
                if child.rows.iter().any(|r| r.get(&c.name).is_none_or(Value::is_null)) {
                    return Err(violation(
                        child.name(),
                        format!("set-null of '{}' violates NOT NULL", c.name),
                    ));
                }
            }
        }

        self.tables = tables;
        Ok(())
    }

    /// Insert rows that are missing and update the others, keyed by
    /// `key_columns`. Returns `(inserted, updated)`.
    pub fn upsert(
        &mut self,
        table: &TableName,
        key_columns: &[ColumnName],
        columns: &[ColumnName],
        rows: &[Vec<Value>],
        ctx: &ApplyContext,
    ) -> ApplyResult<(usize, usize)> {
        let state = self.require_table(table)?;
        let schema = &state.schema;
        Self::check_key_columns(schema, key_columns)?;
        let key_positions = key_columns
            .iter()
            .map(|k| {
                columns
                    .iter()
                    .position(|c| c == k)
                    .ok_or_else(|| conflict(table, format!("key column '{k}' is missing from the row columns")))
            })
            .collect::<ApplyResult<Vec<_>>>()?;
        let update_positions: Vec<usize> = (0..columns.len())
            .filter(|i| !key_positions.contains(i) && !schema.primary_key.contains(&columns[*i]))
            .collect();

        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        for values in rows {
            if values.len() != columns.len() {
                return Err(conflict(
                    table,
                    format!("row {} has {} values, expected {}", format_key(values), values.len(), columns.len()),
                ));
            }
            let key: Vec<Value> = key_positions.iter().map(|i| values[*i].clone()).collect();
            let coerced = Self::coerce_key(table, schema, key_columns, &key)?;
            if state.find_row(key_columns, &coerced).is_some() {
                updates.push(RowUpdate {
                    key,
                    values: update_positions.iter().map(|i| values[*i].clone()).collect(),
                });
            } else {
                inserts.push(values.clone());
            }
        }

        let (inserted, updated) = (inserts.len(), updates.len());
        let mut next = self.clone();
        if !updates.is_empty() && !update_positions.is_empty() {
            next.update_data(
                table,
                key_columns,
                &update_positions.iter().map(|i| columns[*i].clone()).collect::<Vec<_>>(),
                &updates,
            )?;
        }
        if !inserts.is_empty() {
            next.insert_data(table, columns, &inserts, ctx)?;
        }
        *self = next;
        Ok((inserted, updated))
    }

    /// Every difference between `self` (expected) and `actual`.
    pub fn differences(&self, actual: &SchemaState) -> Vec<StateDifference> {
        let mut out = Vec::new();
        let names: BTreeSet<&TableName> = self.tables.keys().chain(actual.tables.keys()).collect();
        for name in names {
            match (self.tables.get(name), actual.tables.get(name)) {
                (Some(_), None) => out.push(StateDifference {
                    table: name.clone(),
                    column: None,
                    detail: "table missing".to_string(),
                }),
                (None, Some(_)) => out.push(StateDifference {
                    table: name.clone(),
                    column: None,
                    detail: "unexpected table".to_string(),
                }),
                (Some(expected), Some(found)) => table_differences(expected, found, &mut out),
                (None, None) => {}
            }
        }
        out
    }

    /// Returns `true` if both states have the same tables, declarations and
    /// rows (column and row order ignored).
    pub fn same_as(&self, other: &SchemaState) -> bool {
        self.differences(other).is_empty()
    }
}

fn incoming_in<'a>(
    tables: &'a BTreeMap<TableName, TableState>,
    table: &str,
) -> Vec<(&'a TableName, &'a ForeignKeyDef)> {
    tables
        .values()
        .flat_map(|t| {
            t.schema
                .foreign_keys
                .iter()
                .filter(|fk| fk.references_table == table)
                .map(move |fk| (t.name(), fk))
        })
        .collect()
}

fn next_identity(rows: &[Row], column: &ColumnName) -> Value {
    let max = rows
        .iter()
        .filter_map(|r| match r.get(column) {
            Some(Value::Int(i)) => Some(*i),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    Value::Int(max + 1)
}

fn check_uniqueness(table: &str, schema: &TableSchema, rows: &[Row]) -> ApplyResult<()> {
    if let Some(key) = find_duplicate(rows, &schema.primary_key, false) {
        return Err(ApplyError::UniquenessViolation {
            table: table.to_string(),
            constraint: "primary key".to_string(),
            key: format_key(&key),
        });
    }
    for index in schema.indexes.iter().filter(|i| i.unique) {
        if let Some(key) = find_duplicate(rows, &index.columns, true) {
            return Err(ApplyError::UniquenessViolation {
                table: table.to_string(),
                constraint: index.name.clone(),
                key: format_key(&key),
            });
        }
    }
    Ok(())
}

fn table_differences(expected: &TableState, found: &TableState, out: &mut Vec<StateDifference>) {
    let name = expected.name();
    let push = |out: &mut Vec<StateDifference>, column: Option<&ColumnName>, detail: String| {
        out.push(StateDifference {
            table: name.clone(),
            column: column.cloned(),
            detail,
        })
    };
    let (a, b) = (&expected.schema, &found.schema);

    if a.primary_key != b.primary_key {
        push(out, None, "primary key differs".to_string());
    }
    for col in &a.columns {
        match b.column(&col.name) {
            None => push(out, Some(&col.name), "column missing".to_string()),
            Some(other) if other != col => push(
                out,
                Some(&col.name),
                format!("is {} (expected {})", describe(other), describe(col)),
            ),
            Some(_) => {}
        }
    }
    for col in b.columns.iter().filter(|c| !a.has_column(&c.name)) {
        push(out, Some(&col.name), "unexpected column".to_string());
    }
    for fk in &a.foreign_keys {
        if b.foreign_key(&fk.name) != Some(fk) {
            push(out, None, format!("foreign key '{}' missing or different", fk.name));
        }
    }
    for fk in b.foreign_keys.iter().filter(|fk| a.foreign_key(&fk.name).is_none()) {
        push(out, None, format!("unexpected foreign key '{}'", fk.name));
    }
    for ix in &a.indexes {
        if b.index(&ix.name) != Some(ix) {
            push(out, None, format!("index '{}' missing or different", ix.name));
        }
    }
    for ix in b.indexes.iter().filter(|ix| a.index(&ix.name).is_none()) {
        push(out, None, format!("unexpected index '{}'", ix.name));
    }

    if a.primary_key != b.primary_key {
        return;
    }
    let keyed = |t: &TableState| -> BTreeMap<String, (Vec<Value>, Row)> {
        t.rows
            .iter()
            .map(|r| {
                let key = t.primary_key_of(r);
                (key_string(&key), (key, r.clone()))
            })
            .collect()
    };
    let (rows_a, rows_b) = (keyed(expected), keyed(found));
    for (k, (key, row)) in &rows_a {
        let Some((_, other)) = rows_b.get(k) else {
            push(out, None, format!("row {} missing", format_key(key)));
            continue;
        };
        let columns: BTreeSet<&ColumnName> = row.keys().chain(other.keys()).collect();
        for c in columns {
            let (x, y) = (row.get(c), other.get(c));
            if x != y {
                push(
                    out,
                    Some(c),
                    format!(
                        "row {}: {} (expected {})",
                        format_key(key),
                        y.map_or("<absent>".to_string(), Value::to_string),
                        x.map_or("<absent>".to_string(), Value::to_string)
                    ),
                );
            }
        }
    }
    for (k, (key, _)) in &rows_b {
        if !rows_a.contains_key(k) {
            push(out, None, format!("unexpected row {}", format_key(key)));
        }
    }
}

fn describe(col: &ColumnDef) -> String {
    if col.identity {
        format!("{} identity", col.shape())
    } else {
        col.shape().to_string()
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
