//! SQL dialects: rendering ledger operations as statements.
//!
//! Rendering needs the schema *before* the operation (for identity columns,
//! the foreign keys pointing at a table, the shape of a table to rebuild) and the replay clock used for default expressions, so that the
//! rows written to the database are the rows the in-memory engine computes.

mod duckdb;
mod mysql;
mod postgres;

pub use self::duckdb::DuckDbDialect;
pub use self::mysql::MySqlDialect;
pub use self::postgres::PostgresDialect;

use crate::error::{DbError, DbResult};
use rpl_core::sql_utils::{quote_ident, quote_string};
use rpl_core::value::{DATE_FORMAT, TIMESTAMP_FORMAT};
use rpl_core::{
    evaluate_default, ApplyContext, ColumnDef, ColumnName, ColumnShape, ColumnType, DefaultValue, Dialect,
    Direction, ForeignKeyDef, IndexDef, MigrationUnit, OnDelete, Operation, RowUpdate, SchemaState,
    TableName, TableSchema, TableState, Value,
};

/// A SQL dialect.
///
/// The provided methods render standard SQL; dialects override what their
/// database spells differently.
pub trait SqlDialect: Send + Sync {
    /// Dialect name for logging
    fn name(&self) -> &'static str;

    /// SQL spelling of a column type
    fn column_type(&self, ty: &ColumnType) -> String;

    /// Quote an identifier
    fn quote(&self, ident: &str) -> String {
        quote_ident(ident)
    }

    /// Render a literal value
    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(x) => x.to_string(),
            Value::Decimal(d) => d.to_plain_string(),
            Value::Text(s) => quote_string(s),
            Value::Date(d) => format!("DATE '{}'", d.format(DATE_FORMAT)),
            Value::Timestamp(ts) => format!("TIMESTAMP '{}'", ts.format(TIMESTAMP_FORMAT)),
        }
    }

    /// Whether foreign keys are declared in the database. When `false` the
    /// migrator enforces them and on-delete actions are emulated.
    fn native_foreign_keys(&self) -> bool {
        true
    }

    /// Clause making a column database-generated, or `None` when identity
    /// values are computed by the inserted statement itself.
    fn identity_clause(&self) -> Option<&'static str>;

    /// Whether `ALTER TABLE` is refused on tables with indexes, so such
    /// tables are rebuilt instead (see [`rebuild_table`]).
    fn rebuilds_indexed_tables(&self) -> bool {
        false
    }

    fn drop_index(&self, _table: &TableName, name: &str) -> String {
        format!("DROP INDEX {}", self.quote(name))
    }

    fn drop_foreign_key(&self, table: &TableName, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote(table),
            self.quote(name)
        )
    }

    /// Statements adding a column. `fill` is the value existing rows get.
    fn add_column(&self, table: &TableName, column: &ColumnDef, _fill: &Value) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote(table),
            column_definition(self, column)
        )]
    }

    /// Statements changing a column from one shape to another.
    fn alter_column(&self, table: &TableName, column: &ColumnName, from: &ColumnShape, to: &ColumnShape) -> Vec<String> {
        let prefix = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            self.quote(table),
            self.quote(column)
        );
        let mut out = Vec::new();
        if from.ty != to.ty {
            out.push(format!("{prefix} TYPE {}", self.column_type(&to.ty)));
        }
        if from.default != to.default {
            match &to.default {
                Some(d) => out.push(format!("{prefix} SET DEFAULT {}", default_sql(self, d))),
                None => out.push(format!("{prefix} DROP DEFAULT")),
            }
        }
        if from.nullable != to.nullable {
            let action = if to.nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
            out.push(format!("{prefix} {action}"));
        }
        out
    }
}

/// The dialect implementation for a configured dialect.
pub fn dialect_for(dialect: Dialect) -> Box<dyn SqlDialect> {
    match dialect {
        Dialect::DuckDb => Box::new(DuckDbDialect),
        Dialect::Postgres => Box::new(PostgresDialect),
        Dialect::MySql => Box::new(MySqlDialect),
    }
}

/// `"col" TYPE [DEFAULT x] NOT NULL [identity]`
pub(crate) fn column_definition<D: SqlDialect + ?Sized>(d: &D, column: &ColumnDef) -> String {
    let mut sql = format!("{} {}", d.quote(&column.name), d.column_type(&column.ty));
    if let Some(default) = &column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(&default_sql(d, default));
    }
    sql.push_str(if column.nullable { " NULL" } else { " NOT NULL" });
    if column.identity {
        if let Some(clause) = d.identity_clause() {
            sql.push(' ');
            sql.push_str(clause);
        }
    }
    sql
}

pub(crate) fn default_sql<D: SqlDialect + ?Sized>(d: &D, default: &DefaultValue) -> String {
    match default {
        DefaultValue::Literal(v) => d.literal(v),
        DefaultValue::Expression { sql } => sql.clone(),
    }
}

fn quote_list<D: SqlDialect + ?Sized>(d: &D, idents: &[ColumnName]) -> String {
    idents
        .iter()
        .map(|i| d.quote(i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn require_table<'a>(state: &'a SchemaState, name: &TableName) -> DbResult<&'a TableState> {
    state
        .table(name)
        .ok_or_else(|| DbError::TableNotFound(name.to_string()))
}

fn require_column<'a>(schema: &'a TableSchema, name: &ColumnName) -> DbResult<&'a ColumnDef> {
    schema.column(name).ok_or_else(|| {
        DbError::InvalidOperation(format!("unknown column '{}.{}'", schema.name, name))
    })
}

/// Coerce `value` to the column type and render it.
fn typed_literal<D: SqlDialect + ?Sized>(d: &D, table: &TableSchema, column: &ColumnName, value: &Value) -> DbResult<String> {
    let def = require_column(table, column)?;
    let coerced = def.ty.coerce(value).ok_or_else(|| {
        DbError::InvalidOperation(format!(
            "value {} does not fit {}.{} ({})",
            value, table.name, column, def.ty
        ))
    })?;
    Ok(d.literal(&coerced))
}

/// `"a" = 1 AND "b" = 'x'`, columns qualified with `alias` when given.
fn key_predicate<D: SqlDialect + ?Sized>(
    d: &D,
    table: &TableSchema,
    alias: Option<&str>,
    columns: &[ColumnName],
    key: &[Value],
) -> DbResult<String> {
    let parts = columns
        .iter()
        .zip(key)
        .map(|(c, v)| {
            let lhs = match alias {
                Some(a) => format!("{a}.{}", d.quote(c)),
                None => d.quote(c),
            };
            if v.is_null() {
                Ok(format!("{lhs} IS NULL"))
            } else {
                Ok(format!("{lhs} = {}", typed_literal(d, table, c, v)?))
            }
        })
        .collect::<DbResult<Vec<_>>>()?;
    Ok(parts.join(" AND "))
}

fn keys_predicate<D: SqlDialect + ?Sized>(
    d: &D,
    table: &TableSchema,
    alias: Option<&str>,
    columns: &[ColumnName],
    keys: &[Vec<Value>],
) -> DbResult<String> {
    let parts = keys
        .iter()
        .map(|k| key_predicate(d, table, alias, columns, k).map(|p| format!("({p})")))
        .collect::<DbResult<Vec<_>>>()?;
    Ok(parts.join(" OR "))
}

/// Render one operation against the schema it applies to.
pub fn render_operation(
    d: &dyn SqlDialect,
    op: &Operation,
    before: &SchemaState,
    ctx: &ApplyContext,
) -> DbResult<Vec<String>> {
    let statements = match op {
        Operation::CreateTable(schema) => create_table(d, schema),
        Operation::DropTable { table } => vec![format!("DROP TABLE {}", d.quote(table))],
        Operation::AddColumn { table, column } => {
            let current = require_table(before, table)?;
            if needs_rebuild(d, current, op) {
                rebuild_table(d, op, current, before, ctx)?
            } else {
                let fill = evaluate_default(table, column, ctx)
                    .map_err(|e| DbError::InvalidOperation(e.to_string()))?;
                d.add_column(table, column, &fill)
            }
        }
        Operation::DropColumn { table, column } => {
            let current = require_table(before, table)?;
            if needs_rebuild(d, current, op) {
                rebuild_table(d, op, current, before, ctx)?
            } else {
                vec![format!(
                    "ALTER TABLE {} DROP COLUMN {}",
                    d.quote(table),
                    d.quote(column)
                )]
            }
        }
        Operation::AlterColumn {
            table,
            column,
            to,
            from,
            ..
        } => {
            let current = require_table(before, table)?;
            if needs_rebuild(d, current, op) {
                rebuild_table(d, op, current, before, ctx)?
            } else {
                d.alter_column(table, column, from, to)
            }
        }
        Operation::RenameColumn { table, from, to } => {
            let current = require_table(before, table)?;
            if needs_rebuild(d, current, op) {
                rebuild_table(d, op, current, before, ctx)?
            } else {
                vec![format!(
                    "ALTER TABLE {} RENAME COLUMN {} TO {}",
                    d.quote(table),
                    d.quote(from),
                    d.quote(to)
                )]
            }
        }
        Operation::CreateIndex { table, index } => vec![create_index(d, table, index)],
        Operation::DropIndex { table, name } => vec![d.drop_index(table, name)],
        Operation::AddForeignKey { table, foreign_key } => {
            if d.native_foreign_keys() {
                vec![format!(
                    "ALTER TABLE {} ADD {}",
                    d.quote(table),
                    foreign_key_clause(d, foreign_key)
                )]
            } else {
                log::debug!(
                    "{}: foreign key {} is enforced by the migrator",
                    d.name(),
                    foreign_key.name
                );
                Vec::new()
            }
        }
        Operation::DropForeignKey { table, name } => {
            if d.native_foreign_keys() {
                vec![d.drop_foreign_key(table, name)]
            } else {
                Vec::new()
            }
        }
        Operation::InsertData {
            table,
            columns,
            rows,
        } => insert_data(d, require_table(before, table)?, columns, rows, ctx)?,
        Operation::UpdateData {
            table,
            key_columns,
            columns,
            rows,
        } => update_data(d, &require_table(before, table)?.schema, key_columns, columns, rows)?,
        Operation::DeleteData {
            table,
            key_columns,
            keys,
        } => delete_data(d, before, table, key_columns, keys)?,
    };
    Ok(statements)
}

/// Render a whole unit direction, advancing an in-memory copy of `before`
/// after every operation.
pub fn render_unit(
    d: &dyn SqlDialect,
    unit: &MigrationUnit,
    direction: Direction,
    before: &SchemaState,
) -> DbResult<Vec<String>> {
    let ctx = ApplyContext::for_unit(&unit.id);
    let mut state = before.clone();
    let mut out = Vec::new();
    for (index, op) in unit.operations(direction).iter().enumerate() {
        out.extend(render_operation(d, op, &state, &ctx)?);
        state.apply(op, &ctx).map_err(|e| {
            DbError::InvalidOperation(format!(
                "{} ({direction}) operation #{index} ({}): {e}",
                unit.id,
                op.kind()
            ))
        })?;
    }
    Ok(out)
}

fn create_table(d: &dyn SqlDialect, schema: &TableSchema) -> Vec<String> {
    let mut parts: Vec<String> = schema
        .columns
        .iter()
        .map(|c| column_definition(d, c))
        .collect();
    parts.push(format!("PRIMARY KEY ({})", quote_list(d, &schema.primary_key)));
    if d.native_foreign_keys() {
        parts.extend(schema.foreign_keys.iter().map(|fk| foreign_key_clause(d, fk)));
    }
    let mut out = vec![format!(
        "CREATE TABLE {} ({})",
        d.quote(&schema.name),
        parts.join(", ")
    )];
    out.extend(
        schema
            .indexes
            .iter()
            .map(|index| create_index(d, &schema.name, index)),
    );
    out
}

fn create_index(d: &dyn SqlDialect, table: &TableName, index: &IndexDef) -> String {
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        d.quote(&index.name),
        d.quote(table),
        quote_list(d, &index.columns)
    )
}

fn foreign_key_clause(d: &dyn SqlDialect, fk: &ForeignKeyDef) -> String {
    let action = match fk.on_delete {
        OnDelete::Restrict => "RESTRICT",
        OnDelete::Cascade => "CASCADE",
        OnDelete::SetNull => "SET NULL",
    };
    format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
        d.quote(&fk.name),
        quote_list(d, &fk.columns),
        d.quote(&fk.references_table),
        quote_list(d, &fk.references_columns),
        action
    )
}

/// Whether `op` has to rebuild its table. A nullable column without an
/// expression default is added in place; everything else on a table with
/// indexes is refused by dialects that rebuild.
fn needs_rebuild(d: &dyn SqlDialect, current: &TableState, op: &Operation) -> bool {
    if !d.rebuilds_indexed_tables() || current.schema.indexes.is_empty() {
        return false;
    }
    match op {
        Operation::AddColumn { column, .. } => {
            !column.nullable || matches!(column.default, Some(DefaultValue::Expression { .. }))
        }
        _ => true,
    }
}

/// Recreate a table in the shape `op` gives it: copy its rows aside, drop
/// it, create it again and copy the rows back, then create its indexes.
///
/// Dropping an index and creating one of the same name on the same table
/// cannot happen in one transaction, but a new table starts without any.
fn rebuild_table(
    d: &dyn SqlDialect,
    op: &Operation,
    current: &TableState,
    before: &SchemaState,
    ctx: &ApplyContext,
) -> DbResult<Vec<String>> {
    let table = current.name();
    let mut after = before.clone();
    after
        .apply(op, ctx)
        .map_err(|e| DbError::InvalidOperation(e.to_string()))?;
    let target = &require_table(&after, table)?.schema;

    let holding = d.quote(&format!("{table}__rpl_rebuild"));
    let select = target
        .columns
        .iter()
        .map(|column| {
            Ok(format!(
                "CAST({} AS {}) AS {}",
                copy_source(d, op, column, ctx)?,
                d.column_type(&column.ty),
                d.quote(&column.name)
            ))
        })
        .collect::<DbResult<Vec<_>>>()?
        .join(", ");
    let names: Vec<ColumnName> = target.columns.iter().map(|c| c.name.clone()).collect();
    let columns = quote_list(d, &names);

    let mut ddl = create_table(d, target);
    let indexes = ddl.split_off(1);
    let mut out = vec![
        format!("CREATE TABLE {holding} AS SELECT {select} FROM {}", d.quote(table)),
        format!("DROP TABLE {}", d.quote(table)),
    ];
    out.extend(ddl);
    out.push(format!(
        "INSERT INTO {} ({columns}) SELECT {columns} FROM {holding}",
        d.quote(table)
    ));
    out.push(format!("DROP TABLE {holding}"));
    out.extend(indexes);
    Ok(out)
}

/// Where a rebuilt column's values come from in the old table.
fn copy_source(d: &dyn SqlDialect, op: &Operation, column: &ColumnDef, ctx: &ApplyContext) -> DbResult<String> {
    match op {
        Operation::AddColumn { table, column: added } if added.name == column.name => {
            let fill = evaluate_default(table, added, ctx)
                .map_err(|e| DbError::InvalidOperation(e.to_string()))?;
            Ok(d.literal(&fill))
        }
        Operation::RenameColumn { from, to, .. } if *to == column.name => Ok(d.quote(from)),
        _ => Ok(d.quote(&column.name)),
    }
}

fn insert_data(
    d: &dyn SqlDialect,
    table: &TableState,
    columns: &[ColumnName],
    rows: &[Vec<Value>],
    ctx: &ApplyContext,
) -> DbResult<Vec<String>> {
    let schema = &table.schema;
    let name = table.name();
    // Omitted columns with a default get the value the engine computes.
    let mut filled: Vec<&ColumnDef> = Vec::new();
    let mut generated: Vec<&ColumnDef> = Vec::new();
    for def in &schema.columns {
        if columns.contains(&def.name) {
            continue;
        }
        if def.identity {
            generated.push(def);
        } else if def.default.is_some() {
            filled.push(def);
        }
    }
    let computed_identity = d.identity_clause().is_none() && !generated.is_empty();

    let mut target: Vec<ColumnName> = columns.to_vec();
    target.extend(filled.iter().map(|c| c.name.clone()));
    if computed_identity {
        target.extend(generated.iter().map(|c| c.name.clone()));
    }
    let head = format!("INSERT INTO {} ({})", d.quote(name), quote_list(d, &target));

    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != columns.len() {
            return Err(DbError::InvalidOperation(format!(
                "row of {} values for {} columns in {}",
                row.len(),
                columns.len(),
                name
            )));
        }
        let mut values = columns
            .iter()
            .zip(row)
            .map(|(c, v)| typed_literal(d, schema, c, v))
            .collect::<DbResult<Vec<_>>>()?;
        for def in &filled {
            let v = evaluate_default(name, def, ctx)
                .map_err(|e| DbError::InvalidOperation(e.to_string()))?;
            values.push(d.literal(&v));
        }
        tuples.push(values);
    }

    if computed_identity {
        // One statement per row so each sees the identity values before it.
        let selects = tuples
            .into_iter()
            .map(|mut values| {
                values.extend(generated.iter().map(|c| {
                    format!("COALESCE(MAX({}), 0) + 1", d.quote(&c.name))
                }));
                format!("{head} SELECT {} FROM {}", values.join(", "), d.quote(name))
            })
            .collect();
        return Ok(selects);
    }
    if tuples.is_empty() {
        return Ok(Vec::new());
    }
    let values: Vec<String> = tuples
        .iter()
        .map(|v| format!("({})", v.join(", ")))
        .collect();
    Ok(vec![format!("{head} VALUES {}", values.join(", "))])
}

fn update_data(
    d: &dyn SqlDialect,
    schema: &TableSchema,
    key_columns: &[ColumnName],
    columns: &[ColumnName],
    rows: &[RowUpdate],
) -> DbResult<Vec<String>> {
    rows.iter()
        .map(|row| {
            let sets = columns
                .iter()
                .zip(&row.values)
                .map(|(c, v)| Ok(format!("{} = {}", d.quote(c), typed_literal(d, schema, c, v)?)))
                .collect::<DbResult<Vec<_>>>()?;
            Ok(format!(
                "UPDATE {} SET {} WHERE {}",
                d.quote(&schema.name),
                sets.join(", "),
                key_predicate(d, schema, None, key_columns, &row.key)?
            ))
        })
        .collect()
}

fn delete_data(
    d: &dyn SqlDialect,
    before: &SchemaState,
    table: &TableName,
    key_columns: &[ColumnName],
    keys: &[Vec<Value>],
) -> DbResult<Vec<String>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let schema = &require_table(before, table)?.schema;
    let mut out = Vec::new();
    if !d.native_foreign_keys() {
        let root = |alias: &str| keys_predicate(d, schema, Some(alias), key_columns, keys);
        walk_dependants(d, before, table, &root, &mut |child, fk, predicate| {
            let target = d.quote(child);
            match fk.on_delete {
                OnDelete::Cascade => out.push(format!("DELETE FROM {target} WHERE {predicate}")),
                OnDelete::SetNull => {
                    let sets: Vec<String> = fk
                        .columns
                        .iter()
                        .map(|c| format!("{} = NULL", d.quote(c)))
                        .collect();
                    out.push(format!(
                        "UPDATE {target} SET {} WHERE {predicate}",
                        sets.join(", ")
                    ));
                }
                OnDelete::Restrict => {}
            }
        })?;
    }
    out.push(format!(
        "DELETE FROM {} WHERE {}",
        d.quote(table),
        keys_predicate(d, schema, None, key_columns, keys)?
    ));
    Ok(out)
}

/// `WHERE` condition matching any of `keys` in `table`.
pub fn key_filter(
    d: &dyn SqlDialect,
    table: &TableSchema,
    key_columns: &[ColumnName],
    keys: &[Vec<Value>],
) -> DbResult<String> {
    if keys.is_empty() {
        return Ok("FALSE".to_string());
    }
    keys_predicate(d, table, None, key_columns, keys)
}

/// A query counting rows that block a delete through a restrict foreign key.
#[derive(Debug, Clone, PartialEq)]
pub struct RestrictProbe {
    /// The referencing table
    pub table: TableName,
    /// The restrict constraint
    pub constraint: String,
    /// Query returning the blocking rows
    pub sql: String,
}

/// Probes for every restrict foreign key reached when deleting `keys` from
/// `table`, following cascades.
pub fn restrict_probes(
    d: &dyn SqlDialect,
    before: &SchemaState,
    table: &TableName,
    key_columns: &[ColumnName],
    keys: &[Vec<Value>],
) -> DbResult<Vec<RestrictProbe>> {
    let schema = &require_table(before, table)?.schema;
    let root = |alias: &str| keys_predicate(d, schema, Some(alias), key_columns, keys);
    let mut probes = Vec::new();
    if keys.is_empty() {
        return Ok(probes);
    }
    walk_dependants(d, before, table, &root, &mut |child, fk, predicate| {
        if fk.on_delete == OnDelete::Restrict {
            probes.push(RestrictProbe {
                table: child.clone(),
                constraint: fk.name.clone(),
                sql: format!("SELECT 1 FROM {} WHERE {predicate}", d.quote(child)),
            });
        }
    })?;
    Ok(probes)
}

type RootPredicate<'a> = dyn Fn(&str) -> DbResult<String> + 'a;
type Visitor<'a> = dyn FnMut(&TableName, &ForeignKeyDef, String) + 'a;

/// Visit the foreign keys a delete from `table` reaches, with a predicate
/// selecting the affected referencing rows.
///
/// Cascades are followed and reported after their own dependants, so the
/// visit order is a valid statement order.
fn walk_dependants(
    d: &dyn SqlDialect,
    before: &SchemaState,
    table: &TableName,
    root: &RootPredicate<'_>,
    visit: &mut Visitor<'_>,
) -> DbResult<()> {
    let mut chain = vec![table.clone()];
    walk_from(d, before, &mut chain, &mut Vec::new(), root, visit)
}

/// `hops[i]` is the foreign key linking `chain[i + 1]` to `chain[i]`.
fn walk_from(
    d: &dyn SqlDialect,
    before: &SchemaState,
    chain: &mut Vec<TableName>,
    hops: &mut Vec<ForeignKeyDef>,
    root: &RootPredicate<'_>,
    visit: &mut Visitor<'_>,
) -> DbResult<()> {
    let Some(parent) = chain.last().cloned() else {
        return Ok(());
    };
    for (child, fk) in before.incoming_foreign_keys(&parent) {
        if chain.contains(child) {
            log::warn!(
                "{}: on-delete action of {} on {} is not followed (cyclic reference)",
                d.name(),
                fk.name,
                child
            );
            continue;
        }
        chain.push(child.clone());
        hops.push(fk.clone());
        let predicate = chain_predicate(d, chain, hops, &d.quote(child), root)?;
        if fk.on_delete == OnDelete::Cascade {
            walk_from(d, before, chain, hops, root, visit)?;
        }
        visit(child, fk, predicate);
        chain.pop();
        hops.pop();
    }
    Ok(())
}

/// Predicate selecting the rows of `chain.last()` (referred to as `outer`)
/// that reach a deleted root row through `hops`.
fn chain_predicate(
    d: &dyn SqlDialect,
    chain: &[TableName],
    hops: &[ForeignKeyDef],
    outer: &str,
    root: &RootPredicate<'_>,
) -> DbResult<String> {
    let (Some((fk, rest)), Some((_, parents))) = (hops.split_last(), chain.split_last()) else {
        return root(outer);
    };
    let Some(parent) = parents.last() else {
        return root(outer);
    };
    let alias = format!("p{}", hops.len());
    let join: Vec<String> = fk
        .columns
        .iter()
        .zip(&fk.references_columns)
        .map(|(c, r)| format!("{alias}.{} = {outer}.{}", d.quote(r), d.quote(c)))
        .collect();
    Ok(format!(
        "EXISTS (SELECT 1 FROM {} {alias} WHERE {} AND {})",
        d.quote(parent),
        join.join(" AND "),
        chain_predicate(d, parents, rest, &alias, root)?
    ))
}

#[cfg(test)]
#[path = "dialect_test.rs"]
mod tests;
