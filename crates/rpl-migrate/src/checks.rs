//! Data checks run against the live database around each operation.
//!
//! The in-memory replay already rejects everything the ledger itself gets
//! wrong. These queries catch rows the ledger does not know about, and stand
//! in for the constraints a dialect does not declare.

use rpl_core::value::format_key;
use rpl_core::{
    ApplyError, ColumnName, ColumnType, ForeignKeyDef, Operation, SchemaState, TableSchema, Value,
};
use rpl_db::{key_filter, restrict_probes, Database, DbError, SqlDialect};

/// Why a check did not pass.
#[derive(Debug)]
pub(crate) enum CheckFailure {
    /// The live data violates the operation's contract
    Violation(ApplyError),
    /// The check query itself failed
    Db(DbError),
}

impl From<DbError> for CheckFailure {
    fn from(err: DbError) -> Self {
        CheckFailure::Db(err)
    }
}

pub(crate) type CheckResult = Result<(), CheckFailure>;

/// Checks that must pass before the operation's statements run. `state` is
/// the schema before the operation.
pub(crate) async fn before(
    db: &dyn Database,
    d: &dyn SqlDialect,
    op: &Operation,
    state: &SchemaState,
) -> CheckResult {
    match op {
        Operation::AddColumn { table, column }
            if !column.nullable && column.default.is_none() && !column.identity =>
        {
            let schema = schema_of(state, table)?;
            if count(db, &format!("SELECT 1 FROM {}", d.quote(&schema.name))).await? > 0 {
                return Err(CheckFailure::Violation(ApplyError::ConstraintViolation {
                    table: table.to_string(),
                    detail: format!("NOT NULL column '{}' needs a default on a table with rows", column.name),
                }));
            }
            Ok(())
        }
        Operation::AlterColumn {
            table,
            column,
            to,
            from,
            ..
        } => {
            let schema = schema_of(state, table)?;
            let col = d.quote(column);
            let t = d.quote(&schema.name);
            if !from.ty.widens_to(&to.ty) {
                if let Some((predicate, detail)) = misfit_rows(&col, &from.ty, &to.ty) {
                    let sql = format!("SELECT 1 FROM {t} WHERE {col} IS NOT NULL AND ({predicate})");
                    if count(db, &sql).await? > 0 {
                        return Err(incompatible(table, column, detail));
                    }
                }
            }
            if from.nullable
                && !to.nullable
                && count(db, &format!("SELECT 1 FROM {t} WHERE {col} IS NULL")).await? > 0
            {
                return Err(incompatible(table, column, "rows hold NULL".to_string()));
            }
            Ok(())
        }
        Operation::CreateIndex { table, index } if index.unique => {
            let schema = schema_of(state, table)?;
            if let Some(found) = first_duplicate(db, d, schema, &index.columns).await? {
                return Err(CheckFailure::Violation(ApplyError::UniquenessViolation {
                    table: table.to_string(),
                    constraint: index.name.clone(),
                    key: found,
                }));
            }
            Ok(())
        }
        Operation::AddForeignKey { table, foreign_key } if !d.native_foreign_keys() => {
            let schema = schema_of(state, table)?;
            check_orphans(db, d, schema, foreign_key).await
        }
        Operation::InsertData {
            table,
            columns,
            rows,
        } => {
            let schema = schema_of(state, table)?;
            check_insert_keys(db, d, schema, columns, rows).await
        }
        Operation::UpdateData {
            table,
            key_columns,
            rows,
            ..
        } => {
            let schema = schema_of(state, table)?;
            for row in rows {
                check_row_exists(db, d, schema, key_columns, &row.key).await?;
            }
            Ok(())
        }
        Operation::DeleteData {
            table,
            key_columns,
            keys,
        } => {
            let schema = schema_of(state, table)?;
            for key in keys {
                check_row_exists(db, d, schema, key_columns, key).await?;
            }
            if !d.native_foreign_keys() {
                for probe in restrict_probes(d, state, table, key_columns, keys)? {
                    let blocking = count(db, &probe.sql).await?;
                    if blocking > 0 {
                        return Err(CheckFailure::Violation(ApplyError::ConstraintViolation {
                            table: table.to_string(),
                            detail: format!(
                                "{blocking} row(s) of '{}' still reference it through '{}'",
                                probe.table, probe.constraint
                            ),
                        }));
                    }
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Checks on the data an operation wrote. `state` is the schema after the
/// operation.
pub(crate) async fn after(
    db: &dyn Database,
    d: &dyn SqlDialect,
    op: &Operation,
    state: &SchemaState,
) -> CheckResult {
    if d.native_foreign_keys() {
        return Ok(());
    }
    match op {
        Operation::InsertData { table, .. } => {
            let schema = schema_of(state, table)?;
            for fk in &schema.foreign_keys {
                check_orphans(db, d, schema, fk).await?;
            }
            Ok(())
        }
        Operation::UpdateData { table, columns, .. } => {
            let schema = schema_of(state, table)?;
            for fk in &schema.foreign_keys {
                if fk.columns.iter().any(|c| columns.contains(c)) {
                    check_orphans(db, d, schema, fk).await?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn schema_of<'a>(state: &'a SchemaState, table: &str) -> Result<&'a TableSchema, CheckFailure> {
    state
        .table(table)
        .map(|t| &t.schema)
        .ok_or_else(|| {
            CheckFailure::Violation(ApplyError::UnknownTable {
                table: table.to_string(),
            })
        })
}

/// Predicate matching the values of `col` that do not fit `to`, with a
/// description of them. `None` when every value converts.
fn misfit_rows(col: &str, from: &ColumnType, to: &ColumnType) -> Option<(String, String)> {
    use ColumnType::*;
    match (from, to) {
        (_, Varchar(n)) => Some((
            format!("length({col}) > {n}"),
            format!("values longer than {n} characters"),
        )),
        (_, SmallInt | Int | BigInt) => {
            let (min, max) = match to {
                SmallInt => (i64::from(i16::MIN), i64::from(i16::MAX)),
                Int => (i64::from(i32::MIN), i64::from(i32::MAX)),
                _ => (i64::MIN, i64::MAX),
            };
            let mut predicate = format!("{col} < {min} OR {col} > {max}");
            let mut detail = format!("values outside {min}..{max}");
            if matches!(from, Decimal { .. } | Double) {
                predicate.push_str(&format!(" OR floor({col}) <> {col}"));
                detail.push_str(" or with a fractional part");
            }
            Some((predicate, detail))
        }
        (_, Decimal { precision, scale }) => {
            let digits = precision.saturating_sub(*scale);
            let bound = format!("1{}", "0".repeat(usize::from(digits)));
            Some((
                format!("{col} <= -{bound} OR {col} >= {bound} OR round({col}, {scale}) <> {col}"),
                format!("values that do not fit decimal({precision},{scale})"),
            ))
        }
        // Doubles hold 15 significant digits exactly
        (BigInt, Double) => Some((
            format!("abs({col}) > 9007199254740992"),
            "integers too large for a double".to_string(),
        )),
        (Decimal { precision, scale }, Double) if *precision > 15 => Some((
            format!("CAST(CAST({col} AS DOUBLE) AS DECIMAL({precision},{scale})) <> {col}"),
            "values a double cannot hold exactly".to_string(),
        )),
        (Timestamp, Date) => Some((
            format!("CAST({col} AS DATE) <> {col}"),
            "values with a time of day".to_string(),
        )),
        _ => None,
    }
}

fn incompatible(table: &str, column: &str, detail: String) -> CheckFailure {
    CheckFailure::Violation(ApplyError::IncompatibleAlter {
        table: table.to_string(),
        column: column.to_string(),
        detail,
    })
}

async fn count(db: &dyn Database, sql: &str) -> Result<usize, DbError> {
    db.query_count(sql).await
}

/// `CAST(a AS VARCHAR), CAST(b AS VARCHAR)` with an optional alias.
fn as_text(d: &dyn SqlDialect, alias: Option<&str>, columns: &[ColumnName]) -> String {
    columns
        .iter()
        .map(|c| match alias {
            Some(a) => format!("CAST({a}.{} AS VARCHAR)", d.quote(c)),
            None => format!("CAST({} AS VARCHAR)", d.quote(c)),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn not_null(d: &dyn SqlDialect, alias: Option<&str>, columns: &[ColumnName]) -> String {
    columns
        .iter()
        .map(|c| match alias {
            Some(a) => format!("{a}.{} IS NOT NULL", d.quote(c)),
            None => format!("{} IS NOT NULL", d.quote(c)),
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `(1, 'BSE')` from a row read as text.
fn found_key(row: Vec<Option<String>>) -> String {
    let parts: Vec<String> = row
        .into_iter()
        .map(|v| v.unwrap_or_else(|| "NULL".to_string()))
        .collect();
    format!("({})", parts.join(", "))
}

async fn first_row(db: &dyn Database, sql: &str) -> Result<Option<Vec<Option<String>>>, DbError> {
    Ok(db
        .query_rows(&format!("{sql} LIMIT 1"))
        .await?
        .into_iter()
        .next())
}

async fn check_row_exists(
    db: &dyn Database,
    d: &dyn SqlDialect,
    schema: &TableSchema,
    key_columns: &[ColumnName],
    key: &[Value],
) -> CheckResult {
    let filter = key_filter(d, schema, key_columns, &[key.to_vec()])?;
    let sql = format!("SELECT 1 FROM {} WHERE {filter}", d.quote(&schema.name));
    if count(db, &sql).await? == 0 {
        return Err(CheckFailure::Violation(ApplyError::RowNotFound {
            table: schema.name.to_string(),
            key: format_key(key),
        }));
    }
    Ok(())
}

/// Primary key and unique indexes with their constraint names.
fn unique_keys(schema: &TableSchema) -> Vec<(String, &[ColumnName])> {
    let mut keys = vec![("primary key".to_string(), schema.primary_key.as_slice())];
    keys.extend(
        schema
            .indexes
            .iter()
            .filter(|i| i.unique)
            .map(|i| (i.name.clone(), i.columns.as_slice())),
    );
    keys
}

/// Inserted keys that already exist in the table.
async fn check_insert_keys(
    db: &dyn Database,
    d: &dyn SqlDialect,
    schema: &TableSchema,
    columns: &[ColumnName],
    rows: &[Vec<Value>],
) -> CheckResult {
    for (constraint, key_columns) in unique_keys(schema) {
        let Some(positions) = key_columns
            .iter()
            .map(|k| columns.iter().position(|c| c == k))
            .collect::<Option<Vec<_>>>()
        else {
            // Key generated by the insert
            continue;
        };
        let keys: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                    .collect::<Vec<_>>()
            })
            .filter(|key| key.iter().all(|v| !v.is_null()))
            .collect();
        if keys.is_empty() {
            continue;
        }
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            as_text(d, None, key_columns),
            d.quote(&schema.name),
            key_filter(d, schema, key_columns, &keys)?
        );
        if let Some(found) = first_row(db, &sql).await? {
            return Err(CheckFailure::Violation(ApplyError::UniquenessViolation {
                table: schema.name.to_string(),
                constraint,
                key: found_key(found),
            }));
        }
    }
    Ok(())
}

/// First value tuple held by more than one row, NULLs excluded.
async fn first_duplicate(
    db: &dyn Database,
    d: &dyn SqlDialect,
    schema: &TableSchema,
    columns: &[ColumnName],
) -> Result<Option<String>, DbError> {
    let grouped = columns
        .iter()
        .map(|c| d.quote(c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM {} WHERE {} GROUP BY {grouped} HAVING COUNT(*) > 1",
        as_text(d, None, columns),
        d.quote(&schema.name),
        not_null(d, None, columns)
    );
    Ok(first_row(db, &sql).await?.map(found_key))
}

/// Rows of `schema` whose foreign key has no target row.
async fn check_orphans(
    db: &dyn Database,
    d: &dyn SqlDialect,
    schema: &TableSchema,
    fk: &ForeignKeyDef,
) -> CheckResult {
    let join = fk
        .columns
        .iter()
        .zip(&fk.references_columns)
        .map(|(c, r)| format!("p.{} = c.{}", d.quote(r), d.quote(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let sql = format!(
        "SELECT {} FROM {} c WHERE {} AND NOT EXISTS (SELECT 1 FROM {} p WHERE {join})",
        as_text(d, Some("c"), &fk.columns),
        d.quote(&schema.name),
        not_null(d, Some("c"), &fk.columns),
        d.quote(&fk.references_table)
    );
    if let Some(found) = first_row(db, &sql).await? {
        return Err(CheckFailure::Violation(ApplyError::OrphanedReference {
            table: schema.name.to_string(),
            constraint: fk.name.clone(),
            target: fk.references_table.to_string(),
            key: found_key(found),
        }));
    }
    Ok(())
}
