use super::*;
use crate::column::ColumnType;
use crate::table::{IndexDef, OnDelete};
use crate::value::parse_timestamp;

fn ctx() -> ApplyContext {
    ApplyContext::at(parse_timestamp("2024-03-05 10:22:45").unwrap())
}

fn id(s: &str) -> MigrationId {
    MigrationId::parse(s).unwrap()
}

fn cols(names: &[&str]) -> Vec<ColumnName> {
    names.iter().map(|n| ColumnName::new(*n)).collect()
}

fn build(ops: Vec<Operation>) -> SchemaState {
    let mut state = SchemaState::new();
    state.apply_ops(&ops, &ctx()).unwrap();
    state
}

fn currencies(codigo: ColumnType) -> Operation {
    Operation::CreateTable(TableSchema {
        name: TableName::new("Currencies"),
        columns: vec![
            ColumnDef::new("Id", ColumnType::Int).identity(),
            ColumnDef::new("Codigo", codigo),
        ],
        primary_key: cols(&["Id"]),
        foreign_keys: vec![],
        indexes: vec![IndexDef {
            name: "IX_Currencies_Codigo".to_string(),
            columns: cols(&["Codigo"]),
            unique: true,
        }],
    })
}

fn polizas() -> Operation {
    Operation::CreateTable(TableSchema {
        name: TableName::new("Polizas"),
        columns: vec![
            ColumnDef::new("Id", ColumnType::Int).identity(),
            ColumnDef::new("CurrencyId", ColumnType::Int),
        ],
        primary_key: cols(&["Id"]),
        foreign_keys: vec![ForeignKeyDef {
            name: "FK_Polizas_Currencies_CurrencyId".to_string(),
            columns: cols(&["CurrencyId"]),
            references_table: TableName::new("Currencies"),
            references_columns: cols(&["Id"]),
            on_delete: OnDelete::Restrict,
        }],
        indexes: vec![],
    })
}

fn seed(codes: &[&str]) -> Operation {
    Operation::InsertData {
        table: TableName::new("Currencies"),
        columns: cols(&["Codigo"]),
        rows: codes.iter().map(|c| vec![Value::text(*c)]).collect(),
    }
}

#[test]
fn test_identical_states_have_no_diff() {
    let state = build(vec![currencies(ColumnType::Varchar(3)), seed(&["UYU"])]);
    assert!(diff_schemas(&state, &state.clone()).unwrap().is_empty());
}

#[test]
fn test_generate_from_empty_orders_by_dependency() {
    let to = build(vec![
        currencies(ColumnType::Varchar(3)),
        polizas(),
        seed(&["UYU", "USD", "UI"]),
    ]);
    let unit = generate_unit(id("20240115093012_InitialCreate"), &SchemaState::new(), &to).unwrap();

    let kinds: Vec<(&str, &str)> = unit.up.iter().map(|op| (op.kind(), op.table().as_str())).collect();
    assert_eq!(
        kinds,
        vec![
            ("create_table", "Currencies"),
            ("create_table", "Polizas"),
            ("insert_data", "Currencies"),
        ]
    );
    let down: Vec<(&str, &str)> = unit.down.iter().map(|op| (op.kind(), op.table().as_str())).collect();
    assert_eq!(
        down,
        vec![("drop_table", "Polizas"), ("drop_table", "Currencies")]
    );
}

#[test]
fn test_widening_and_narrowing_alters() {
    let from = build(vec![currencies(ColumnType::Varchar(3)), seed(&["UYU"])]);
    let to = build(vec![currencies(ColumnType::Varchar(10)), seed(&["UYU"])]);
    let unit = generate_unit(id("20240503091140_WidenCodigo"), &from, &to).unwrap();

    let alter_up = unit
        .up
        .iter()
        .find_map(|op| match op {
            Operation::AlterColumn { coerce, .. } => Some(*coerce),
            _ => None,
        })
        .unwrap();
    let alter_down = unit
        .down
        .iter()
        .find_map(|op| match op {
            Operation::AlterColumn { coerce, .. } => Some(*coerce),
            _ => None,
        })
        .unwrap();
    assert!(!alter_up);
    assert!(alter_down);
}

#[test]
fn test_seed_changes_become_data_operations() {
    let from = build(vec![currencies(ColumnType::Varchar(3)), seed(&["UYU", "USD"])]);
    let to = build(vec![
        currencies(ColumnType::Varchar(3)),
        seed(&["UYU", "USD", "UI"]),
        Operation::UpdateData {
            table: TableName::new("Currencies"),
            key_columns: cols(&["Id"]),
            columns: cols(&["Codigo"]),
            rows: vec![RowUpdate {
                key: vec![Value::Int(2)],
                values: vec![Value::text("EUR")],
            }],
        },
    ]);
    let unit = generate_unit(id("20240618113027_ReferenceData"), &from, &to).unwrap();
    let kinds: Vec<&str> = unit.up.iter().map(Operation::kind).collect();
    assert_eq!(kinds, vec!["insert_data", "update_data"]);
    let kinds: Vec<&str> = unit.down.iter().map(Operation::kind).collect();
    assert_eq!(kinds, vec!["delete_data", "update_data"]);
}

#[test]
fn test_primary_key_change_is_unsupported() {
    let from = build(vec![currencies(ColumnType::Varchar(3))]);
    let to = build(vec![Operation::CreateTable(TableSchema {
        name: TableName::new("Currencies"),
        columns: vec![
            ColumnDef::new("Id", ColumnType::Int).identity(),
            ColumnDef::new("Codigo", ColumnType::Varchar(3)),
        ],
        primary_key: cols(&["Codigo"]),
        foreign_keys: vec![],
        indexes: vec![],
    })]);
    let err = diff_schemas(&from, &to).unwrap_err();
    assert!(matches!(err, CoreError::UnsupportedDiff { .. }), "{err}");
}

#[test]
fn test_cross_family_change_is_unsupported() {
    let from = build(vec![currencies(ColumnType::Varchar(3))]);
    let to = build(vec![currencies(ColumnType::Int)]);
    assert!(matches!(
        diff_schemas(&from, &to),
        Err(CoreError::UnsupportedDiff { .. })
    ));
}

#[test]
fn test_added_column_with_default_needs_no_update() {
    let from = build(vec![currencies(ColumnType::Varchar(3)), seed(&["UYU"])]);
    let mut to = from.clone();
    to.apply(
        &Operation::AddColumn {
            table: TableName::new("Currencies"),
            column: ColumnDef::new("Activa", ColumnType::Bool)
                .with_default(crate::column::DefaultValue::Literal(Value::Bool(true))),
        },
        &ctx(),
    )
    .unwrap();
    let ops = diff_schemas(&from, &to).unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].kind(), "add_column");
}
