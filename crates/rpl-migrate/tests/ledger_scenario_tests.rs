//! Scenario tests replaying the builtin RegularizadorPolizas ledger in memory.

use rpl_core::value::parse_timestamp;
use rpl_core::{
    validate, ApplyContext, ApplyError, ColumnName, ColumnType, Direction, Ledger, Operation, SchemaState, Severity, TableName,
    ValidationKind, Value,
};
use rpl_migrate::polizas_ledger;

// ── Helpers ────────────────────────────────────────────────────────────

fn ledger() -> Ledger {
    polizas_ledger().unwrap()
}

fn cols(names: &[&str]) -> Vec<ColumnName> {
    names.iter().map(|n| ColumnName::new(*n)).collect()
}

fn ts(s: &str) -> Value {
    Value::Timestamp(parse_timestamp(s).unwrap())
}

fn ctx() -> ApplyContext {
    ApplyContext::at(parse_timestamp("2024-07-01 09:00:00").unwrap())
}

fn cell(state: &SchemaState, table: &str, key_column: &str, key: Value, column: &str) -> Option<Value> {
    let table = state.table(table)?;
    let row = table.find_row(&cols(&[key_column]), &[key])?;
    table.rows[row].get(column).cloned()
}

// ── Replay ─────────────────────────────────────────────────────────────

#[test]
fn test_initial_create_tables_and_seed_rows() {
    let state = ledger().replay(1).unwrap();
    assert_eq!(state.table_names().len(), 8);
    assert_eq!(state.row_count("Companies"), 4);
    assert_eq!(state.row_count("Currencies"), 3);
    assert_eq!(state.row_count("Polizas"), 0);
    assert_eq!(
        cell(&state, "Companies", "Id", Value::Int(1), "Codigo"),
        Some(Value::from("BSE"))
    );
    // Default filled for a column the insert omits
    assert_eq!(
        cell(&state, "Companies", "Id", Value::Int(4), "Activa"),
        Some(Value::Bool(true))
    );
}

#[test]
fn test_every_unit_round_trips() {
    let ledger = ledger();
    for (i, unit) in ledger.units().iter().enumerate() {
        if !unit.lossy_down.is_empty() {
            continue;
        }
        let before = ledger.replay(i).unwrap();
        let mut state = before.clone();
        state.apply_unit(unit, Direction::Up).unwrap();
        state.apply_unit(unit, Direction::Down).unwrap();
        assert!(
            before.same_as(&state),
            "{} does not round trip: {:?}",
            unit.id,
            before.differences(&state)
        );
    }
}

#[test]
fn test_lossy_unit_differs_only_on_declared_column() {
    let ledger = ledger();
    let position = ledger.require_position("20240503091140_WidenPolizaObservaciones").unwrap();
    let unit = &ledger.units()[position];
    let before = ledger.replay(position).unwrap();
    let mut state = before.clone();
    state.apply_unit(unit, Direction::Up).unwrap();
    state.apply_unit(unit, Direction::Down).unwrap();

    assert!(!before.same_as(&state));
    let polizas = &state.table("Polizas").unwrap().schema;
    assert_eq!(polizas.column("Observaciones").unwrap().ty, ColumnType::Text);
    assert!(unit.is_lossy("Polizas", "Observaciones"));
}

#[test]
fn test_full_up_then_full_down_is_empty() {
    let ledger = ledger();
    let mut state = ledger.replay(ledger.len()).unwrap();
    for unit in ledger.units().iter().rev() {
        state.apply_unit(unit, Direction::Down).unwrap();
    }
    assert!(state.is_empty(), "left over: {:?}", state.table_names());
}

#[test]
fn test_mode_unit_down_restores_timestamps() {
    let ledger = ledger();
    let position = ledger.require_position("20240610120000_AddModeToApiKeys").unwrap();
    let mut state = ledger.replay(ledger.len()).unwrap();
    assert_eq!(
        cell(&state, "Permissions", "Id", Value::Int(3), "CreatedAt"),
        Some(ts("2024-06-10 12:00:00"))
    );
    assert!(state.table("ApiKeys").unwrap().schema.column("Mode").is_some());

    state
        .apply_unit(&ledger.units()[position], Direction::Down)
        .unwrap();
    assert_eq!(
        cell(&state, "Permissions", "Id", Value::Int(3), "CreatedAt"),
        Some(ts("2024-02-20 14:15:30"))
    );
    assert_eq!(
        cell(&state, "Permissions", "Id", Value::Int(10), "CreatedAt"),
        Some(ts("2024-03-12 10:45:00"))
    );
    assert!(state.table("ApiKeys").unwrap().schema.column("Mode").is_none());
}

#[test]
fn test_update_data_is_idempotent() {
    let ledger = ledger();
    let position = ledger.require_position("20240610120000_AddModeToApiKeys").unwrap();
    let update = ledger.units()[position]
        .up
        .iter()
        .find(|op| matches!(op, Operation::UpdateData { .. }))
        .unwrap()
        .clone();

    let mut once = ledger.replay(ledger.len()).unwrap();
    let snapshot = once.clone();
    once.apply(&update, &ctx()).unwrap();
    assert!(snapshot.same_as(&once));
}

// ── Rejected data ──────────────────────────────────────────────────────

#[test]
fn test_duplicate_company_code_is_rejected() {
    let mut state = ledger().replay(1).unwrap();
    let snapshot = state.clone();
    let op = Operation::InsertData {
        table: TableName::new("Companies"),
        columns: cols(&["Codigo", "Nombre"]),
        rows: vec![vec![Value::from("BSE"), Value::from("Otra aseguradora")]],
    };
    let err = state.apply(&op, &ctx()).unwrap_err();
    match err {
        ApplyError::UniquenessViolation { constraint, .. } => assert_eq!(constraint, "IX_Companies_Codigo"),
        other => panic!("expected UniquenessViolation, got {other}"),
    }
    assert!(snapshot.same_as(&state));
}

#[test]
fn test_poliza_for_missing_client_is_rejected() {
    let mut state = ledger().replay(1).unwrap();
    let op = Operation::InsertData {
        table: TableName::new("Polizas"),
        columns: cols(&["Conpol", "Clinro", "CompanyId", "CurrencyId", "Fecini", "Fecfin"]),
        rows: vec![vec![
            Value::from("POL-0001"),
            Value::Int(999),
            Value::Int(1),
            Value::Int(2),
            Value::from("2024-01-01"),
            Value::from("2025-01-01"),
        ]],
    };
    let err = state.apply(&op, &ctx()).unwrap_err();
    match err {
        ApplyError::OrphanedReference { constraint, target, .. } => {
            assert_eq!(constraint, "FK_Polizas_Clients_Clinro");
            assert_eq!(target, "Clients");
        }
        other => panic!("expected OrphanedReference, got {other}"),
    }
    assert_eq!(state.row_count("Polizas"), 0);
}

// ── Validation ─────────────────────────────────────────────────────────

#[test]
fn test_builtin_ledger_validates_with_lossy_warning_only() {
    let issues = validate(&ledger());
    assert!(
        issues.iter().all(|i| i.severity == Severity::Warning),
        "{:?}",
        issues.iter().map(|i| i.message.as_str()).collect::<Vec<_>>()
    );
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].kind, ValidationKind::LossyDown);
    assert_eq!(
        issues[0].unit.as_ref().map(|u| u.as_str()),
        Some("20240503091140_WidenPolizaObservaciones")
    );
}
