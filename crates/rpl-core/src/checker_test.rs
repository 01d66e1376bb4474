use super::*;
use crate::value::Value;

fn unit(yaml: &str) -> MigrationUnit {
    serde_yaml::from_str(yaml).unwrap()
}

const CREATE_BROKERS: &str = r#"
id: 20240115093012_InitialCreate
up:
  - op: create_table
    name: Brokers
    columns:
      - { name: Id, type: int, identity: true }
      - { name: Nombre, type: varchar(100) }
      - { name: Observaciones, type: varchar(100), nullable: true }
    primary_key: [Id]
  - op: insert_data
    table: Brokers
    columns: [Id, Nombre]
    rows:
      - [1, Directo]
down:
  - op: drop_table
    table: Brokers
"#;

fn widen(down_type: &str, lossy: bool) -> MigrationUnit {
    let lossy_block = if lossy {
        "lossy_down:\n  - { table: Brokers, column: Observaciones }\n"
    } else {
        ""
    };
    unit(&format!(
        r#"
id: 20240503091140_WidenObservaciones
up:
  - op: alter_column
    table: Brokers
    column: Observaciones
    from: {{ type: varchar(100), nullable: true }}
    to: {{ type: varchar(1000), nullable: true }}
down:
  - op: alter_column
    table: Brokers
    column: Observaciones
    from: {{ type: varchar(1000), nullable: true }}
    to: {{ type: {down_type}, nullable: true }}
    coerce: true
{lossy_block}"#
    ))
}

fn errors(issues: &[ValidationError]) -> Vec<&ValidationError> {
    issues.iter().filter(|i| i.is_error()).collect()
}

#[test]
fn test_valid_ledger_has_no_findings() {
    let ledger = Ledger::new(vec![unit(CREATE_BROKERS), widen("varchar(100)", false)]);
    let issues = validate(&ledger);
    assert!(issues.is_empty(), "{issues:?}");
}

#[test]
fn test_undeclared_lossy_down_is_an_error() {
    let ledger = Ledger::new(vec![unit(CREATE_BROKERS), widen("longtext", false)]);
    let issues = validate(&ledger);
    let errs = errors(&issues);
    assert_eq!(errs.len(), 1, "{issues:?}");
    assert_eq!(errs[0].kind, ValidationKind::NotInverse);
    assert_eq!(errs[0].unit.as_ref().unwrap().name(), "WidenObservaciones");
}

#[test]
fn test_declared_lossy_down_is_a_warning() {
    let ledger = Ledger::new(vec![unit(CREATE_BROKERS), widen("longtext", true)]);
    let issues = validate(&ledger);
    assert!(errors(&issues).is_empty(), "{issues:?}");
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].kind, ValidationKind::LossyDown);
    assert_eq!(issues[0].severity, Severity::Warning);
}

#[test]
fn test_declared_lossy_but_exact_is_reported() {
    let ledger = Ledger::new(vec![unit(CREATE_BROKERS), widen("varchar(100)", true)]);
    let issues = validate(&ledger);
    assert_eq!(issues.len(), 1);
    assert!(issues[0].message.contains("restores it exactly"));
}

#[test]
fn test_narrowing_down_needs_coerce() {
    let mut second = widen("varchar(100)", false);
    match &mut second.down[0] {
        crate::operation::Operation::AlterColumn { coerce, .. } => *coerce = false,
        other => panic!("unexpected {other:?}"),
    }
    let ledger = Ledger::new(vec![unit(CREATE_BROKERS), second]);
    let issues = validate(&ledger);
    let errs = errors(&issues);
    assert!(!errs.is_empty(), "{issues:?}");
    assert!(errs.iter().all(|e| e.kind == ValidationKind::DownFailed), "{issues:?}");
    assert!(errs[0].message.contains("requires coerce: true"), "{}", errs[0].message);
}

#[test]
fn test_down_that_forgets_seed_rows() {
    let mut u = unit(CREATE_BROKERS);
    u.up.push(crate::operation::Operation::InsertData {
        table: crate::names::TableName::new("Brokers"),
        columns: vec![
            crate::names::ColumnName::new("Id"),
            crate::names::ColumnName::new("Nombre"),
        ],
        rows: vec![vec![Value::Int(2), Value::text("Corredor")]],
    });
    let second = unit(
        r#"
id: 20240220141530_AddBroker
up:
  - op: insert_data
    table: Brokers
    columns: [Id, Nombre]
    rows:
      - [3, Agente]
down: []
"#,
    );
    let ledger = Ledger::new(vec![u, second]);
    let issues = validate(&ledger);
    let errs = errors(&issues);
    assert_eq!(errs.len(), 1, "{issues:?}");
    assert_eq!(errs[0].kind, ValidationKind::NotInverse);
    assert!(errs[0].message.contains("(3)"), "{}", errs[0].message);
}

#[test]
fn test_failed_up_stops_replay() {
    let broken = unit(
        r#"
id: 20240220141530_AddRoles
up:
  - op: add_column
    table: Roles
    column: { name: Nombre, type: varchar(50) }
down: []
"#,
    );
    let ledger = Ledger::new(vec![unit(CREATE_BROKERS), broken]);
    let issues = validate(&ledger);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].kind, ValidationKind::UpFailed);
    assert!(issues[0].message.contains("A002"), "{}", issues[0].message);
}

#[test]
fn test_ordering_findings() {
    let ledger = Ledger::new(vec![widen("varchar(100)", false), unit(CREATE_BROKERS)]);
    let issues = validate(&ledger);
    assert_eq!(issues[0].kind, ValidationKind::Ordering);
}

#[test]
fn test_foreign_key_type_ambiguity() {
    let polizas = unit(
        r#"
id: 20240220141530_AddPolizas
up:
  - op: create_table
    name: Polizas
    columns:
      - { name: Id, type: int }
      - { name: BrokerId, type: bigint, nullable: true }
    primary_key: [Id]
    foreign_keys:
      - name: FK_Polizas_Brokers_BrokerId
        columns: [BrokerId]
        references_table: Brokers
        references_columns: [Id]
        on_delete: set_null
down:
  - op: drop_table
    table: Polizas
"#,
    );
    let ledger = Ledger::new(vec![unit(CREATE_BROKERS), polizas]);
    let issues = validate(&ledger);
    assert_eq!(issues.len(), 1, "{issues:?}");
    assert_eq!(issues[0].kind, ValidationKind::TypeAmbiguity);
}

#[test]
fn test_compute_schema_at() {
    let ledger = Ledger::new(vec![unit(CREATE_BROKERS), widen("varchar(100)", false)]);
    let at_first = compute_schema_at(&ledger, 0).unwrap();
    let brokers = &at_first["Brokers"];
    assert_eq!(
        brokers.column("Observaciones").unwrap().ty.to_string(),
        "varchar(100)"
    );
    let at_second = compute_schema_at(&ledger, 1).unwrap();
    assert_eq!(
        at_second["Brokers"].column("Observaciones").unwrap().ty.to_string(),
        "varchar(1000)"
    );
    assert!(matches!(
        compute_schema_at(&ledger, 2),
        Err(CoreError::UnitIndexOutOfRange { index: 2, len: 2 })
    ));
}
