use super::*;
use crate::operation::Operation;
use crate::unit::MigrationId;
use tempfile::TempDir;

const INITIAL: &str = r#"
id: 20240115093012_InitialCreate
description: Brokers table
up:
  - op: create_table
    name: Brokers
    columns:
      - { name: Id, type: int, identity: true }
      - { name: Nombre, type: varchar(100) }
    primary_key: [Id]
down:
  - op: drop_table
    table: Brokers
"#;

const ROLES: &str = r#"
id: 20240220141530_AddRoles
up:
  - op: add_column
    table: Brokers
    column: { name: Telefono, type: varchar(20), nullable: true }
down:
  - op: drop_column
    table: Brokers
    column: Telefono
"#;

fn write(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

#[test]
fn test_load_ledger_dir_orders_by_id() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "20240220141530_AddRoles.yml", ROLES);
    write(dir.path(), "20240115093012_InitialCreate.yaml", INITIAL);
    write(dir.path(), "README.md", "not a unit");

    let ledger = load_ledger_dir(dir.path()).unwrap();
    let ids: Vec<&str> = ledger.ids().map(|id| id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["20240115093012_InitialCreate", "20240220141530_AddRoles"]
    );
    assert_eq!(
        ledger.units()[0].description.as_deref(),
        Some("Brokers table")
    );
}

#[test]
fn test_missing_directory() {
    let dir = TempDir::new().unwrap();
    let err = load_ledger_dir(&dir.path().join("migrations")).unwrap_err();
    assert!(matches!(err, CoreError::LedgerNotFound { .. }));
}

#[test]
fn test_file_name_must_match_id() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "20240115093012_Initial.yml", INITIAL);
    let err = load_ledger_dir(dir.path()).unwrap_err();
    assert!(matches!(err, CoreError::UnitIdMismatch { .. }), "{err}");
}

#[test]
fn test_parse_error_names_file() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "20240115093012_InitialCreate.yml",
        "id: 20240115093012_InitialCreate\nup:\n  - op: explode\ndown: []\n",
    );
    let err = load_ledger_dir(dir.path()).unwrap_err();
    match err {
        CoreError::UnitParseError { path, .. } => {
            assert!(path.ends_with("20240115093012_InitialCreate.yml"))
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_invalid_id_is_a_parse_error() {
    assert!(matches!(
        parse_unit("id: InitialCreate\nup: []\ndown: []\n", "inline"),
        Err(CoreError::UnitParseError { .. })
    ));
}

#[test]
fn test_file_name_must_be_a_migration_id() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "InitialCreate.yml", INITIAL);
    let err = load_ledger_dir(dir.path()).unwrap_err();
    match err {
        CoreError::InvalidMigrationId { id } => assert_eq!(id, "InitialCreate"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_write_unit_round_trips() {
    let dir = TempDir::new().unwrap();
    let ledger_dir = dir.path().join("migrations");
    let unit = MigrationUnit::new(
        MigrationId::parse("20240301120000_DropBrokers").unwrap(),
        vec![Operation::DropTable {
            table: crate::names::TableName::new("Brokers"),
        }],
        vec![],
    );
    let path = write_unit(&ledger_dir, &unit).unwrap();
    assert_eq!(path.file_name().unwrap(), "20240301120000_DropBrokers.yml");

    let loaded = load_unit(&path).unwrap();
    assert_eq!(loaded, unit);
    assert_eq!(loaded.checksum(), unit.checksum());

    assert!(matches!(
        write_unit(&ledger_dir, &unit),
        Err(CoreError::DuplicateUnit { .. })
    ));
}
