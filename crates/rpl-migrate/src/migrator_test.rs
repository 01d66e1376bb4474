use super::*;
use crate::builtin::polizas_ledger;
use rpl_core::ColumnName;
use rpl_db::DuckDbBackend;
use tempfile::TempDir;

const INITIAL: &str = "20240115093012_InitialCreate";
const ROLES: &str = "20240220141530_AddRolesAndPermissions";
const API_KEYS: &str = "20240312104500_AddApiKeysAndAuditLogs";
const MODE: &str = "20240610120000_AddModeToApiKeys";

fn migrator_with(settings: MigratorSettings) -> (Arc<DuckDbBackend>, Migrator) {
    let db = Arc::new(DuckDbBackend::in_memory().unwrap());
    let migrator = Migrator::new(db.clone(), polizas_ledger().unwrap(), settings);
    (db, migrator)
}

fn migrator() -> (Arc<DuckDbBackend>, Migrator) {
    migrator_with(MigratorSettings::default())
}

async fn count(db: &DuckDbBackend, sql: &str) -> usize {
    db.query_count(sql).await.unwrap()
}

async fn text(db: &DuckDbBackend, sql: &str) -> Option<String> {
    db.query_rows(sql).await.unwrap().into_iter().next().and_then(|r| r[0].clone())
}

async fn has_column(db: &DuckDbBackend, table: &str, column: &str) -> bool {
    count(
        db,
        &format!(
            "SELECT 1 FROM information_schema.columns WHERE table_name = '{table}' AND column_name = '{column}'"
        ),
    )
    .await
        > 0
}

fn cols(names: &[&str]) -> Vec<ColumnName> {
    names.iter().map(|n| ColumnName::new(*n)).collect()
}

#[tokio::test]
async fn test_migrate_applies_every_unit() {
    let (db, m) = migrator();
    let applied = m.migrate(None).await.unwrap();
    assert_eq!(applied.len(), 6);
    assert_eq!(applied[0], INITIAL);

    assert_eq!(count(&db, "SELECT * FROM \"Companies\"").await, 4);
    assert_eq!(count(&db, "SELECT * FROM \"RolePermissions\"").await, 18);
    assert_eq!(count(&db, "SELECT * FROM \"__rpl_history\"").await, 6);
    assert!(has_column(&db, "ApiKeys", "Mode").await);
    assert_eq!(
        text(&db, "SELECT CAST(\"CreatedAt\" AS VARCHAR) FROM \"Permissions\" WHERE \"Id\" = 9").await,
        Some("2024-06-10 12:00:00".to_string())
    );

    // Second run has nothing to do
    assert!(m.migrate(None).await.unwrap().is_empty());
    // Lock released after each run
    assert_eq!(m.lock_holder().await.unwrap(), None);
}

#[tokio::test]
async fn test_migrate_to_stops_at_target() {
    let (db, m) = migrator();
    let applied = m.migrate(Some(ROLES)).await.unwrap();
    assert_eq!(applied.len(), 2);
    assert!(db.relation_exists("Roles").await.unwrap());
    assert!(!db.relation_exists("ApiKeys").await.unwrap());

    let status = m.status().await.unwrap();
    assert_eq!(status.applied_count(), 2);
    assert_eq!(status.units[2].state, UnitState::Pending);
    assert!(status.units.iter().all(|u| u.checksum_matches));
}

#[tokio::test]
async fn test_migrate_to_applied_unit_is_out_of_order() {
    let (_db, m) = migrator();
    m.migrate(Some(API_KEYS)).await.unwrap();
    let err = m.migrate(Some(INITIAL)).await.unwrap_err();
    assert!(matches!(err, MigrateError::OutOfOrder { .. }), "{err}");
}

#[tokio::test]
async fn test_migrate_to_unknown_unit() {
    let (_db, m) = migrator();
    let err = m.migrate(Some("20990101000000_Nope")).await.unwrap_err();
    assert!(matches!(err, MigrateError::Core(_)), "{err}");
}

#[tokio::test]
async fn test_status_on_fresh_database() {
    let (db, m) = migrator();
    let status = m.status().await.unwrap();
    assert_eq!(status.applied_count(), 0);
    assert_eq!(status.units.len(), 6);
    assert!(status.unknown.is_empty());
    // Status never creates the bookkeeping tables
    assert!(!db.relation_exists("__rpl_history").await.unwrap());
}

#[tokio::test]
async fn test_rollback_one_step_restores_previous_data() {
    let (db, m) = migrator();
    m.migrate(None).await.unwrap();

    let reverted = m.rollback(RollbackTarget::Steps(1)).await.unwrap();
    assert_eq!(reverted.len(), 1);
    assert_eq!(reverted[0], MODE);
    assert!(!has_column(&db, "ApiKeys", "Mode").await);
    assert_eq!(
        text(&db, "SELECT CAST(\"CreatedAt\" AS VARCHAR) FROM \"Permissions\" WHERE \"Id\" = 1").await,
        Some("2024-02-20 14:15:30".to_string())
    );
    assert_eq!(
        text(&db, "SELECT CAST(\"GrantedAt\" AS VARCHAR) FROM \"RolePermissions\" WHERE \"RoleId\" = 1 AND \"PermissionId\" = 9").await,
        Some("2024-03-12 10:45:00".to_string())
    );
    assert_eq!(m.status().await.unwrap().applied_count(), 5);
}

#[tokio::test]
async fn test_rollback_to_keeps_target_applied() {
    let (db, m) = migrator();
    m.migrate(None).await.unwrap();

    let reverted = m.rollback(RollbackTarget::To(ROLES.to_string())).await.unwrap();
    assert_eq!(reverted.len(), 4);
    assert!(db.relation_exists("Roles").await.unwrap());
    assert!(!db.relation_exists("ApiKeys").await.unwrap());
    assert_eq!(count(&db, "SELECT * FROM \"Permissions\"").await, 8);

    let err = m
        .rollback(RollbackTarget::To(MODE.to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::OutOfOrder { .. }), "{err}");
}

#[tokio::test]
async fn test_rollback_all_then_migrate_again() {
    let (db, m) = migrator();
    m.migrate(None).await.unwrap();
    let reverted = m.rollback(RollbackTarget::All).await.unwrap();
    assert_eq!(reverted.len(), 6);
    assert_eq!(reverted[5], INITIAL);
    assert!(!db.relation_exists("Polizas").await.unwrap());
    assert_eq!(count(&db, "SELECT * FROM \"__rpl_history\"").await, 0);

    assert_eq!(m.migrate(None).await.unwrap().len(), 6);
    assert_eq!(count(&db, "SELECT * FROM \"Currencies\"").await, 3);
}

#[tokio::test]
async fn test_rollback_more_steps_than_applied() {
    let (_db, m) = migrator();
    m.migrate(Some(ROLES)).await.unwrap();
    let err = m.rollback(RollbackTarget::Steps(3)).await.unwrap_err();
    assert!(matches!(err, MigrateError::OutOfOrder { .. }), "{err}");
    assert!(m.rollback(RollbackTarget::Steps(0)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_edited_unit_is_a_checksum_mismatch() {
    let (db, m) = migrator();
    m.migrate(Some(INITIAL)).await.unwrap();
    db.execute("UPDATE \"__rpl_history\" SET checksum = 'edited'")
        .await
        .unwrap();

    let err = m.migrate(None).await.unwrap_err();
    match err {
        MigrateError::ChecksumMismatch { id, recorded, .. } => {
            assert_eq!(id, INITIAL);
            assert_eq!(recorded, "edited");
        }
        other => panic!("expected ChecksumMismatch, got {other}"),
    }

    let status = m.status().await.unwrap();
    assert!(!status.units[0].checksum_matches);
}

#[tokio::test]
async fn test_history_row_outside_the_ledger() {
    let (db, m) = migrator();
    m.migrate(Some(INITIAL)).await.unwrap();
    db.execute(
        "INSERT INTO \"__rpl_history\" VALUES ('20990101000000_Ghost', 'x', TIMESTAMP '2099-01-01 00:00:00')",
    )
    .await
    .unwrap();

    let err = m.migrate(None).await.unwrap_err();
    assert!(matches!(err, MigrateError::UnknownAppliedUnit { ref id } if id == "20990101000000_Ghost"));

    let status = m.status().await.unwrap();
    assert_eq!(status.unknown.len(), 1);
}

#[tokio::test]
async fn test_held_lock_blocks_runs_until_unlocked() {
    let (db, m) = migrator();
    db.execute_batch(
        "CREATE TABLE \"__rpl_lock\" (id INTEGER PRIMARY KEY, owner VARCHAR NOT NULL, acquired_at TIMESTAMP NOT NULL);
         INSERT INTO \"__rpl_lock\" VALUES (1, 'other-run', TIMESTAMP '2024-06-01 08:00:00');",
    )
    .await
    .unwrap();

    let err = m.migrate(None).await.unwrap_err();
    assert!(matches!(err, MigrateError::LockHeld { ref owner, .. } if owner == "other-run"), "{err}");
    assert!(!db.relation_exists("Companies").await.unwrap());

    let removed = m.unlock().await.unwrap().unwrap();
    assert_eq!(removed.owner, "other-run");
    assert_eq!(m.unlock().await.unwrap(), None);
    assert_eq!(m.migrate(None).await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_live_duplicate_rolls_back_the_unit() {
    let (db, m) = migrator();
    m.migrate(Some(ROLES)).await.unwrap();
    db.execute(
        "INSERT INTO \"Permissions\" VALUES (9, 'manual.entry', 'Manual', 'Entry', TIMESTAMP '2024-03-01 00:00:00')",
    )
    .await
    .unwrap();

    let err = m.migrate(None).await.unwrap_err();
    match err {
        MigrateError::Unit(e) => {
            assert_eq!(e.unit, API_KEYS);
            assert_eq!(e.source.index, 2);
            assert!(
                matches!(e.source.source, ApplyError::UniquenessViolation { ref constraint, .. } if constraint == "primary key"),
                "{}",
                e.source.source
            );
        }
        other => panic!("expected a unit error, got {other}"),
    }
    // Tables created earlier in the unit are gone again
    assert!(!db.relation_exists("ApiKeys").await.unwrap());
    assert_eq!(m.status().await.unwrap().applied_count(), 2);
    assert_eq!(m.lock_holder().await.unwrap(), None);
}

#[tokio::test]
async fn test_unit_timeout_rolls_back() {
    let settings = MigratorSettings {
        unit_timeout: Some(Duration::from_nanos(1)),
        ..MigratorSettings::default()
    };
    let (db, m) = migrator_with(settings);
    let err = m.migrate(None).await.unwrap_err();
    assert!(matches!(err, MigrateError::UnitTimeout { ref unit, .. } if unit == INITIAL), "{err}");
    assert!(!db.relation_exists("Brokers").await.unwrap());
    assert_eq!(m.status().await.unwrap().applied_count(), 0);
}

#[tokio::test]
async fn test_settings_from_config_target_override() {
    let mut config = Config::builtin();
    config.unit_timeout_secs = Some(30);
    let settings = MigratorSettings::from_config(&config, None).unwrap();
    assert_eq!(settings.unit_timeout, Some(Duration::from_secs(30)));
    assert_eq!(settings.history_table, "__rpl_history");
    assert!(MigratorSettings::from_config(&config, Some("missing")).is_err());
}

#[tokio::test]
async fn test_seed_upserts_reference_rows() {
    let (db, m) = migrator();
    m.migrate(None).await.unwrap();

    let currencies = ReferenceSet {
        table: TableName::new("Currencies"),
        key: cols(&["Codigo"]),
        columns: cols(&["Codigo", "Nombre", "Simbolo"]),
        rows: vec![
            vec![Value::from("USD"), Value::from("Dólar"), Value::from("U$S")],
            vec![Value::from("EUR"), Value::from("Euro"), Value::from("€")],
        ],
    };
    let reports = m.seed(std::slice::from_ref(&currencies)).await.unwrap();
    assert_eq!(
        reports,
        vec![SeedReport {
            table: TableName::new("Currencies"),
            inserted: 1,
            updated: 1,
        }]
    );
    assert_eq!(
        text(&db, "SELECT \"Simbolo\" FROM \"Currencies\" WHERE \"Codigo\" = 'USD'").await,
        Some("U$S".to_string())
    );
    assert_eq!(
        text(&db, "SELECT CAST(\"Id\" AS VARCHAR) FROM \"Currencies\" WHERE \"Codigo\" = 'EUR'").await,
        Some("4".to_string())
    );

    // Idempotent
    let again = m.seed(&[currencies]).await.unwrap();
    assert_eq!(again[0].inserted, 0);
    assert_eq!(count(&db, "SELECT * FROM \"Currencies\"").await, 4);
}

#[tokio::test]
async fn test_seed_rejects_orphans_and_writes_nothing() {
    let (db, m) = migrator();
    m.migrate(None).await.unwrap();

    let grants = ReferenceSet {
        table: TableName::new("RolePermissions"),
        key: cols(&["RoleId", "PermissionId"]),
        columns: cols(&["RoleId", "PermissionId", "GrantedAt"]),
        rows: vec![vec![Value::Int(99), Value::Int(1), Value::from("2024-07-01 00:00:00")]],
    };
    let err = m.seed(&[grants]).await.unwrap_err();
    match err {
        MigrateError::Seed { table, source } => {
            assert_eq!(table, "RolePermissions");
            assert!(matches!(source, ApplyError::OrphanedReference { .. }), "{source}");
        }
        other => panic!("expected a seed error, got {other}"),
    }
    assert_eq!(count(&db, "SELECT * FROM \"RolePermissions\"").await, 18);
}

#[tokio::test]
async fn test_file_database_keeps_history() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("polizas.duckdb");
    {
        let db = Arc::new(DuckDbBackend::from_path(&path).unwrap());
        let m = Migrator::new(db, polizas_ledger().unwrap(), MigratorSettings::default());
        m.migrate(Some(API_KEYS)).await.unwrap();
    }
    let db = Arc::new(DuckDbBackend::from_path(&path).unwrap());
    let m = Migrator::new(db, polizas_ledger().unwrap(), MigratorSettings::default());
    assert_eq!(m.status().await.unwrap().applied_count(), 3);
    assert_eq!(m.migrate(None).await.unwrap().len(), 3);
}

const CREATE_LECTURAS: &str = r#"
id: 20240701090000_CreateLecturas
up:
  - op: create_table
    name: Lecturas
    columns:
      - { name: Id, type: int }
      - { name: Tomada, type: timestamp, nullable: true }
      - { name: Total, type: bigint, nullable: true }
      - { name: Monto, type: "decimal(18,4)", nullable: true }
      - { name: Tasa, type: double, nullable: true }
    primary_key: [Id]
down:
  - op: drop_table
    table: Lecturas
"#;

/// Ledger that creates `Lecturas` and then narrows one of its columns.
fn narrowing_migrator(column: &str, from: &str, to: &str) -> (Arc<DuckDbBackend>, Migrator) {
    let narrow = format!(
        r#"
id: 20240702090000_Narrow{column}
up:
  - op: alter_column
    table: Lecturas
    column: {column}
    from: {{ type: "{from}", nullable: true }}
    to: {{ type: "{to}", nullable: true }}
    coerce: true
down:
  - op: alter_column
    table: Lecturas
    column: {column}
    from: {{ type: "{to}", nullable: true }}
    to: {{ type: "{from}", nullable: true }}
    coerce: true
"#
    );
    let units = [CREATE_LECTURAS, narrow.as_str()]
        .iter()
        .map(|y| rpl_core::parse_unit(y, "inline").unwrap())
        .collect();
    let db = Arc::new(DuckDbBackend::in_memory().unwrap());
    let migrator = Migrator::new(db.clone(), Ledger::new(units), MigratorSettings::default());
    (db, migrator)
}

/// Seed one row out of band, then expect the narrowing to be refused and
/// the row left as it was.
async fn assert_narrowing_refused(column: &str, from: &str, to: &str, value: &str, detail: &str) {
    let (db, m) = narrowing_migrator(column, from, to);
    m.migrate(Some("20240701090000_CreateLecturas")).await.unwrap();
    db.execute(&format!("INSERT INTO \"Lecturas\" (\"Id\", \"{column}\") VALUES (1, {value})"))
        .await
        .unwrap();
    let select = format!("SELECT CAST(\"{column}\" AS VARCHAR) FROM \"Lecturas\"");
    let stored = text(&db, &select).await;

    let err = m.migrate(None).await.unwrap_err();
    match err {
        MigrateError::Unit(e) => {
            assert!(
                matches!(e.source.source, ApplyError::IncompatibleAlter { detail: ref d, .. } if d.contains(detail)),
                "{}",
                e.source.source
            );
        }
        other => panic!("expected a unit error, got {other}"),
    }
    assert_eq!(text(&db, &select).await, stored);
    assert_eq!(m.status().await.unwrap().applied_count(), 1);
}

#[tokio::test]
async fn test_timestamp_to_date_keeps_time_of_day() {
    assert_narrowing_refused(
        "Tomada",
        "timestamp",
        "date",
        "TIMESTAMP '2024-07-01 14:30:00'",
        "time of day",
    )
    .await;
}

#[tokio::test]
async fn test_bigint_to_int_out_of_range() {
    assert_narrowing_refused("Total", "bigint", "int", "5000000000", "outside").await;
    assert_narrowing_refused("Total", "bigint", "smallint", "40000", "outside").await;
}

#[tokio::test]
async fn test_decimal_narrowing_checks_scale_and_precision() {
    assert_narrowing_refused("Monto", "decimal(18,4)", "decimal(18,2)", "12.3456", "decimal(18,2)").await;
    assert_narrowing_refused("Monto", "decimal(18,4)", "decimal(6,2)", "12345.5", "decimal(6,2)").await;
}

#[tokio::test]
async fn test_double_to_int_keeps_fractions() {
    assert_narrowing_refused("Tasa", "double", "int", "2.5", "fractional part").await;
}

#[tokio::test]
async fn test_narrowing_applies_when_values_fit() {
    let (db, m) = narrowing_migrator("Tomada", "timestamp", "date");
    m.migrate(Some("20240701090000_CreateLecturas")).await.unwrap();
    db.execute("INSERT INTO \"Lecturas\" (\"Id\", \"Tomada\") VALUES (1, TIMESTAMP '2024-07-01 00:00:00')")
        .await
        .unwrap();

    assert_eq!(m.migrate(None).await.unwrap().len(), 1);
    assert_eq!(
        text(&db, "SELECT CAST(\"Tomada\" AS VARCHAR) FROM \"Lecturas\"").await,
        Some("2024-07-01".to_string())
    );
}
