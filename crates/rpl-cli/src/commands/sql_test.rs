use super::*;
use rpl_migrate::polizas_ledger;

#[test]
fn test_render_one_unit_up_and_down() {
    let ledger = polizas_ledger().unwrap();
    let d = dialect_for(Dialect::Postgres);

    let up = render_one(d.as_ref(), &ledger, "20240610120000_AddModeToApiKeys", Direction::Up).unwrap();
    assert!(up.starts_with("-- 20240610120000_AddModeToApiKeys (up)\n"), "{up}");
    assert!(up.contains("ALTER TABLE \"ApiKeys\" ADD COLUMN \"Mode\""), "{up}");

    let down = render_one(d.as_ref(), &ledger, "20240610120000_AddModeToApiKeys", Direction::Down).unwrap();
    assert!(down.contains("DROP COLUMN \"Mode\""), "{down}");
    assert!(down.contains("2024-02-20 14:15:30"), "{down}");
}

#[test]
fn test_render_unknown_unit() {
    let ledger = polizas_ledger().unwrap();
    let d = dialect_for(Dialect::DuckDb);
    assert!(render_one(d.as_ref(), &ledger, "20990101000000_Nope", Direction::Up).is_err());
}

#[test]
fn test_render_whole_ledger_in_every_dialect() {
    let ledger = polizas_ledger().unwrap();
    for dialect in [Dialect::DuckDb, Dialect::Postgres, Dialect::MySql] {
        let d = dialect_for(dialect);
        let script = render_all(d.as_ref(), &ledger).unwrap();
        for unit in ledger.units() {
            assert!(script.contains(&format!("-- {} (up)", unit.id)), "{dialect}");
        }
    }
}

#[test]
fn test_mysql_uses_backticks() {
    let ledger = polizas_ledger().unwrap();
    let d = dialect_for(Dialect::MySql);
    let up = render_one(d.as_ref(), &ledger, "20240115093012_InitialCreate", Direction::Up).unwrap();
    assert!(up.contains("CREATE TABLE `Companies`"), "{up}");
}
