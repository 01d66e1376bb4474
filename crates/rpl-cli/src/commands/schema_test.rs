use super::*;
use rpl_migrate::polizas_ledger;

#[test]
fn test_render_initial_schema() {
    let state = polizas_ledger().unwrap().replay(1).unwrap();
    let text = render_text(&state, false);

    assert!(text.contains("TABLE Companies (4 rows)\n"), "{text}");
    assert!(text.contains("  Id int not null identity\n"), "{text}");
    assert!(text.contains("  UNIQUE INDEX IX_Companies_Codigo (Codigo)\n"), "{text}");
    assert!(
        text.contains("  FOREIGN KEY FK_Polizas_Clients_Clinro (Clinro) -> Clients (Id)"),
        "{text}"
    );
    assert!(text.contains("-> Brokers (Id) ON DELETE SET NULL\n"), "{text}");
    assert!(!text.contains("BSE"));
}

#[test]
fn test_render_rows_on_request() {
    let state = polizas_ledger().unwrap().replay(1).unwrap();
    let text = render_text(&state, true);
    assert!(text.contains("| 1 | 'BSE' | 'Banco de Seguros del Estado' | true"), "{text}");
}
