//! The RegularizadorPolizas ledger, embedded in the binary.

use rpl_core::{parse_unit, CoreResult, Ledger};

/// `(file name, content)` of every builtin unit, in ledger order.
pub const UNITS: &[(&str, &str)] = &[
    (
        "20240115093012_InitialCreate.yml",
        include_str!("20240115093012_InitialCreate.yml"),
    ),
    (
        "20240220141530_AddRolesAndPermissions.yml",
        include_str!("20240220141530_AddRolesAndPermissions.yml"),
    ),
    (
        "20240312104500_AddApiKeysAndAuditLogs.yml",
        include_str!("20240312104500_AddApiKeysAndAuditLogs.yml"),
    ),
    (
        "20240408160000_AddCoberturasAndComisiones.yml",
        include_str!("20240408160000_AddCoberturasAndComisiones.yml"),
    ),
    (
        "20240503091140_WidenPolizaObservaciones.yml",
        include_str!("20240503091140_WidenPolizaObservaciones.yml"),
    ),
    (
        "20240610120000_AddModeToApiKeys.yml",
        include_str!("20240610120000_AddModeToApiKeys.yml"),
    ),
];

/// Parse the embedded ledger.
pub fn polizas_ledger() -> CoreResult<Ledger> {
    let units = UNITS
        .iter()
        .map(|(name, content)| parse_unit(content, &format!("builtin:{name}")))
        .collect::<CoreResult<Vec<_>>>()?;
    let ledger = Ledger::new(units);
    ledger.ensure_ordered()?;
    Ok(ledger)
}
