//! Status command implementation

use anyhow::{Context, Result};
use rpl_core::value::TIMESTAMP_FORMAT;
use rpl_migrate::{StatusReport, UnitState};
use serde::Serialize;

use crate::cli::{GlobalArgs, OutputFormat, StatusArgs};
use crate::commands::common::print_table;
use crate::context::RuntimeContext;

#[derive(Debug, Serialize)]
struct UnitRow {
    id: String,
    state: String,
    applied_at: Option<String>,
    checksum_matches: bool,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    database: String,
    applied: usize,
    pending: usize,
    units: Vec<UnitRow>,
    unknown: Vec<String>,
    lock_owner: Option<String>,
}

fn to_output(report: &StatusReport, database: String, lock_owner: Option<String>) -> StatusOutput {
    let units: Vec<UnitRow> = report
        .units
        .iter()
        .map(|u| UnitRow {
            id: u.id.to_string(),
            state: u.state.to_string(),
            applied_at: u.applied_at.map(|t| t.format(TIMESTAMP_FORMAT).to_string()),
            checksum_matches: u.checksum_matches,
        })
        .collect();
    let applied = report.applied_count();
    StatusOutput {
        database,
        applied,
        pending: units.len() - applied,
        units,
        unknown: report.unknown.iter().map(|u| u.id.clone()).collect(),
        lock_owner,
    }
}

/// Execute the status command
pub async fn execute(args: &StatusArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    let migrator = ctx.migrator()?;
    let report = migrator.status().await.context("Failed to read migration history")?;
    let holder = migrator.lock_holder().await.context("Failed to read the migration lock")?;
    let output = to_output(&report, ctx.database_path()?, holder.as_ref().map(|h| h.owner.clone()));

    if args.output == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Database: {}\n", output.database);
    let rows: Vec<Vec<String>> = output
        .units
        .iter()
        .map(|u| {
            vec![
                u.id.clone(),
                u.state.clone(),
                u.applied_at.clone().unwrap_or_default(),
                if u.checksum_matches { String::new() } else { "EDITED".to_string() },
            ]
        })
        .collect();
    print_table(&["UNIT", "STATE", "APPLIED AT", "CHECKSUM"], &rows);
    println!("\n{} applied, {} pending", output.applied, output.pending);

    for unknown in &output.unknown {
        println!("warning: history lists {unknown}, which is not in the ledger");
    }
    if let Some(h) = holder {
        println!("warning: migration lock held by {} since {}", h.owner, h.acquired_at);
    }
    if report
        .units
        .iter()
        .any(|u| u.state == UnitState::Applied && !u.checksum_matches)
    {
        println!("warning: applied units were edited; migrate and rollback will refuse to run");
    }
    Ok(())
}
