//! Seed command implementation: upsert reference data sets

use anyhow::{bail, Context, Result};
use rpl_core::ReferenceSet;
use std::collections::HashSet;

use crate::cli::{GlobalArgs, SeedArgs};
use crate::commands::common::{print_table, split_list};
use crate::context::RuntimeContext;

/// Reference sets named by `--tables`, all of them without a filter.
fn select_sets(sets: Vec<ReferenceSet>, filter: Option<&str>) -> Result<Vec<ReferenceSet>> {
    let Some(filter) = filter else {
        return Ok(sets);
    };
    let wanted: HashSet<String> = split_list(filter).into_iter().collect();
    let known: HashSet<String> = sets.iter().map(|s| s.table.to_string()).collect();
    if let Some(missing) = wanted.iter().find(|t| !known.contains(*t)) {
        bail!("No reference data for table '{missing}'");
    }
    Ok(sets
        .into_iter()
        .filter(|s| wanted.contains(s.table.as_str()))
        .collect())
}

/// Execute the seed command
pub async fn execute(args: &SeedArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    let sets = select_sets(ctx.references()?, args.tables.as_deref())?;
    if sets.is_empty() {
        println!("No reference data found in {}.", ctx.config.reference_path);
        return Ok(());
    }

    println!("Applying {} reference set(s)...\n", sets.len());
    let migrator = ctx.migrator()?;
    let reports = migrator
        .seed(&sets)
        .await
        .context("Reference data was not applied")?;

    let rows: Vec<Vec<String>> = reports
        .iter()
        .map(|r| vec![r.table.to_string(), r.inserted.to_string(), r.updated.to_string()])
        .collect();
    print_table(&["TABLE", "INSERTED", "UPDATED"], &rows);
    Ok(())
}
