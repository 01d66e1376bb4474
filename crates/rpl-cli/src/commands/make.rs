//! Make command implementation: generate a unit from a schema model

use anyhow::{bail, Context, Result};
use chrono::{NaiveDateTime, Utc};
use rpl_core::diff::generate_unit;
use rpl_core::{write_unit, ApplyContext, Ledger, MigrationId, MigrationUnit, SchemaModel};
use std::path::Path;

use crate::cli::{GlobalArgs, MakeArgs};
use crate::context::RuntimeContext;

/// Execute the make command
pub async fn execute(args: &MakeArgs, global: &GlobalArgs) -> Result<()> {
    if global.builtin && !args.dry_run {
        bail!("The builtin ledger is read-only; use --dry-run or drop --builtin");
    }
    let ctx = RuntimeContext::new(global)?;
    let unit = build_unit(
        &ctx.ledger,
        &args.name,
        Path::new(&args.model),
        Utc::now().naive_utc(),
    )?;
    let Some(unit) = unit else {
        println!("Model matches the ledger; no unit generated.");
        return Ok(());
    };

    if args.dry_run {
        print!("{}", serde_yaml::to_string(&unit)?);
        return Ok(());
    }
    let path = write_unit(&ctx.ledger_dir(), &unit).context("Failed to write the unit")?;
    println!(
        "Created {} ({} up, {} down operations)",
        path.display(),
        unit.up.len(),
        unit.down.len()
    );
    Ok(())
}

/// The unit turning the ledger's final schema into the model, or `None`
/// when they already agree.
fn build_unit(ledger: &Ledger, name: &str, model: &Path, now: NaiveDateTime) -> Result<Option<MigrationUnit>> {
    let raw = format!("{}_{name}", now.format("%Y%m%d%H%M%S"));
    let Some(id) = MigrationId::parse(&raw) else {
        bail!("'{name}' is not a valid unit name (a letter followed by letters or digits)");
    };
    if let Some(last) = ledger.units().last() {
        if last.id.as_str() >= id.as_str() {
            bail!("New unit {id} would not sort after the last unit {}", last.id);
        }
    }

    let current = ledger
        .replay(ledger.len())
        .context("Failed to replay the ledger")?;
    let target = SchemaModel::load(model)?
        .into_state(&ApplyContext::for_unit(&id))
        .with_context(|| format!("Failed to build the schema described by {}", model.display()))?;

    let unit = generate_unit(id, &current, &target)?;
    if unit.up.is_empty() {
        return Ok(None);
    }
    Ok(Some(unit))
}

#[cfg(test)]
#[path = "make_test.rs"]
mod tests;
