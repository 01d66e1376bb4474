//! Rollback command implementation

use anyhow::{Context, Result};
use rpl_migrate::RollbackTarget;

use crate::cli::{GlobalArgs, RollbackArgs};
use crate::context::RuntimeContext;

fn target(args: &RollbackArgs) -> RollbackTarget {
    if args.all {
        RollbackTarget::All
    } else if let Some(id) = &args.to {
        RollbackTarget::To(id.clone())
    } else {
        RollbackTarget::Steps(args.steps.unwrap_or(1))
    }
}

/// Execute the rollback command
pub async fn execute(args: &RollbackArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    let migrator = ctx.migrator()?;

    let reverted = migrator
        .rollback(target(args))
        .await
        .context("Rollback failed")?;

    if reverted.is_empty() {
        println!("Nothing to roll back.");
        return Ok(());
    }
    for id in &reverted {
        println!("  ✓ {id}");
    }
    println!("\nRolled back {} unit(s).", reverted.len());
    Ok(())
}
