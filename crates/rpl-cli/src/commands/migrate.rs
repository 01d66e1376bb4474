//! Migrate command implementation

use anyhow::{Context, Result};

use crate::cli::{GlobalArgs, MigrateArgs};
use crate::context::RuntimeContext;

/// Execute the migrate command
pub async fn execute(args: &MigrateArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    let migrator = ctx.migrator()?;

    let applied = migrator
        .migrate(args.to.as_deref())
        .await
        .context("Migration failed")?;

    if applied.is_empty() {
        println!("Database is up to date.");
        return Ok(());
    }
    for id in &applied {
        println!("  ✓ {id}");
    }
    println!("\nApplied {} unit(s).", applied.len());
    Ok(())
}
