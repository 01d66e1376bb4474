//! Unlock command implementation

use anyhow::{Context, Result};

use crate::cli::{GlobalArgs, UnlockArgs};
use crate::context::RuntimeContext;

/// Execute the unlock command
pub async fn execute(_args: &UnlockArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    let migrator = ctx.migrator()?;

    match migrator.unlock().await.context("Failed to remove the migration lock")? {
        Some(holder) => println!(
            "Removed migration lock held by {} since {}.",
            holder.owner, holder.acquired_at
        ),
        None => println!("No migration lock is held."),
    }
    Ok(())
}
