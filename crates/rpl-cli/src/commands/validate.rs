//! Validate command implementation

use anyhow::Result;
use rpl_core::validate;

use crate::cli::{GlobalArgs, ValidateArgs};
use crate::commands::common::ExitCode;
use crate::context::RuntimeContext;

/// Execute the validate command
pub async fn execute(args: &ValidateArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    println!("Validating {} units...\n", ctx.ledger.len());

    let issues = validate(&ctx.ledger);
    for issue in &issues {
        println!("{issue}");
    }
    let errors = issues.iter().filter(|i| i.is_error()).count();
    let warnings = issues.len() - errors;

    if !issues.is_empty() {
        println!();
    }
    println!("{errors} error(s), {warnings} warning(s)");

    if errors > 0 || (args.strict && warnings > 0) {
        return Err(ExitCode(1).into());
    }
    Ok(())
}
