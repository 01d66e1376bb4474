//! Sql command implementation: a dry run printing rendered statements

use anyhow::{anyhow, Context, Result};
use rpl_core::{Dialect, Direction, Ledger};
use rpl_db::{dialect_for, render_unit, SqlDialect};

use crate::cli::{GlobalArgs, SqlArgs};
use crate::context::RuntimeContext;

/// Execute the sql command
pub async fn execute(args: &SqlArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    let dialect = match &args.dialect {
        Some(name) => name.parse::<Dialect>().map_err(|e| anyhow!(e))?,
        None => ctx.config.dialect,
    };
    let d = dialect_for(dialect);
    let direction = if args.down { Direction::Down } else { Direction::Up };

    let script = match &args.unit {
        Some(id) => render_one(d.as_ref(), &ctx.ledger, id, direction)?,
        None => render_all(d.as_ref(), &ctx.ledger)?,
    };
    print!("{script}");
    Ok(())
}

/// One unit, rendered against the schema it is applied to.
fn render_one(d: &dyn SqlDialect, ledger: &Ledger, id: &str, direction: Direction) -> Result<String> {
    let position = ledger.require_position(id)?;
    let before = match direction {
        Direction::Up => ledger.replay(position),
        Direction::Down => ledger.replay(position + 1),
    }
    .with_context(|| format!("Failed to replay the ledger up to {id}"))?;
    let unit = &ledger.units()[position];
    let statements = render_unit(d, unit, direction, &before)?;
    Ok(script(&unit.id.to_string(), direction, &statements))
}

/// Every unit's Up, in ledger order.
fn render_all(d: &dyn SqlDialect, ledger: &Ledger) -> Result<String> {
    let mut state = rpl_core::SchemaState::new();
    let mut out = String::new();
    for unit in ledger.units() {
        let statements = render_unit(d, unit, Direction::Up, &state)?;
        out.push_str(&script(&unit.id.to_string(), Direction::Up, &statements));
        out.push('\n');
        state.apply_unit(unit, Direction::Up)?;
    }
    Ok(out)
}

fn script(id: &str, direction: Direction, statements: &[String]) -> String {
    let mut out = format!("-- {id} ({direction})\n");
    for sql in statements {
        out.push_str(sql);
        out.push_str(";\n");
    }
    out
}

#[cfg(test)]
#[path = "sql_test.rs"]
mod tests;
