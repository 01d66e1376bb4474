//! Schema command implementation

use anyhow::{Context, Result};
use rpl_core::{SchemaModel, SchemaState, TableState};

use crate::cli::{GlobalArgs, SchemaArgs};
use crate::context::RuntimeContext;

/// Execute the schema command
pub async fn execute(args: &SchemaArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    let state = match &args.at {
        Some(id) => ctx
            .ledger
            .replay_through(id)
            .with_context(|| format!("Failed to compute the schema at {id}"))?,
        None => ctx
            .ledger
            .replay(ctx.ledger.len())
            .context("Failed to replay the ledger")?,
    };

    if args.json {
        let mut model = SchemaModel::from_state(&state);
        if !args.rows {
            for table in &mut model.tables {
                table.rows.clear();
            }
        }
        println!("{}", serde_json::to_string_pretty(&model)?);
        return Ok(());
    }

    print!("{}", render_text(&state, args.rows));
    Ok(())
}

fn render_text(state: &SchemaState, with_rows: bool) -> String {
    let mut out = String::new();
    for table in state.tables() {
        render_table(table, with_rows, &mut out);
        out.push('\n');
    }
    out
}

fn render_table(table: &TableState, with_rows: bool, out: &mut String) {
    let schema = &table.schema;
    out.push_str(&format!("TABLE {} ({} rows)\n", schema.name, table.rows.len()));
    for column in &schema.columns {
        let identity = if column.identity { " identity" } else { "" };
        out.push_str(&format!("  {} {}{identity}\n", column.name, column.shape()));
    }
    out.push_str(&format!("  PRIMARY KEY ({})\n", join(&schema.primary_key)));
    for fk in &schema.foreign_keys {
        out.push_str(&format!(
            "  FOREIGN KEY {} ({}) -> {} ({}) ON DELETE {}\n",
            fk.name,
            join(&fk.columns),
            fk.references_table,
            join(&fk.references_columns),
            fk.on_delete.to_string().to_uppercase().replace('_', " ")
        ));
    }
    for index in &schema.indexes {
        let kind = if index.unique { "UNIQUE INDEX" } else { "INDEX" };
        out.push_str(&format!("  {kind} {} ({})\n", index.name, join(&index.columns)));
    }
    if with_rows {
        for row in table.sorted_rows() {
            let cells: Vec<String> = schema
                .columns
                .iter()
                .map(|c| row.get(&c.name).map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string()))
                .collect();
            out.push_str(&format!("  | {}\n", cells.join(" | ")));
        }
    }
}

fn join<T: AsRef<str>>(items: &[T]) -> String {
    items.iter().map(|i| i.as_ref()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
#[path = "schema_test.rs"]
mod tests;
