//! CLI argument definitions using clap derive API

use clap::{Args, Parser, Subcommand, ValueEnum};

/// rpl - schema migration ledger for RegularizadorPolizas
#[derive(Parser, Debug)]
#[command(name = "rpl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all commands
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to project directory
    #[arg(short = 'p', long, global = true, default_value = ".")]
    pub project_dir: String,

    /// Override config file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Named target from the config (falls back to RPL_TARGET)
    #[arg(short, long, global = true)]
    pub target: Option<String>,

    /// Override the database path
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// Use the ledger embedded in the binary instead of the project's
    #[arg(long, global = true)]
    pub builtin: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check the ledger: ordering, replay and the round trip of every unit
    Validate(ValidateArgs),

    /// List units with their Pending/Applied state
    Status(StatusArgs),

    /// Apply pending units in order
    Migrate(MigrateArgs),

    /// Roll back applied units, last first
    Rollback(RollbackArgs),

    /// Print the schema computed from the ledger
    Schema(SchemaArgs),

    /// Print the SQL a unit renders to, without touching the database
    Sql(SqlArgs),

    /// Generate a new unit from the difference to a schema model
    Make(MakeArgs),

    /// Upsert reference data sets
    Seed(SeedArgs),

    /// Remove a migration lock left behind by a crashed run
    Unlock(UnlockArgs),
}

/// Output format for commands with machine-readable output
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

/// Arguments for the validate command
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for the migrate command
#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Stop after this unit (default: apply everything pending)
    #[arg(long)]
    pub to: Option<String>,
}

/// Arguments for the rollback command
#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Number of units to roll back (default: 1)
    #[arg(long, conflicts_with_all = ["to", "all"])]
    pub steps: Option<usize>,

    /// Roll back every unit after this one
    #[arg(long, conflicts_with = "all")]
    pub to: Option<String>,

    /// Roll back every applied unit
    #[arg(long)]
    pub all: bool,
}

/// Arguments for the schema command
#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Show the schema right after this unit (default: the whole ledger)
    #[arg(long)]
    pub at: Option<String>,

    /// Print the schema as JSON
    #[arg(long)]
    pub json: bool,

    /// Include seed rows
    #[arg(long)]
    pub rows: bool,
}

/// Arguments for the sql command
#[derive(Args, Debug)]
pub struct SqlArgs {
    /// Unit to render (default: every unit)
    #[arg(short, long)]
    pub unit: Option<String>,

    /// Render the Down list instead of Up
    #[arg(long, requires = "unit")]
    pub down: bool,

    /// SQL dialect (default: the configured dialect)
    #[arg(short, long)]
    pub dialect: Option<String>,
}

/// Arguments for the make command
#[derive(Args, Debug)]
pub struct MakeArgs {
    /// Unit name, e.g. AddEndosos
    pub name: String,

    /// YAML model describing the desired schema
    #[arg(short, long)]
    pub model: String,

    /// Print the unit instead of writing it
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the seed command
#[derive(Args, Debug)]
pub struct SeedArgs {
    /// Reference sets to apply by table (comma-separated, default: all)
    #[arg(long)]
    pub tables: Option<String>,
}

/// Arguments for the unlock command
#[derive(Args, Debug)]
pub struct UnlockArgs {}

#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;
