//! rpl - schema migration ledger CLI for RegularizadorPolizas

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;
mod context;

use cli::Cli;
use commands::common::ExitCode;
use commands::{make, migrate, rollback, schema, seed, sql, status, unlock, validate};

/// `info` by default, `debug` with `--verbose`; `RUST_LOG` wins over both.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        cli::Commands::Validate(args) => validate::execute(args, &cli.global).await,
        cli::Commands::Status(args) => status::execute(args, &cli.global).await,
        cli::Commands::Migrate(args) => migrate::execute(args, &cli.global).await,
        cli::Commands::Rollback(args) => rollback::execute(args, &cli.global).await,
        cli::Commands::Schema(args) => schema::execute(args, &cli.global).await,
        cli::Commands::Sql(args) => sql::execute(args, &cli.global).await,
        cli::Commands::Make(args) => make::execute(args, &cli.global).await,
        cli::Commands::Seed(args) => seed::execute(args, &cli.global).await,
        cli::Commands::Unlock(args) => unlock::execute(args, &cli.global).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    if let Err(err) = run(&cli).await {
        if let Some(ExitCode(code)) = err.downcast_ref::<ExitCode>() {
            std::process::exit(*code);
        }
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
