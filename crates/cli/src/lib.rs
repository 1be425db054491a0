pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cotiza",
    about = "Cotiza operator CLI",
    long_about = "Operate the Cotiza quote store: migrations, demo data, expiration sweeps, \
                  config inspection, readiness checks and an end-to-end smoke round trip.",
    after_help = "Examples:\n  cotiza migrate\n  cotiza doctor --json\n  cotiza smoke"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the idempotent demo clients and products")]
    Seed,
    #[command(about = "Mark draft and sent quotes past their validity date as expired")]
    Expire,
    #[command(
        about = "Run config, connectivity, migration and quote lifecycle checks",
        long_about = "Run config, connectivity, migration and quote lifecycle checks.\n\n\
                      Writes to the configured database: loads the demo clients and products \
                      if missing and leaves one cancelled quote behind, which consumes a \
                      COT-<year>-NNNN number. A quote from a failed run is cancelled and its \
                      stock restored when possible. Point COTIZA_DATABASE_URL at a scratch \
                      database to keep production numbering untouched."
    )]
    Smoke,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, database connectivity and inventory thresholds")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Expire => commands::expire::run(),
        Command::Smoke => commands::smoke::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
