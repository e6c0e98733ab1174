mod args;
mod commands;
mod logging;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use args::{RunArgs, SourceArgs};
use commands::migrate;
use logging::LoggingConfig;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Forward-only PostgreSQL migrations")]
#[command(version)]
struct Cli {
    /// Log filter, e.g. "info" or "tally_migrate=debug"
    #[arg(long, global = true, env = "TALLY_LOG", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply every pending migration
    Migrate(RunArgs),

    /// Show applied and pending migrations
    Status(RunArgs),

    /// Check the migrations directory without connecting
    Validate(SourceArgs),

    /// Create the next numbered migration file
    New {
        /// Migration name, used in the file name
        name: String,

        #[command(flatten)]
        source: SourceArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(&LoggingConfig::new(cli.log_level.clone(), cli.json_logs)) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    let result = match &cli.command {
        Commands::Migrate(args) => migrate::run(args).await,
        Commands::Status(args) => migrate::status(args).await,
        Commands::Validate(args) => migrate::validate(args),
        Commands::New { name, source } => migrate::create(source, name).map(|_| ()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
