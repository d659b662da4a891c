mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "siteferry",
    version,
    about = "Migrate a hosted site-builder website onto self-managed cloud infrastructure"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the migration YAML file
    #[arg(long, short = 'c', default_value = "migration.yaml", global = true)]
    config: PathBuf,

    /// Enable verbose (debug) logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full migration: extract, transform, provision, configure,
    /// deploy the form handler, and verify
    Migrate {
        /// Simulate every external call instead of performing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Only extract the source site into the local content cache
    Extract {
        /// Simulate extraction instead of fetching
        #[arg(long)]
        dry_run: bool,
    },
    /// Continue the most recent job from its first incomplete stage
    Deploy {
        /// Job to continue (defaults to the most recent for this config)
        #[arg(long)]
        job: Option<String>,
    },
    /// Validate configuration and gateway connectivity
    Validate {
        /// Skip the connectivity checks
        #[arg(long)]
        dry_run: bool,
    },
    /// Retry a failed or cancelled job from its failed stage
    Resume {
        /// Job identifier (see the state directory for stored jobs)
        job: String,
    },
    /// Delete a stored job checkpoint
    Cleanup {
        /// Job identifier
        job: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    logging::init(if cli.verbose { "debug" } else { "info" });

    let result = match cli.command {
        Commands::Migrate { dry_run } => commands::migrate::execute(&cli.config, dry_run).await,
        Commands::Extract { dry_run } => commands::extract::execute(&cli.config, dry_run).await,
        Commands::Deploy { job } => commands::deploy::execute(&cli.config, job.as_deref()).await,
        Commands::Validate { dry_run } => commands::validate::execute(&cli.config, dry_run).await,
        Commands::Resume { job } => commands::resume::execute(&cli.config, &job).await,
        Commands::Cleanup { job } => commands::cleanup::execute(&cli.config, &job).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
