//! build-bot command line entry point

use build_bot::pipeline::{PipelineContext, kernel, rom};
use build_bot::{Config, Error, Result, TelegramNotifier, UploadReport, shutdown_token};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Build Android ROMs and kernels with Telegram status reporting
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Env file seeding the `CONFIG_*` variables
    #[arg(long, global = true, value_name = "FILE", default_value = "config.env")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a ROM in the current source tree
    Rom {
        /// Run `repo sync` before building
        #[arg(short, long)]
        sync: bool,

        /// Remove the output directory first
        #[arg(short, long)]
        clean: bool,
    },

    /// Build a kernel in the current source tree and package it with AnyKernel3
    Kernel {
        /// Remove the output directory first
        #[arg(short, long)]
        clean: bool,

        /// Set up KernelSU before building
        #[arg(long)]
        ksu: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(report) => {
            tracing::info!(
                files = report.uploads.len(),
                elapsed_secs = report.elapsed.as_secs(),
                "all done"
            );
        }
        Err(err) => {
            tracing::error!(code = err.error_code(), error = %err, "build-bot failed");
            std::process::exit(err.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<UploadReport> {
    Config::load_env_file(&cli.config)?;
    let config = Config::from_env()?;
    match &cli.command {
        Commands::Rom { .. } => config.validate_rom()?,
        Commands::Kernel { .. } => config.validate_kernel()?,
    }

    let notifier = TelegramNotifier::new(&config.telegram, &config.retry)?;
    let ctx = PipelineContext::new(Arc::new(config), Arc::new(notifier), shutdown_token());

    let result = match cli.command {
        Commands::Rom { sync, clean } => rom::run(&ctx, rom::RomOptions { sync, clean }).await,
        Commands::Kernel { clean, ksu } => {
            kernel::run(&ctx, kernel::KernelOptions { clean, ksu }).await
        }
    };
    if matches!(result, Err(Error::Interrupted)) {
        tracing::warn!("interrupted, exiting without further notifications");
    }
    result
}

fn setup_logging(verbose: u8, quiet: u8) {
    let level = match (verbose, quiet) {
        (0, 0) => "info",
        (1, 0) => "debug",
        (_, 0) => "trace",
        (0, 1) => "warn",
        (0, _) => "error",
        _ => "info",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("build_bot={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
