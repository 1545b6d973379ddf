//! # build-bot
//!
//! Runs Android ROM and kernel builds while keeping a Telegram status message
//! up to date, then uploads the produced archives to file hosts.
//!
//! ## Design
//!
//! - **One build, one message** - a single status message is created when the
//!   build starts and edited in place until the final report
//! - **Rate limited** - progress edits are spaced by a configurable cadence
//! - **Failure tolerant reporting** - notification and secondary upload errors
//!   are logged, never fatal
//! - **Graceful interrupt** - SIGINT/SIGTERM stop the build's process group
//!
//! ## Quick Start
//!
//! ```no_run
//! use build_bot::pipeline::{PipelineContext, rom};
//! use build_bot::{Config, TelegramNotifier, shutdown_token};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     config.validate_rom()?;
//!
//!     let notifier = TelegramNotifier::new(&config.telegram, &config.retry)?;
//!     let ctx = PipelineContext::new(Arc::new(config), Arc::new(notifier), shutdown_token());
//!
//!     let report = rom::run(&ctx, rom::RomOptions::default()).await?;
//!     println!("uploaded {} files", report.uploads.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Render cadence gate
pub mod cadence;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Build log file with stdout mirror
pub mod log_recorder;
/// Status notifications
pub mod notify;
/// ROM and kernel pipelines
pub mod pipeline;
/// Child process plumbing
pub mod process;
/// Build progress parsing
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// Build runner state machine
pub mod runner;
/// Core types
pub mod types;
/// Artifact uploads
pub mod upload;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{BuildConfig, Config, KernelConfig, RomConfig, TelegramConfig, UploadConfig};
pub use error::{Error, NotifyError, Result, UploadError};
pub use notify::{NoOpNotifier, Notifier, StatusNotifier, TelegramNotifier};
pub use runner::{BuildRunner, BuildSpec, BuildSuccess};
pub use types::{
    Artifact, BuildPhase, BuildStatus, Button, InfoBlock, InfoValue, MessageHandle,
    ProgressRecord, UploadProvider, UploadResult,
};
pub use upload::{ArtifactUploader, UploadReport, Uploader};

use tokio_util::sync::CancellationToken;

/// Cancellation token that fires on the first termination signal
///
/// Spawns a task that waits for the signal and cancels the token. Pass the
/// token to the pipelines; the build runner stops the child when it fires.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Must be called from within a tokio runtime.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.cancel();
    });
    token
}

/// Wait until SIGINT or SIGTERM (Ctrl+C elsewhere) is received
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

/// Wait until Ctrl+C is received
#[cfg(not(unix))]
pub async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
