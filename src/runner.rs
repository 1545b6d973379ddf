//! Build Runner
//!
//! Drives one build attempt through `Starting -> Running -> {Succeeded, Failed}`:
//!
//! 1. spawn the child and create the status message (boundary render)
//! 2. record every output line, fold gated progress into [`BuildStatus`] and
//!    edit the message at most once per cadence window
//! 3. on exit, render the terminal state (boundary render); failures also
//!    ship the log to the error chat
//!
//! An interrupt stops the child (SIGTERM, then SIGKILL after the grace
//! period) and returns [`Error::Interrupted`] without touching the message.

use crate::cadence::Cadence;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::log_recorder::LogRecorder;
use crate::notify::render;
use crate::notify::{Notifier, StatusNotifier};
use crate::process::{CommandSpec, LineSource};
use crate::progress::{ProgressGate, ProgressParser};
use crate::types::{BuildPhase, BuildStatus, InfoBlock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Shortest ticker period; `tokio::time::interval` rejects zero
const MIN_TICK: Duration = Duration::from_millis(10);

/// What to build and how to describe it
#[derive(Debug)]
pub struct BuildSpec {
    /// Build command
    pub command: CommandSpec,
    /// Static info shown in every render
    pub info: InfoBlock,
    /// Condition before progress lines count
    pub gate: ProgressGate,
    /// Preferred failure attachment, used when it exists (e.g. `out/error.log`)
    pub error_log: Option<PathBuf>,
}

impl BuildSpec {
    /// Spec with an always-open gate and no dedicated error log
    pub fn new(command: CommandSpec, info: InfoBlock) -> Self {
        Self {
            command,
            info,
            gate: ProgressGate::open(),
            error_log: None,
        }
    }

    /// Use `gate` for progress lines
    pub fn with_gate(mut self, gate: ProgressGate) -> Self {
        self.gate = gate;
        self
    }

    /// Prefer `path` as the failure attachment when it exists
    pub fn with_error_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.error_log = Some(path.into());
        self
    }
}

/// A finished, successful build
#[derive(Debug)]
pub struct BuildSuccess {
    /// Final status (phase `Succeeded`)
    pub status: BuildStatus,
    /// Rendered success text, the base of the upload renders
    pub message: String,
    /// Status message, handed on to the upload phase
    pub notifier: StatusNotifier,
}

/// Runs builds and reports them through a [`Notifier`]
pub struct BuildRunner {
    notifier: Arc<dyn Notifier>,
    chat: String,
    error_chat: String,
    log_file: PathBuf,
    update_interval: Duration,
    kill_grace: Duration,
    mirror_stdout: bool,
    cancel: CancellationToken,
}

impl BuildRunner {
    /// Runner using the destinations and timings from `config`
    pub fn new(config: &Config, notifier: Arc<dyn Notifier>, cancel: CancellationToken) -> Self {
        Self {
            notifier,
            chat: config.telegram.chat_id.clone(),
            error_chat: config.telegram.error_chat().to_string(),
            log_file: config.build.log_file.clone(),
            update_interval: config.build.update_interval,
            kill_grace: config.build.kill_grace,
            mirror_stdout: true,
            cancel,
        }
    }

    /// Turn the stdout mirror of build lines on or off
    pub fn mirror_stdout(mut self, enabled: bool) -> Self {
        self.mirror_stdout = enabled;
        self
    }

    fn open_log(&self) -> Result<LogRecorder> {
        if self.mirror_stdout {
            LogRecorder::create(&self.log_file)
        } else {
            LogRecorder::with_mirror(&self.log_file, None)
        }
    }

    /// Run one build to its terminal state
    ///
    /// Returns the success record, or the fatal error after the failure has
    /// been rendered and the log shipped.
    pub async fn run(&self, spec: BuildSpec) -> Result<BuildSuccess> {
        let BuildSpec {
            command,
            info,
            gate,
            error_log,
        } = spec;

        if self.cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }

        let mut status = BuildStatus::new(info);
        let mut message = StatusNotifier::new(self.notifier.clone(), self.chat.clone());
        let mut parser = ProgressParser::new(gate);
        let mut cadence = Cadence::new(self.update_interval);

        let mut log = self.open_log()?;
        let mut source = match LineSource::spawn(&command) {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(error = %e, command = %command, "could not start build");
                status.phase = BuildPhase::Failed;
                message
                    .create(&render::build_failed(&status.static_info, Duration::ZERO))
                    .await;
                return Err(e);
            }
        };

        let started = Instant::now();
        status.phase = BuildPhase::Running;
        message.create(&render::build_start(&status.static_info)).await;
        cadence.mark(Instant::now());

        let mut ticker = tokio::time::interval(self.update_interval.max(MIN_TICK));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut loop_error = None;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::warn!("interrupt received, stopping build");
                    if let Err(e) = source.terminate(self.kill_grace).await {
                        tracing::warn!(error = %e, "failed to terminate build process");
                    }
                    drop(log);
                    return Err(Error::Interrupted);
                }
                line = source.next_line() => {
                    let Some(line) = line else { break };
                    if let Err(e) = log.record(&line) {
                        loop_error = Some(e);
                        break;
                    }
                    if let Some(record) = parser.feed(&line) {
                        status.last_progress = Some(record);
                    }
                }
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            status.elapsed = now.duration_since(started);
            if cadence.try_acquire(now) {
                let text = render::build_progress(
                    &status.static_info,
                    status.last_progress.as_ref(),
                    status.elapsed,
                );
                message.update(&text, &[]).await;
            }
        }

        let (succeeded, exit_code) = match loop_error {
            Some(e) => {
                tracing::error!(error = %e, "build loop failed, stopping build");
                if let Err(e) = source.terminate(self.kill_grace).await {
                    tracing::warn!(error = %e, "failed to terminate build process");
                }
                (false, None)
            }
            None => match source.wait().await {
                Ok(exit) => (exit.success(), exit.code()),
                Err(e) => {
                    tracing::error!(error = %e, "waiting for build process failed");
                    (false, None)
                }
            },
        };

        status.elapsed = started.elapsed();
        // flushed before the log may be attached below
        if let Err(e) = log.close() {
            tracing::warn!(error = %e, "closing build log failed");
        }

        if succeeded {
            status.phase = BuildPhase::Succeeded;
            let text = render::build_success(&status.static_info, status.elapsed);
            message.update(&render::uploading(&text), &[]).await;
            tracing::info!(elapsed_secs = status.elapsed.as_secs(), "build succeeded");
            return Ok(BuildSuccess {
                status,
                message: text,
                notifier: message,
            });
        }

        status.phase = BuildPhase::Failed;
        message
            .update(&render::build_failed(&status.static_info, status.elapsed), &[])
            .await;
        let attachment = error_log
            .filter(|p| p.exists())
            .unwrap_or_else(|| self.log_file.clone());
        tracing::error!(
            exit_code = ?exit_code,
            elapsed_secs = status.elapsed.as_secs(),
            log = %attachment.display(),
            "build failed"
        );
        self.notifier
            .send_document(&self.error_chat, &attachment)
            .await;

        Err(Error::BuildFailed { exit_code })
    }
}

impl std::fmt::Debug for BuildRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildRunner")
            .field("chat", &self.chat)
            .field("error_chat", &self.error_chat)
            .field("log_file", &self.log_file)
            .field("update_interval", &self.update_interval)
            .field("kill_grace", &self.kill_grace)
            .finish()
    }
}
