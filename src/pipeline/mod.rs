//! ROM and kernel pipelines
//!
//! Each pipeline prepares the tree, describes the build, runs it through the
//! [`BuildRunner`], locates or packages the artifacts and hands them to the
//! [`ArtifactUploader`]. Commands run in the current working directory, which
//! is expected to be the source tree.

pub mod kernel;
pub mod rom;
mod sync;

pub use sync::sync_sources;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::notify::{Notifier, render};
use crate::runner::{BuildRunner, BuildSuccess};
use crate::types::Artifact;
use crate::upload::{ArtifactUploader, UploadReport};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a pipeline needs from its caller
#[derive(Clone)]
pub struct PipelineContext {
    /// Immutable configuration
    pub config: Arc<Config>,
    /// Messaging backend
    pub notifier: Arc<dyn Notifier>,
    /// Cancelled on SIGINT/SIGTERM
    pub cancel: CancellationToken,
}

impl PipelineContext {
    /// Bundle the pipeline inputs
    pub fn new(config: Arc<Config>, notifier: Arc<dyn Notifier>, cancel: CancellationToken) -> Self {
        Self {
            config,
            notifier,
            cancel,
        }
    }

    /// Build runner wired to this context
    pub fn runner(&self) -> BuildRunner {
        BuildRunner::new(&self.config, self.notifier.clone(), self.cancel.clone())
    }

    /// Await a preparation step unless an interrupt arrives first
    ///
    /// On interrupt `step` is dropped, which kills any helper process it
    /// spawned, and [`Error::Interrupted`] is returned.
    pub async fn interruptible<T>(&self, step: impl Future<Output = T>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::warn!("interrupt received, abandoning current step");
                Err(Error::Interrupted)
            }
            out = step => Ok(out),
        }
    }

    /// Remove the output directory if it exists
    pub async fn clean_out_dir(&self) -> Result<()> {
        let out = &self.config.build.out_dir;
        if tokio::fs::try_exists(out).await? {
            tracing::info!(path = %out.display(), "cleaning output directory");
            tokio::fs::remove_dir_all(out).await?;
        }
        Ok(())
    }

    /// Upload the artifacts of a successful build
    pub async fn deliver(
        &self,
        build: &BuildSuccess,
        artifacts: &[Artifact],
        primary: &Path,
    ) -> Result<UploadReport> {
        let uploader = ArtifactUploader::from_config(&self.config.upload)?;
        uploader
            .deliver(&build.notifier, &build.message, artifacts, primary)
            .await
    }

    /// Render the upload-failed variant for a missing artifact and return the error
    pub async fn artifact_missing(&self, build: &BuildSuccess, reason: &str) -> Error {
        tracing::error!(reason, "no artifact to upload");
        build
            .notifier
            .update(&render::upload_failed(&build.message, reason), &[])
            .await;
        Error::ArtifactMissing(reason.to_string())
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoOpNotifier;
    use crate::process::CommandSpec;
    use std::time::{Duration, Instant};

    fn context() -> PipelineContext {
        PipelineContext::new(
            Arc::new(Config::default()),
            Arc::new(NoOpNotifier),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn interruptible_passes_through_finished_steps() {
        let ctx = context();
        let status = ctx
            .interruptible(CommandSpec::shell("exit 3").status())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn interruptible_does_not_start_after_cancel() {
        let ctx = context();
        ctx.cancel.cancel();
        let err = ctx.interruptible(async { 1 }).await.unwrap_err();
        assert!(matches!(err, Error::Interrupted));
    }

    /// Running or sleeping, not gone and not a zombie awaiting its reaper
    #[cfg(target_os = "linux")]
    fn alive(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| !rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn interrupt_kills_the_helper_of_a_running_step() {
        let ctx = context();
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("step.pid");
        let step = CommandSpec::shell(format!("echo $$ > '{}'; exec sleep 30", pid_file.display()));

        let trigger = ctx.cancel.clone();
        let pid_path = pid_file.clone();
        tokio::spawn(async move {
            while !pid_path.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            trigger.cancel();
        });

        let started = Instant::now();
        let err = ctx.interruptible(step.status()).await.unwrap_err();
        assert!(matches!(err, Error::Interrupted));
        assert!(started.elapsed() < Duration::from_secs(5));

        let pid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while alive(pid) {
            assert!(Instant::now() < deadline, "helper {pid} still alive");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
