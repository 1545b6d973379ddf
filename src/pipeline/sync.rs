//! `repo sync` with a plain fallback

use super::PipelineContext;
use crate::error::Result;
use crate::notify::{StatusNotifier, render};
use crate::process::CommandSpec;
use std::time::{Duration, Instant};

/// The optimized sync invocation
pub fn sync_command(jobs: usize) -> CommandSpec {
    CommandSpec::argv(
        "repo",
        [
            "sync".to_string(),
            "-c".to_string(),
            format!("-j{jobs}"),
            "--optimized-fetch".to_string(),
            "--prune".to_string(),
            "--force-sync".to_string(),
            "--no-clone-bundle".to_string(),
            "--no-tags".to_string(),
        ],
    )
}

/// The fallback when the optimized sync fails
pub fn fallback_sync_command(jobs: usize) -> CommandSpec {
    CommandSpec::argv("repo", ["sync".to_string(), format!("-j{jobs}")])
}

/// Sync the source tree, reporting start and end in a status message
///
/// A failing fallback sync is logged; the build step decides whether the
/// tree is usable.
pub async fn sync_sources(ctx: &PipelineContext, rom_name: &str) -> Result<Duration> {
    let jobs = ctx.config.build.jobs();
    let started = Instant::now();

    let details = format!(
        "{}\n{}",
        render::line("Rom", rom_name),
        render::line("Jobs", &jobs.to_string())
    );
    let mut status = StatusNotifier::new(ctx.notifier.clone(), ctx.config.telegram.chat_id.clone());
    status.create(&render::sync_start(&details)).await;

    tracing::info!(jobs, "syncing sources");
    let synced = ctx.interruptible(run_sync(jobs)).await??;
    if !synced {
        tracing::warn!("repo sync failed, continuing with the current tree");
    }

    let took = started.elapsed();
    status
        .update(&render::sync_done(&render::line("Rom", rom_name), took), &[])
        .await;
    tracing::info!(elapsed_secs = took.as_secs(), "sync finished");
    Ok(took)
}

async fn run_sync(jobs: usize) -> Result<bool> {
    if sync_command(jobs).status().await?.success() {
        return Ok(true);
    }
    tracing::warn!("optimized repo sync failed, retrying plain sync");
    Ok(fallback_sync_command(jobs).status().await?.success())
}
