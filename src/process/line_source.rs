//! Line Source: combined stdout+stderr of a running child
//!
//! Both streams of the child are attached to the write end of one OS pipe,
//! so lines arrive in the order the child wrote them. A reader thread splits
//! the pipe into lines (lossy UTF-8) and hands them over a bounded channel.
//!
//! The stream ends when the child exits, not when the pipe closes: a
//! background process started by the build (a compiler cache server, say)
//! may hold the write end open long after. Lines still buffered at exit are
//! drained for at most [`EXIT_DRAIN`].

use super::CommandSpec;
use crate::error::{Error, Result};
use std::io::{BufRead, BufReader};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::Instant;

const LINE_BUFFER: usize = 1024;

/// How long to keep reading output once the child has exited
pub const EXIT_DRAIN: Duration = Duration::from_secs(1);

/// Lazy, finite sequence of output lines from one child process
///
/// Not restartable: once [`LineSource::next_line`] returns `None` the child
/// has exited or closed its output.
#[derive(Debug)]
pub struct LineSource {
    child: Child,
    command: String,
    lines: mpsc::Receiver<String>,
    drain_until: Option<Instant>,
    finished: bool,
}

impl LineSource {
    /// Spawn `spec` with stdout and stderr merged into one stream
    ///
    /// The child is placed in its own process group so that terminating it
    /// also reaches the tools it started.
    pub fn spawn(spec: &CommandSpec) -> Result<Self> {
        let spawn_err = |source| Error::Spawn {
            command: spec.to_string(),
            source,
        };

        let (reader, writer) = std::io::pipe().map_err(spawn_err)?;
        let stderr_writer = writer.try_clone().map_err(spawn_err)?;

        let mut cmd = spec.command();
        cmd.stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr_writer)
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(spawn_err)?;
        // Release our copies of the write end so the reader sees EOF when the child exits
        drop(cmd);

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        std::thread::Builder::new()
            .name("build-output".into())
            .spawn(move || pump_lines(reader, tx))
            .map_err(spawn_err)?;

        tracing::info!(command = %spec, pid = ?child.id(), "spawned build process");

        Ok(Self {
            child,
            command: spec.to_string(),
            lines: rx,
            drain_until: None,
            finished: false,
        })
    }

    /// OS process id, while the child is running
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next line of output, without the trailing newline
    ///
    /// Returns `None` once the child has closed both streams, or once it has
    /// exited and the output buffered at that point has been drained.
    pub async fn next_line(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }
        loop {
            if let Some(deadline) = self.drain_until {
                return match tokio::time::timeout_at(deadline, self.lines.recv()).await {
                    Ok(Some(line)) => Some(line),
                    Ok(None) => self.finish(),
                    Err(_) => {
                        tracing::debug!(
                            command = %self.command,
                            "output still open after exit, detaching from it"
                        );
                        self.finish()
                    }
                };
            }

            tokio::select! {
                biased;
                line = self.lines.recv() => {
                    return match line {
                        Some(line) => Some(line),
                        None => self.finish(),
                    };
                }
                status = self.child.wait() => {
                    if let Err(e) = status {
                        tracing::warn!(error = %e, "waiting for build process failed");
                    }
                    self.drain_until = Some(Instant::now() + EXIT_DRAIN);
                }
            }
        }
    }

    fn finish(&mut self) -> Option<String> {
        self.finished = true;
        None
    }

    /// Wait for the child to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await?;
        tracing::debug!(command = %self.command, code = ?status.code(), "build process exited");
        Ok(status)
    }

    /// Stop the child: SIGTERM to its group, then SIGKILL after `grace`
    ///
    /// Returns the exit status when the child could be reaped.
    pub async fn terminate(&mut self, grace: Duration) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(Some(status));
        }

        tracing::info!(pid = ?self.child.id(), "terminating build process");
        self.signal_group(Signal::Term);

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => Ok(Some(status?)),
            Err(_) => {
                tracing::warn!(
                    grace_ms = grace.as_millis(),
                    "build process still alive after grace period, killing"
                );
                self.signal_group(Signal::Kill);
                self.child.kill().await?;
                Ok(self.child.try_wait()?)
            }
        }
    }

    #[cfg(unix)]
    fn signal_group(&mut self, signal: Signal) {
        let Some(pid) = self.child.id() else {
            return;
        };
        let Ok(pgid) = i32::try_from(pid) else {
            return;
        };
        let sig = match signal {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // SAFETY: kill(2) has no memory-safety preconditions; a negative pid targets the group
        let rc = unsafe { libc::kill(-pgid, sig) };
        if rc != 0 {
            tracing::debug!(
                pgid,
                error = %std::io::Error::last_os_error(),
                "signalling process group failed"
            );
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&mut self, _signal: Signal) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(error = %e, "start_kill failed");
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Signal {
    Term,
    Kill,
}

fn pump_lines(reader: std::io::PipeReader, tx: mpsc::Sender<String>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.blocking_send(line).is_err() {
                    // consumer gone
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(error = %e, "reading build output failed");
                break;
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(source: &mut LineSource) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = source.next_line().await {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn merges_stdout_and_stderr_in_write_order() {
        let spec = CommandSpec::shell("echo one; echo two >&2; echo three; echo four >&2");
        let mut source = LineSource::spawn(&spec).unwrap();
        let lines = collect(&mut source).await;
        assert_eq!(lines, ["one", "two", "three", "four"]);
        assert!(source.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn reports_non_zero_exit() {
        let spec = CommandSpec::shell("echo partial; exit 1");
        let mut source = LineSource::spawn(&spec).unwrap();
        assert_eq!(collect(&mut source).await, ["partial"]);
        assert_eq!(source.wait().await.unwrap().code(), Some(1));
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced_not_dropped() {
        let spec = CommandSpec::shell(r"printf 'ok\n\377bad\nlast'");
        let mut source = LineSource::spawn(&spec).unwrap();
        let lines = collect(&mut source).await;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "ok");
        assert!(lines[1].ends_with("bad"));
        assert_eq!(lines[2], "last");
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let spec = CommandSpec::argv("/nonexistent/build-tool", ["x"]);
        let err = LineSource::spawn(&spec).unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[tokio::test]
    async fn stream_ends_at_exit_even_if_a_background_process_holds_the_pipe() {
        let spec = CommandSpec::shell("echo one; sleep 5 & echo two; exit 3");
        let mut source = LineSource::spawn(&spec).unwrap();

        let started = Instant::now();
        assert_eq!(collect(&mut source).await, ["one", "two"]);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(source.wait().await.unwrap().code(), Some(3));
        assert!(source.next_line().await.is_none());
    }

    #[tokio::test]
    async fn terminate_stops_a_cooperative_child() {
        let spec = CommandSpec::shell("echo started; sleep 30");
        let mut source = LineSource::spawn(&spec).unwrap();
        assert_eq!(source.next_line().await.as_deref(), Some("started"));

        let started = Instant::now();
        let status = source.terminate(Duration::from_secs(5)).await.unwrap();
        assert!(status.is_some());
        assert!(!status.unwrap().success());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn terminate_kills_a_child_ignoring_sigterm() {
        let spec = CommandSpec::shell("trap '' TERM; echo ready; while true; do sleep 0.1; done");
        let mut source = LineSource::spawn(&spec).unwrap();
        assert_eq!(source.next_line().await.as_deref(), Some("ready"));

        let started = Instant::now();
        source.terminate(Duration::from_millis(300)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(source.id().is_none(), "child should be reaped");
    }
}
