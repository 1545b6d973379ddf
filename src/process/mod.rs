//! Child process plumbing
//!
//! [`CommandSpec`] describes what to run (a bash script line or a plain
//! argv), [`LineSource`] streams the combined output of a running child one
//! line at a time, and the helpers here run short-lived tools (probes, sync,
//! configure) to completion.

mod line_source;

pub use line_source::LineSource;

use crate::error::{Error, Result};
use std::fmt;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;

/// Shell used for script-style commands
pub const SHELL: &str = "/bin/bash";

/// A command to spawn
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandSpec {
    /// Script line run by `/bin/bash -c`
    Shell(String),
    /// Program and arguments run directly
    Argv {
        /// Program name or path
        program: String,
        /// Arguments
        args: Vec<String>,
    },
}

impl CommandSpec {
    /// Script line for `/bin/bash -c`
    pub fn shell(script: impl Into<String>) -> Self {
        CommandSpec::Shell(script.into())
    }

    /// Program with arguments
    pub fn argv<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::Argv {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build the tokio command without configuring stdio
    pub(crate) fn command(&self) -> Command {
        match self {
            CommandSpec::Shell(script) => {
                let mut cmd = Command::new(SHELL);
                cmd.arg("-c").arg(script);
                cmd
            }
            CommandSpec::Argv { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
        }
    }

    fn spawn_error(&self, source: std::io::Error) -> Error {
        Error::Spawn {
            command: self.to_string(),
            source,
        }
    }

    /// Run to completion with inherited stdio
    ///
    /// The exit status is returned as-is; callers decide whether non-zero is fatal.
    pub async fn status(&self) -> Result<ExitStatus> {
        tracing::debug!(command = %self, "running");
        let status = self
            .command()
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;
        tracing::debug!(command = %self, code = ?status.code(), "finished");
        Ok(status)
    }

    /// Run to completion and capture stdout
    ///
    /// Non-zero exit is reported as [`Error::ExternalTool`] carrying stderr.
    pub async fn output(&self) -> Result<String> {
        tracing::debug!(command = %self, "capturing output");
        let output = self
            .command()
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::ExternalTool(format!(
                "`{self}` exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSpec::Shell(script) => write!(f, "{script}"),
            CommandSpec::Argv { program, args } => {
                write!(f, "{program}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                Ok(())
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_argv() {
        let spec = CommandSpec::argv("make", ["-j8", "O=out"]);
        assert_eq!(spec.to_string(), "make -j8 O=out");
        assert_eq!(
            CommandSpec::shell("source build/envsetup.sh && m bacon").to_string(),
            "source build/envsetup.sh && m bacon"
        );
    }

    #[tokio::test]
    async fn output_captures_stdout() {
        let out = CommandSpec::shell("echo VER=14; echo BID=AP1A")
            .output()
            .await
            .unwrap();
        assert_eq!(out.lines().collect::<Vec<_>>(), ["VER=14", "BID=AP1A"]);
    }

    #[tokio::test]
    async fn output_reports_failure_as_external_tool_error() {
        let err = CommandSpec::shell("echo boom >&2; exit 3")
            .output()
            .await
            .unwrap_err();
        match err {
            Error::ExternalTool(msg) => assert!(msg.contains("boom"), "got: {msg}"),
            other => panic!("expected ExternalTool, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_returns_exit_code() {
        let status = CommandSpec::shell("exit 4").status().await.unwrap();
        assert_eq!(status.code(), Some(4));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = CommandSpec::argv("definitely-not-a-real-binary-xyz", Vec::<String>::new())
            .status()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }
}
