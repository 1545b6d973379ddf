//! Error types for build-bot
//!
//! This module provides the error taxonomy for the build runner, including:
//! - Fatal outcomes (spawn failure, failed build, missing artifact, failed primary upload)
//! - Locally recovered errors (notification transport, single-provider upload failures)
//! - Process exit code mapping for the CLI

use crate::types::UploadProvider;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for build-bot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for build-bot
///
/// Only a handful of variants are user-visible fatal outcomes (see [`Error::is_fatal`]).
/// The rest are recovered where they occur and only surface in logs.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "CONFIG_DEVICE")
        key: Option<String>,
    },

    /// The build (or a helper) process could not be started
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// Display form of the command that failed to start
        command: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The build process exited with a non-zero status
    #[error("build failed with exit code {exit_code:?}")]
    BuildFailed {
        /// Exit code reported by the child (None when killed by a signal)
        exit_code: Option<i32>,
    },

    /// The build finished but the expected output file was not produced
    #[error("artifact missing: {0}")]
    ArtifactMissing(String),

    /// The primary artifact produced no link from any provider
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// Notification API error (always recovered locally)
    #[error("notification error: {0}")]
    Notification(#[from] NotifyError),

    /// Single-provider upload error (recovered as an absent link)
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    /// External interrupt (SIGINT/SIGTERM) received during the build
    #[error("interrupted by signal")]
    Interrupted,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Archive packaging error
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// External tool execution failed (repo, git, curl, make, etc.)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Notification API errors
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The API answered with a non-success status
    #[error("API returned status {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body (truncated by the caller if needed)
        body: String,
    },

    /// The API answered 200 but without the expected `result` payload
    #[error("response did not contain {0}")]
    MissingResult(&'static str),

    /// Transport-level failure (connect, timeout, TLS)
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Reading a document to attach failed
    #[error("failed to read document {path}: {source}")]
    Document {
        /// The document path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Upload provider errors
#[derive(Debug, Error)]
pub enum UploadError {
    /// The provider answered with a non-success status
    #[error("{provider} returned status {status}: {body}")]
    Status {
        /// Provider that failed
        provider: UploadProvider,
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// The provider response did not contain the expected field
    #[error("{provider} response missing {field}")]
    MissingField {
        /// Provider that failed
        provider: UploadProvider,
        /// Name of the missing JSON field
        field: &'static str,
    },

    /// The provider cannot be used (missing API key, no server available)
    #[error("{provider} unavailable: {reason}")]
    Unavailable {
        /// Provider that is unavailable
        provider: UploadProvider,
        /// Why it is unavailable
        reason: String,
    },

    /// Connection or transfer failure
    #[error("{provider} transport error: {source}")]
    Transport {
        /// Provider that failed
        provider: UploadProvider,
        /// Underlying HTTP client error
        #[source]
        source: reqwest::Error,
    },

    /// The transfer did not finish within the configured timeout
    #[error("{provider} upload timed out")]
    Timeout {
        /// Provider that timed out
        provider: UploadProvider,
    },

    /// The file to upload does not exist
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
}

impl Error {
    /// Create a configuration error for a missing key
    pub fn missing_config(key: &str) -> Self {
        Error::Config {
            message: format!("{key} is not set"),
            key: Some(key.to_string()),
        }
    }

    /// Whether this error is a user-visible fatal outcome
    ///
    /// Fatal errors are rendered into the status message and terminate the
    /// process with a non-zero exit code. Everything else is swallowed with a
    /// local log line where it occurs.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config { .. }
                | Error::Spawn { .. }
                | Error::BuildFailed { .. }
                | Error::ArtifactMissing(_)
                | Error::UploadFailed(_)
                | Error::Interrupted
        )
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Interrupted => 130,
            _ => 1,
        }
    }

    /// Machine-readable error code, used as a structured log field
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Spawn { .. } => "spawn_error",
            Error::BuildFailed { .. } => "build_failure",
            Error::ArtifactMissing(_) => "artifact_missing",
            Error::UploadFailed(_) => "upload_failure",
            Error::Notification(_) => "notification_transport_error",
            Error::Upload(_) => "upload_error",
            Error::Interrupted => "interrupted",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Zip(_) => "zip_error",
            Error::ExternalTool(_) => "external_tool_error",
            Error::Other(_) => "internal_error",
        }
    }
}
