//! Core types for build-bot

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One progress marker extracted from a build-tool log line
///
/// Produced per matching line; the most recent record wins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Percentage including the sign, e.g. `"45%"`
    pub percent: String,
    /// Completed and total unit counts, e.g. `"1200/2669"`
    pub completed_of_total: String,
    /// Remaining-time estimate with the trailing "remaining" stripped
    pub eta: Option<String>,
}

/// Phase of a build attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildPhase {
    /// Process not spawned yet
    Starting,
    /// Child process running, lines being consumed
    Running,
    /// Build failed or the loop hit an unrecoverable error
    Failed,
    /// Child exited zero
    Succeeded,
}

impl BuildPhase {
    /// Whether this phase is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildPhase::Failed | BuildPhase::Succeeded)
    }
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildPhase::Starting => write!(f, "starting"),
            BuildPhase::Running => write!(f, "running"),
            BuildPhase::Failed => write!(f, "failed"),
            BuildPhase::Succeeded => write!(f, "succeeded"),
        }
    }
}

/// Value of one static info line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum InfoValue {
    /// Plain text, escaped when rendered
    Text(String),
    /// Pre-rendered markup (e.g. a commit link), inserted as-is
    Markup(String),
}

/// Ordered label/value block describing the build (device, target, compiler, ...)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoBlock {
    entries: Vec<(String, InfoValue)>,
}

impl InfoBlock {
    /// Create an empty block
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a plain-text line, replacing an existing line with the same label in place
    pub fn set(&mut self, label: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.put(label.into(), InfoValue::Text(value.into()))
    }

    /// Set a line whose value is already valid markup
    pub fn set_markup(&mut self, label: impl Into<String>, markup: impl Into<String>) -> &mut Self {
        self.put(label.into(), InfoValue::Markup(markup.into()))
    }

    /// Builder-style variant of [`InfoBlock::set`]
    pub fn with(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(label, value);
        self
    }

    fn put(&mut self, label: String, value: InfoValue) -> &mut Self {
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((label, value)),
        }
        self
    }

    /// Look up a line by label
    pub fn get(&self, label: &str) -> Option<&InfoValue> {
        self.entries.iter().find(|(l, _)| l == label).map(|(_, v)| v)
    }

    /// Iterate lines in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &InfoValue)> {
        self.entries.iter().map(|(l, v)| (l.as_str(), v))
    }

    /// Number of lines
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the block has no lines
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Structured status of one build attempt
///
/// Mutated only by the build runner; the remote message is its rendered projection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildStatus {
    /// Current phase
    pub phase: BuildPhase,
    /// Wall time since the child was spawned
    pub elapsed: Duration,
    /// Most recent gated progress record
    pub last_progress: Option<ProgressRecord>,
    /// Static description of the build
    pub static_info: InfoBlock,
}

impl BuildStatus {
    /// New status in the `Starting` phase
    pub fn new(static_info: InfoBlock) -> Self {
        Self {
            phase: BuildPhase::Starting,
            elapsed: Duration::ZERO,
            last_progress: None,
            static_info,
        }
    }
}

/// Handle of the single remote status message of a build attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHandle {
    /// Message id returned by the send call
    pub id: i64,
    /// Destination chat
    pub chat: String,
}

/// Inline link button attached to a message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    /// Button caption
    pub text: String,
    /// Target URL
    pub url: String,
}

impl Button {
    /// Create a new button
    pub fn new(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: url.into(),
        }
    }
}

/// File-hosting provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadProvider {
    /// PixelDrain (primary host)
    PixelDrain,
    /// GoFile (secondary host)
    GoFile,
}

impl UploadProvider {
    /// Short tag used in button captions
    pub fn tag(&self) -> &'static str {
        match self {
            UploadProvider::PixelDrain => "PD",
            UploadProvider::GoFile => "GF",
        }
    }
}

impl std::fmt::Display for UploadProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadProvider::PixelDrain => write!(f, "PixelDrain"),
            UploadProvider::GoFile => write!(f, "GoFile"),
        }
    }
}

/// Outcome of one provider transfer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadResult {
    /// Provider attempted
    pub provider: UploadProvider,
    /// Download link, absent when the transfer failed
    pub link: Option<String>,
}

/// A build output candidate to upload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artifact {
    /// Caption shown on the buttons ("Download", "Recovery", "JSON")
    pub label: String,
    /// Location on disk
    pub path: PathBuf,
}

impl Artifact {
    /// Create a new artifact candidate
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_block_keeps_insertion_order_and_replaces_in_place() {
        let mut info = InfoBlock::new();
        info.set("Rom", "lineage")
            .set("Device", "lavender")
            .set("Type", "userdebug");
        info.set("Device", "whyred");

        let labels: Vec<_> = info.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, ["Rom", "Device", "Type"]);
        assert_eq!(
            info.get("Device"),
            Some(&InfoValue::Text("whyred".to_string()))
        );
        assert_eq!(info.len(), 3);
    }

    #[test]
    fn markup_lines_are_tagged() {
        let mut info = InfoBlock::new();
        info.set_markup("Head", "<a href='x'>abc</a>");
        assert!(matches!(info.get("Head"), Some(InfoValue::Markup(_))));
    }

    #[test]
    fn terminal_phases() {
        assert!(!BuildPhase::Starting.is_terminal());
        assert!(!BuildPhase::Running.is_terminal());
        assert!(BuildPhase::Failed.is_terminal());
        assert!(BuildPhase::Succeeded.is_terminal());
    }

    #[test]
    fn provider_tags_and_names() {
        assert_eq!(UploadProvider::PixelDrain.tag(), "PD");
        assert_eq!(UploadProvider::GoFile.tag(), "GF");
        assert_eq!(UploadProvider::GoFile.to_string(), "GoFile");
    }

    #[test]
    fn new_status_starts_empty() {
        let status = BuildStatus::new(InfoBlock::new().with("Device", "x"));
        assert_eq!(status.phase, BuildPhase::Starting);
        assert_eq!(status.elapsed, Duration::ZERO);
        assert!(status.last_progress.is_none());
    }
}
