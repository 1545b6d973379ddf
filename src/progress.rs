//! Progress extraction from build-tool log lines
//!
//! Soong/ninja print status lines shaped like
//! `[ 45% 1200/2669 12m34s remaining] ...` (or `remaining: 12 mins`). The
//! parser turns one such line into a [`ProgressRecord`]. Lines that do not
//! start their bracket with the `NN% NN/NN` shape never match.
//!
//! Some builds print progress-looking noise before the real compile step
//! starts, so records only count once a [`ProgressGate`] has opened.

use crate::types::ProgressRecord;
use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\s*(\d+(?:\.\d+)?%)\s+(\d+/\d+)([^\]]*)\]").expect("progress regex is valid")
});

#[allow(clippy::expect_used)]
static ETA_AFTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"remaining:\s*(\S.*?)\s*$").expect("eta regex is valid")
});

#[allow(clippy::expect_used)]
static ETA_BEFORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\S.*?)\s+remaining\b").expect("eta regex is valid")
});

/// Marker soong prints once the real ninja build begins
pub const NINJA_STARTED_MARKER: &str = "Starting ninja...";

/// Parse one log line into a progress record
///
/// Returns `None` for lines without a `[ NN% NN/NN ...]` group. Content after
/// the first closing bracket is ignored.
///
/// ```
/// use build_bot::progress::parse_progress;
///
/// let record = parse_progress("[ 45% 1200/2669 remaining: 12 mins]").unwrap();
/// assert_eq!(record.percent, "45%");
/// assert_eq!(record.completed_of_total, "1200/2669");
/// assert_eq!(record.eta.as_deref(), Some("12 mins"));
///
/// assert!(parse_progress("[building] target foo").is_none());
/// ```
pub fn parse_progress(line: &str) -> Option<ProgressRecord> {
    let caps = PROGRESS_RE.captures(line)?;
    let percent = caps.get(1)?.as_str().to_string();
    let completed_of_total = caps.get(2)?.as_str().to_string();
    let eta = caps.get(3).and_then(|tail| parse_eta(tail.as_str()));

    Some(ProgressRecord {
        percent,
        completed_of_total,
        eta,
    })
}

fn parse_eta(tail: &str) -> Option<String> {
    ETA_AFTER_RE
        .captures(tail)
        .or_else(|| ETA_BEFORE_RE.captures(tail))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|eta| !eta.is_empty())
}

/// Predicate deciding whether a line opens the gate
pub type GatePredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Condition that must hold before progress lines are honored
///
/// Once open, the gate stays open for the rest of the build.
pub struct ProgressGate {
    open: bool,
    predicate: Option<GatePredicate>,
}

impl ProgressGate {
    /// A gate that is open from the start
    pub fn open() -> Self {
        Self {
            open: true,
            predicate: None,
        }
    }

    /// A gate that opens on the first line containing `marker`
    pub fn after_marker(marker: impl Into<String>) -> Self {
        let marker = marker.into();
        Self::when(move |line| line.contains(&marker))
    }

    /// A gate that opens on the first line for which `predicate` holds
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            open: false,
            predicate: Some(Box::new(predicate)),
        }
    }

    /// Feed one line; returns whether the gate is open afterwards
    ///
    /// The line that opens the gate is itself honored.
    pub fn observe(&mut self, line: &str) -> bool {
        if !self.open
            && let Some(predicate) = &self.predicate
            && predicate(line)
        {
            tracing::debug!("progress gate opened");
            self.open = true;
        }
        self.open
    }

    /// Whether the gate has opened
    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl std::fmt::Debug for ProgressGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressGate")
            .field("open", &self.open)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Gated progress parser fed by the build runner, one line at a time
#[derive(Debug)]
pub struct ProgressParser {
    gate: ProgressGate,
}

impl ProgressParser {
    /// Create a parser using the given gate
    pub fn new(gate: ProgressGate) -> Self {
        Self { gate }
    }

    /// Observe a line and return its record if the gate is open and it matches
    pub fn feed(&mut self, line: &str) -> Option<ProgressRecord> {
        if !self.gate.observe(line) {
            return None;
        }
        parse_progress(line)
    }

    /// Whether progress lines are currently honored
    pub fn gate_open(&self) -> bool {
        self.gate.is_open()
    }
}
