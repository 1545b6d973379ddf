//! Render cadence for the status message
//!
//! Non-boundary renders are spaced at least `min_interval` apart. The check
//! is a pure function of the caller-supplied `now`, so tests drive it with
//! synthetic instants instead of sleeping.

use std::time::{Duration, Instant};

/// Minimum-interval gate between two non-boundary renders
#[derive(Clone, Debug)]
pub struct Cadence {
    min_interval: Duration,
    last_render: Option<Instant>,
}

impl Cadence {
    /// Create a gate with no render recorded yet
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_render: None,
        }
    }

    /// Configured minimum interval
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Whether a non-boundary render is allowed at `now`
    ///
    /// Always true before the first recorded render.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_render {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
        }
    }

    /// Record a render at `now`
    ///
    /// Boundary renders call this too, so the next progress render is spaced
    /// from them as well.
    pub fn mark(&mut self, now: Instant) {
        self.last_render = Some(now);
    }

    /// Check and record in one step; returns whether the render may go out
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.mark(now);
            true
        } else {
            false
        }
    }
}
