// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/washwatch

//! Door sensor debouncing

use std::time::{Duration, Instant};

/// Confirmation filter over the raw open/closed door signal.
///
/// Tracks how long the door has been held open continuously. Deciding
/// what a held-open door *means* belongs to the state engine; the
/// debouncer knows nothing about machine state.
#[derive(Debug, Default)]
pub struct DoorDebouncer {
    is_open: bool,
    open_since: Option<Instant>,
}

impl DoorDebouncer {
    /// Create a debouncer for a closed door
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw sensor reading
    pub fn update(&mut self, open: bool, now: Instant) {
        self.is_open = open;
        if !open {
            self.open_since = None;
        } else if self.open_since.is_none() {
            self.open_since = Some(now);
        }
    }

    /// Last raw reading
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// How long the door has been continuously open, zero when closed
    pub fn held_open_for(&self, now: Instant) -> Duration {
        match self.open_since {
            Some(since) if self.is_open => now.saturating_duration_since(since),
            _ => Duration::ZERO,
        }
    }

    /// Restart the hold window: an open door counts as freshly opened
    /// at `now`. Used by the state engine when entering a state where
    /// the hold timer becomes meaningful.
    pub fn rearm(&mut self, now: Instant) {
        self.open_since = if self.is_open { Some(now) } else { None };
    }
}
