// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/washwatch

//! Power sample aggregation between publish ticks

/// Accumulates raw power samples and yields their average on drain.
///
/// Samples are trusted as-is; the wire format owns validation. A drain
/// with no accumulated samples returns `None` so a silent sensor is
/// never mistaken for a zero-watt reading.
#[derive(Debug, Default)]
pub struct PowerAggregator {
    sum: f64,
    count: u32,
}

impl PowerAggregator {
    /// Create an empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one power sample
    pub fn add(&mut self, sample: f64) {
        self.sum += sample;
        self.count += 1;
    }

    /// Number of samples accumulated since the last drain
    pub fn sample_count(&self) -> u32 {
        self.count
    }

    /// Average of the samples accumulated so far, without resetting.
    /// Lets transition evaluation react mid-window instead of waiting
    /// for the next drain.
    pub fn peek(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.sum / self.count as f64)
    }

    /// Average of all samples since the previous drain, resetting the
    /// accumulators. Returns `None` without resetting when no samples
    /// arrived.
    pub fn drain(&mut self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let avg = self.sum / self.count as f64;
        self.sum = 0.0;
        self.count = 0;
        Some(avg)
    }
}
