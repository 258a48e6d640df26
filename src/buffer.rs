use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::RecorderSettings;
use crate::sample::Sample;

/// Why a chunk was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationTrigger {
    SampleCount,
    Elapsed,
    /// Final flush on session stop
    Stop,
}

/// Count/time thresholds for closing a chunk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationPolicy {
    pub max_samples: usize,
    pub max_age: Duration,
}

impl RotationPolicy {
    pub fn new(max_samples: usize, max_age: Duration) -> Self {
        Self {
            max_samples: max_samples.max(1),
            max_age,
        }
    }

    /// Decide, before appending the next sample, whether the buffer must be
    /// sealed first. The incoming sample then opens the new chunk.
    pub fn check(&self, buffered: usize, age: Duration) -> Option<RotationTrigger> {
        if buffered == 0 {
            return None;
        }
        if buffered >= self.max_samples {
            return Some(RotationTrigger::SampleCount);
        }
        if age > self.max_age {
            return Some(RotationTrigger::Elapsed);
        }
        None
    }
}

impl From<&RecorderSettings> for RotationPolicy {
    fn from(settings: &RecorderSettings) -> Self {
        Self::new(settings.max_chunk_samples, settings.max_chunk_duration())
    }
}

/// Samples taken out of the buffer, ready to become one chunk
#[derive(Debug)]
pub struct SealedChunk {
    pub samples: Vec<Sample>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub trigger: RotationTrigger,
}

/// Samples accepted since the last rotation plus the rotation clock
#[derive(Debug)]
pub struct ChunkBuffer {
    samples: Vec<Sample>,
    opened_at: Instant,
    opened_wall: DateTime<Utc>,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            opened_at: Instant::now(),
            opened_wall: Utc::now(),
        }
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.opened_at)
    }

    pub fn opened_wall(&self) -> DateTime<Utc> {
        self.opened_wall
    }

    /// Rotation needed before `now`'s sample can be appended
    pub fn needs_rotation(&self, policy: &RotationPolicy, now: Instant) -> Option<RotationTrigger> {
        policy.check(self.len(), self.age(now))
    }

    /// Swap out the buffered samples and restart the rotation clock
    pub fn seal(&mut self, trigger: RotationTrigger) -> SealedChunk {
        let samples = std::mem::take(&mut self.samples);
        let end_time = Utc::now();
        let start_time = std::mem::replace(&mut self.opened_wall, end_time);
        self.opened_at = Instant::now();

        debug!(
            "Sealed {} samples ({:?}) spanning {} .. {}",
            samples.len(),
            trigger,
            start_time,
            end_time
        );

        SealedChunk {
            samples,
            start_time,
            end_time,
            trigger,
        }
    }

    /// Restart the rotation clock without sealing (empty buffer past its age)
    pub fn restart_clock(&mut self) {
        self.opened_at = Instant::now();
        self.opened_wall = Utc::now();
    }
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new()
    }
}
