// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


// Chunked session recorder
//
// Buffers samples for the open session and rotates them into write-once
// chunk files when a count or age threshold is crossed. Stopping flushes the
// remainder and writes a manifest describing every chunk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::buffer::{ChunkBuffer, RotationPolicy, RotationTrigger, SealedChunk};
use crate::config::RecorderSettings;
use crate::error::{RecorderError, SubscriberError};
use crate::protocol::SessionSummary;
use crate::sample::{DeviceDescriptor, Sample};
use crate::storage::StorageBackend;
use crate::subscriber::Subscriber;

/// Suffix identifying manifest files in storage
pub const MANIFEST_SUFFIX: &str = "_session.json";

pub fn chunk_filename(session_id: &str, chunk_id: u32) -> String {
    format!("{}_chunk_{:03}.json", session_id, chunk_id)
}

pub fn manifest_filename(session_id: &str) -> String {
    format!("{}{}", session_id, MANIFEST_SUFFIX)
}

fn default_persisted() -> bool {
    true
}

/// Manifest entry for one chunk file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub chunk_id: u32,
    pub filename: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub sample_count: u64,
    /// Bytes on disk, or the intended size when the write failed
    pub byte_size: u64,
    #[serde(default = "default_persisted")]
    pub persisted: bool,
}

/// Header stored at the top of every chunk file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkHeader {
    pub chunk_id: u32,
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub sample_count: u64,
}

/// On-disk layout of a chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkFile {
    pub chunk_info: ChunkHeader,
    pub samples: Vec<Sample>,
}

/// A recording session; also the on-disk manifest layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSession {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub device: DeviceDescriptor,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub chunks: Vec<ChunkRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_chunks: usize,
    #[serde(default)]
    pub total_samples: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

impl RecordingSession {
    fn new(
        session_id: String,
        start_time: DateTime<Utc>,
        device: DeviceDescriptor,
        channels: Vec<String>,
    ) -> Self {
        Self {
            session_id,
            start_time,
            device,
            channels,
            chunks: Vec::new(),
            end_time: None,
            total_chunks: 0,
            total_samples: 0,
            duration_seconds: None,
        }
    }

    /// Keep chunks ordered by id
    fn push_chunk(&mut self, chunk: ChunkRef) {
        let index = self
            .chunks
            .partition_point(|c| c.chunk_id < chunk.chunk_id);
        self.chunks.insert(index, chunk);
        self.total_chunks = self.chunks.len();
        self.total_samples = self.chunks.iter().map(|c| c.sample_count).sum();
    }

    fn finalize(&mut self, end_time: DateTime<Utc>) {
        self.total_chunks = self.chunks.len();
        self.total_samples = self.chunks.iter().map(|c| c.sample_count).sum();
        self.duration_seconds =
            Some((end_time - self.start_time).num_microseconds().unwrap_or(0) as f64 / 1e6);
        self.end_time = Some(end_time);
    }

    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn summary(&self, buffered_samples: usize) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            start_time: self.start_time,
            device: self.device.clone(),
            chunks_written: self.chunks.len(),
            samples_recorded: self.total_samples + buffered_samples as u64,
            buffered_samples,
            end_time: self.end_time,
            duration_seconds: self.duration_seconds,
        }
    }
}

/// Result of `stop_session`
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Finalized(FinalizedSession),
    NothingToStop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedSession {
    pub session: RecordingSession,
    /// Intended manifest location, returned even if the write failed
    pub manifest_path: PathBuf,
    pub manifest_written: bool,
}

struct OpenSession {
    session: RecordingSession,
    buffer: ChunkBuffer,
    next_chunk_id: u32,
    channel_mismatches: u64,
}

struct PendingChunk {
    session_id: String,
    chunk_id: u32,
    sealed: SealedChunk,
}

impl OpenSession {
    fn seal(&mut self, trigger: RotationTrigger) -> PendingChunk {
        let chunk_id = self.next_chunk_id;
        self.next_chunk_id += 1;
        PendingChunk {
            session_id: self.session.session_id.clone(),
            chunk_id,
            sealed: self.buffer.seal(trigger),
        }
    }
}

/// Subscriber that persists samples of the open session as chunk files.
///
/// The open session is owned here exclusively. Buffer swaps happen inside a
/// short critical section; file I/O happens outside it, serialized by
/// `io_lock` so chunks land in order and `stop_session` waits for any
/// rotation already in flight.
pub struct ChunkedRecorder {
    storage: Arc<dyn StorageBackend>,
    policy: RotationPolicy,
    max_retries: u32,
    open: Mutex<Option<OpenSession>>,
    io_lock: tokio::sync::Mutex<()>,
    last_session_ms: AtomicI64,
}

impl ChunkedRecorder {
    pub fn new(storage: Arc<dyn StorageBackend>, settings: &RecorderSettings, max_retries: u32) -> Self {
        Self::with_policy(storage, RotationPolicy::from(settings), max_retries)
    }

    pub fn with_policy(storage: Arc<dyn StorageBackend>, policy: RotationPolicy, max_retries: u32) -> Self {
        Self {
            storage,
            policy,
            max_retries,
            open: Mutex::new(None),
            io_lock: tokio::sync::Mutex::new(()),
            last_session_ms: AtomicI64::new(0),
        }
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    /// Open a new session for `device`
    pub fn start_session(
        &self,
        device: DeviceDescriptor,
        channels: Vec<String>,
    ) -> Result<RecordingSession, RecorderError> {
        let mut open = self.open.lock();
        if let Some(existing) = open.as_ref() {
            return Err(RecorderError::SessionAlreadyOpen(
                existing.session.session_id.clone(),
            ));
        }

        let start_time = Utc::now();
        let session_id = self.next_session_id(start_time);
        let session = RecordingSession::new(session_id, start_time, device, channels);

        info!(
            "Started new recording session: {} (rotate at {} samples or {:?})",
            session.session_id, self.policy.max_samples, self.policy.max_age
        );

        *open = Some(OpenSession {
            session: session.clone(),
            buffer: ChunkBuffer::new(),
            next_chunk_id: 1,
            channel_mismatches: 0,
        });

        Ok(session)
    }

    /// Session ids derive from the start time in milliseconds, bumped if two
    /// sessions would otherwise collide
    fn next_session_id(&self, start_time: DateTime<Utc>) -> String {
        let candidate = start_time.timestamp_millis();
        let previous = self
            .last_session_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(candidate.max(last + 1))
            })
            .unwrap_or(candidate);
        format!("session_{}", candidate.max(previous + 1))
    }

    pub fn is_recording(&self) -> bool {
        self.open.lock().is_some()
    }

    /// Summary of the open session, never blocking on I/O
    pub fn active_summary(&self) -> Option<SessionSummary> {
        self.open
            .lock()
            .as_ref()
            .map(|open| open.session.summary(open.buffer.len()))
    }

    /// Buffer one sample, rotating first if a threshold was crossed.
    ///
    /// Returns false when no session is open and the sample was ignored.
    pub async fn record(&self, sample: &Sample) -> bool {
        let _io = self.io_lock.lock().await;

        let pending = {
            let mut guard = self.open.lock();
            let Some(open) = guard.as_mut() else {
                return false;
            };

            let expected = &open.session.channels;
            if !expected.is_empty() && !sample.has_channels(expected) {
                open.channel_mismatches += 1;
                if open.channel_mismatches == 1 {
                    warn!(
                        "Session {} received a sample with channels {:?}, expected {:?}",
                        open.session.session_id,
                        sample.channel_names(),
                        open.session.channels
                    );
                }
            }

            let now = Instant::now();
            let pending = match open.buffer.needs_rotation(&self.policy, now) {
                Some(trigger) => Some(open.seal(trigger)),
                None => {
                    if open.buffer.is_empty() && open.buffer.age(now) > self.policy.max_age {
                        open.buffer.restart_clock();
                    }
                    None
                }
            };

            open.buffer.push(sample.clone());
            pending
        };

        if let Some(pending) = pending {
            let session_id = pending.session_id.clone();
            let chunk = self.persist_chunk(pending).await;
            self.attach_chunk(&session_id, chunk);
        }

        true
    }

    fn attach_chunk(&self, session_id: &str, chunk: ChunkRef) {
        let mut guard = self.open.lock();
        match guard.as_mut() {
            Some(open) if open.session.session_id == session_id => open.session.push_chunk(chunk),
            _ => error!(
                "Chunk {} finished after session {} closed; it is not in the manifest",
                chunk.filename, session_id
            ),
        }
    }

    /// Write one chunk file. Failures are logged and the returned ref keeps
    /// a best-effort size with `persisted = false`.
    async fn persist_chunk(&self, pending: PendingChunk) -> ChunkRef {
        let PendingChunk {
            session_id,
            chunk_id,
            sealed,
        } = pending;

        let filename = chunk_filename(&session_id, chunk_id);
        let sample_count = sealed.samples.len() as u64;
        let file = ChunkFile {
            chunk_info: ChunkHeader {
                chunk_id,
                session_id,
                start_time: sealed.start_time,
                end_time: sealed.end_time,
                sample_count,
            },
            samples: sealed.samples,
        };

        let (byte_size, persisted) = match serde_json::to_vec_pretty(&file) {
            Ok(bytes) => {
                let intended = bytes.len() as u64;
                match self
                    .storage
                    .write_with_retry(&filename, bytes, self.max_retries)
                    .await
                {
                    Ok(written) => (written, true),
                    Err(source) => {
                        let err = RecorderError::StorageWrite {
                            name: filename.clone(),
                            source,
                        };
                        warn!("{}; keeping chunk metadata", err);
                        (intended, false)
                    }
                }
            }
            Err(source) => {
                let err = RecorderError::Serialization {
                    name: filename.clone(),
                    source,
                };
                warn!("{}; keeping chunk metadata", err);
                (0, false)
            }
        };

        if persisted {
            info!(
                "Saved chunk {} with {} samples to {} ({:?})",
                chunk_id, sample_count, filename, sealed.trigger
            );
        }

        ChunkRef {
            chunk_id,
            filename,
            start_time: file.chunk_info.start_time,
            end_time: file.chunk_info.end_time,
            sample_count,
            byte_size,
            persisted,
        }
    }

    /// Flush the remaining buffer, write the manifest and close the session.
    ///
    /// With no open session this is a no-op returning `NothingToStop`.
    pub async fn stop_session(&self) -> StopOutcome {
        let open = {
            // Wait for any rotation in flight, then take ownership
            let _io = self.io_lock.lock().await;
            self.open.lock().take()
        };

        let Some(mut open) = open else {
            info!("No active session to stop");
            return StopOutcome::NothingToStop;
        };

        if !open.buffer.is_empty() {
            let pending = open.seal(RotationTrigger::Stop);
            let chunk = self.persist_chunk(pending).await;
            open.session.push_chunk(chunk);
        }

        open.session.finalize(Utc::now());
        let session = open.session;

        let name = manifest_filename(&session.session_id);
        let manifest_path = self.storage.location(&name);

        let manifest_written = match serde_json::to_vec_pretty(&session) {
            Ok(bytes) => match self
                .storage
                .write_with_retry(&name, bytes, self.max_retries)
                .await
            {
                Ok(_) => true,
                Err(source) => {
                    error!(
                        "{}",
                        RecorderError::StorageWrite {
                            name: name.clone(),
                            source
                        }
                    );
                    false
                }
            },
            Err(source) => {
                error!(
                    "{}",
                    RecorderError::Serialization {
                        name: name.clone(),
                        source
                    }
                );
                false
            }
        };

        info!(
            "Recording session {} stopped: {} chunks, {} samples, manifest at {}",
            session.session_id,
            session.total_chunks,
            session.total_samples,
            manifest_path.display()
        );
        if open.channel_mismatches > 0 {
            warn!(
                "Session {} had {} samples with an unexpected channel set",
                session.session_id, open.channel_mismatches
            );
        }

        StopOutcome::Finalized(FinalizedSession {
            session,
            manifest_path,
            manifest_written,
        })
    }
}

#[async_trait]
impl Subscriber for ChunkedRecorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn accept(&self, sample: &Sample) -> Result<(), SubscriberError> {
        if !self.record(sample).await {
            debug!("Sample arrived with no open session, ignored");
        }
        Ok(())
    }
}
