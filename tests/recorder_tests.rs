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


mod common;

use biosignal_recorder::buffer::RotationPolicy;
use biosignal_recorder::error::RecorderError;
use biosignal_recorder::recorder::{ChunkFile, ChunkedRecorder, RecordingSession, StopOutcome};
use biosignal_recorder::storage::{MemoryBackend, StorageBackend};
use biosignal_recorder::subscriber::Subscriber;
use common::{descriptor, SampleFactory, CHANNELS};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);

fn recorder(storage: &Arc<MemoryBackend>, max_samples: usize, max_age: Duration) -> ChunkedRecorder {
    ChunkedRecorder::with_policy(
        storage.clone() as Arc<dyn StorageBackend>,
        RotationPolicy::new(max_samples, max_age),
        0,
    )
}

fn channels() -> Vec<String> {
    CHANNELS.iter().map(|c| c.to_string()).collect()
}

async fn stop(recorder: &ChunkedRecorder) -> RecordingSession {
    match recorder.stop_session().await {
        StopOutcome::Finalized(finalized) => finalized.session,
        StopOutcome::NothingToStop => panic!("expected an open session"),
    }
}

async fn read_chunk(storage: &MemoryBackend, filename: &str) -> ChunkFile {
    let bytes = storage.read_file(filename).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_seven_samples_with_capacity_three() {
    let storage = Arc::new(MemoryBackend::new());
    let recorder = recorder(&storage, 3, HOUR);
    let mut factory = SampleFactory::new();

    recorder.start_session(descriptor(), channels()).unwrap();
    for _ in 0..7 {
        assert!(recorder.record(&factory.next()).await);
    }

    let session = stop(&recorder).await;

    let counts: Vec<u64> = session.chunks.iter().map(|c| c.sample_count).collect();
    assert_eq!(counts, vec![3, 3, 1]);
    assert_eq!(session.total_chunks, 3);
    assert_eq!(session.total_samples, 7);
    assert!(session.is_finalized());
    assert!(session.chunks.iter().all(|c| c.persisted));

    // Chunks hold the samples in arrival order
    let mut sequence = Vec::new();
    for chunk in &session.chunks {
        let file = read_chunk(&storage, &chunk.filename).await;
        assert_eq!(file.chunk_info.chunk_id, chunk.chunk_id);
        assert_eq!(file.chunk_info.sample_count, chunk.sample_count);
        sequence.extend(file.samples.iter().filter_map(|s| s.sequence_number));
    }
    assert_eq!(sequence, (1..=7).collect::<Vec<u32>>());
}

#[tokio::test]
async fn test_sample_totals_for_various_capacities() {
    for (capacity, count) in [(1usize, 5usize), (2, 9), (4, 8), (10, 3), (7, 21)] {
        let storage = Arc::new(MemoryBackend::new());
        let recorder = recorder(&storage, capacity, HOUR);
        let mut factory = SampleFactory::new();

        recorder.start_session(descriptor(), channels()).unwrap();
        for _ in 0..count {
            recorder.record(&factory.next()).await;
        }
        let session = stop(&recorder).await;

        assert_eq!(session.total_samples, count as u64, "capacity {}", capacity);
        assert_eq!(session.total_chunks, count.div_ceil(capacity));
        assert!(session
            .chunks
            .iter()
            .all(|c| c.sample_count as usize <= capacity));
        let ids: Vec<u32> = session.chunks.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids, (1..=session.total_chunks as u32).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_time_triggered_rotation() {
    let storage = Arc::new(MemoryBackend::new());
    let recorder = recorder(&storage, 1000, Duration::from_millis(30));
    let mut factory = SampleFactory::new();

    recorder.start_session(descriptor(), channels()).unwrap();
    recorder.record(&factory.next()).await;
    recorder.record(&factory.next()).await;

    tokio::time::sleep(Duration::from_millis(60)).await;
    recorder.record(&factory.next()).await;

    let summary = recorder.active_summary().unwrap();
    assert_eq!(summary.chunks_written, 1);
    assert_eq!(summary.buffered_samples, 1);
    assert_eq!(summary.samples_recorded, 3);

    let session = stop(&recorder).await;
    let counts: Vec<u64> = session.chunks.iter().map(|c| c.sample_count).collect();
    assert_eq!(counts, vec![2, 1]);
}

#[tokio::test]
async fn test_stop_flushes_partial_chunk_and_writes_manifest() {
    let storage = Arc::new(MemoryBackend::new());
    let recorder = recorder(&storage, 100, HOUR);
    let mut factory = SampleFactory::new();

    let started = recorder.start_session(descriptor(), channels()).unwrap();
    for _ in 0..4 {
        recorder.record(&factory.next()).await;
    }
    assert_eq!(storage.file_count(), 0);

    let finalized = match recorder.stop_session().await {
        StopOutcome::Finalized(finalized) => finalized,
        StopOutcome::NothingToStop => panic!("session was open"),
    };

    assert!(finalized.manifest_written);
    assert_eq!(
        finalized.manifest_path,
        PathBuf::from("memory").join(format!("{}_session.json", started.session_id))
    );
    assert_eq!(finalized.session.total_chunks, 1);
    assert_eq!(finalized.session.total_samples, 4);
    assert!(finalized.session.duration_seconds.unwrap() >= 0.0);

    let manifest: RecordingSession = serde_json::from_slice(
        &storage
            .read_file(&format!("{}_session.json", started.session_id))
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(manifest, finalized.session);
    assert_eq!(manifest.device, descriptor());
    assert_eq!(manifest.channels, channels());
    assert!(!recorder.is_recording());
}

#[tokio::test]
async fn test_empty_session_has_no_chunks() {
    let storage = Arc::new(MemoryBackend::new());
    let recorder = recorder(&storage, 3, HOUR);

    recorder.start_session(descriptor(), channels()).unwrap();
    let session = stop(&recorder).await;

    assert!(session.chunks.is_empty());
    assert_eq!(session.total_samples, 0);
    assert_eq!(storage.file_count(), 1);
}

#[tokio::test]
async fn test_second_stop_is_a_no_op() {
    let storage = Arc::new(MemoryBackend::new());
    let recorder = recorder(&storage, 3, HOUR);

    recorder.start_session(descriptor(), channels()).unwrap();
    stop(&recorder).await;
    let files = storage.file_count();

    assert_eq!(recorder.stop_session().await, StopOutcome::NothingToStop);
    assert_eq!(storage.file_count(), files);
}

#[tokio::test]
async fn test_stop_without_session() {
    let storage = Arc::new(MemoryBackend::new());
    let recorder = recorder(&storage, 3, HOUR);

    assert_eq!(recorder.stop_session().await, StopOutcome::NothingToStop);
    assert_eq!(storage.file_count(), 0);
}

#[tokio::test]
async fn test_samples_without_session_are_ignored() {
    let storage = Arc::new(MemoryBackend::new());
    let recorder = recorder(&storage, 3, HOUR);
    let mut factory = SampleFactory::new();

    assert!(!recorder.record(&factory.next()).await);
    assert!(recorder.accept(&factory.next()).await.is_ok());
    assert!(recorder.active_summary().is_none());
}

#[tokio::test]
async fn test_start_while_open_is_rejected() {
    let storage = Arc::new(MemoryBackend::new());
    let recorder = recorder(&storage, 3, HOUR);

    let first = recorder.start_session(descriptor(), channels()).unwrap();
    match recorder.start_session(descriptor(), channels()) {
        Err(RecorderError::SessionAlreadyOpen(id)) => assert_eq!(id, first.session_id),
        other => panic!("unexpected result: {:?}", other.map(|s| s.session_id)),
    }
}

#[tokio::test]
async fn test_back_to_back_sessions_get_distinct_ids() {
    let storage = Arc::new(MemoryBackend::new());
    let recorder = recorder(&storage, 3, HOUR);

    let first = recorder.start_session(descriptor(), channels()).unwrap();
    stop(&recorder).await;
    let second = recorder.start_session(descriptor(), channels()).unwrap();
    stop(&recorder).await;

    assert_ne!(first.session_id, second.session_id);
    assert!(first.session_id.starts_with("session_"));
    assert!(second.session_id > first.session_id);
}

#[tokio::test]
async fn test_failed_chunk_write_keeps_metadata() {
    let storage = Arc::new(MemoryBackend::new());
    storage.fail_writes_matching(Some("_chunk_002"));
    let recorder = recorder(&storage, 2, HOUR);
    let mut factory = SampleFactory::new();

    recorder.start_session(descriptor(), channels()).unwrap();
    for _ in 0..6 {
        recorder.record(&factory.next()).await;
    }
    let finalized = match recorder.stop_session().await {
        StopOutcome::Finalized(finalized) => finalized,
        StopOutcome::NothingToStop => panic!("session was open"),
    };
    let session = finalized.session;

    assert!(finalized.manifest_written);
    assert_eq!(session.total_chunks, 3);
    assert_eq!(session.total_samples, 6);

    let failed = &session.chunks[1];
    assert_eq!(failed.chunk_id, 2);
    assert!(!failed.persisted);
    assert!(failed.byte_size > 0);
    assert!(!storage.contains(&failed.filename));

    assert!(session.chunks[0].persisted);
    assert!(session.chunks[2].persisted);
}

#[tokio::test]
async fn test_failed_manifest_write_still_reports_path() {
    let storage = Arc::new(MemoryBackend::new());
    storage.fail_writes_matching(Some("_session.json"));
    let recorder = recorder(&storage, 2, HOUR);
    let mut factory = SampleFactory::new();

    let started = recorder.start_session(descriptor(), channels()).unwrap();
    recorder.record(&factory.next()).await;

    let finalized = match recorder.stop_session().await {
        StopOutcome::Finalized(finalized) => finalized,
        StopOutcome::NothingToStop => panic!("session was open"),
    };

    assert!(!finalized.manifest_written);
    assert!(finalized
        .manifest_path
        .ends_with(format!("{}_session.json", started.session_id)));
    assert_eq!(finalized.session.total_samples, 1);
    assert!(!recorder.is_recording());
}

#[tokio::test]
async fn test_unexpected_channel_set_is_still_recorded() {
    let storage = Arc::new(MemoryBackend::new());
    let recorder = recorder(&storage, 10, HOUR);
    let mut factory = SampleFactory::new();

    recorder.start_session(descriptor(), channels()).unwrap();
    recorder.record(&factory.next()).await;
    assert!(recorder.record(&factory.with_channels(&["Fp1"])).await);

    let session = stop(&recorder).await;
    assert_eq!(session.total_samples, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_during_concurrent_accepts_loses_nothing() {
    let storage = Arc::new(MemoryBackend::new());
    let recorder = Arc::new(recorder(&storage, 5, HOUR));

    recorder.start_session(descriptor(), channels()).unwrap();

    let writer = {
        let recorder = recorder.clone();
        tokio::spawn(async move {
            let mut factory = SampleFactory::new();
            let mut accepted = 0u64;
            for i in 0..400 {
                if recorder.record(&factory.next()).await {
                    accepted += 1;
                }
                if i % 16 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            accepted
        })
    };

    tokio::time::sleep(Duration::from_millis(2)).await;
    let session = stop(&recorder).await;
    let accepted = writer.await.unwrap();

    assert_eq!(session.total_samples, accepted);
    let on_disk: u64 = session.chunks.iter().map(|c| c.sample_count).sum();
    assert_eq!(on_disk, accepted);
    assert!(session.chunks.iter().all(|c| c.persisted));
}
