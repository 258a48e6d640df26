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


use biosignal_recorder::config::FilesystemConfig;
use biosignal_recorder::storage::{FilesystemBackend, MemoryBackend, StorageBackend};
use std::sync::Arc;
use tempfile::TempDir;

fn filesystem_backend(dir: &TempDir) -> FilesystemBackend {
    FilesystemBackend::new(FilesystemConfig {
        base_path: dir.path().join("sessions").display().to_string(),
    })
    .unwrap()
}

#[tokio::test]
async fn test_filesystem_write_read_list() {
    let dir = TempDir::new().unwrap();
    let backend = filesystem_backend(&dir);
    backend.initialize().await.unwrap();

    let written = backend
        .write_file("session_2_session.json", b"{}".to_vec())
        .await
        .unwrap();
    assert_eq!(written, 2);
    backend
        .write_file("session_1_chunk_001.json", b"[1,2,3]".to_vec())
        .await
        .unwrap();

    assert_eq!(
        backend.read_file("session_1_chunk_001.json").await.unwrap(),
        b"[1,2,3]".to_vec()
    );
    assert_eq!(
        backend.list_files().await.unwrap(),
        vec!["session_1_chunk_001.json", "session_2_session.json"]
    );
    assert_eq!(
        backend.location("session_1_chunk_001.json"),
        dir.path().join("sessions").join("session_1_chunk_001.json")
    );
}

#[tokio::test]
async fn test_filesystem_never_overwrites() {
    let dir = TempDir::new().unwrap();
    let backend = filesystem_backend(&dir);

    backend.write_file("a.json", b"first".to_vec()).await.unwrap();
    assert!(backend.write_file("a.json", b"second".to_vec()).await.is_err());
    assert_eq!(backend.read_file("a.json").await.unwrap(), b"first".to_vec());
}

#[tokio::test]
async fn test_rejects_names_outside_root() {
    let dir = TempDir::new().unwrap();
    let backend = filesystem_backend(&dir);

    assert!(backend.write_file("../escape.json", Vec::new()).await.is_err());
    assert!(backend.write_file("", Vec::new()).await.is_err());
    assert!(MemoryBackend::new()
        .write_file("nested/file.json", Vec::new())
        .await
        .is_err());
}

#[tokio::test]
async fn test_write_with_retry_gives_up_after_max_retries() {
    let backend = MemoryBackend::new();
    backend.fail_writes_matching(Some("chunk"));

    let started = std::time::Instant::now();
    let result = backend
        .write_with_retry("s_chunk_001.json", b"data".to_vec(), 1)
        .await;

    assert!(result.is_err());
    // One retry after the initial 100ms backoff
    assert!(started.elapsed() >= std::time::Duration::from_millis(100));
    assert!(!backend.contains("s_chunk_001.json"));
}

#[tokio::test]
async fn test_write_with_retry_recovers() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_writes_matching(Some("chunk"));

    let healer = {
        let backend = backend.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            backend.fail_writes_matching(None);
        })
    };

    let written = backend
        .write_with_retry("s_chunk_001.json", b"data".to_vec(), 3)
        .await
        .unwrap();
    healer.await.unwrap();

    assert_eq!(written, 4);
    assert!(backend.contains("s_chunk_001.json"));
}

#[tokio::test]
async fn test_memory_backend_health_reflects_failures() {
    let backend = MemoryBackend::new();
    assert!(backend.health_check().await.unwrap());

    backend.fail_writes_matching(Some("x"));
    assert!(!backend.health_check().await.unwrap());
}
