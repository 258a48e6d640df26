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


// In-memory backend for dry runs and tests

use super::backend::{validate_name, StorageBackend};
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Keeps files in a map; optionally fails writes to simulate a bad disk
#[derive(Default)]
pub struct MemoryBackend {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_writes_matching: Mutex<Option<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write whose name contains `pattern` fail; `None` heals
    pub fn fail_writes_matching(&self, pattern: Option<&str>) {
        *self.fail_writes_matching.lock() = pattern.map(str::to_string);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn write_file(&self, name: &str, data: Vec<u8>) -> Result<u64> {
        validate_name(name)?;

        if let Some(pattern) = self.fail_writes_matching.lock().as_deref() {
            if name.contains(pattern) {
                bail!("Simulated write failure for '{}'", name);
            }
        }

        let mut files = self.files.lock();
        if files.contains_key(name) {
            bail!("Refusing to overwrite existing file: {}", name);
        }
        let written = data.len() as u64;
        files.insert(name.to_string(), data);
        Ok(written)
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        match self.files.lock().get(name) {
            Some(data) => Ok(data.clone()),
            None => bail!("File not found: {}", name),
        }
    }

    async fn list_files(&self) -> Result<Vec<String>> {
        Ok(self.files.lock().keys().cloned().collect())
    }

    fn location(&self, name: &str) -> PathBuf {
        PathBuf::from("memory").join(name)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.fail_writes_matching.lock().is_none())
    }

    fn backend_type(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_failure_only_hits_matching_names() {
        let backend = MemoryBackend::new();
        backend.fail_writes_matching(Some("_session"));

        assert!(backend.write_file("s_chunk_001.json", vec![1]).await.is_ok());
        assert!(backend.write_file("s_session.json", vec![1]).await.is_err());
        assert!(!backend.health_check().await.unwrap());

        backend.fail_writes_matching(None);
        assert!(backend.write_file("s_session.json", vec![1]).await.is_ok());
        assert_eq!(backend.file_count(), 2);
    }
}
