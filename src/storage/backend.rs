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


// Storage backend trait for session files

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Generic storage backend for chunk and manifest files
///
/// Files are addressed by a flat name (`session_..._chunk_001.json`) and are
/// write-once: writing a name that already exists is an error.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Initialize the backend (create directories if needed)
    async fn initialize(&self) -> Result<()>;

    /// Write a complete file and return the number of bytes persisted
    async fn write_file(&self, name: &str, data: Vec<u8>) -> Result<u64>;

    /// Write with retry logic (optional, has default implementation)
    ///
    /// # Arguments
    /// * `name` - File name within the backend
    /// * `data` - File contents
    /// * `max_retries` - Maximum number of retry attempts
    async fn write_with_retry(&self, name: &str, data: Vec<u8>, max_retries: u32) -> Result<u64> {
        use tokio::time::{sleep, Duration};
        use tracing::{info, warn};

        let mut attempt = 0;
        let mut delay = Duration::from_millis(100);

        loop {
            match self.write_file(name, data.clone()).await {
                Ok(written) => {
                    if attempt > 0 {
                        info!("Successfully wrote '{}' after {} retries", name, attempt);
                    }
                    return Ok(written);
                }
                Err(e) if attempt < max_retries => {
                    warn!(
                        "Write of '{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                        name,
                        attempt + 1,
                        max_retries,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    delay *= 2; // Exponential backoff
                    delay = delay.min(Duration::from_secs(5));
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "Write of '{}' failed after {} attempts: {}",
                        name,
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Read a complete file
    async fn read_file(&self, name: &str) -> Result<Vec<u8>>;

    /// Names of all files, sorted
    async fn list_files(&self) -> Result<Vec<String>>;

    /// Where a file lives, for reporting to users
    fn location(&self, name: &str) -> PathBuf;

    /// Health check
    async fn health_check(&self) -> Result<bool>;

    /// Get backend type identifier
    fn backend_type(&self) -> &str;
}

/// Reject names that would escape the storage root
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name == "."
        || name == ".."
    {
        bail!("Invalid storage file name: '{}'", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("session_1_chunk_001.json").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name("a/b.json").is_err());
        assert!(validate_name("..").is_err());
    }
}
