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


// Filesystem backend implementation

use super::backend::{validate_name, StorageBackend};
use crate::config::FilesystemConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Filesystem backend writing session files into one directory
pub struct FilesystemBackend {
    base_path: PathBuf,
}

impl FilesystemBackend {
    pub fn new(config: FilesystemConfig) -> Result<Self> {
        let base_path = PathBuf::from(&config.base_path);

        info!(
            "Initializing filesystem backend at: {}",
            base_path.display()
        );

        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Ensure base directory exists
    async fn ensure_base_directory(&self) -> Result<()> {
        if !self.base_path.exists() {
            info!("Creating base directory: {}", self.base_path.display());
            fs::create_dir_all(&self.base_path)
                .await
                .context("Failed to create base directory")?;
        } else {
            debug!(
                "Base directory already exists: {}",
                self.base_path.display()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn initialize(&self) -> Result<()> {
        self.ensure_base_directory().await
    }

    async fn write_file(&self, name: &str, data: Vec<u8>) -> Result<u64> {
        validate_name(name)?;

        let file_path = self.location(name);
        if fs::try_exists(&file_path).await.unwrap_or(false) {
            bail!("Refusing to overwrite existing file: {}", file_path.display());
        }

        self.ensure_base_directory().await?;

        // Write to a temporary name first so a partial file never carries the final name
        let tmp_path = self.base_path.join(format!(".{}.partial", name));

        debug!("Writing {} bytes to {}", data.len(), file_path.display());

        let mut file = fs::File::create(&tmp_path)
            .await
            .with_context(|| format!("Failed to create file: {}", tmp_path.display()))?;

        file.write_all(&data)
            .await
            .context("Failed to write data")?;

        file.flush().await.context("Failed to flush data")?;
        file.sync_all().await.context("Failed to sync data")?;
        drop(file);

        fs::rename(&tmp_path, &file_path)
            .await
            .with_context(|| format!("Failed to move file into place: {}", file_path.display()))?;

        let written = fs::metadata(&file_path)
            .await
            .map(|m| m.len())
            .unwrap_or(data.len() as u64);

        debug!("Wrote {} bytes to {}", written, file_path.display());
        Ok(written)
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        validate_name(name)?;
        let file_path = self.location(name);
        fs::read(&file_path)
            .await
            .with_context(|| format!("Failed to read file: {}", file_path.display()))
    }

    async fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();

        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to list directory: {}", self.base_path.display())
                })
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .context("Failed to read directory entry")?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    fn location(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }

    async fn health_check(&self) -> Result<bool> {
        // Check if base directory is accessible and writable
        match fs::metadata(&self.base_path).await {
            Ok(metadata) if metadata.is_dir() => {
                let test_file = self.base_path.join(".health_check_test");
                match fs::File::create(&test_file).await {
                    Ok(mut f) => {
                        if let Err(e) = f.write_all(b"test").await {
                            warn!("Health check failed - cannot write: {}", e);
                            return Ok(false);
                        }
                        let _ = fs::remove_file(&test_file).await;
                        Ok(true)
                    }
                    Err(e) => {
                        warn!("Health check failed - cannot create file: {}", e);
                        Ok(false)
                    }
                }
            }
            Ok(_) => {
                warn!(
                    "Health check failed - base path is not a directory: {}",
                    self.base_path.display()
                );
                Ok(false)
            }
            Err(e) => {
                warn!(
                    "Health check failed - cannot access base path {}: {}",
                    self.base_path.display(),
                    e
                );
                Ok(false)
            }
        }
    }

    fn backend_type(&self) -> &str {
        "filesystem"
    }
}
