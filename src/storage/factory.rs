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


// Backend factory for creating storage backends from configuration

use super::backend::StorageBackend;
use super::filesystem::FilesystemBackend;
use super::memory::MemoryBackend;
use crate::config::StorageConfig;
use anyhow::{bail, Result};
use std::sync::Arc;

pub struct BackendFactory;

impl BackendFactory {
    /// Create storage backend from configuration
    pub fn create(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
        match config.backend.as_str() {
            "filesystem" => {
                let backend = FilesystemBackend::new(config.filesystem.clone())?;
                Ok(Arc::new(backend))
            }

            "memory" => Ok(Arc::new(MemoryBackend::new())),

            unknown => bail!(
                "Unknown storage backend: '{}'. Supported: filesystem, memory",
                unknown
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilesystemConfig;

    #[test]
    fn test_create_filesystem_backend() {
        let storage_config = StorageConfig {
            backend: "filesystem".to_string(),
            filesystem: FilesystemConfig::default(),
            max_retries: 0,
        };

        let backend = BackendFactory::create(&storage_config);
        assert!(backend.is_ok());
        assert_eq!(backend.unwrap().backend_type(), "filesystem");
    }

    #[test]
    fn test_create_memory_backend() {
        let storage_config = StorageConfig {
            backend: "memory".to_string(),
            ..StorageConfig::default()
        };

        let backend = BackendFactory::create(&storage_config).unwrap();
        assert_eq!(backend.backend_type(), "memory");
    }

    #[test]
    fn test_create_unknown_backend() {
        let storage_config = StorageConfig {
            backend: "unknown_backend".to_string(),
            ..StorageConfig::default()
        };

        let backend = BackendFactory::create(&storage_config);
        assert!(backend.is_err());
        if let Err(e) = backend {
            assert!(e.to_string().contains("Unknown storage backend"));
        }
    }
}
