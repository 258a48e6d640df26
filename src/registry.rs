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


// Read side of persisted sessions: listing, loading and CSV export

use anyhow::Result;
use chrono::SecondsFormat;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::RegistryError;
use crate::recorder::{ChunkFile, RecordingSession, MANIFEST_SUFFIX};
use crate::sample::Sample;
use crate::storage::StorageBackend;

/// Flattened rows of a session, one per sample
#[derive(Debug, Clone, PartialEq)]
pub struct CsvExport {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvExport {
    pub fn to_csv_string(&self) -> String {
        let mut out = String::new();
        push_record(&mut out, &self.header);
        for row in &self.rows {
            push_record(&mut out, row);
        }
        out
    }
}

fn push_record(out: &mut String, fields: &[String]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

/// Enumerates and loads finalized sessions from storage
pub struct SessionRegistry {
    storage: Arc<dyn StorageBackend>,
}

impl SessionRegistry {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Manifest locations, sorted (session ids sort chronologically)
    pub async fn list_sessions(&self) -> Result<Vec<PathBuf>> {
        let manifests: Vec<PathBuf> = self
            .storage
            .list_files()
            .await?
            .into_iter()
            .filter(|name| name.ends_with(MANIFEST_SUFFIX))
            .map(|name| self.storage.location(&name))
            .collect();

        debug!("Found {} session manifest(s)", manifests.len());
        Ok(manifests)
    }

    /// Load a manifest by the location `list_sessions` returned.
    ///
    /// Paths outside this registry's storage are rejected rather than
    /// resolved by file name.
    pub async fn load(&self, path: &Path) -> Result<RecordingSession, RegistryError> {
        let bytes = self.read(path).await?;
        serde_json::from_slice(&bytes).map_err(|source| RegistryError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// All samples of a session across its chunks, in chunk order
    pub async fn load_samples(
        &self,
        session: &RecordingSession,
    ) -> Result<Vec<Sample>, RegistryError> {
        let mut samples = Vec::with_capacity(session.total_samples as usize);

        for chunk in &session.chunks {
            if !chunk.persisted {
                return Err(RegistryError::ChunkUnavailable {
                    chunk_id: chunk.chunk_id,
                    filename: chunk.filename.clone(),
                });
            }

            let path = self.storage.location(&chunk.filename);
            let bytes = self.read_named(&chunk.filename, &path).await?;
            let file: ChunkFile =
                serde_json::from_slice(&bytes).map_err(|source| RegistryError::Parse {
                    path: path.clone(),
                    source,
                })?;
            samples.extend(file.samples);
        }

        Ok(samples)
    }

    /// Flatten a session into rows.
    ///
    /// The channel columns come from the first sample, in the device order
    /// recorded on the session when the names agree. A later sample with a
    /// different channel set is reported as `ChannelMismatch`.
    pub async fn export_csv(&self, session: &RecordingSession) -> Result<CsvExport, RegistryError> {
        let samples = self.load_samples(session).await?;

        let first = samples.first();
        let channels: Vec<String> = match first {
            Some(first) if !first.has_channels(&session.channels) => {
                first.channels.keys().cloned().collect()
            }
            _ => session.channels.clone(),
        };

        let mut header = Vec::with_capacity(channels.len() + 3);
        header.push("timestamp".to_string());
        header.extend(channels.iter().cloned());
        header.push("battery_level".to_string());
        header.push("signal_quality".to_string());

        let mut rows = Vec::with_capacity(samples.len());
        for (row, sample) in samples.iter().enumerate() {
            if first.is_some_and(|first| !sample.same_channels(first)) {
                return Err(RegistryError::ChannelMismatch {
                    row,
                    expected: channels,
                    found: sample.channels.keys().cloned().collect(),
                });
            }

            let mut fields = Vec::with_capacity(header.len());
            fields.push(
                sample
                    .timestamp
                    .wall_clock
                    .to_rfc3339_opts(SecondsFormat::Micros, true),
            );
            fields.extend(channels.iter().map(|name| {
                sample
                    .channels
                    .get(name)
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            }));
            fields.push(sample.battery_level.to_string());
            fields.push(sample.signal_quality.as_str().to_string());
            rows.push(fields);
        }

        Ok(CsvExport { header, rows })
    }

    /// Export a session to a CSV file at `output`
    pub async fn write_csv(
        &self,
        session: &RecordingSession,
        output: &Path,
    ) -> Result<PathBuf, RegistryError> {
        let export = self.export_csv(session).await?;

        tokio::fs::write(output, export.to_csv_string())
            .await
            .map_err(|source| RegistryError::Export {
                path: output.to_path_buf(),
                source,
            })?;

        info!(
            "Exported session {} ({} rows) to CSV: {}",
            session.session_id,
            export.rows.len(),
            output.display()
        );
        Ok(output.to_path_buf())
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>, RegistryError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RegistryError::Read {
                path: path.to_path_buf(),
                source: anyhow::anyhow!("not a file path"),
            })?;

        let stored = self.storage.location(name);
        if !same_location(&stored, path).await {
            return Err(RegistryError::Read {
                path: path.to_path_buf(),
                source: anyhow::anyhow!(
                    "not in session storage (expected {})",
                    stored.display()
                ),
            });
        }

        self.read_named(name, path).await
    }

    async fn read_named(&self, name: &str, path: &Path) -> Result<Vec<u8>, RegistryError> {
        self.storage
            .read_file(name)
            .await
            .map_err(|source| RegistryError::Read {
                path: path.to_path_buf(),
                source,
            })
    }
}

async fn same_location(stored: &Path, given: &Path) -> bool {
    if lexical(stored) == lexical(given) {
        return true;
    }
    match (
        tokio::fs::canonicalize(stored).await,
        tokio::fs::canonicalize(given).await,
    ) {
        (Ok(stored), Ok(given)) => stored == given,
        _ => false,
    }
}

fn lexical(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Default CSV location next to a manifest
pub fn default_csv_path(manifest: &Path) -> PathBuf {
    manifest.with_extension("csv")
}
