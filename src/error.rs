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


// Error kinds for the acquisition and recording core

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the device capability
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device unavailable: {0}")]
    Unavailable(String),

    #[error("device '{device_id}' not ready after {waited:?}")]
    ConnectionTimeout { device_id: String, waited: Duration },

    #[error("no device connected")]
    NotConnected,

    #[error("transient read failure: {0}")]
    ReadTransient(String),

    #[error("malformed reading: {0}")]
    MalformedReading(String),

    #[error("operation not supported by device: {0}")]
    Unsupported(&'static str),
}

impl DeviceError {
    /// Errors the acquisition loop retries on the next cycle
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeviceError::ReadTransient(_) | DeviceError::MalformedReading(_)
        )
    }
}

/// A subscriber rejected or failed to process a sample
#[derive(Debug, Error)]
#[error("subscriber '{subscriber}' failed: {message}")]
pub struct SubscriberError {
    pub subscriber: String,
    pub message: String,
}

impl SubscriberError {
    pub fn new(subscriber: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subscriber: subscriber.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("recording session '{0}' is already open")]
    SessionAlreadyOpen(String),

    #[error("failed to write '{name}': {source}")]
    StorageWrite {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to serialize '{name}': {source}")]
    Serialization {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("chunk {chunk_id} ({filename}) was never persisted")]
    ChunkUnavailable { chunk_id: u32, filename: String },

    #[error(
        "sample {row} has channels {found:?}, expected {expected:?} from the first sample"
    )]
    ChannelMismatch {
        row: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("failed to write csv to {path}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("acquisition loop is already monitoring")]
    AlreadyMonitoring,

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Outcome of a rejected external command
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Recorder(#[from] RecorderError),
}
