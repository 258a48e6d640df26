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


// Configuration types for biosignal-recorder

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::device::HardwareFilter;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    #[serde(default)]
    pub recorder: RecorderSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceSettings {
    #[serde(default = "default_driver")]
    pub driver: String, // "simulated"

    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_seconds: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    #[serde(default = "default_connect_poll_interval")]
    pub connect_poll_interval_ms: u64,

    #[serde(default = "default_hardware_filter")]
    pub hardware_filter: HardwareFilter,

    #[serde(default)]
    pub simulated: SimulatedDeviceConfig,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            scan_timeout_seconds: default_scan_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            connect_poll_interval_ms: default_connect_poll_interval(),
            hardware_filter: default_hardware_filter(),
            simulated: SimulatedDeviceConfig::default(),
        }
    }
}

impl DeviceSettings {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn connect_poll_interval(&self) -> Duration {
        Duration::from_millis(self.connect_poll_interval_ms)
    }
}

/// Synthetic device used when no vendor driver is linked in
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulatedDeviceConfig {
    #[serde(default = "default_simulated_devices")]
    pub devices: Vec<SimulatedDeviceEntry>,

    #[serde(default = "default_channels")]
    pub channels: Vec<String>,

    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: f64,

    #[serde(default = "default_battery")]
    pub battery_level: u8,

    /// Polls needed before a connecting device reports ready
    #[serde(default)]
    pub ready_after_polls: u32,
}

impl Default for SimulatedDeviceConfig {
    fn default() -> Self {
        Self {
            devices: default_simulated_devices(),
            channels: default_channels(),
            sample_rate_hz: default_sample_rate(),
            battery_level: default_battery(),
            ready_after_polls: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulatedDeviceEntry {
    pub id: String,
    pub name: String,
    pub address: String,
}

/// Acquisition loop cadence and fault thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AcquisitionSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Upper bound on one subscriber's accept before it is abandoned
    #[serde(default = "default_subscriber_timeout")]
    pub subscriber_timeout_ms: u64,

    #[serde(default = "default_status_interval")]
    pub status_interval_ms: u64,

    /// Consecutive read errors before the loop reports itself degraded
    #[serde(default = "default_read_error_threshold")]
    pub read_error_threshold: u32,

    /// Samples queued per subscriber before new ones are dropped for it
    #[serde(default = "default_subscriber_queue_capacity")]
    pub subscriber_queue_capacity: usize,

    #[serde(default = "default_live_queue_capacity")]
    pub live_queue_capacity: usize,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            subscriber_timeout_ms: default_subscriber_timeout(),
            status_interval_ms: default_status_interval(),
            read_error_threshold: default_read_error_threshold(),
            subscriber_queue_capacity: default_subscriber_queue_capacity(),
            live_queue_capacity: default_live_queue_capacity(),
        }
    }
}

impl AcquisitionSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn subscriber_timeout(&self) -> Duration {
        Duration::from_millis(self.subscriber_timeout_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

/// Chunk rotation thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderSettings {
    /// Maximum age of a chunk before rotation
    #[serde(default = "default_chunk_duration")]
    pub max_chunk_duration_seconds: f64,

    /// Maximum samples held in one chunk
    #[serde(default = "default_chunk_samples")]
    pub max_chunk_samples: usize,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            max_chunk_duration_seconds: default_chunk_duration(),
            max_chunk_samples: default_chunk_samples(),
        }
    }
}

impl RecorderSettings {
    /// Saturates at `Duration::MAX` for values too large to represent
    pub fn max_chunk_duration(&self) -> Duration {
        let seconds = self.max_chunk_duration_seconds;
        Duration::try_from_secs_f64(seconds).unwrap_or(if seconds > 0.0 {
            Duration::MAX
        } else {
            Duration::ZERO
        })
    }
}

/// Storage configuration with backend selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Backend type: "filesystem" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default)]
    pub filesystem: FilesystemConfig,

    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            filesystem: FilesystemConfig::default(),
            max_retries: default_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesystemConfig {
    pub base_path: String,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            base_path: "data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "compact"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_driver() -> String { "simulated".to_string() }
fn default_scan_timeout() -> u64 { 10 }
fn default_connect_timeout() -> u64 { 15 }
fn default_connect_poll_interval() -> u64 { 100 }
fn default_hardware_filter() -> HardwareFilter { HardwareFilter::HighPass1Hz }
fn default_channels() -> Vec<String> {
    ["O1", "O2", "T3", "T4"].iter().map(|c| c.to_string()).collect()
}
fn default_simulated_devices() -> Vec<SimulatedDeviceEntry> {
    vec![SimulatedDeviceEntry {
        id: "sim-0001".to_string(),
        name: "Simulated Headband".to_string(),
        address: "00:00:00:00:00:01".to_string(),
    }]
}
fn default_sample_rate() -> f64 { 250.0 }
fn default_battery() -> u8 { 85 }
fn default_poll_interval() -> u64 { 100 }
fn default_subscriber_timeout() -> u64 { 500 }
fn default_status_interval() -> u64 { 1000 }
fn default_read_error_threshold() -> u32 { 3 }
fn default_subscriber_queue_capacity() -> usize { 1024 }
fn default_live_queue_capacity() -> usize { 64 }
fn default_chunk_duration() -> f64 { 300.0 }
fn default_chunk_samples() -> usize { 1000 }
fn default_backend() -> String { "filesystem".to_string() }
fn default_retries() -> u32 { 3 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
