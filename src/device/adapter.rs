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


// Narrow capability interface over a vendor device SDK

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::DeviceError;
use crate::sample::{DeviceDescriptor, SignalQuality};

/// Link state reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    /// In range and ready to stream
    Ready,
}

/// Hardware filter presets a device may apply on-board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareFilter {
    None,
    /// 1 Hz high-pass, removes electrode drift on dry contacts
    #[serde(rename = "hpf_1hz")]
    HighPass1Hz,
}

/// Optional features a device may expose
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub hardware_filter: bool,
}

/// One reading as produced by the device, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    /// One value per channel, in `channel_names()` order
    pub values: Vec<f64>,
    pub quality: SignalQuality,
    pub sequence_number: Option<u32>,
    pub marker: Option<i32>,
}

/// Capability set the acquisition core needs from a device SDK.
///
/// `read_latest` and `link_state` must not block; `scan` and `open` may take
/// as long as the SDK needs but `DeviceSession` bounds the wait for readiness.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Discover devices in range
    async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, DeviceError>;

    /// Begin connecting to a device; readiness is observed via `link_state`
    async fn open(&self, device: &DeviceDescriptor) -> Result<(), DeviceError>;

    /// Release the device; must be safe to call in any state
    async fn close(&self) -> Result<(), DeviceError>;

    fn link_state(&self) -> LinkState;

    /// Latest reading, or `None` if nothing new since the previous call
    fn read_latest(&self) -> Result<Option<RawReading>, DeviceError>;

    fn battery(&self) -> Result<u8, DeviceError>;

    /// Fixed channel set for this device class
    fn channel_names(&self) -> Vec<String>;

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::default()
    }

    fn set_filter(&self, _filter: HardwareFilter) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("hardware filter"))
    }
}
