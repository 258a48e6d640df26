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


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::acquisition::{AcquisitionState, LoopStats};
use crate::sample::{DeviceDescriptor, Sample};

/// Commands received from the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    ScanDevices,
    ConnectDevice { device_id: String },
    DisconnectDevice,
    StartRecording,
    StopRecording,
    Status,
}

/// Periodic device health report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u8>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub consecutive_read_errors: u32,
    #[serde(default)]
    pub degraded: bool,
}

/// Externally visible view of a recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub device: DeviceDescriptor,
    pub chunks_written: usize,
    pub samples_recorded: u64,
    #[serde(default)]
    pub buffered_samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

/// Snapshot answering "what is the system doing right now"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceDescriptor>,
    pub acquisition: AcquisitionState,
    pub recording: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSummary>,
    pub stats: LoopStats,
}

/// Events delivered to the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    LiveSample { sample: Sample },
    DeviceStatus { status: DeviceStatus },
    DevicesFound { devices: Vec<DeviceDescriptor> },
    DeviceConnected { device: DeviceDescriptor },
    DeviceDisconnected,
    Error { message: String },
    RecordingStarted { session: SessionSummary },
    RecordingStopped {
        session: SessionSummary,
        manifest_path: PathBuf,
    },
    Status { status: SystemStatus },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::LiveSample { .. } => "live_sample",
            Event::DeviceStatus { .. } => "device_status",
            Event::DevicesFound { .. } => "devices_found",
            Event::DeviceConnected { .. } => "device_connected",
            Event::DeviceDisconnected => "device_disconnected",
            Event::Error { .. } => "error",
            Event::RecordingStarted { .. } => "recording_started",
            Event::RecordingStopped { .. } => "recording_stopped",
            Event::Status { .. } => "status",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let cmd: Command =
            serde_json::from_str(r#"{"command":"connect_device","device_id":"sim-0001"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::ConnectDevice {
                device_id: "sim-0001".to_string()
            }
        );

        let cmd: Command = serde_json::from_str(r#"{"command":"stop_recording"}"#).unwrap();
        assert_eq!(cmd, Command::StopRecording);
    }

    #[test]
    fn test_unknown_command_rejected() {
        let result: Result<Command, _> = serde_json::from_str(r#"{"command":"self_destruct"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_event_tagging() {
        let event = Event::Error {
            message: "No device connected".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["message"], "No device connected");
        assert_eq!(event.name(), "error");
    }
}
