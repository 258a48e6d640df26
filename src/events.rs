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


// Outbound event sink standing in for the external transport

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::io::Write;
use std::path::Path;
use tracing::warn;

use crate::protocol::{DeviceStatus, Event, SessionSummary};
use crate::sample::{DeviceDescriptor, Sample};

/// Receives everything the core reports outward.
///
/// Implementations must not block for long; they are called from the
/// live-forwarding and status tasks.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);

    fn on_live_sample(&self, sample: &Sample) {
        self.emit(Event::LiveSample {
            sample: sample.clone(),
        });
    }

    fn on_status(&self, connected: bool, battery_level: Option<u8>, timestamp: DateTime<Utc>) {
        self.emit(Event::DeviceStatus {
            status: DeviceStatus {
                connected,
                battery_level,
                timestamp,
                consecutive_read_errors: 0,
                degraded: false,
            },
        });
    }

    fn on_devices_found(&self, devices: &[DeviceDescriptor]) {
        self.emit(Event::DevicesFound {
            devices: devices.to_vec(),
        });
    }

    fn on_error(&self, message: &str) {
        self.emit(Event::Error {
            message: message.to_string(),
        });
    }

    fn on_recording_started(&self, session: &SessionSummary) {
        self.emit(Event::RecordingStarted {
            session: session.clone(),
        });
    }

    fn on_recording_stopped(&self, session: &SessionSummary, manifest_path: &Path) {
        self.emit(Event::RecordingStopped {
            session: session.clone(),
            manifest_path: manifest_path.to_path_buf(),
        });
    }
}

/// Writes one JSON object per line
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&self, event: Event) {
        let mut writer = self.writer.lock();
        if let Err(e) = write_line(&mut *writer, &event) {
            warn!("Failed to emit '{}' event: {}", event.name(), e);
        }
    }
}

fn write_line<W: Write>(writer: &mut W, event: &Event) -> std::io::Result<()> {
    serde_json::to_writer(&mut *writer, event)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Keeps every event in memory
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn live_samples(&self) -> Vec<Sample> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::LiveSample { sample } => Some(sample.clone()),
                _ => None,
            })
            .collect()
    }

    /// Count of events with the given name
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: Event) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_lines_sink_writes_one_line_per_event() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.on_error("first");
        sink.on_status(true, Some(80), Utc::now());

        let output = String::from_utf8(sink.writer.lock().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "error");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "device_status");
        assert_eq!(second["status"]["battery_level"], 80);
    }

    #[test]
    fn test_collecting_sink_counts() {
        let sink = CollectingSink::new();
        sink.on_error("a");
        sink.on_error("b");
        sink.on_devices_found(&[]);
        assert_eq!(sink.count("error"), 2);
        assert_eq!(sink.count("devices_found"), 1);
    }
}
