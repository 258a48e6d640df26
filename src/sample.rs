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


// Canonical sample model shared by the acquisition loop, the live path and the recorder

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// Identity of a device as reported by a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub address: String,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Electrode contact quality reported alongside a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignalQuality {
    Good,
    Poor,
    #[default]
    Unknown,
}

impl SignalQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalQuality::Good => "good",
            SignalQuality::Poor => "poor",
            SignalQuality::Unknown => "unknown",
        }
    }
}

/// Point in time of a sample.
///
/// `monotonic_us` counts microseconds since the start of the acquisition run
/// and strictly increases within one run. `wall_clock` is for humans and may
/// jump.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleTimestamp {
    pub wall_clock: DateTime<Utc>,
    pub monotonic_us: u64,
}

/// One normalized reading across all channels plus device health metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: SampleTimestamp,
    pub channels: BTreeMap<String, f64>,
    pub battery_level: u8,
    #[serde(default)]
    pub signal_quality: SignalQuality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<i32>,
}

impl Sample {
    /// Channel names in column order
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.keys().map(String::as_str).collect()
    }

    /// True when the sample carries exactly these channel names, in any order
    pub fn has_channels(&self, names: &[String]) -> bool {
        self.channels.len() == names.len() && names.iter().all(|n| self.channels.contains_key(n))
    }

    /// True when both samples carry exactly the same channel set
    pub fn same_channels(&self, other: &Sample) -> bool {
        self.channels.len() == other.channels.len()
            && self.channels.keys().zip(other.channels.keys()).all(|(a, b)| a == b)
    }
}

/// Issues timestamps for one acquisition run
#[derive(Debug)]
pub struct SampleClock {
    origin: Instant,
    last_us: Option<u64>,
}

impl SampleClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_us: None,
        }
    }

    /// Next timestamp; never equal to or before the previous one
    pub fn next(&mut self) -> SampleTimestamp {
        let elapsed = self.origin.elapsed().as_micros() as u64;
        let monotonic_us = match self.last_us {
            Some(last) if elapsed <= last => last + 1,
            _ => elapsed,
        };
        self.last_us = Some(monotonic_us);

        SampleTimestamp {
            wall_clock: Utc::now(),
            monotonic_us,
        }
    }
}

impl Default for SampleClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_strictly_increases() {
        let mut clock = SampleClock::new();
        let mut last = clock.next().monotonic_us;
        for _ in 0..1000 {
            let ts = clock.next().monotonic_us;
            assert!(ts > last);
            last = ts;
        }
    }

    #[test]
    fn test_signal_quality_serializes_lowercase() {
        let json = serde_json::to_string(&SignalQuality::Poor).unwrap();
        assert_eq!(json, "\"poor\"");
        let parsed: SignalQuality = serde_json::from_str("\"good\"").unwrap();
        assert_eq!(parsed, SignalQuality::Good);
    }

    #[test]
    fn test_same_channels() {
        let mut clock = SampleClock::new();
        let mk = |names: &[&str], clock: &mut SampleClock| Sample {
            timestamp: clock.next(),
            channels: names.iter().map(|n| (n.to_string(), 0.0)).collect(),
            battery_level: 100,
            signal_quality: SignalQuality::Good,
            sequence_number: None,
            marker: None,
        };
        let a = mk(&["O1", "O2", "T3", "T4"], &mut clock);
        let b = mk(&["O1", "O2", "T3", "T4"], &mut clock);
        let c = mk(&["O1", "O2", "T3"], &mut clock);
        assert!(a.same_channels(&b));
        assert!(!a.same_channels(&c));
        assert_eq!(a.channel_names(), vec!["O1", "O2", "T3", "T4"]);
    }
}
