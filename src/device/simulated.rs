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


// Synthetic device adapter for development without hardware

use async_trait::async_trait;
use parking_lot::Mutex;
use std::f64::consts::TAU;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::adapter::{DeviceAdapter, DeviceCapabilities, HardwareFilter, LinkState, RawReading};
use crate::config::SimulatedDeviceConfig;
use crate::error::DeviceError;
use crate::sample::{DeviceDescriptor, SignalQuality};

#[derive(Default)]
struct SimState {
    opened: Option<String>,
    state_polls: u32,
    link_lost: bool,
    started_at: Option<Instant>,
    last_emitted: Option<Instant>,
    packet: u32,
    filter: Option<HardwareFilter>,
}

/// Produces alpha-band sine waves on every configured channel.
///
/// Only ever selected explicitly through `device.driver: simulated`.
pub struct SimulatedDevice {
    config: SimulatedDeviceConfig,
    state: Mutex<SimState>,
}

impl SimulatedDevice {
    pub fn new(config: SimulatedDeviceConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Simulate the device going out of range
    pub fn drop_link(&self) {
        self.state.lock().link_lost = true;
    }

    /// Filter applied on connect, if any
    pub fn applied_filter(&self) -> Option<HardwareFilter> {
        self.state.lock().filter
    }

    fn descriptors(&self) -> Vec<DeviceDescriptor> {
        self.config
            .devices
            .iter()
            .map(|d| DeviceDescriptor::new(&d.id, &d.name, &d.address))
            .collect()
    }
}

#[async_trait]
impl DeviceAdapter for SimulatedDevice {
    async fn scan(&self, _timeout: Duration) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        Ok(self.descriptors())
    }

    async fn open(&self, device: &DeviceDescriptor) -> Result<(), DeviceError> {
        if !self.config.devices.iter().any(|d| d.id == device.id) {
            return Err(DeviceError::Unavailable(format!(
                "simulated device '{}' does not exist",
                device.id
            )));
        }

        let mut state = self.state.lock();
        *state = SimState {
            opened: Some(device.id.clone()),
            ..SimState::default()
        };
        info!("Opened simulated device '{}'", device.id);
        Ok(())
    }

    async fn close(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if let Some(id) = state.opened.take() {
            debug!("Closed simulated device '{}'", id);
        }
        state.started_at = None;
        Ok(())
    }

    fn link_state(&self) -> LinkState {
        let mut state = self.state.lock();
        if state.opened.is_none() || state.link_lost {
            return LinkState::Disconnected;
        }
        if state.state_polls < self.config.ready_after_polls {
            state.state_polls += 1;
            return LinkState::Connecting;
        }
        if state.started_at.is_none() {
            state.started_at = Some(Instant::now());
        }
        LinkState::Ready
    }

    fn read_latest(&self) -> Result<Option<RawReading>, DeviceError> {
        let mut state = self.state.lock();
        let Some(started_at) = state.started_at else {
            return Err(DeviceError::NotConnected);
        };
        if state.link_lost {
            return Err(DeviceError::ReadTransient("link lost".to_string()));
        }

        let now = Instant::now();
        let period = Duration::from_secs_f64(1.0 / self.config.sample_rate_hz.max(1.0));
        if let Some(last) = state.last_emitted {
            if now.duration_since(last) < period {
                return Ok(None);
            }
        }
        state.last_emitted = Some(now);
        state.packet = state.packet.wrapping_add(1);

        let t = now.duration_since(started_at).as_secs_f64();
        let values = (0..self.config.channels.len())
            .map(|ch| {
                let phase = ch as f64 * TAU / 8.0;
                50.0 * (TAU * 10.0 * t + phase).sin() + 10.0 * (TAU * 1.5 * t).sin()
            })
            .collect();

        Ok(Some(RawReading {
            values,
            quality: SignalQuality::Good,
            sequence_number: Some(state.packet),
            marker: Some(0),
        }))
    }

    fn battery(&self) -> Result<u8, DeviceError> {
        if self.state.lock().opened.is_none() {
            return Err(DeviceError::NotConnected);
        }
        Ok(self.config.battery_level)
    }

    fn channel_names(&self) -> Vec<String> {
        self.config.channels.clone()
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            hardware_filter: true,
        }
    }

    fn set_filter(&self, filter: HardwareFilter) -> Result<(), DeviceError> {
        self.state.lock().filter = Some(filter);
        Ok(())
    }
}
