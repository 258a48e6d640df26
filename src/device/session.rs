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


// Device connection lifecycle on top of a DeviceAdapter

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::adapter::{DeviceAdapter, HardwareFilter, LinkState};
use crate::config::DeviceSettings;
use crate::error::DeviceError;
use crate::sample::{DeviceDescriptor, Sample, SampleClock};

struct Connection {
    descriptor: DeviceDescriptor,
    channels: Vec<String>,
    clock: SampleClock,
}

/// Owns the "currently connected device".
///
/// All mutation goes through `connect` and `disconnect`; the rest of the
/// system only reads through the query methods, which never block on I/O.
pub struct DeviceSession {
    adapter: Arc<dyn DeviceAdapter>,
    settings: DeviceSettings,
    discovered: Mutex<HashMap<String, DeviceDescriptor>>,
    connection: Mutex<Option<Connection>>,
    battery: AtomicU8,
}

impl DeviceSession {
    pub fn new(adapter: Arc<dyn DeviceAdapter>, settings: DeviceSettings) -> Self {
        Self {
            adapter,
            settings,
            discovered: Mutex::new(HashMap::new()),
            connection: Mutex::new(None),
            battery: AtomicU8::new(0),
        }
    }

    /// Scan for devices and remember them for a later `connect`
    pub async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        info!("Scanning for devices for {:?}", timeout);

        let devices = self.adapter.scan(timeout).await?;

        let mut discovered = self.discovered.lock();
        for device in &devices {
            discovered.insert(device.id.clone(), device.clone());
        }

        info!("Found {} device(s)", devices.len());
        Ok(devices)
    }

    /// Scan with the configured timeout
    pub async fn scan_default(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        self.scan(self.settings.scan_timeout()).await
    }

    /// Connect to a previously discovered device.
    ///
    /// Waits at most `connect_timeout` for the device to report ready.
    pub async fn connect(&self, device_id: &str) -> Result<DeviceDescriptor, DeviceError> {
        let descriptor = {
            let discovered = self.discovered.lock();
            match discovered.get(device_id) {
                Some(descriptor) => descriptor.clone(),
                None => {
                    let mut known: Vec<&String> = discovered.keys().collect();
                    known.sort();
                    return Err(DeviceError::Unavailable(format!(
                        "device '{}' not found in discovered devices (known: {:?})",
                        device_id, known
                    )));
                }
            }
        };

        if let Some(current) = self.descriptor() {
            if current.id == descriptor.id && self.is_connected() {
                debug!("Device '{}' already connected", device_id);
                return Ok(current);
            }
            return Err(DeviceError::Unavailable(format!(
                "device '{}' is connected; disconnect it first",
                current.id
            )));
        }

        info!("Connecting to device '{}' ({})", descriptor.name, descriptor.address);
        self.adapter.open(&descriptor).await?;

        let timeout = self.settings.connect_timeout();
        let poll = self.settings.connect_poll_interval();
        let max_attempts = (timeout.as_millis() / poll.as_millis().max(1)).max(1) as u64;
        let started = Instant::now();

        for attempt in 0..max_attempts {
            match self.adapter.link_state() {
                LinkState::Ready => {
                    self.configure_hardware_filter();

                    *self.connection.lock() = Some(Connection {
                        descriptor: descriptor.clone(),
                        channels: self.adapter.channel_names(),
                        clock: SampleClock::new(),
                    });

                    if let Err(e) = self.refresh_battery() {
                        debug!("Initial battery read failed: {}", e);
                    }

                    info!(
                        "Connected to device '{}' after {:?}",
                        descriptor.id,
                        started.elapsed()
                    );
                    return Ok(descriptor);
                }
                state => {
                    if attempt % 10 == 0 {
                        debug!(
                            "Waiting for device '{}' (attempt {}/{}, state: {:?})",
                            descriptor.id,
                            attempt + 1,
                            max_attempts,
                            state
                        );
                    }
                }
            }
            sleep(poll).await;
        }

        warn!(
            "Connection timeout for device '{}'; it may be out of range or in use",
            descriptor.id
        );
        if let Err(e) = self.adapter.close().await {
            debug!("Cleanup after connection timeout failed: {}", e);
        }

        Err(DeviceError::ConnectionTimeout {
            device_id: descriptor.id,
            waited: started.elapsed(),
        })
    }

    /// Release the current device. Safe to call when nothing is connected.
    pub async fn disconnect(&self) {
        let previous = self.connection.lock().take();

        match previous {
            Some(connection) => {
                if let Err(e) = self.adapter.close().await {
                    warn!("Error closing device '{}': {}", connection.descriptor.id, e);
                }
                info!("Disconnected from device '{}'", connection.descriptor.id);
            }
            None => debug!("Disconnect requested with no device connected"),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some() && self.adapter.link_state() == LinkState::Ready
    }

    /// Descriptor of the connected device, if any
    pub fn descriptor(&self) -> Option<DeviceDescriptor> {
        self.connection
            .lock()
            .as_ref()
            .map(|c| c.descriptor.clone())
    }

    /// Channel set of the connected device
    pub fn channel_names(&self) -> Option<Vec<String>> {
        self.connection.lock().as_ref().map(|c| c.channels.clone())
    }

    /// Latest sample, or `None` when the device has nothing new.
    ///
    /// Never blocks waiting for data.
    pub fn read_latest(&self) -> Result<Option<Sample>, DeviceError> {
        let mut guard = self.connection.lock();
        let connection = guard.as_mut().ok_or(DeviceError::NotConnected)?;

        let Some(raw) = self.adapter.read_latest()? else {
            return Ok(None);
        };

        if raw.values.len() != connection.channels.len() {
            return Err(DeviceError::MalformedReading(format!(
                "expected {} channel values, got {}",
                connection.channels.len(),
                raw.values.len()
            )));
        }

        if let Some(bad) = raw.values.iter().position(|v| !v.is_finite()) {
            return Err(DeviceError::MalformedReading(format!(
                "non-finite value on channel '{}'",
                connection.channels[bad]
            )));
        }

        let channels = connection
            .channels
            .iter()
            .cloned()
            .zip(raw.values)
            .collect();

        Ok(Some(Sample {
            timestamp: connection.clock.next(),
            channels,
            battery_level: self.battery.load(Ordering::Relaxed),
            signal_quality: raw.quality,
            sequence_number: raw.sequence_number,
            marker: raw.marker,
        }))
    }

    /// Query the device for its battery level and cache it
    pub fn battery(&self) -> Result<u8, DeviceError> {
        if self.connection.lock().is_none() {
            return Err(DeviceError::NotConnected);
        }
        self.refresh_battery()
    }

    /// Battery level from the last successful query
    pub fn last_battery(&self) -> u8 {
        self.battery.load(Ordering::Relaxed)
    }

    fn refresh_battery(&self) -> Result<u8, DeviceError> {
        let level = self.adapter.battery()?.min(100);
        self.battery.store(level, Ordering::Relaxed);
        Ok(level)
    }

    /// Best-effort: an unsupported or failing filter never fails the connection
    fn configure_hardware_filter(&self) {
        let filter = self.settings.hardware_filter;
        if filter == HardwareFilter::None {
            return;
        }

        if !self.adapter.capabilities().hardware_filter {
            info!("Device has no hardware filter support, skipping {:?}", filter);
            return;
        }

        match self.adapter.set_filter(filter) {
            Ok(()) => info!("Applied hardware filter {:?}", filter),
            Err(e) => warn!("Could not configure hardware filter {:?}: {}", filter, e),
        }
    }
}
