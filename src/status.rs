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


// Periodic device status reporting

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::acquisition::AcquisitionLoop;
use crate::events::EventSink;
use crate::protocol::{DeviceStatus, Event};

/// Build a status snapshot without waiting on the acquisition task
pub fn device_status(acquisition: &AcquisitionLoop) -> DeviceStatus {
    let device = acquisition.device();
    let connected = device.is_connected();
    let battery_level = if connected {
        match device.battery() {
            Ok(level) => Some(level),
            Err(e) => {
                debug!("Battery read failed, reporting cached level: {}", e);
                Some(device.last_battery())
            }
        }
    } else {
        None
    };
    let stats = acquisition.stats();

    DeviceStatus {
        connected,
        battery_level,
        timestamp: Utc::now(),
        consecutive_read_errors: stats.consecutive_read_errors,
        degraded: stats.degraded,
    }
}

/// Report device status every `period` while the device stays connected.
///
/// Emits one final disconnected status when the device goes away.
pub fn spawn_status_reporter(
    acquisition: Arc<AcquisitionLoop>,
    sink: Arc<dyn EventSink>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reports = 0u64;

        loop {
            ticker.tick().await;

            let status = device_status(&acquisition);
            let connected = status.connected;
            sink.emit(Event::DeviceStatus { status });
            reports += 1;

            if !connected {
                break;
            }
        }

        info!("Status reporter stopped after {} reports", reports);
    })
}
