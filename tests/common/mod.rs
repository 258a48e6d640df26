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


// Shared fakes for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use biosignal_recorder::config::{AcquisitionSettings, DeviceSettings};
use biosignal_recorder::device::{DeviceAdapter, HardwareFilter, LinkState, RawReading};
use biosignal_recorder::error::{DeviceError, SubscriberError};
use biosignal_recorder::sample::{DeviceDescriptor, Sample, SampleClock, SignalQuality};
use biosignal_recorder::subscriber::Subscriber;

pub const CHANNELS: [&str; 4] = ["O1", "O2", "T3", "T4"];

pub fn descriptor() -> DeviceDescriptor {
    DeviceDescriptor::new("dev-1", "Test Headband", "AA:BB:CC:DD:EE:FF")
}

pub fn reading(seq: u32) -> RawReading {
    RawReading {
        values: vec![seq as f64, seq as f64 + 0.25, -(seq as f64), 1.5],
        quality: SignalQuality::Good,
        sequence_number: Some(seq),
        marker: None,
    }
}

/// One step of a scripted device
pub enum Step {
    Reading(RawReading),
    NoData,
    Fail,
}

/// Device that replays a script and drops the link once it runs out
pub struct ScriptedDevice {
    script: Mutex<VecDeque<Step>>,
    opened: Mutex<bool>,
    never_ready: bool,
    hold_link_when_empty: bool,
    pub closes: AtomicUsize,
}

impl ScriptedDevice {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            opened: Mutex::new(false),
            never_ready: false,
            hold_link_when_empty: false,
            closes: AtomicUsize::new(0),
        }
    }

    pub fn readings(count: u32) -> Self {
        Self::new((1..=count).map(|seq| Step::Reading(reading(seq))).collect())
    }

    /// Keeps reporting ready (with no data) after the script is exhausted
    pub fn holding_link(mut self) -> Self {
        self.hold_link_when_empty = true;
        self
    }

    pub fn never_ready() -> Self {
        Self {
            never_ready: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn push(&self, steps: Vec<Step>) {
        self.script.lock().extend(steps);
    }
}

#[async_trait]
impl DeviceAdapter for ScriptedDevice {
    async fn scan(&self, _timeout: Duration) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        Ok(vec![descriptor()])
    }

    async fn open(&self, _device: &DeviceDescriptor) -> Result<(), DeviceError> {
        *self.opened.lock() = true;
        Ok(())
    }

    async fn close(&self) -> Result<(), DeviceError> {
        *self.opened.lock() = false;
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn link_state(&self) -> LinkState {
        if !*self.opened.lock() {
            return LinkState::Disconnected;
        }
        if self.never_ready {
            return LinkState::Connecting;
        }
        if self.script.lock().is_empty() && !self.hold_link_when_empty {
            return LinkState::Disconnected;
        }
        LinkState::Ready
    }

    fn read_latest(&self) -> Result<Option<RawReading>, DeviceError> {
        match self.script.lock().pop_front() {
            Some(Step::Reading(reading)) => Ok(Some(reading)),
            Some(Step::NoData) | None => Ok(None),
            Some(Step::Fail) => Err(DeviceError::ReadTransient("scripted failure".to_string())),
        }
    }

    fn battery(&self) -> Result<u8, DeviceError> {
        Ok(77)
    }

    fn channel_names(&self) -> Vec<String> {
        CHANNELS.iter().map(|c| c.to_string()).collect()
    }
}

pub fn device_settings() -> DeviceSettings {
    DeviceSettings {
        connect_timeout_seconds: 1,
        connect_poll_interval_ms: 10,
        hardware_filter: HardwareFilter::None,
        ..DeviceSettings::default()
    }
}

pub fn fast_acquisition() -> AcquisitionSettings {
    AcquisitionSettings {
        poll_interval_ms: 5,
        subscriber_timeout_ms: 200,
        status_interval_ms: 20,
        read_error_threshold: 3,
        subscriber_queue_capacity: 1024,
        live_queue_capacity: 1024,
    }
}

/// Records every sample it receives, optionally taking its time
#[derive(Default)]
pub struct CollectingSubscriber {
    pub samples: Mutex<Vec<Sample>>,
    delay: Duration,
}

impl CollectingSubscriber {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            delay,
        }
    }

    pub fn count(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn sequence_numbers(&self) -> Vec<u32> {
        self.samples
            .lock()
            .iter()
            .filter_map(|s| s.sequence_number)
            .collect()
    }
}

#[async_trait]
impl Subscriber for CollectingSubscriber {
    fn name(&self) -> &str {
        "collector"
    }

    async fn accept(&self, sample: &Sample) -> Result<(), SubscriberError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.samples.lock().push(sample.clone());
        Ok(())
    }
}

/// Fails on every sample
#[derive(Default)]
pub struct FailingSubscriber {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl Subscriber for FailingSubscriber {
    fn name(&self) -> &str {
        "always-fails"
    }

    async fn accept(&self, _sample: &Sample) -> Result<(), SubscriberError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SubscriberError::new("always-fails", "disk on fire"))
    }
}

/// Panics on every sample
pub struct PanickingSubscriber;

#[async_trait]
impl Subscriber for PanickingSubscriber {
    fn name(&self) -> &str {
        "panics"
    }

    async fn accept(&self, _sample: &Sample) -> Result<(), SubscriberError> {
        panic!("subscriber bug");
    }
}

/// Takes far longer than any subscriber timeout
pub struct StallingSubscriber;

#[async_trait]
impl Subscriber for StallingSubscriber {
    fn name(&self) -> &str {
        "stalls"
    }

    async fn accept(&self, _sample: &Sample) -> Result<(), SubscriberError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

/// Build samples directly, bypassing any device
pub struct SampleFactory {
    clock: SampleClock,
    next_seq: u32,
}

impl SampleFactory {
    pub fn new() -> Self {
        Self {
            clock: SampleClock::new(),
            next_seq: 1,
        }
    }

    pub fn next(&mut self) -> Sample {
        let seq = self.next_seq;
        self.next_seq += 1;
        Sample {
            timestamp: self.clock.next(),
            channels: CHANNELS
                .iter()
                .enumerate()
                .map(|(i, c)| (c.to_string(), seq as f64 * 10.0 + i as f64))
                .collect::<BTreeMap<_, _>>(),
            battery_level: 80,
            signal_quality: SignalQuality::Good,
            sequence_number: Some(seq),
            marker: None,
        }
    }

    pub fn with_channels(&mut self, names: &[&str]) -> Sample {
        let mut sample = self.next();
        sample.channels = names.iter().map(|n| (n.to_string(), 0.0)).collect();
        sample
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}

/// Poll `condition` until it holds or `limit` passes
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
