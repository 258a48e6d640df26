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


// Acquisition loop: polls the device at a fixed cadence and fans samples out

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::AcquisitionSettings;
use crate::device::DeviceSession;
use crate::error::{AcquisitionError, DeviceError};
use crate::sample::{DeviceDescriptor, Sample};
use crate::subscriber::{Subscriber, SubscriberId};

/// Idle -> Connected -> Monitoring -> Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionState {
    Idle,
    Connected,
    Monitoring,
}

/// Counters for the current connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStats {
    pub cycles: u64,
    pub samples: u64,
    pub deliveries: u64,
    pub no_data: u64,
    pub read_errors: u64,
    pub consecutive_read_errors: u32,
    pub subscriber_failures: u64,
    /// Consecutive read errors reached the configured threshold
    pub degraded: bool,
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    samples: AtomicU64,
    deliveries: AtomicU64,
    no_data: AtomicU64,
    read_errors: AtomicU64,
    consecutive_read_errors: AtomicU32,
    subscriber_failures: AtomicU64,
    degraded: AtomicBool,
}

impl Counters {
    fn reset(&self) {
        self.cycles.store(0, Ordering::Relaxed);
        self.samples.store(0, Ordering::Relaxed);
        self.deliveries.store(0, Ordering::Relaxed);
        self.no_data.store(0, Ordering::Relaxed);
        self.read_errors.store(0, Ordering::Relaxed);
        self.consecutive_read_errors.store(0, Ordering::Relaxed);
        self.subscriber_failures.store(0, Ordering::Relaxed);
        self.degraded.store(false, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LoopStats {
        LoopStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            no_data: self.no_data.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            consecutive_read_errors: self.consecutive_read_errors.load(Ordering::Relaxed),
            subscriber_failures: self.subscriber_failures.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }
}

/// One subscriber's bounded mailbox and the worker that drains it
struct Registration {
    id: SubscriberId,
    name: String,
    mailbox: mpsc::Sender<Arc<Sample>>,
    worker: JoinHandle<()>,
}

/// Polls the device session and distributes each new sample to every
/// registered subscriber.
///
/// The loop only enqueues: every subscriber has its own mailbox and worker
/// task, so a stalled subscriber fills its own mailbox and never delays the
/// loop or the other subscribers. Each subscriber still sees samples in
/// acquisition order.
///
/// Stop requests are cooperative: each run carries a generation number and
/// exits as soon as the generation moves on, without waiting for its next
/// tick.
pub struct AcquisitionLoop {
    device: Arc<DeviceSession>,
    settings: AcquisitionSettings,
    subscribers: RwLock<Vec<Registration>>,
    state: Mutex<AcquisitionState>,
    generation: watch::Sender<u64>,
    counters: Arc<Counters>,
}

impl AcquisitionLoop {
    pub fn new(device: Arc<DeviceSession>, settings: AcquisitionSettings) -> Self {
        Self {
            device,
            settings,
            subscribers: RwLock::new(Vec::new()),
            state: Mutex::new(AcquisitionState::Idle),
            generation: watch::channel(0).0,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn device(&self) -> &Arc<DeviceSession> {
        &self.device
    }

    pub fn state(&self) -> AcquisitionState {
        *self.state.lock()
    }

    pub fn stats(&self) -> LoopStats {
        self.counters.snapshot()
    }

    /// Connect the device; Idle -> Connected
    pub async fn connect(&self, device_id: &str) -> Result<DeviceDescriptor, AcquisitionError> {
        if self.state() == AcquisitionState::Monitoring {
            return Err(AcquisitionError::AlreadyMonitoring);
        }

        let descriptor = self.device.connect(device_id).await?;
        self.counters.reset();
        *self.state.lock() = AcquisitionState::Connected;
        Ok(descriptor)
    }

    /// Start the polling task; Connected -> Monitoring
    pub fn start_monitoring(self: &Arc<Self>) -> Result<JoinHandle<()>, AcquisitionError> {
        {
            let mut state = self.state.lock();
            match *state {
                AcquisitionState::Monitoring => return Err(AcquisitionError::AlreadyMonitoring),
                AcquisitionState::Idle => return Err(DeviceError::NotConnected.into()),
                AcquisitionState::Connected => {}
            }
            if !self.device.is_connected() {
                *state = AcquisitionState::Idle;
                return Err(DeviceError::NotConnected.into());
            }
            *state = AcquisitionState::Monitoring;
        }

        let mut generation = 0;
        self.generation.send_modify(|current| {
            *current += 1;
            generation = *current;
        });
        info!(
            "Starting acquisition (generation {}, every {:?})",
            generation,
            self.settings.poll_interval()
        );

        let acquisition = self.clone();
        Ok(tokio::spawn(async move { acquisition.run(generation).await }))
    }

    /// Stop monitoring and release the device. Safe to call in any state.
    pub async fn disconnect(&self) {
        self.generation.send_modify(|current| *current += 1);
        *self.state.lock() = AcquisitionState::Idle;
        self.device.disconnect().await;
    }

    /// Add a subscriber; it receives samples from the next cycle on.
    /// Must be called inside a Tokio runtime.
    pub fn register(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId::new();
        let name = subscriber.name().to_string();
        let (mailbox, inbox) = mpsc::channel(self.settings.subscriber_queue_capacity.max(1));
        let worker = tokio::spawn(deliver(
            subscriber,
            inbox,
            self.settings.subscriber_timeout(),
            self.counters.clone(),
        ));

        info!("Registered subscriber '{}' ({})", name, id);
        self.subscribers.write().push(Registration {
            id,
            name,
            mailbox,
            worker,
        });
        id
    }

    /// Remove a subscriber; returns false if it was not registered.
    ///
    /// Samples already in its mailbox are still delivered before this
    /// returns, unless the subscriber stays stuck past the drain deadline.
    pub async fn deregister(&self, id: SubscriberId) -> bool {
        let removed = {
            let mut subscribers = self.subscribers.write();
            match subscribers.iter().position(|r| r.id == id) {
                Some(index) => subscribers.remove(index),
                None => return false,
            }
        };

        let Registration {
            name,
            mailbox,
            mut worker,
            ..
        } = removed;
        let backlog = mailbox.max_capacity() - mailbox.capacity();
        drop(mailbox);

        let deadline = self.settings.subscriber_timeout().saturating_mul(4);
        if timeout(deadline, &mut worker).await.is_err() {
            warn!(
                "Subscriber '{}' ({}) still busy {:?} after deregistration, abandoning its mailbox",
                name, id, deadline
            );
            worker.abort();
        }

        info!(
            "Deregistered subscriber '{}' ({}, {} samples were pending)",
            name, id, backlog
        );
        true
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    async fn run(self: Arc<Self>, generation: u64) {
        let mut ticker = interval(self.settings.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stop_requests = self.generation.subscribe();

        let device_lost = loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop_requests.changed() => {}
            }

            if *self.generation.borrow() != generation {
                debug!("Acquisition generation {} stop requested", generation);
                break false;
            }

            if !self.device.is_connected() {
                warn!("Device no longer connected, stopping acquisition");
                break true;
            }

            self.counters.cycles.fetch_add(1, Ordering::Relaxed);

            match self.device.read_latest() {
                Ok(Some(sample)) => {
                    self.counters.consecutive_read_errors.store(0, Ordering::Relaxed);
                    self.counters.degraded.store(false, Ordering::Relaxed);
                    self.distribute(sample);
                }
                Ok(None) => {
                    self.counters.no_data.fetch_add(1, Ordering::Relaxed);
                }
                Err(DeviceError::NotConnected) => {
                    debug!("Device session closed during read");
                    break true;
                }
                Err(e) => self.record_read_error(&e),
            }
        };

        // Only the run that still owns the generation cleans up after a lost device
        if device_lost
            && self.generation.send_if_modified(|current| {
                if *current == generation {
                    *current += 1;
                    true
                } else {
                    false
                }
            })
        {
            *self.state.lock() = AcquisitionState::Idle;
            self.device.disconnect().await;
        }

        let stats = self.stats();
        info!(
            "Acquisition stopped after {} cycles ({} samples, {} read errors, {} subscriber failures)",
            stats.cycles, stats.samples, stats.read_errors, stats.subscriber_failures
        );
    }

    fn record_read_error(&self, error: &DeviceError) {
        self.counters.read_errors.fetch_add(1, Ordering::Relaxed);
        let consecutive = self
            .counters
            .consecutive_read_errors
            .fetch_add(1, Ordering::Relaxed)
            + 1;

        if consecutive >= self.settings.read_error_threshold {
            self.counters.degraded.store(true, Ordering::Relaxed);
        }

        if consecutive == self.settings.read_error_threshold {
            warn!(
                "{} consecutive read errors, still retrying: {}",
                consecutive, error
            );
        } else {
            debug!("Read error ({} in a row): {}", consecutive, error);
        }
    }

    /// Hand one sample to every subscriber's mailbox without waiting on any
    fn distribute(&self, sample: Sample) {
        self.counters.samples.fetch_add(1, Ordering::Relaxed);

        let subscribers = self.subscribers.read();
        if subscribers.is_empty() {
            return;
        }

        let sample = Arc::new(sample);
        for registration in subscribers.iter() {
            let failure = match registration.mailbox.try_send(sample.clone()) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => "mailbox full, sample dropped",
                Err(TrySendError::Closed(_)) => "delivery worker has stopped",
            };
            record_failure(&self.counters, &registration.name, registration.id, failure);
        }
    }
}

/// Drain one subscriber's mailbox in order.
///
/// Each accept runs in its own task so a panic stays inside it. An accept
/// that overruns `limit` counts as a failure but is still awaited, so at
/// most one delivery per subscriber is ever in flight.
async fn deliver(
    subscriber: Arc<dyn Subscriber>,
    mut inbox: mpsc::Receiver<Arc<Sample>>,
    limit: Duration,
    counters: Arc<Counters>,
) {
    let name = subscriber.name().to_string();

    while let Some(sample) = inbox.recv().await {
        let task_subscriber = subscriber.clone();
        let mut delivery = tokio::spawn(async move { task_subscriber.accept(&sample).await });

        let outcome = timeout(limit, &mut delivery).await;
        let failure = match outcome {
            Ok(Ok(Ok(()))) => {
                counters.deliveries.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(join_error)) => format!("delivery task aborted: {}", join_error),
            Err(_) => {
                counters.subscriber_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Subscriber '{}' did not accept within {:?}, waiting for it before the next sample",
                    name, limit
                );
                if let Ok(Err(e)) = delivery.await {
                    debug!("Late delivery to '{}' failed: {}", name, e);
                }
                continue;
            }
        };

        counters.subscriber_failures.fetch_add(1, Ordering::Relaxed);
        warn!("Subscriber '{}' failed, continuing: {}", name, failure);
    }

    debug!("Delivery worker for '{}' finished", name);
}

fn record_failure(counters: &Counters, name: &str, id: SubscriberId, failure: &str) {
    counters.subscriber_failures.fetch_add(1, Ordering::Relaxed);
    warn!("Subscriber '{}' ({}) missed a sample: {}", name, id, failure);
}
