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


// Consumers of the acquisition stream

use async_trait::async_trait;
use crossbeam::queue::ArrayQueue;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SubscriberError;
use crate::events::EventSink;
use crate::sample::Sample;

/// Anything that wants every sample the acquisition loop produces.
///
/// A failing `accept` is isolated by the loop; it never stops delivery to
/// other subscribers.
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;

    async fn accept(&self, sample: &Sample) -> Result<(), SubscriberError>;
}

/// Handle returned by registration, used to deregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Forwards samples to the live display path.
///
/// `accept` only enqueues; a separate task drains the queue into the sink.
/// When the sink falls behind, the oldest queued samples are dropped so the
/// display always shows recent data.
pub struct LiveForwarder {
    sink: Arc<dyn EventSink>,
    queue: ArrayQueue<Sample>,
    notify: Notify,
    closed: AtomicBool,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl LiveForwarder {
    pub fn new(sink: Arc<dyn EventSink>, capacity: usize) -> Self {
        Self {
            sink,
            queue: ArrayQueue::new(capacity.max(1)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            forwarded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Start the drain task
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let forwarder = self.clone();
        tokio::spawn(async move { forwarder.run().await })
    }

    async fn run(&self) {
        loop {
            self.drain();
            if self.closed.load(Ordering::Acquire) {
                self.drain();
                break;
            }
            self.notify.notified().await;
        }
        info!(
            "Live forwarder stopped ({} forwarded, {} dropped)",
            self.forwarded(),
            self.dropped()
        );
    }

    /// Deliver everything queued so far; returns how many were delivered
    pub fn drain(&self) -> usize {
        let mut delivered = 0;
        while let Some(sample) = self.queue.pop() {
            self.sink.on_live_sample(&sample);
            delivered += 1;
        }
        self.forwarded.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    /// Stop the drain task after it flushes what is queued
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Subscriber for LiveForwarder {
    fn name(&self) -> &str {
        "live"
    }

    async fn accept(&self, sample: &Sample) -> Result<(), SubscriberError> {
        if self.queue.force_push(sample.clone()).is_some() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("Live queue full, dropped oldest sample ({} total)", dropped);
        }
        self.notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingSink;
    use crate::sample::{SampleClock, SignalQuality};
    use std::collections::BTreeMap;

    fn sample(clock: &mut SampleClock, seq: u32) -> Sample {
        Sample {
            timestamp: clock.next(),
            channels: BTreeMap::from([("O1".to_string(), seq as f64)]),
            battery_level: 90,
            signal_quality: SignalQuality::Good,
            sequence_number: Some(seq),
            marker: None,
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let sink = Arc::new(CollectingSink::new());
        let forwarder = LiveForwarder::new(sink.clone(), 2);
        let mut clock = SampleClock::new();

        for seq in 1..=5 {
            forwarder.accept(&sample(&mut clock, seq)).await.unwrap();
        }
        assert_eq!(forwarder.dropped(), 3);
        assert_eq!(forwarder.drain(), 2);

        let seqs: Vec<_> = sink
            .live_samples()
            .iter()
            .map(|s| s.sequence_number.unwrap())
            .collect();
        assert_eq!(seqs, vec![4, 5]);
    }

    #[tokio::test]
    async fn test_drain_task_forwards_and_stops() {
        let sink = Arc::new(CollectingSink::new());
        let forwarder = Arc::new(LiveForwarder::new(sink.clone(), 16));
        let handle = forwarder.spawn();
        let mut clock = SampleClock::new();

        for seq in 1..=3 {
            forwarder.accept(&sample(&mut clock, seq)).await.unwrap();
        }
        forwarder.close();
        handle.await.unwrap();

        assert_eq!(sink.live_samples().len(), 3);
        assert_eq!(forwarder.forwarded(), 3);
        assert_eq!(forwarder.pending(), 0);
    }
}
