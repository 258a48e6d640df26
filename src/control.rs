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


use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::acquisition::AcquisitionLoop;
use crate::config::{AcquisitionSettings, AppConfig};
use crate::device::{DeviceAdapter, DeviceSession};
use crate::error::CommandError;
use crate::events::EventSink;
use crate::protocol::{Command, Event, SessionSummary, SystemStatus};
use crate::recorder::{ChunkedRecorder, FinalizedSession, StopOutcome};
use crate::sample::DeviceDescriptor;
use crate::status::spawn_status_reporter;
use crate::storage::StorageBackend;
use crate::subscriber::{LiveForwarder, SubscriberId};

#[derive(Default)]
struct Tasks {
    acquisition: Option<JoinHandle<()>>,
    status: Option<JoinHandle<()>>,
    live: Option<JoinHandle<()>>,
    live_subscription: Option<SubscriberId>,
    recorder_subscription: Option<SubscriberId>,
}

/// Handles external commands and wires the device, acquisition loop,
/// live path and recorder together.
///
/// Commands run one at a time; `status` never waits on them.
pub struct Controller {
    acquisition: Arc<AcquisitionLoop>,
    recorder: Arc<ChunkedRecorder>,
    live: Arc<LiveForwarder>,
    sink: Arc<dyn EventSink>,
    settings: AcquisitionSettings,
    commands: tokio::sync::Mutex<()>,
    tasks: Mutex<Tasks>,
}

impl Controller {
    /// Must be called inside a Tokio runtime; starts the live forwarding task
    pub fn new(
        acquisition: Arc<AcquisitionLoop>,
        recorder: Arc<ChunkedRecorder>,
        sink: Arc<dyn EventSink>,
        settings: AcquisitionSettings,
    ) -> Self {
        let live = Arc::new(LiveForwarder::new(sink.clone(), settings.live_queue_capacity));
        let live_subscription = acquisition.register(live.clone());
        let live_task = live.spawn();

        Self {
            acquisition,
            recorder,
            live,
            sink,
            settings,
            commands: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Tasks {
                live: Some(live_task),
                live_subscription: Some(live_subscription),
                ..Tasks::default()
            }),
        }
    }

    /// Build the whole pipeline from configuration
    pub fn from_config(
        config: &AppConfig,
        adapter: Arc<dyn DeviceAdapter>,
        storage: Arc<dyn StorageBackend>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let device = Arc::new(DeviceSession::new(adapter, config.device.clone()));
        let acquisition = Arc::new(AcquisitionLoop::new(device, config.acquisition.clone()));
        let recorder = Arc::new(ChunkedRecorder::new(
            storage,
            &config.recorder,
            config.storage.max_retries,
        ));
        Self::new(acquisition, recorder, sink, config.acquisition.clone())
    }

    pub fn acquisition(&self) -> &Arc<AcquisitionLoop> {
        &self.acquisition
    }

    pub fn recorder(&self) -> &Arc<ChunkedRecorder> {
        &self.recorder
    }

    pub fn live(&self) -> &Arc<LiveForwarder> {
        &self.live
    }

    /// Run one command, reporting a rejection to the sink as an error event
    pub async fn handle(&self, command: Command) -> Result<(), CommandError> {
        info!("Processing command: {:?}", command);

        let result = match command {
            Command::ScanDevices => self.scan_devices().await.map(|_| ()),
            Command::ConnectDevice { device_id } => {
                self.connect_device(&device_id).await.map(|_| ())
            }
            Command::DisconnectDevice => self.disconnect_device().await,
            Command::StartRecording => self.start_recording().await.map(|_| ()),
            Command::StopRecording => self.stop_recording().await.map(|_| ()),
            Command::Status => {
                self.sink.emit(Event::Status {
                    status: self.status(),
                });
                Ok(())
            }
        };

        if let Err(e) = &result {
            warn!("Command rejected: {}", e);
            self.sink.on_error(&e.to_string());
        }
        result
    }

    /// Run one command unless `interrupt` completes first.
    ///
    /// Returns `None` when interrupted; the abandoned command leaves no
    /// lock held, so `shutdown` can still run.
    pub async fn handle_or_interrupt<F>(
        &self,
        command: Command,
        interrupt: F,
    ) -> Option<Result<(), CommandError>>
    where
        F: Future,
    {
        tokio::select! {
            result = self.handle(command) => Some(result),
            _ = interrupt => {
                warn!("Command interrupted before it finished");
                None
            }
        }
    }

    pub async fn scan_devices(&self) -> Result<Vec<DeviceDescriptor>, CommandError> {
        let _guard = self.commands.lock().await;

        let devices = self.acquisition.device().scan_default().await?;
        self.sink.on_devices_found(&devices);
        Ok(devices)
    }

    /// Connect and start monitoring plus status reporting
    pub async fn connect_device(&self, device_id: &str) -> Result<DeviceDescriptor, CommandError> {
        let _guard = self.commands.lock().await;

        let descriptor = self.acquisition.connect(device_id).await?;
        let monitor = match self.acquisition.start_monitoring() {
            Ok(handle) => handle,
            Err(e) => {
                self.acquisition.disconnect().await;
                return Err(e.into());
            }
        };
        let status = spawn_status_reporter(
            self.acquisition.clone(),
            self.sink.clone(),
            self.settings.status_interval(),
        );

        {
            let mut tasks = self.tasks.lock();
            if let Some(previous) = tasks.status.replace(status) {
                previous.abort();
            }
            tasks.acquisition = Some(monitor);
        }

        self.sink.emit(Event::DeviceConnected {
            device: descriptor.clone(),
        });
        Ok(descriptor)
    }

    /// Finalize any recording, stop monitoring and release the device.
    /// Safe to call when nothing is connected.
    pub async fn disconnect_device(&self) -> Result<(), CommandError> {
        let _guard = self.commands.lock().await;

        if self.recorder.is_recording() {
            info!("Disconnect requested while recording, finalizing session first");
            self.finish_recording().await;
        }

        self.acquisition.disconnect().await;

        let (monitor, status) = {
            let mut tasks = self.tasks.lock();
            (tasks.acquisition.take(), tasks.status.take())
        };
        if let Some(status) = status {
            status.abort();
        }
        if let Some(monitor) = monitor {
            // The loop notices the stop request within one poll interval
            let grace = self
                .settings
                .poll_interval()
                .saturating_mul(5)
                .saturating_add(Duration::from_secs(1));
            let abort = monitor.abort_handle();
            if tokio::time::timeout(grace, monitor).await.is_err() {
                error!("Acquisition task did not stop within {:?}, aborting", grace);
                abort.abort();
            }
        }

        self.sink.emit(Event::DeviceDisconnected);
        Ok(())
    }

    pub async fn start_recording(&self) -> Result<SessionSummary, CommandError> {
        let _guard = self.commands.lock().await;

        let device = self.acquisition.device();
        let descriptor = match device.descriptor() {
            Some(descriptor) if device.is_connected() => descriptor,
            _ => return Err(CommandError::InvalidCommand("No device connected".to_string())),
        };
        if self.recorder.is_recording() {
            return Err(CommandError::InvalidCommand("Already recording".to_string()));
        }

        let channels = device.channel_names().unwrap_or_default();
        let session = self.recorder.start_session(descriptor, channels)?;
        let subscription = self.acquisition.register(self.recorder.clone());
        self.tasks.lock().recorder_subscription = Some(subscription);

        let summary = session.summary(0);
        self.sink.on_recording_started(&summary);
        Ok(summary)
    }

    pub async fn stop_recording(&self) -> Result<FinalizedSession, CommandError> {
        let _guard = self.commands.lock().await;

        match self.finish_recording().await {
            Some(finalized) => Ok(finalized),
            None => Err(CommandError::InvalidCommand(
                "Not currently recording".to_string(),
            )),
        }
    }

    async fn finish_recording(&self) -> Option<FinalizedSession> {
        let subscription = self.tasks.lock().recorder_subscription.take();
        if let Some(id) = subscription {
            self.acquisition.deregister(id).await;
        }

        match self.recorder.stop_session().await {
            StopOutcome::Finalized(finalized) => {
                if !finalized.manifest_written {
                    self.sink.on_error(&format!(
                        "Recording stopped but the manifest could not be written to {}",
                        finalized.manifest_path.display()
                    ));
                }
                self.sink
                    .on_recording_stopped(&finalized.session.summary(0), &finalized.manifest_path);
                Some(finalized)
            }
            StopOutcome::NothingToStop => None,
        }
    }

    /// Current state, answered without waiting on any task
    pub fn status(&self) -> SystemStatus {
        let device = self.acquisition.device();
        SystemStatus {
            connected: device.is_connected(),
            device: device.descriptor(),
            acquisition: self.acquisition.state(),
            recording: self.recorder.is_recording(),
            session: self.recorder.active_summary(),
            stats: self.acquisition.stats(),
        }
    }

    /// Stop everything, finalizing an open recording
    pub async fn shutdown(&self) {
        if let Err(e) = self.disconnect_device().await {
            warn!("Error during shutdown disconnect: {}", e);
        }

        let live_subscription = self.tasks.lock().live_subscription.take();
        if let Some(id) = live_subscription {
            self.acquisition.deregister(id).await;
        }

        self.live.close();
        let live_task = self.tasks.lock().live.take();
        if let Some(task) = live_task {
            if let Err(e) = task.await {
                warn!("Live forwarder task ended abnormally: {}", e);
            }
        }
        info!("Controller shut down");
    }
}
