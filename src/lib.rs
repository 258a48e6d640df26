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


// Biosignal acquisition and chunked session recorder
//
// - Polls a wireless sensor device at a fixed cadence
// - Fans each sample out to isolated subscribers (live display, recorder)
// - Persists recordings as time/count-bounded chunk files plus a manifest
// - Lists, loads and exports recorded sessions

pub mod acquisition;
pub mod buffer;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod events;
pub mod protocol;
pub mod recorder;
pub mod registry;
pub mod sample;
pub mod status;
pub mod storage;
pub mod subscriber;

// Re-export main types
pub use acquisition::{AcquisitionLoop, AcquisitionState, LoopStats};
pub use buffer::{ChunkBuffer, RotationPolicy, RotationTrigger};
pub use config::{load_config, load_config_with_env, AppConfig};
pub use control::Controller;
pub use device::{DeviceAdapter, DeviceSession, SimulatedDevice};
pub use error::{
    AcquisitionError, CommandError, DeviceError, RecorderError, RegistryError, SubscriberError,
};
pub use events::{CollectingSink, EventSink, JsonLinesSink};
pub use protocol::{Command, DeviceStatus, Event, SessionSummary, SystemStatus};
pub use recorder::{ChunkRef, ChunkedRecorder, FinalizedSession, RecordingSession, StopOutcome};
pub use registry::{CsvExport, SessionRegistry};
pub use sample::{DeviceDescriptor, Sample, SignalQuality};
pub use storage::{BackendFactory, StorageBackend};
pub use subscriber::{LiveForwarder, Subscriber, SubscriberId};
