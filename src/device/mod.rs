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


// Device module
//
// The vendor SDK is reached only through the `DeviceAdapter` trait.
// `DeviceSession` owns the connection lifecycle on top of it, and
// `SimulatedDevice` is the in-tree adapter used for development.

pub mod adapter;
pub mod session;
pub mod simulated;

pub use adapter::{DeviceAdapter, DeviceCapabilities, HardwareFilter, LinkState, RawReading};
pub use session::DeviceSession;
pub use simulated::SimulatedDevice;
