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


// Storage backend module
//
// Provides a trait-based abstraction for where session chunk and manifest
// files live. The recorder writes through it and the session registry reads
// back through it.

pub mod backend;
pub mod factory;
pub mod filesystem;
pub mod memory;

pub use backend::StorageBackend;
pub use factory::BackendFactory;
pub use filesystem::FilesystemBackend;
pub use memory::MemoryBackend;
