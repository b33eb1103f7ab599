// Copyright 2025 Gltfetch Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP resource loader for glTF-style scene descriptions.
//!
//! Deduplicates identical requests, coalesces adjacent byte-range requests
//! into single transfers, and caps the number of simultaneous fetches.
//! Type-specific interpretation of the fetched bytes stays with the caller
//! through the [`ResourceDelegate`] contract.

mod batch;
mod config;
mod error;
mod loader;
mod metrics;
mod scheduler;
mod transport;
mod tree;
mod types;

pub use config::LoaderConfig;
pub use error::LoadError;
pub use loader::ResourceLoader;
pub use transport::{HttpTransport, Transport};
pub use types::{
    ByteRange, MediaType, ResourceDelegate, ResourceId, ResourceObserver, ResourceRequest,
};
