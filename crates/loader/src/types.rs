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

use std::{fmt, sync::Arc};

use bon::Builder;
use bytes::Bytes;
use strum_macros::{Display, EnumString};

use crate::error::LoadError;

/// Identifier of a logical resource.
///
/// Ids must be unique among concurrently tracked resources; two requests
/// carrying the same id are treated as requests for the same resource and
/// collapse to a single fetch.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ResourceId(String);

impl ResourceId {
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self { Self(value.to_string()) }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self { Self(value) }
}

/// How the raw payload of a resource is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MediaType {
    /// Raw bytes (buffers, typed array views)
    Binary,
    /// UTF-8 text (shader sources and similar)
    Text,
}

/// Half-open byte range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end:   u64,
}

impl ByteRange {
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self { Self { start, end } }

    /// Number of bytes covered by the range
    #[must_use]
    pub const fn len(&self) -> u64 { self.end.saturating_sub(self.start) }

    #[must_use]
    pub const fn is_empty(&self) -> bool { self.end <= self.start }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Per-request conversion and completion callbacks.
///
/// The delegate turns the raw payload into an application-level object
/// (typically a GPU-ready buffer) and is notified when the converted
/// resource lands in the cache. Callbacks are invoked outside the loader's
/// internal lock, so a delegate may issue further requests from within
/// `resource_available`.
pub trait ResourceDelegate<R, C>: Send + Sync {
    /// Convert the raw payload into the application-level resource
    fn convert(&self, payload: Bytes, ctx: &C) -> Result<R, LoadError>;

    /// Called once the converted resource has been stored in the cache
    fn resource_available(&self, resource: Arc<R>, ctx: &C);

    /// Called with any error encountered while satisfying the request
    fn handle_error(&self, error: &LoadError);
}

/// Observer registered with the loader, notified after every cache store
pub trait ResourceObserver: Send + Sync {
    fn resource_available(&self, id: &ResourceId);
}

/// A request for one logical resource.
///
/// `byte_range` is only meaningful for [`MediaType::Binary`]; requests
/// without a range fetch the whole resource and are never merged. `ctx` is
/// an opaque value handed back to the delegate on conversion and delivery.
#[derive(Builder)]
pub struct ResourceRequest<R, C> {
    #[builder(into)]
    pub id:         ResourceId,
    #[builder(into)]
    pub path:       String,
    pub media_type: MediaType,
    pub byte_range: Option<ByteRange>,
    pub delegate:   Arc<dyn ResourceDelegate<R, C>>,
    pub ctx:        C,
}

impl<R, C> fmt::Debug for ResourceRequest<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRequest")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("media_type", &self.media_type)
            .field("byte_range", &self.byte_range)
            .finish_non_exhaustive()
    }
}
