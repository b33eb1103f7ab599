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

use snafu::Snafu;

use crate::types::ByteRange;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LoadError {
    #[snafu(display("Resource description is missing required fields"))]
    MissingDescription,

    #[snafu(display("Invalid resource path: {path:?}"))]
    InvalidPath { path: String },

    #[snafu(display("Invalid media type for request: {reason}"))]
    InvalidType { reason: String },

    #[snafu(display("Network error: {source}"))]
    Network { source: reqwest::Error },

    #[snafu(display("HTTP error {status} for URL: {url}"))]
    HttpStatus { status: u16, url: String },

    #[snafu(display("Resource not found: {url}"))]
    NotFound { url: String },

    #[snafu(display("Byte ranges {first} and {second} overlap without touching"))]
    OverlappingRanges { first: ByteRange, second: ByteRange },

    #[snafu(display("Transport returned {actual} bytes for a {expected}-byte span"))]
    ShortPayload { expected: u64, actual: u64 },
}
