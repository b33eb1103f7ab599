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

use bon::Builder;
use jiff::SignedDuration;
use smart_default::SmartDefault;

/// Configuration for the resource loader
#[derive(Debug, Clone, SmartDefault, Builder)]
pub struct LoaderConfig {
    /// Maximum number of simultaneous network transfers
    #[default = 6]
    pub max_concurrent_fetches: usize,

    /// Maximum size of a merged range batch in bytes; adjacent requests
    /// whose combined span would exceed this stay separate
    #[default = 10_000_000]
    pub max_batch_size: u64,

    /// Timeout for HTTP requests
    #[default(SignedDuration::from_secs(30))]
    pub timeout: SignedDuration,

    /// Retries per fetch in the HTTP transport (0 disables retry). Retry is
    /// a transport concern; the scheduler never retries.
    #[default = 0]
    pub max_retries: usize,

    /// Custom User-Agent header
    pub user_agent: Option<String>,
}
