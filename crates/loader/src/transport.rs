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

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use bytes::Bytes;
use snafu::{ResultExt, ensure};

use crate::{
    config::LoaderConfig,
    error::{HttpStatusSnafu, LoadError, NetworkSnafu, NotFoundSnafu},
    types::{ByteRange, MediaType},
};

/// Issues the actual network transfer for one dispatched fetch.
///
/// Implementations must produce exactly one terminal outcome per call: the
/// full payload for the requested span, or one error. For merged batches
/// the loader slices the payload per member, so a transport only ever
/// returns the whole contiguous span.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(
        &self,
        path: &str,
        media_type: MediaType,
        range: Option<ByteRange>,
    ) -> Result<Bytes, LoadError>;
}

/// Default transport backed by reqwest
pub struct HttpTransport {
    client:      reqwest::Client,
    max_retries: usize,
}

impl HttpTransport {
    /// Build a transport from the loader configuration
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client fails to build (should never happen with
    /// valid config)
    #[must_use]
    pub fn new(config: &LoaderConfig) -> Self {
        let timeout: Duration = config
            .timeout
            .try_into()
            .expect("timeout must be non-negative");

        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(ref ua) = config.user_agent {
            builder = builder.user_agent(ua);
        }

        Self {
            client:      builder.build().expect("Failed to build HTTP client"),
            max_retries: config.max_retries,
        }
    }

    async fn try_fetch(&self, path: &str, range: Option<ByteRange>) -> Result<Bytes, LoadError> {
        let mut request = self.client.get(path);

        if let Some(range) = range {
            let header = format!("bytes={}-{}", range.start, range.end - 1);
            request = request.header(reqwest::header::RANGE, header);
        }
        // Some servers hand back a stale cached entity for ranged requests;
        // force revalidation.
        request = request.header(
            reqwest::header::IF_MODIFIED_SINCE,
            "Sat, 1 Jan 1970 00:00:00 GMT",
        );

        let response = request.send().await.context(NetworkSnafu)?;

        let status = response.status();
        ensure!(
            status != reqwest::StatusCode::NOT_FOUND,
            NotFoundSnafu { url: path }
        );
        ensure!(
            status.is_success(),
            HttpStatusSnafu {
                status: status.as_u16(),
                url:    path,
            }
        );

        response.bytes().await.context(NetworkSnafu)
    }

    /// Check if error is a client error (4xx) that shouldn't be retried
    const fn is_client_error(error: &LoadError) -> bool {
        matches!(error, LoadError::NotFound { .. })
            || matches!(error, LoadError::HttpStatus { status, .. } if *status >= 400 && *status < 500)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        path: &str,
        _media_type: MediaType,
        range: Option<ByteRange>,
    ) -> Result<Bytes, LoadError> {
        if self.max_retries == 0 {
            return self.try_fetch(path, range).await;
        }

        let backoff = ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(8));

        (|| self.try_fetch(path, range))
            .retry(backoff)
            .when(|e| !Self::is_client_error(e))
            .await
    }
}
