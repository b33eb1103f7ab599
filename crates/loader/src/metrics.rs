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

use std::sync::LazyLock;

use prometheus::{
    IntCounter, IntCounterVec, IntGauge, register_int_counter, register_int_counter_vec,
    register_int_gauge,
};

pub const MEDIA_LABEL: &str = "media";

pub static LOADER_FETCHES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "loader_fetches_total",
        "Total number of physical fetches dispatched",
        &[MEDIA_LABEL]
    )
    .unwrap()
});

pub static LOADER_FETCH_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "loader_fetch_errors_total",
        "Total number of failed fetches"
    )
    .unwrap()
});

pub static LOADER_CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "loader_cache_hits_total",
        "Total number of requests served from the resource cache"
    )
    .unwrap()
});

pub static LOADER_BATCHES_MERGED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "loader_batches_merged_total",
        "Total number of range requests folded into an existing pending batch"
    )
    .unwrap()
});

pub static LOADER_IN_FLIGHT: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "loader_in_flight",
        "Number of physical fetches currently in flight"
    )
    .unwrap()
});

pub static LOADER_QUEUED_BATCHES: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "loader_queued_batches",
        "Number of pending batches waiting for a concurrency slot"
    )
    .unwrap()
});
