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

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_test::TestServer;
use gltfetch::{
    ByteRange, LoadError, LoaderConfig, MediaType, ResourceDelegate, ResourceId, ResourceLoader,
    ResourceObserver, ResourceRequest,
};
use tokio::sync::{mpsc, watch};

#[derive(Clone)]
struct AppState {
    content:     Arc<Vec<u8>>,
    ranges_seen: Arc<Mutex<Vec<String>>>,
    hits:        Arc<AtomicUsize>,
    current:     Arc<AtomicUsize>,
    peak:        Arc<AtomicUsize>,
    release:     watch::Receiver<bool>,
}

async fn handle_scene(headers: HeaderMap, State(state): State<AppState>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let current = state.current.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak.fetch_max(current, Ordering::SeqCst);

    if let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        state.ranges_seen.lock().unwrap().push(range.to_string());
    }

    // hold the response until the test opens the gate
    let mut release = state.release.clone();
    while !*release.borrow() {
        release.changed().await.unwrap();
    }

    let total = state.content.len();
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_range(v, total));

    let response = if let Some((start, end)) = range {
        let slice = &state.content[start..=end];
        let mut response_headers = HeaderMap::new();
        response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        response_headers.insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&format!("bytes {start}-{end}/{total}")).unwrap(),
        );
        (
            StatusCode::PARTIAL_CONTENT,
            response_headers,
            Bytes::copy_from_slice(slice),
        )
            .into_response()
    } else {
        (StatusCode::OK, Bytes::copy_from_slice(&state.content)).into_response()
    };

    state.current.fetch_sub(1, Ordering::SeqCst);
    response
}

async fn handle_shader() -> &'static str { "void main() { gl_FragColor = vec4(1.0); }" }

fn parse_range(value: &str, total: usize) -> Option<(usize, usize)> {
    let value = value.strip_prefix("bytes=")?;
    let (start_str, end_str) = value.split_once('-')?;
    let start: usize = start_str.parse().ok()?;
    let end: usize = end_str.parse().ok()?;
    if start <= end && end < total {
        Some((start, end))
    } else {
        None
    }
}

struct TestBackend {
    server:  TestServer,
    state:   AppState,
    release: watch::Sender<bool>,
}

impl TestBackend {
    fn new(content: Vec<u8>, gated: bool) -> Self {
        let (release_tx, release_rx) = watch::channel(!gated);
        let state = AppState {
            content:     Arc::new(content),
            ranges_seen: Arc::new(Mutex::new(Vec::new())),
            hits:        Arc::new(AtomicUsize::new(0)),
            current:     Arc::new(AtomicUsize::new(0)),
            peak:        Arc::new(AtomicUsize::new(0)),
            release:     release_rx,
        };

        let app = Router::new()
            .route("/scene.bin", get(handle_scene))
            .route("/shader.glsl", get(handle_shader))
            .with_state(state.clone());

        let server = TestServer::builder()
            .http_transport()
            .try_build(app)
            .expect("failed to create test server");

        Self {
            server,
            state,
            release: release_tx,
        }
    }

    fn open_gate(&self) { let _ = self.release.send(true); }

    fn url(&self, path: &str) -> String {
        let base = self
            .server
            .server_address()
            .expect("server should have HTTP address")
            .to_string();
        if base.ends_with('/') {
            format!("{base}{}", path.trim_start_matches('/'))
        } else {
            format!("{base}{path}")
        }
    }

    fn hits(&self) -> usize { self.state.hits.load(Ordering::SeqCst) }

    fn peak(&self) -> usize { self.state.peak.load(Ordering::SeqCst) }

    fn ranges_seen(&self) -> Vec<String> { self.state.ranges_seen.lock().unwrap().clone() }
}

struct ChannelDelegate {
    deliveries: mpsc::UnboundedSender<(String, Vec<u8>)>,
    errors:     mpsc::UnboundedSender<(String, String)>,
    label:      String,
}

impl ResourceDelegate<Vec<u8>, ()> for ChannelDelegate {
    fn convert(&self, payload: bytes::Bytes, _ctx: &()) -> Result<Vec<u8>, LoadError> {
        Ok(payload.to_vec())
    }

    fn resource_available(&self, resource: Arc<Vec<u8>>, _ctx: &()) {
        let _ = self
            .deliveries
            .send((self.label.clone(), resource.as_ref().clone()));
    }

    fn handle_error(&self, error: &LoadError) {
        let _ = self.errors.send((self.label.clone(), error.to_string()));
    }
}

struct Client {
    deliveries:  mpsc::UnboundedReceiver<(String, Vec<u8>)>,
    errors:      mpsc::UnboundedReceiver<(String, String)>,
    delivery_tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
    error_tx:    mpsc::UnboundedSender<(String, String)>,
}

impl Client {
    fn new() -> Self {
        let (delivery_tx, deliveries) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();
        Self {
            deliveries,
            errors,
            delivery_tx,
            error_tx,
        }
    }

    fn ranged(
        &self,
        backend: &TestBackend,
        id: &str,
        start: u64,
        end: u64,
    ) -> ResourceRequest<Vec<u8>, ()> {
        ResourceRequest::builder()
            .id(id)
            .path(backend.url("/scene.bin"))
            .media_type(MediaType::Binary)
            .byte_range(ByteRange::new(start, end))
            .delegate(self.delegate(id))
            .ctx(())
            .build()
    }

    fn delegate(&self, label: &str) -> Arc<dyn ResourceDelegate<Vec<u8>, ()>> {
        Arc::new(ChannelDelegate {
            deliveries: self.delivery_tx.clone(),
            errors:     self.error_tx.clone(),
            label:      label.to_string(),
        })
    }

    async fn next_delivery(&mut self) -> (String, Vec<u8>) {
        tokio::time::timeout(Duration::from_secs(10), self.deliveries.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("delivery channel closed")
    }

    async fn next_error(&mut self) -> (String, String) {
        tokio::time::timeout(Duration::from_secs(10), self.errors.recv())
            .await
            .expect("timed out waiting for error")
            .expect("error channel closed")
    }
}

fn scene_content(len: usize) -> Vec<u8> { (0..len).map(|i| (i % 251) as u8).collect() }

/// The slot is released after the delegate callback fires, so give the
/// loader a moment to settle before asserting on its counters.
async fn wait_for_idle(loader: &ResourceLoader<Vec<u8>>) {
    for _ in 0..100 {
        if loader.in_flight() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("loader did not become idle");
}

#[tokio::test]
async fn coalesces_adjacent_ranges_into_a_single_transfer() {
    let content = scene_content(256);
    let backend = TestBackend::new(content.clone(), true);
    let mut client = Client::new();

    let config = LoaderConfig {
        max_concurrent_fetches: 1,
        ..LoaderConfig::default()
    };
    let loader: Arc<ResourceLoader<Vec<u8>>> = ResourceLoader::new(&config);

    // "a" claims the only slot; b and c coalesce in the backlog, d stays
    // its own batch
    loader.request(client.ranged(&backend, "a", 0, 10));
    loader.request(client.ranged(&backend, "b", 10, 20));
    loader.request(client.ranged(&backend, "c", 20, 30));
    loader.request(client.ranged(&backend, "d", 40, 50));
    assert_eq!(loader.pending_batches(), 2);

    backend.open_gate();

    let mut delivered = std::collections::HashMap::new();
    for _ in 0..4 {
        let (label, payload) = client.next_delivery().await;
        delivered.insert(label, payload);
    }

    assert_eq!(delivered["a"], &content[0..10]);
    assert_eq!(delivered["b"], &content[10..20]);
    assert_eq!(delivered["c"], &content[20..30]);
    assert_eq!(delivered["d"], &content[40..50]);

    // three physical transfers, with b and c satisfied by one ranged GET
    assert_eq!(backend.hits(), 3);
    assert_eq!(
        backend.ranges_seen(),
        ["bytes=0-9", "bytes=10-29", "bytes=40-49"]
    );
}

#[tokio::test]
async fn concurrency_limit_bounds_simultaneous_transfers() {
    let backend = TestBackend::new(scene_content(256), true);
    let mut client = Client::new();

    let config = LoaderConfig {
        max_concurrent_fetches: 2,
        ..LoaderConfig::default()
    };
    let loader: Arc<ResourceLoader<Vec<u8>>> = ResourceLoader::new(&config);

    loader.request(client.ranged(&backend, "a", 0, 10));
    loader.request(client.ranged(&backend, "b", 20, 30));
    loader.request(client.ranged(&backend, "c", 40, 50));
    loader.request(client.ranged(&backend, "d", 60, 70));

    assert_eq!(loader.in_flight(), 2);
    assert_eq!(loader.pending_batches(), 2);

    backend.open_gate();
    for _ in 0..4 {
        client.next_delivery().await;
    }

    assert_eq!(backend.hits(), 4);
    assert!(backend.peak() <= 2, "peak concurrency was {}", backend.peak());
    wait_for_idle(&loader).await;
    assert_eq!(loader.pending_batches(), 0);
}

#[tokio::test]
async fn text_resource_fetches_whole_and_delivers() {
    let backend = TestBackend::new(scene_content(16), false);
    let mut client = Client::new();

    let loader: Arc<ResourceLoader<Vec<u8>>> = ResourceLoader::new(&LoaderConfig::default());

    let request = ResourceRequest::builder()
        .id("fs")
        .path(backend.url("/shader.glsl"))
        .media_type(MediaType::Text)
        .delegate(client.delegate("fs"))
        .ctx(())
        .build();
    loader.request(request);

    let (label, payload) = client.next_delivery().await;
    assert_eq!(label, "fs");
    assert_eq!(
        String::from_utf8(payload).unwrap(),
        "void main() { gl_FragColor = vec4(1.0); }"
    );
}

#[tokio::test]
async fn missing_resource_reports_not_found() {
    let backend = TestBackend::new(scene_content(16), false);
    let mut client = Client::new();

    let loader: Arc<ResourceLoader<Vec<u8>>> = ResourceLoader::new(&LoaderConfig::default());

    let request = ResourceRequest::builder()
        .id("ghost")
        .path(backend.url("/missing.bin"))
        .media_type(MediaType::Binary)
        .delegate(client.delegate("ghost"))
        .ctx(())
        .build();
    loader.request(request);

    let (label, message) = client.next_error().await;
    assert_eq!(label, "ghost");
    assert!(message.contains("not found"), "unexpected error: {message}");
    wait_for_idle(&loader).await;
}

#[tokio::test]
async fn cached_resource_serves_without_a_second_fetch() {
    let content = scene_content(64);
    let backend = TestBackend::new(content.clone(), false);
    let mut client = Client::new();

    let loader: Arc<ResourceLoader<Vec<u8>>> = ResourceLoader::new(&LoaderConfig::default());

    assert!(loader.request(client.ranged(&backend, "a", 0, 16)).is_none());
    client.next_delivery().await;
    assert_eq!(backend.hits(), 1);

    let hit = loader
        .request(client.ranged(&backend, "a", 0, 16))
        .expect("cache hit");
    assert_eq!(hit.as_slice(), &content[0..16]);
    assert_eq!(backend.hits(), 1);

    // clearing the cache forces a fresh fetch
    loader.remove_all_resources();
    assert!(loader.request(client.ranged(&backend, "a", 0, 16)).is_none());
    client.next_delivery().await;
    assert_eq!(backend.hits(), 2);
}

struct ChannelObserver {
    seen: mpsc::UnboundedSender<String>,
}

impl ResourceObserver for ChannelObserver {
    fn resource_available(&self, id: &ResourceId) {
        let _ = self.seen.send(id.to_string());
    }
}

#[tokio::test]
async fn observers_are_notified_after_every_store() {
    let backend = TestBackend::new(scene_content(64), false);
    let mut client = Client::new();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    let loader: Arc<ResourceLoader<Vec<u8>>> = ResourceLoader::new(&LoaderConfig::default());
    loader.add_observer(Arc::new(ChannelObserver { seen: seen_tx }));

    loader.request(client.ranged(&backend, "a", 0, 16));
    client.next_delivery().await;

    let seen = tokio::time::timeout(Duration::from_secs(10), seen_rx.recv())
        .await
        .expect("timed out waiting for observer")
        .expect("observer channel closed");
    assert_eq!(seen, "a");
}
