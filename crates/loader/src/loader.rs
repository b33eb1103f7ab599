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

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use snafu::ensure;
use tracing::{debug, error, warn};

use crate::{
    config::LoaderConfig,
    error::{
        InvalidPathSnafu, InvalidTypeSnafu, LoadError, MissingDescriptionSnafu, ShortPayloadSnafu,
    },
    metrics::{LOADER_CACHE_HITS, LOADER_FETCHES, LOADER_FETCH_ERRORS},
    scheduler::{Admission, FetchWork, SchedulerCore},
    transport::{HttpTransport, Transport},
    types::{ByteRange, MediaType, ResourceId, ResourceObserver, ResourceRequest},
};

/// Loads scene assets over HTTP, deduplicating identical requests, batching
/// adjacent byte-range requests into single transfers, and capping the
/// number of simultaneous transfers.
///
/// One instance owns its whole scheduling state (status table, pending
/// tree, cache, in-flight counter); independent loaders do not interfere.
/// All scheduling decisions are serialized behind a single mutex, while the
/// transfers themselves run concurrently on spawned tasks. Delegate and
/// observer callbacks are always invoked outside that mutex, so callbacks
/// may issue further requests.
pub struct ResourceLoader<R, C = ()> {
    state:     Mutex<SchedulerCore<R, C>>,
    observers: Mutex<Vec<Arc<dyn ResourceObserver>>>,
    transport: Arc<dyn Transport>,
}

impl<R, C> ResourceLoader<R, C>
where
    R: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    /// Create a loader with the default HTTP transport
    #[must_use]
    pub fn new(config: &LoaderConfig) -> Arc<Self> {
        Self::with_transport(config, Arc::new(HttpTransport::new(config)))
    }

    /// Create a loader with a custom transport
    #[must_use]
    pub fn with_transport(config: &LoaderConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            state:     Mutex::new(SchedulerCore::new(
                config.max_concurrent_fetches,
                config.max_batch_size,
            )),
            observers: Mutex::new(Vec::new()),
            transport,
        })
    }

    /// Request a resource.
    ///
    /// A cache hit returns the converted resource synchronously and nothing
    /// else happens. Otherwise the request is admitted: dispatched to the
    /// transport when a concurrency slot is free, folded into the pending
    /// batch tree when the loader is at capacity, or dropped when a fetch
    /// for the same id is already in flight. Delivery and errors arrive
    /// through the request's delegate.
    ///
    /// Must be called from within a tokio runtime; dispatched fetches run
    /// on spawned tasks.
    pub fn request(self: &Arc<Self>, request: ResourceRequest<R, C>) -> Option<Arc<R>> {
        if let Err(err) = Self::validate(&request) {
            request.delegate.handle_error(&err);
            return None;
        }

        let delegate = Arc::clone(&request.delegate);
        let admission = {
            let mut state = self.lock_state();
            if let Some(resource) = state.cached(&request.id) {
                LOADER_CACHE_HITS.inc();
                return Some(resource);
            }
            state.admit(FetchWork::Single(request))
        };

        match admission {
            Ok(Admission::Dispatch(work)) => self.dispatch(work),
            Ok(Admission::Queued | Admission::AlreadyLoading) => {}
            Err(err) => {
                error!(%err, "request rejected");
                delegate.handle_error(&err);
            }
        }
        None
    }

    /// Converted resource for `id`, if it has been cached
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<Arc<R>> { self.lock_state().cached(id) }

    /// Drop every cached resource. In-flight and queued work is untouched;
    /// previously cached ids fetch again on their next request.
    pub fn remove_all_resources(&self) { self.lock_state().remove_all_resources(); }

    pub fn add_observer(&self, observer: Arc<dyn ResourceObserver>) {
        self.lock_observers().push(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn ResourceObserver>) {
        self.lock_observers()
            .retain(|existing| !Arc::ptr_eq(existing, observer));
    }

    /// Number of physical fetches currently in flight
    #[must_use]
    pub fn in_flight(&self) -> usize { self.lock_state().in_flight() }

    /// Number of batches waiting for a concurrency slot
    #[must_use]
    pub fn pending_batches(&self) -> usize { self.lock_state().pending_batches() }

    /// Byte ranges of the queued batches in ascending order, capped at
    /// `limit` entries. Diagnostic aid only.
    #[must_use]
    pub fn pending_ranges(&self, limit: usize) -> Vec<ByteRange> {
        self.lock_state().pending_ranges(limit)
    }

    fn dispatch(self: &Arc<Self>, work: FetchWork<R, C>) {
        let media = work.media_type().to_string();
        LOADER_FETCHES.with_label_values(&[media.as_str()]).inc();
        debug!(id = %work.id(), path = work.path(), range = ?work.range(), "dispatching fetch");

        let this = Arc::clone(self);
        let transport = Arc::clone(&self.transport);
        let path = work.path().to_string();
        let media_type = work.media_type();
        let range = work.range();

        tokio::spawn(async move {
            match transport.fetch(&path, media_type, range).await {
                Ok(payload) => this.complete_fetch(work, &payload),
                Err(err) => this.fail_fetch(work, &err),
            }
        });
    }

    /// Deliver a finished fetch: one cache store, delegate callback and
    /// observer notification per member, then release the slot and drain.
    fn complete_fetch(self: &Arc<Self>, work: FetchWork<R, C>, payload: &Bytes) {
        let batch_start = work.range().map_or(0, |range| range.start);
        if let Some(range) = work.range()
            && (payload.len() as u64) < range.len()
        {
            let err = ShortPayloadSnafu {
                expected: range.len(),
                actual:   payload.len() as u64,
            }
            .build();
            self.fail_fetch(work, &err);
            return;
        }

        for member in work.into_members() {
            // slice boundaries are the member's range relative to the batch
            // start
            let slice = match member.byte_range {
                Some(range) => payload.slice(
                    usize::try_from(range.start - batch_start).unwrap_or(usize::MAX)
                        ..usize::try_from(range.end - batch_start).unwrap_or(usize::MAX),
                ),
                None => payload.clone(),
            };

            match member.delegate.convert(slice, &member.ctx) {
                Ok(resource) => {
                    let resource = Arc::new(resource);
                    {
                        let mut state = self.lock_state();
                        state.store(&member.id, Arc::clone(&resource));
                        state.finish_member(&member.id);
                    }
                    member.delegate.resource_available(resource, &member.ctx);
                    self.notify_observers(&member.id);
                }
                Err(err) => {
                    warn!(id = %member.id, %err, "conversion failed");
                    self.lock_state().finish_member(&member.id);
                    member.delegate.handle_error(&err);
                }
            }
        }

        self.release_slot_and_drain();
    }

    /// Forward a transport failure to every member's delegate. The whole
    /// batch fails; there is no partial-success modeling and no retry here.
    /// The slot is still released exactly once.
    fn fail_fetch(self: &Arc<Self>, work: FetchWork<R, C>, err: &LoadError) {
        LOADER_FETCH_ERRORS.inc();
        warn!(id = %work.id(), %err, "fetch failed");

        let members = work.into_members();
        {
            let mut state = self.lock_state();
            for member in &members {
                state.finish_member(&member.id);
            }
        }
        for member in &members {
            member.delegate.handle_error(err);
        }

        self.release_slot_and_drain();
    }

    fn release_slot_and_drain(self: &Arc<Self>) {
        let ready = {
            let mut state = self.lock_state();
            state.finish_fetch();
            let mut ready = Vec::new();
            while let Some(work) = state.next_pending() {
                ready.push(work);
            }
            ready
        };
        for work in ready {
            self.dispatch(work);
        }
    }

    fn notify_observers(&self, id: &ResourceId) {
        let observers = self.lock_observers().clone();
        for observer in observers {
            observer.resource_available(id);
        }
    }

    /// Reject malformed requests before any state is touched
    fn validate(request: &ResourceRequest<R, C>) -> Result<(), LoadError> {
        ensure!(!request.id.is_empty(), MissingDescriptionSnafu);
        ensure!(
            !request.path.is_empty(),
            InvalidPathSnafu {
                path: &request.path,
            }
        );
        if let Some(range) = request.byte_range {
            ensure!(
                !range.is_empty(),
                InvalidTypeSnafu {
                    reason: "byte range is empty",
                }
            );
            ensure!(
                request.media_type == MediaType::Binary,
                InvalidTypeSnafu {
                    reason: "byte ranges only apply to binary resources",
                }
            );
        }
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerCore<R, C>> {
        self.state.lock().expect("scheduler state lock poisoned")
    }

    fn lock_observers(&self) -> MutexGuard<'_, Vec<Arc<dyn ResourceObserver>>> {
        self.observers.lock().expect("observer list lock poisoned")
    }
}
