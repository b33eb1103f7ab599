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

use std::{collections::HashMap, fmt, sync::Arc};

use tracing::{debug, warn};

use crate::{
    batch::RangeBatch,
    error::LoadError,
    metrics::{LOADER_BATCHES_MERGED, LOADER_IN_FLIGHT, LOADER_QUEUED_BATCHES},
    tree::{NodeId, RequestTree},
    types::{ByteRange, MediaType, ResourceId, ResourceRequest},
};

/// A unit of dispatchable work: one original request, or a coalesced batch
/// promoted from the pending tree.
pub(crate) enum FetchWork<R, C> {
    Single(ResourceRequest<R, C>),
    Batch(RangeBatch<R, C>),
}

impl<R, C> FetchWork<R, C> {
    pub(crate) fn id(&self) -> &ResourceId {
        match self {
            Self::Single(request) => &request.id,
            Self::Batch(batch) => batch.id(),
        }
    }

    pub(crate) fn path(&self) -> &str {
        match self {
            Self::Single(request) => &request.path,
            Self::Batch(batch) => batch.path(),
        }
    }

    pub(crate) fn media_type(&self) -> MediaType {
        match self {
            Self::Single(request) => request.media_type,
            Self::Batch(batch) => batch.media_type(),
        }
    }

    pub(crate) fn range(&self) -> Option<ByteRange> {
        match self {
            Self::Single(request) => request.byte_range,
            Self::Batch(batch) => Some(batch.range()),
        }
    }

    pub(crate) fn members(&self) -> &[ResourceRequest<R, C>] {
        match self {
            Self::Single(request) => std::slice::from_ref(request),
            Self::Batch(batch) => batch.members(),
        }
    }

    pub(crate) fn into_members(self) -> Vec<ResourceRequest<R, C>> {
        match self {
            Self::Single(request) => vec![request],
            Self::Batch(batch) => batch.into_members(),
        }
    }

    /// Batchable work is a binary request with a byte range (or an existing
    /// batch); everything else fetches whole resources and never merges.
    fn batchable(work: Self) -> Result<RangeBatch<R, C>, Self> {
        match work {
            Self::Batch(batch) => Ok(batch),
            Self::Single(request) => {
                if request.media_type == MediaType::Binary
                    && let Some(range) = request.byte_range
                {
                    Ok(RangeBatch::new(range, request))
                } else {
                    Err(Self::Single(request))
                }
            }
        }
    }
}

impl<R, C> fmt::Debug for FetchWork<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchWork")
            .field("id", self.id())
            .field("range", &self.range())
            .field("members", &self.members().len())
            .finish()
    }
}

/// Outcome of admitting a piece of work
#[derive(Debug)]
pub(crate) enum Admission<R, C> {
    /// A concurrency slot was claimed; hand the work to the transport
    Dispatch(FetchWork<R, C>),
    /// Backlogged into the pending tree (or already there)
    Queued,
    /// A fetch for this id is already in flight; the duplicate is dropped
    AlreadyLoading,
}

enum ResourceStatus {
    Queued { node: NodeId },
    Loading,
}

/// Synchronous scheduling core: status table, resource cache, pending tree
/// and the in-flight counter.
///
/// Holds no I/O. The loader drives it under a single mutex, so no two
/// scheduling decisions ever interleave. The in-flight counter moves once
/// per physical fetch: one increment on dispatch, one decrement on
/// completion or failure, regardless of how many members the fetch carried.
pub(crate) struct SchedulerCore<R, C> {
    statuses:       HashMap<ResourceId, ResourceStatus>,
    cache:          HashMap<ResourceId, Arc<R>>,
    tree:           RequestTree<R, C>,
    in_flight:      usize,
    limit:          usize,
    max_batch_size: u64,
}

impl<R, C> SchedulerCore<R, C> {
    pub(crate) fn new(limit: usize, max_batch_size: u64) -> Self {
        Self {
            statuses: HashMap::new(),
            cache: HashMap::new(),
            tree: RequestTree::new(),
            in_flight: 0,
            limit,
            max_batch_size,
        }
    }

    /// Decide what happens to `work`: dispatch, queue, or drop as a
    /// duplicate.
    ///
    /// Over capacity, batchable work folds into the pending tree; whole-
    /// resource and text requests bypass admission so the backlog cannot
    /// starve them. Under capacity, work that was queued is promoted; the
    /// tree node's batch may have merged and grown since it was queued, and
    /// supersedes the incoming duplicate.
    pub(crate) fn admit(&mut self, work: FetchWork<R, C>) -> Result<Admission<R, C>, LoadError> {
        let status = self.statuses.get(work.id());
        if matches!(status, Some(ResourceStatus::Loading)) {
            return Ok(Admission::AlreadyLoading);
        }
        let queued = match status {
            Some(ResourceStatus::Queued { node }) => Some(*node),
            _ => None,
        };

        let work = if self.in_flight >= self.limit {
            if queued.is_some() {
                // already backlogged; it will be promoted when a slot frees
                return Ok(Admission::Queued);
            }
            match FetchWork::batchable(work) {
                Ok(batch) => {
                    let incoming = batch.members().len();
                    let node = self.tree.insert(batch, self.max_batch_size)?;
                    debug_assert!(self.tree.is_consistent(50), "pending ranges out of order");
                    if self.tree.batch(node).members().len() > incoming {
                        LOADER_BATCHES_MERGED.inc();
                    }
                    self.mark_queued(node);
                    LOADER_QUEUED_BATCHES.set(self.tree.len() as i64);
                    debug!(pending = self.tree.len(), "over capacity, request queued");
                    return Ok(Admission::Queued);
                }
                Err(work) => work,
            }
        } else if let Some(node) = queued {
            let batch = self.tree.remove(node);
            LOADER_QUEUED_BATCHES.set(self.tree.len() as i64);
            FetchWork::Batch(batch)
        } else {
            work
        };

        self.mark_loading(&work);
        self.in_flight += 1;
        LOADER_IN_FLIGHT.set(self.in_flight as i64);
        Ok(Admission::Dispatch(work))
    }

    /// Drain step: promote the root batch when a slot is free.
    ///
    /// Root-first, not FIFO: a newly merged root may leapfrog older but
    /// smaller queued batches.
    pub(crate) fn next_pending(&mut self) -> Option<FetchWork<R, C>> {
        if self.in_flight >= self.limit {
            return None;
        }
        let root = self.tree.root()?;
        let batch = self.tree.remove(root);
        LOADER_QUEUED_BATCHES.set(self.tree.len() as i64);

        let work = FetchWork::Batch(batch);
        self.mark_loading(&work);
        self.in_flight += 1;
        LOADER_IN_FLIGHT.set(self.in_flight as i64);
        debug!(work = ?work, "promoted pending batch");
        Some(work)
    }

    pub(crate) fn cached(&self, id: &ResourceId) -> Option<Arc<R>> {
        self.cache.get(id).cloned()
    }

    /// Store a converted resource. Later stores overwrite with a warning,
    /// never an error.
    pub(crate) fn store(&mut self, id: &ResourceId, resource: Arc<R>) {
        if self.cache.insert(id.clone(), resource).is_some() {
            warn!(%id, "resource is already stored, overriding");
        }
    }

    /// Clear the status entry once a member has been delivered or failed
    pub(crate) fn finish_member(&mut self, id: &ResourceId) {
        self.statuses.remove(id);
    }

    /// Release the concurrency slot of one physical fetch
    pub(crate) fn finish_fetch(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        LOADER_IN_FLIGHT.set(self.in_flight as i64);
    }

    /// Drop every cached resource. Statuses and pending work are untouched;
    /// previously cached ids will fetch again on their next request.
    pub(crate) fn remove_all_resources(&mut self) {
        self.cache.clear();
    }

    pub(crate) const fn in_flight(&self) -> usize { self.in_flight }

    pub(crate) const fn pending_batches(&self) -> usize { self.tree.len() }

    /// In-order pending ranges, capped at `limit` entries (diagnostics)
    pub(crate) fn pending_ranges(&self, limit: usize) -> Vec<ByteRange> {
        self.tree.in_order_ranges(limit)
    }

    fn mark_queued(&mut self, node: NodeId) {
        // re-point every member of the absorbing node; merges may have
        // collapsed nodes other statuses referred to
        let ids: Vec<ResourceId> = self
            .tree
            .batch(node)
            .members()
            .iter()
            .map(|member| member.id.clone())
            .collect();
        for id in ids {
            self.statuses.insert(id, ResourceStatus::Queued { node });
        }
    }

    fn mark_loading(&mut self, work: &FetchWork<R, C>) {
        for member in work.members() {
            self.statuses
                .insert(member.id.clone(), ResourceStatus::Loading);
        }
    }
}
