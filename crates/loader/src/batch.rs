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

use std::fmt;

use crate::types::{ByteRange, MediaType, ResourceId, ResourceRequest};

/// An ordered set of byte-range requests whose ranges form one contiguous
/// span, fetched as a single transfer.
///
/// Members read in ascending byte order and exactly cover `range` with no
/// gaps or overlaps. The batch id is the first member's id. Merging only
/// happens between batches of the same media type whose ranges are exactly
/// adjacent, and never grows a batch past the configured size cap.
pub struct RangeBatch<R, C> {
    range:   ByteRange,
    members: Vec<ResourceRequest<R, C>>,
}

impl<R, C> RangeBatch<R, C> {
    /// Build a batch around a single ranged request.
    ///
    /// `range` must be the request's own byte range; callers extract it when
    /// deciding that the request is batchable.
    pub fn new(range: ByteRange, request: ResourceRequest<R, C>) -> Self {
        Self {
            range,
            members: vec![request],
        }
    }

    #[must_use]
    pub fn range(&self) -> ByteRange { self.range }

    /// Id of the first member, used as the batch id in the status table
    #[must_use]
    pub fn id(&self) -> &ResourceId { &self.members[0].id }

    #[must_use]
    pub fn path(&self) -> &str { &self.members[0].path }

    #[must_use]
    pub fn media_type(&self) -> MediaType { self.members[0].media_type }

    #[must_use]
    pub fn members(&self) -> &[ResourceRequest<R, C>] { &self.members }

    #[must_use]
    pub fn into_members(self) -> Vec<ResourceRequest<R, C>> { self.members }

    /// True iff `other` can fold into this batch: same resource path and
    /// media type, combined size within `cap`, and exactly one boundary
    /// coincides.
    #[must_use]
    pub fn can_merge(&self, other: &Self, cap: u64) -> bool {
        self.media_type() == other.media_type()
            && self.path() == other.path()
            && self.range.len() + other.range.len() <= cap
            && (other.range.start == self.range.end || other.range.end == self.range.start)
    }

    /// Fold a single adjacent request into the batch, extending the span.
    ///
    /// The request must touch the batch at exactly one end; anything else is
    /// a caller contract violation and the request is dropped in release
    /// builds.
    pub fn merge_request(&mut self, request: ResourceRequest<R, C>) {
        let Some(range) = request.byte_range else {
            debug_assert!(false, "unranged request merged into batch");
            return;
        };

        if range.start == self.range.end {
            self.members.push(request);
            self.range.end = range.end;
        } else if range.end == self.range.start {
            self.members.insert(0, request);
            self.range.start = range.start;
        } else {
            debug_assert!(false, "non-adjacent request merged into batch");
        }
    }

    /// Fold a whole adjacent batch, one member at a time, in the direction
    /// that keeps `members` in ascending byte order: prepending walks the
    /// other batch in reverse, appending walks it forward.
    pub fn merge_batch(&mut self, other: Self) {
        if other.range.end == self.range.start {
            for request in other.members.into_iter().rev() {
                self.merge_request(request);
            }
        } else {
            for request in other.members {
                self.merge_request(request);
            }
        }
    }
}

impl<R, C> fmt::Debug for RangeBatch<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeBatch")
            .field("range", &self.range)
            .field("members", &self.members.len())
            .finish()
    }
}
