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

use crate::{
    batch::RangeBatch,
    error::{LoadError, OverlappingRangesSnafu},
    types::ByteRange,
};

/// Index into the tree's node arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(usize);

struct Node<R, C> {
    batch:  RangeBatch<R, C>,
    parent: Option<NodeId>,
    left:   Option<NodeId>,
    right:  Option<NodeId>,
}

/// Binary search tree over disjoint byte ranges, one pending batch per node.
///
/// Nodes live in a Vec arena with a free list and refer to each other by
/// index; parent links are navigation aids, ownership is the arena's. The
/// tree is unbalanced; worst-case depth is unbounded, but pending-request
/// backlogs are small and short-lived. A `NodeId` stays valid for as long
/// as its batch is in the tree: removal transplants nodes structurally
/// instead of moving batches between slots, so external references to
/// surviving nodes never dangle.
pub(crate) struct RequestTree<R, C> {
    nodes: Vec<Option<Node<R, C>>>,
    free:  Vec<usize>,
    root:  Option<NodeId>,
    len:   usize,
}

impl<R, C> RequestTree<R, C> {
    pub(crate) const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free:  Vec::new(),
            root:  None,
            len:   0,
        }
    }

    pub(crate) const fn root(&self) -> Option<NodeId> { self.root }

    /// Number of pending batches
    pub(crate) const fn len(&self) -> usize { self.len }

    pub(crate) fn batch(&self, id: NodeId) -> &RangeBatch<R, C> { &self.node(id).batch }

    /// Insert `batch`, merging it into an existing node when their ranges
    /// touch and the size cap allows.
    ///
    /// On an exact touch the receiving node absorbs the batch, then
    /// opportunistically absorbs its adjacent direct child (left when merged
    /// at the start, right when merged at the end) and finally folds itself
    /// into its parent, each step gated by `cap`. Returns the id of the node
    /// that ends up holding the members. Ranges that overlap without
    /// touching are a contract violation and fail before any mutation.
    pub(crate) fn insert(
        &mut self,
        batch: RangeBatch<R, C>,
        cap: u64,
    ) -> Result<NodeId, LoadError> {
        let Some(mut cur) = self.root else {
            let id = self.alloc(batch, None);
            self.root = Some(id);
            return Ok(id);
        };

        loop {
            let node_range = self.node(cur).batch.range();
            let incoming = batch.range();

            if incoming.end <= node_range.start {
                if incoming.end == node_range.start && self.node(cur).batch.can_merge(&batch, cap)
                {
                    self.node_mut(cur).batch.merge_batch(batch);
                    return Ok(self.absorb_neighbors(cur, Side::Start, cap));
                }
                match self.node(cur).left {
                    Some(left) => cur = left,
                    None => {
                        let id = self.alloc(batch, Some(cur));
                        self.node_mut(cur).left = Some(id);
                        return Ok(id);
                    }
                }
            } else if incoming.start >= node_range.end {
                if incoming.start == node_range.end && self.node(cur).batch.can_merge(&batch, cap)
                {
                    self.node_mut(cur).batch.merge_batch(batch);
                    return Ok(self.absorb_neighbors(cur, Side::End, cap));
                }
                match self.node(cur).right {
                    Some(right) => cur = right,
                    None => {
                        let id = self.alloc(batch, Some(cur));
                        self.node_mut(cur).right = Some(id);
                        return Ok(id);
                    }
                }
            } else {
                return OverlappingRangesSnafu {
                    first:  node_range,
                    second: incoming,
                }
                .fail();
            }
        }
    }

    /// Remove a node, returning its batch.
    ///
    /// Two children: the in-order successor node is transplanted into the
    /// removed node's structural position. One or zero children: the child
    /// (or nothing) is promoted into the parent's slot. Removing the root
    /// updates the tree's root reference.
    pub(crate) fn remove(&mut self, id: NodeId) -> RangeBatch<R, C> {
        let (left, right) = {
            let node = self.node(id);
            (node.left, node.right)
        };

        match (left, right) {
            (Some(left), Some(right)) => {
                let successor = self.min_of(right);
                if successor != right {
                    // splice the successor out of its old spot; it has no
                    // left child by construction
                    let successor_right = self.node(successor).right;
                    self.replace_in_parent(successor, successor_right);
                    self.node_mut(successor).right = Some(right);
                    self.node_mut(right).parent = Some(successor);
                }
                self.node_mut(successor).left = Some(left);
                self.node_mut(left).parent = Some(successor);
                self.replace_in_parent(id, Some(successor));
            }
            (Some(child), None) | (None, Some(child)) => {
                self.replace_in_parent(id, Some(child));
            }
            (None, None) => {
                self.replace_in_parent(id, None);
            }
        }

        self.release(id).batch
    }

    /// Leftmost descendant of `id` (smallest range in its subtree)
    pub(crate) fn min_of(&self, id: NodeId) -> NodeId {
        let mut cur = id;
        while let Some(left) = self.node(cur).left {
            cur = left;
        }
        cur
    }

    /// In-order ranges, capped at `limit` entries.
    ///
    /// Diagnostic traversal only; the cap keeps output bounded on
    /// pathological trees.
    pub(crate) fn in_order_ranges(&self, limit: usize) -> Vec<ByteRange> {
        let mut out = Vec::new();
        let mut stack = Vec::new();
        let mut cur = self.root;

        while (cur.is_some() || !stack.is_empty()) && out.len() < limit {
            while let Some(id) = cur {
                stack.push(id);
                cur = self.node(id).left;
            }
            let Some(id) = stack.pop() else { break };
            out.push(self.node(id).batch.range());
            cur = self.node(id).right;
        }

        out
    }

    /// True when the first `limit` in-order ranges are strictly increasing
    /// and pairwise disjoint. Debug aid, not a correctness dependency.
    pub(crate) fn is_consistent(&self, limit: usize) -> bool {
        self.in_order_ranges(limit)
            .windows(2)
            .all(|pair| pair[0].end <= pair[1].start)
    }

    /// After a touch-merge at `side` of `cur`: absorb the adjacent direct
    /// child if it is now contiguous and within the cap, then fold `cur`
    /// into its parent under the same conditions. Returns the surviving
    /// node.
    fn absorb_neighbors(&mut self, cur: NodeId, side: Side, cap: u64) -> NodeId {
        let child = match side {
            Side::Start => self.node(cur).left,
            Side::End => self.node(cur).right,
        };
        if let Some(child) = child
            && self.node(cur).batch.can_merge(&self.node(child).batch, cap)
        {
            let absorbed = self.remove(child);
            self.node_mut(cur).batch.merge_batch(absorbed);
        }

        if let Some(parent) = self.node(cur).parent
            && self
                .node(parent)
                .batch
                .can_merge(&self.node(cur).batch, cap)
        {
            let absorbed = self.remove(cur);
            self.node_mut(parent).batch.merge_batch(absorbed);
            return parent;
        }

        cur
    }

    /// Point `id`'s parent slot (or the root) at `replacement`, fixing the
    /// replacement's parent back-reference.
    fn replace_in_parent(&mut self, id: NodeId, replacement: Option<NodeId>) {
        let parent = self.node(id).parent;
        match parent {
            Some(parent_id) => {
                let slot = self.node_mut(parent_id);
                if slot.left == Some(id) {
                    slot.left = replacement;
                } else {
                    slot.right = replacement;
                }
            }
            None => self.root = replacement,
        }
        if let Some(new_id) = replacement {
            self.node_mut(new_id).parent = parent;
        }
    }

    fn alloc(&mut self, batch: RangeBatch<R, C>, parent: Option<NodeId>) -> NodeId {
        self.len += 1;
        let node = Node {
            batch,
            parent,
            left: None,
            right: None,
        };
        if let Some(index) = self.free.pop() {
            self.nodes[index] = Some(node);
            NodeId(index)
        } else {
            self.nodes.push(Some(node));
            NodeId(self.nodes.len() - 1)
        }
    }

    fn release(&mut self, id: NodeId) -> Node<R, C> {
        self.len -= 1;
        self.free.push(id.0);
        self.nodes[id.0].take().expect("tree node slot is live")
    }

    fn node(&self, id: NodeId) -> &Node<R, C> {
        self.nodes[id.0].as_ref().expect("tree node slot is live")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<R, C> {
        self.nodes[id.0].as_mut().expect("tree node slot is live")
    }
}

#[derive(Clone, Copy)]
enum Side {
    Start,
    End,
}
