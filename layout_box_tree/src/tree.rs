// Copyright 2025 the Layout Arrays Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The quadtree core and its two public flavors.

use alloc::vec::Vec;
use core::fmt;

use layout_geom::{Box, Point};
use smallvec::SmallVec;

use crate::types::QuadId;

/// Below this many items, a node stops splitting and keeps a flat bucket.
const LEAF_CAPACITY: usize = 8;
/// Hard depth cap, guarding against pathological input (e.g. many
/// identical or near-identical boxes) that would otherwise split forever.
const MAX_DEPTH: u32 = 24;

#[derive(Clone)]
struct QuadNode {
    bbox: Box,
    children: [Option<u32>; 4],
    /// Leaf items (if this node has no children) or the oversized bucket
    /// of items that straddle a partition line (if it does).
    items: SmallVec<[u32; 8]>,
}

#[derive(Clone)]
struct Core<T> {
    items: Vec<T>,
    boxes: Vec<Box>,
    nodes: Vec<QuadNode>,
    root: Option<u32>,
}

impl<T> Core<T> {
    const fn new() -> Self {
        Self { items: Vec::new(), boxes: Vec::new(), nodes: Vec::new(), root: None }
    }

    fn insert(&mut self, item: T) {
        self.items.push(item);
        // The index is now stale: a full `rebuild` is required before the
        // next query. Callers (`BoxTree`/`UnstableBoxTree`) enforce this by
        // dropping the cached root on insert.
        self.root = None;
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "item/node counts are capped well under u32::MAX by construction"
    )]
    fn rebuild(&mut self, box_of: impl Fn(&T) -> Box) {
        self.boxes = self.items.iter().map(&box_of).collect();
        self.nodes.clear();
        self.root = None;
        if self.items.is_empty() {
            return;
        }
        let world = self.boxes.iter().fold(Box::EMPTY, |acc, b| acc.united(b));
        let all: Vec<u32> = (0..self.items.len() as u32).collect();
        let root = self.build_node(world, all, 0);
        self.root = Some(root);
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "item/node counts are capped well under u32::MAX by construction"
    )]
    fn build_node(&mut self, bbox: Box, indices: Vec<u32>, depth: u32) -> u32 {
        let node_idx = self.nodes.len() as u32;
        self.nodes.push(QuadNode { bbox, children: [None; 4], items: SmallVec::new() });

        let too_small = bbox.width() < 2 || bbox.height() < 2;
        if indices.len() <= LEAF_CAPACITY || depth >= MAX_DEPTH || too_small {
            self.nodes[node_idx as usize].items = indices.into_iter().collect();
            return node_idx;
        }

        let quadrants = split_quadrants(&bbox);
        let mut buckets: [Vec<u32>; 4] = Default::default();
        let mut oversized: SmallVec<[u32; 8]> = SmallVec::new();

        for idx in indices {
            let b = self.boxes[idx as usize];
            match quadrants.iter().position(|q| contains_box(q, &b)) {
                Some(qi) => buckets[qi].push(idx),
                None => oversized.push(idx),
            }
        }

        self.nodes[node_idx as usize].items = oversized;

        let mut children = [None; 4];
        for (qi, bucket) in buckets.into_iter().enumerate() {
            if !bucket.is_empty() {
                children[qi] = Some(self.build_node(quadrants[qi], bucket, depth + 1));
            }
        }
        self.nodes[node_idx as usize].children = children;
        node_idx
    }
}

/// Splits `bbox` into four half-open quadrants (SW, SE, NW, NE) around its
/// midpoint. Degenerate (empty) input yields four copies of the empty box.
fn split_quadrants(bbox: &Box) -> [Box; 4] {
    if bbox.is_empty() {
        return [Box::EMPTY; 4];
    }
    let mid_x = bbox.p1().x + bbox.width() / 2;
    let mid_y = bbox.p1().y + bbox.height() / 2;
    [
        Box::new(Point::new(bbox.p1().x, bbox.p1().y), Point::new(mid_x, mid_y)),
        Box::new(Point::new(mid_x, bbox.p1().y), Point::new(bbox.p2().x, mid_y)),
        Box::new(Point::new(bbox.p1().x, mid_y), Point::new(mid_x, bbox.p2().y)),
        Box::new(Point::new(mid_x, mid_y), Point::new(bbox.p2().x, bbox.p2().y)),
    ]
}

/// Whether `container` fully encloses `b` (both half-open). A box that
/// straddles a midline satisfies this for no quadrant and falls to the
/// parent's oversized bucket.
fn contains_box(container: &Box, b: &Box) -> bool {
    b.p1().x >= container.p1().x
        && b.p2().x <= container.p2().x
        && b.p1().y >= container.p1().y
        && b.p2().y <= container.p2().y
}

/// A quadtree spatial index whose flat iteration order matches insertion
/// order, stable across repeated [`BoxTree::sort`] calls.
#[derive(Clone)]
pub struct BoxTree<T> {
    core: Core<T>,
}

impl<T> Default for BoxTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for BoxTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxTree")
            .field("len", &self.core.items.len())
            .field("nodes", &self.core.nodes.len())
            .field("sorted", &self.core.root.is_some())
            .finish()
    }
}

impl<T> BoxTree<T> {
    /// Creates an empty tree.
    #[must_use]
    pub const fn new() -> Self {
        Self { core: Core::new() }
    }

    /// Appends an item. The tree must be [`BoxTree::sort`]ed again before
    /// [`BoxTree::touching`] reflects it.
    pub fn insert(&mut self, item: T) {
        self.core.insert(item);
    }

    /// Number of items currently held (inserted, whether or not sorted).
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.items.len()
    }

    /// Whether the tree holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.items.is_empty()
    }

    /// (Re)builds the quad index from the current items, using `box_of` to
    /// get each item's box. Item order (and thus flat iteration order) is
    /// unchanged.
    pub fn sort(&mut self, box_of: impl Fn(&T) -> Box) {
        self.core.rebuild(box_of);
    }

    /// Flat iteration over all items, in insertion order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { items: self.core.items.iter() }
    }

    /// Iterates items whose box touches `query`, possibly with false
    /// positives contributed by ancestor quads' oversized buckets.
    /// [`BoxTree::sort`] must have been called since the last insert, or
    /// this returns an empty iterator.
    #[must_use]
    pub fn touching(&self, query: Box) -> TouchingIter<'_, T> {
        TouchingIter::new(&self.core, query)
    }
}

/// A quadtree spatial index whose [`UnstableBoxTree::sort`] additionally
/// permutes the backing storage into tree-traversal order for locality.
/// Any flat index observed before a `sort` may no longer refer to the same
/// item afterward.
pub struct UnstableBoxTree<T> {
    core: Core<T>,
}

impl<T> Default for UnstableBoxTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for UnstableBoxTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnstableBoxTree")
            .field("len", &self.core.items.len())
            .field("nodes", &self.core.nodes.len())
            .field("sorted", &self.core.root.is_some())
            .finish()
    }
}

impl<T> UnstableBoxTree<T> {
    /// Creates an empty tree.
    #[must_use]
    pub const fn new() -> Self {
        Self { core: Core::new() }
    }

    /// Appends an item; see [`BoxTree::insert`].
    pub fn insert(&mut self, item: T) {
        self.core.insert(item);
    }

    /// Number of items currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.items.len()
    }

    /// Whether the tree holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.items.is_empty()
    }

    /// (Re)builds the quad index and reorders the backing storage into
    /// tree-traversal (preorder) order.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "item counts are capped well under u32::MAX by construction"
    )]
    pub fn sort(&mut self, box_of: impl Fn(&T) -> Box) {
        self.core.rebuild(&box_of);
        let Some(root) = self.core.root else { return };

        let mut new_order = Vec::with_capacity(self.core.items.len());
        collect_preorder(&self.core.nodes, root, &mut new_order);
        debug_assert_eq!(new_order.len(), self.core.items.len(), "preorder must visit every item exactly once");

        // old_index -> new_index, used to remap node item lists below.
        let mut remap = alloc::vec![0u32; new_order.len()];
        for (new_idx, &old_idx) in new_order.iter().enumerate() {
            remap[old_idx as usize] = new_idx as u32;
        }

        let old_items = core::mem::take(&mut self.core.items);
        let mut old_items: Vec<Option<T>> = old_items.into_iter().map(Some).collect();
        let mut reordered_items = Vec::with_capacity(new_order.len());
        let mut reordered_boxes = Vec::with_capacity(new_order.len());
        for &old_idx in &new_order {
            reordered_items.push(
                old_items[old_idx as usize]
                    .take()
                    .expect("box tree invariant violated: preorder index used twice"),
            );
            reordered_boxes.push(self.core.boxes[old_idx as usize]);
        }
        self.core.items = reordered_items;
        self.core.boxes = reordered_boxes;

        for node in &mut self.core.nodes {
            for idx in &mut node.items {
                *idx = remap[*idx as usize];
            }
        }
    }

    /// Flat iteration over all items, in current (post-sort) storage order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { items: self.core.items.iter() }
    }

    /// Iterates items whose box touches `query`; see [`BoxTree::touching`].
    #[must_use]
    pub fn touching(&self, query: Box) -> TouchingIter<'_, T> {
        TouchingIter::new(&self.core, query)
    }
}

fn collect_preorder(nodes: &[QuadNode], node_idx: u32, out: &mut Vec<u32>) {
    let node = &nodes[node_idx as usize];
    out.extend_from_slice(&node.items);
    for child in node.children.into_iter().flatten() {
        collect_preorder(nodes, child, out);
    }
}

/// Flat iterator over a tree's items, in storage order. Never traverses
/// quad structure; [`Iter::quad_id`]-style introspection does not apply
/// (quad id is always [`QuadId::NONE`] from this iterator's perspective).
#[derive(Clone)]
pub struct Iter<'a, T> {
    items: core::slice::Iter<'a, T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

struct Frame {
    node_idx: u32,
    item_cursor: usize,
    child_cursor: u8,
}

/// Iterator over items whose box touches a query box.
///
/// Beyond [`Iterator`], it exposes [`TouchingIter::quad_id`] (the quad the
/// last-yielded item came from), [`TouchingIter::quad_box`] (that quad's
/// bbox), and [`TouchingIter::skip_quad`] (abandon the rest of the current
/// quad, including any unexplored children — an optimization for callers
/// whose own predicate can short-circuit an entire quad at once).
pub struct TouchingIter<'a, T> {
    core: &'a Core<T>,
    query: Box,
    stack: Vec<Frame>,
    current_quad: QuadId,
    last_yield_frame: Option<usize>,
}

impl<'a, T> TouchingIter<'a, T> {
    fn new(core: &'a Core<T>, query: Box) -> Self {
        let mut stack = Vec::new();
        if !query.is_empty() {
            if let Some(root) = core.root {
                if core.nodes[root as usize].bbox.touches(&query) {
                    stack.push(Frame { node_idx: root, item_cursor: 0, child_cursor: 0 });
                }
            }
        }
        Self { core, query, stack, current_quad: QuadId::NONE, last_yield_frame: None }
    }

    /// The quad the most recently yielded item belongs to; [`QuadId::NONE`]
    /// before the first successful `next()`.
    #[must_use]
    pub fn quad_id(&self) -> QuadId {
        self.current_quad
    }

    /// The bbox of [`TouchingIter::quad_id`]'s quad, or the world box if
    /// there is no current quad.
    #[must_use]
    pub fn quad_box(&self) -> Box {
        match self.current_quad.node_index() {
            Some(idx) => self.core.nodes[idx].bbox,
            None => Box::world(),
        }
    }

    /// Abandons the remaining items and any unexplored children of the
    /// current quad. A no-op if called before the first `next()`.
    pub fn skip_quad(&mut self) {
        if let Some(frame_idx) = self.last_yield_frame.take() {
            self.stack.truncate(frame_idx);
        }
    }
}

impl<'a, T> Iterator for TouchingIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.len().checked_sub(1)?;
            let node_idx = self.stack[top].node_idx;
            let node = &self.core.nodes[node_idx as usize];

            if self.stack[top].item_cursor < node.items.len() {
                let item_idx = node.items[self.stack[top].item_cursor] as usize;
                self.stack[top].item_cursor += 1;
                if !self.core.boxes[item_idx].touches(&self.query) {
                    continue;
                }
                self.last_yield_frame = Some(top);
                self.current_quad = QuadId::from_node_index(node_idx as usize);
                return Some(&self.core.items[item_idx]);
            }

            if (self.stack[top].child_cursor as usize) < 4 {
                let ci = self.stack[top].child_cursor as usize;
                self.stack[top].child_cursor += 1;
                if let Some(child_idx) = node.children[ci] {
                    let child = &self.core.nodes[child_idx as usize];
                    if child.bbox.touches(&self.query) {
                        self.stack.push(Frame { node_idx: child_idx, item_cursor: 0, child_cursor: 0 });
                    }
                }
                continue;
            }

            self.stack.pop();
            if self.last_yield_frame == Some(top) {
                self.last_yield_frame = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layout_geom::Point;

    fn b(x0: i64, y0: i64, x1: i64, y1: i64) -> Box {
        Box::new(Point::new(x0, y0), Point::new(x1, y1))
    }

    #[test]
    fn flat_iteration_matches_insertion_order() {
        let mut tree: BoxTree<i32> = BoxTree::new();
        for i in 0..20 {
            tree.insert(i);
        }
        tree.sort(|&i| b(i as i64, i as i64, i as i64 + 1, i as i64 + 1));
        let collected: Vec<i32> = tree.iter().copied().collect();
        assert_eq!(collected, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn touching_finds_overlapping_boxes_only() {
        let mut tree: BoxTree<(i64, i64)> = BoxTree::new();
        let points = [(0, 0), (100, 0), (0, 100), (500, 500), (10, 10)];
        for p in points {
            tree.insert(p);
        }
        tree.sort(|&(x, y)| b(x, y, x + 1, y + 1));

        let hits: Vec<(i64, i64)> = tree.touching(b(0, 0, 20, 20)).copied().collect();
        assert_eq!(hits.len(), 2);
        assert!(hits.contains(&(0, 0)));
        assert!(hits.contains(&(10, 10)));
    }

    #[test]
    fn touching_is_a_superset_including_boundary_touches() {
        let mut tree: BoxTree<()> = BoxTree::new();
        tree.insert(());
        tree.sort(|()| b(0, 0, 10, 10));
        let hits: Vec<()> = tree.touching(b(10, 10, 20, 20)).copied().collect();
        assert_eq!(hits.len(), 1, "boxes sharing only a corner still touch");
    }

    #[test]
    fn empty_tree_has_no_touching_hits() {
        let tree: BoxTree<i32> = BoxTree::new();
        assert_eq!(tree.touching(b(0, 0, 10, 10)).count(), 0);
    }

    #[test]
    fn unsorted_insert_invalidates_previous_tree() {
        let mut tree: BoxTree<i32> = BoxTree::new();
        tree.insert(1);
        tree.sort(|_| b(0, 0, 1, 1));
        tree.insert(2);
        // No sort() call yet: querying must not see stale/partial state.
        assert_eq!(tree.touching(Box::world()).count(), 0);
        tree.sort(|_| b(0, 0, 1, 1));
        assert_eq!(tree.touching(Box::world()).count(), 2);
    }

    #[test]
    fn skip_quad_drops_remaining_items_in_current_quad() {
        let mut tree: BoxTree<i32> = BoxTree::new();
        for i in 0..64 {
            tree.insert(i);
        }
        tree.sort(|&i| b(i as i64, i as i64, i as i64 + 1, i as i64 + 1));
        let mut iter = tree.touching(Box::world());
        let first = iter.next();
        assert!(first.is_some());
        iter.skip_quad();
        let remaining: Vec<i32> = iter.copied().collect();
        let total_without_skip = {
            let mut iter2 = tree.touching(Box::world());
            let mut count = 0;
            while iter2.next().is_some() {
                count += 1;
            }
            count
        };
        assert!(remaining.len() < total_without_skip);
    }

    #[test]
    fn unstable_tree_reorders_but_preserves_membership() {
        let mut tree: UnstableBoxTree<i32> = UnstableBoxTree::new();
        for i in 0..50 {
            tree.insert(i);
        }
        tree.sort(|&i| b(i as i64, i as i64, i as i64 + 1, i as i64 + 1));
        let mut collected: Vec<i32> = tree.iter().copied().collect();
        collected.sort_unstable();
        assert_eq!(collected, (0..50).collect::<Vec<_>>());

        let hits: Vec<i32> = tree.touching(b(0, 0, 5, 5)).copied().collect();
        assert_eq!(hits.len(), 5);
    }
}
