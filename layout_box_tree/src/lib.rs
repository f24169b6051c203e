// Copyright 2025 the Layout Arrays Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Layout Box Tree: a quadtree spatial index over axis-aligned boxes.
//!
//! [`BoxTree`] indexes a batch of `(box, payload)` pairs and answers
//! "which payloads have a box touching this query box" queries with
//! aggregate-skipping support via [`TouchingIter::skip_quad`]. It underlies
//! the iterated-placement variants in `layout_arrays`, where the payload is
//! a displacement vector and the query is a region reduced to the object's
//! own footprint.
//!
//! Two flavors are provided:
//!
//! - [`BoxTree`] ("stable"): items keep the flat index they were inserted
//!   at; [`BoxTree::sort`] may move an item during the *same* rebuild but
//!   never across separate calls without an intervening `insert`.
//! - [`UnstableBoxTree`]: [`UnstableBoxTree::sort`] additionally permutes
//!   the backing storage into tree-traversal order for better locality;
//!   any previously observed flat index may be invalidated by a later sort.
//!
//! Both share the same quad/oversized-bucket construction and query
//! algorithm; only their bookkeeping of the original insertion order
//! differs.
//!
//! Not a general-purpose R-tree: the quad/oversized-bucket topology is not
//! observable except through `quad_id`/`quad_box`/`skip_quad`, which are
//! advisory and may change between releases.

#![no_std]

extern crate alloc;

mod tree;
mod types;

pub use tree::{BoxTree, Iter, TouchingIter, UnstableBoxTree};
pub use types::QuadId;
