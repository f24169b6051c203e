// Copyright 2025 the Layout Arrays Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Layout Arrays: array placements for a hierarchical layout database.
//!
//! A layout database rarely stores one shape or cell instance at a time —
//! the overwhelming majority of geometry is *placed repeatedly*: a contact
//! cut stepped and repeated across a via array, a standard cell instantiated
//! thousands of times across a row, an irregular list of via positions
//! pulled from a routing grid. Storing each instance as its own object would
//! make large designs unworkable; this crate instead represents such a
//! placement as one object plus a compact *placement descriptor* describing
//! where its instances sit, and lazily enumerates instance transforms on
//! demand.
//!
//! - [`PlacementKind`] is the descriptor itself: a regular 2D lattice, an
//!   explicit (spatially indexed) list of displacement vectors, or a single
//!   instance — each optionally carrying a residual complex factor
//!   (arbitrary rotation angle and magnification) on top of its base rigid
//!   transform.
//! - [`Array`] is the user-facing facade: an object, a base [`SimpleTrans`](layout_geom::SimpleTrans),
//!   and an optional descriptor. [`Array::begin`]/[`Array::begin_touching`]
//!   enumerate instance transforms; [`Array::bbox`] aggregates their
//!   footprints without enumerating.
//! - [`ArrayRepository`] interns descriptors by structural equality, so the
//!   (typically few) distinct placement shapes in a design are stored once
//!   regardless of how many arrays reference them.
//!
//! Coordinates and transforms are [`layout_geom`]'s; the spatial index
//! backing iterated placements is [`layout_box_tree`]'s.

#![no_std]

extern crate alloc;

mod array;
mod placement;
mod repository;

pub use array::{Array, ArrayIter, AppliedTrans, ResultTrans};
pub use placement::{PlacementIter, PlacementKind, TypeTag};
pub use repository::{ArrayRepository, MemStatCollector, PlacementHandle, TypeId};

// Re-exported so `use layout_arrays::...` covers ordinary use without a
// separate `layout_geom`/`layout_box_tree` dependency line: this crate's
// own public API is expressed directly in terms of these types (`Array::
// base` returns a `SimpleTrans`, `Array::regular` takes `Vector`s,
// `ArrayIter::quad_id` returns a `QuadId`, and so on).
pub use layout_box_tree::QuadId;
pub use layout_geom::{Box, Coord, ComplexTrans, DispTrans, Point, Rotation, SimpleTrans, Vector, EPSILON};
