// Copyright 2025 the Layout Arrays Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Layout Geom: integer geometry primitives for a layout placement core.
//!
//! This crate provides the small, closed algebra that the placement and
//! array modules build on: points, vectors, axis-aligned boxes, and two
//! families of transform — rigid [`SimpleTrans`] (one of the eight
//! fixpoint rotations/mirrors plus an integer displacement) and
//! [`ComplexTrans`] (an arbitrary rotation angle and positive magnification
//! layered on top of a fixpoint rotation).
//!
//! Coordinates are a fixed integer width ([`Coord`]); there is no generic
//! coordinate type parameter. Floating point only appears inside
//! [`ComplexTrans`], where it is unavoidable (arbitrary rotation angles and
//! magnifications are not representable exactly in integers).
//!
//! # Example
//!
//! ```rust
//! use layout_geom::{Box, Point, Rotation, SimpleTrans, Vector};
//!
//! let t = SimpleTrans::new(Rotation::R90, Vector::new(10, 0));
//! let p = t.apply_point(Point::new(1, 0));
//! assert_eq!(p, Point::new(10, 1));
//!
//! let b = Box::new(Point::new(0, 0), Point::new(10, 10));
//! assert!(!b.is_empty());
//! ```

#![no_std]

extern crate alloc;

mod point;
mod rect;
mod trans;

pub use point::{Coord, Point, Vector};
pub use rect::Box;
pub use trans::{ComplexTrans, DispTrans, Rotation, SimpleTrans};

/// Tolerance used throughout the crate (and by consumers) for comparing
/// real-valued fields: cosines, magnitudes, determinants, lattice
/// projections.
pub const EPSILON: f64 = 1e-10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_trans_rotates_then_displaces() {
        let t = SimpleTrans::new(Rotation::R90, Vector::new(10, 0));
        assert_eq!(t.apply_point(Point::new(1, 0)), Point::new(10, 1));
    }

    #[test]
    fn box_empty_predicate() {
        let b = Box::new(Point::new(5, 5), Point::new(5, 5));
        assert!(b.is_empty());
        let b = Box::new(Point::new(0, 0), Point::new(1, 1));
        assert!(!b.is_empty());
    }
}
