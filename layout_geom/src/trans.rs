// Copyright 2025 the Layout Arrays Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rigid and complex transforms.

use crate::point::{Point, Vector};
use crate::EPSILON;

/// One of the eight "fixpoint" rigid transforms on the plane: the four
/// quarter-turn rotations and the four axis/diagonal mirrors. Every
/// [`SimpleTrans`] is one of these composed with an integer displacement;
/// every [`ComplexTrans`] layers an arbitrary rotation angle and
/// magnification on top of one of these.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rotation {
    /// Identity.
    #[default]
    R0,
    /// Rotate 90 degrees counter-clockwise.
    R90,
    /// Rotate 180 degrees.
    R180,
    /// Rotate 270 degrees counter-clockwise.
    R270,
    /// Mirror at the x-axis.
    M0,
    /// Mirror at the 45-degree diagonal.
    M45,
    /// Mirror at the y-axis.
    M90,
    /// Mirror at the 135-degree diagonal.
    M135,
}

type Mat = (i64, i64, i64, i64);

impl Rotation {
    const fn matrix(self) -> Mat {
        match self {
            Self::R0 => (1, 0, 0, 1),
            Self::R90 => (0, -1, 1, 0),
            Self::R180 => (-1, 0, 0, -1),
            Self::R270 => (0, 1, -1, 0),
            Self::M0 => (1, 0, 0, -1),
            Self::M45 => (0, 1, 1, 0),
            Self::M90 => (-1, 0, 0, 1),
            Self::M135 => (0, -1, -1, 0),
        }
    }

    fn from_matrix(m: Mat) -> Self {
        for r in [
            Self::R0,
            Self::R90,
            Self::R180,
            Self::R270,
            Self::M0,
            Self::M45,
            Self::M90,
            Self::M135,
        ] {
            if r.matrix() == m {
                return r;
            }
        }
        unreachable!("fixpoint rotations are closed under composition and transpose")
    }

    /// Whether this is one of the four mirror transforms.
    #[must_use]
    pub const fn is_mirror(self) -> bool {
        matches!(self, Self::M0 | Self::M45 | Self::M90 | Self::M135)
    }

    /// Applies the rotation/mirror to a vector.
    #[must_use]
    pub const fn apply_vector(self, v: Vector) -> Vector {
        let (a, b, c, d) = self.matrix();
        Vector::new(a * v.x + b * v.y, c * v.x + d * v.y)
    }

    /// Applies the rotation/mirror to a point (about the origin).
    #[must_use]
    pub const fn apply_point(self, p: Point) -> Point {
        self.apply_vector(Vector::new(p.x, p.y)).as_point()
    }

    /// The rotation that undoes this one.
    #[must_use]
    pub fn inverse(self) -> Self {
        let (a, b, c, d) = self.matrix();
        Self::from_matrix((a, c, b, d))
    }

    /// Returns the rotation equivalent to applying `self` first, then
    /// `other`.
    #[must_use]
    pub fn then(self, other: Self) -> Self {
        let (a1, b1, c1, d1) = self.matrix();
        let (a2, b2, c2, d2) = other.matrix();
        Self::from_matrix((
            a2 * a1 + b2 * c1,
            a2 * b1 + b2 * d1,
            c2 * a1 + d2 * c1,
            c2 * b1 + d2 * d1,
        ))
    }
}

/// A rigid integer transform: one of the eight [`Rotation`]s followed by an
/// integer displacement. Closed under composition and inversion.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SimpleTrans {
    /// The rotation/mirror part, applied before the displacement.
    pub rot: Rotation,
    /// The displacement part, applied after the rotation.
    pub disp: Vector,
}

impl SimpleTrans {
    /// Creates a transform from a rotation and a displacement.
    #[must_use]
    pub const fn new(rot: Rotation, disp: Vector) -> Self {
        Self { rot, disp }
    }

    /// The identity transform.
    pub const IDENTITY: Self = Self::new(Rotation::R0, Vector::ZERO);

    /// A pure translation.
    #[must_use]
    pub const fn displacement(disp: Vector) -> Self {
        Self::new(Rotation::R0, disp)
    }

    /// Whether this transform is the identity.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Whether this transform has no rotation part (pure translation).
    #[must_use]
    pub const fn is_translation(&self) -> bool {
        matches!(self.rot, Rotation::R0)
    }

    /// Applies the transform to a vector (rotation only; displacement does
    /// not apply to free vectors).
    #[must_use]
    pub const fn apply_vector(&self, v: Vector) -> Vector {
        self.rot.apply_vector(v)
    }

    /// Applies the transform to a point.
    #[must_use]
    pub const fn apply_point(&self, p: Point) -> Point {
        let v = self.rot.apply_vector(Vector::new(p.x, p.y));
        Point::new(v.x + self.disp.x, v.y + self.disp.y)
    }

    /// The inverse transform: `t.invert().apply_point(t.apply_point(p)) == p`.
    #[must_use]
    pub fn invert(&self) -> Self {
        let inv_rot = self.rot.inverse();
        let inv_disp = -inv_rot.apply_vector(self.disp);
        Self::new(inv_rot, inv_disp)
    }

    /// Composes two transforms: the result applies `self` first, then
    /// `rhs` — i.e. `rhs.compose(self).apply_point(p) == rhs.apply_point(self.apply_point(p))`.
    #[must_use]
    pub fn compose(&self, rhs: &Self) -> Self {
        let rot = self.rot.then(rhs.rot);
        let disp = rhs.rot.apply_vector(self.disp) + rhs.disp;
        Self::new(rot, disp)
    }
}

/// A pure integer translation. A thin, explicitly-named special case of
/// [`SimpleTrans`] used where the `array` facade's transform compatibility
/// table (see the crate-level docs of `layout_arrays`) distinguishes
/// "displacement-only" transforms from general simple transforms.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DispTrans {
    /// The translation vector.
    pub disp: Vector,
}

impl DispTrans {
    /// Creates a new pure translation.
    #[must_use]
    pub const fn new(disp: Vector) -> Self {
        Self { disp }
    }

    /// Applies the translation to a point.
    #[must_use]
    pub const fn apply_point(&self, p: Point) -> Point {
        Point::new(p.x + self.disp.x, p.y + self.disp.y)
    }
}

impl From<DispTrans> for SimpleTrans {
    fn from(d: DispTrans) -> Self {
        Self::displacement(d.disp)
    }
}

/// A transform with arbitrary rotation angle and positive magnification,
/// layered on top of a fixpoint [`Rotation`]: `p -> disp + mag * R(theta) *
/// rot.apply(p)`, where `rcos = cos(theta)`.
///
/// `rsin` is not stored; it is derived as the non-negative root of
/// `1 - rcos^2`, so the continuous angle `theta` is taken in `[0, 180]`
/// degrees. Angles outside that range are expected to be folded into the
/// accompanying fixpoint `rot`, mirroring how the source material
/// normalizes a complex transform's angle against its nearest quadrant
/// before storing a residual.
#[derive(Copy, Clone, Debug)]
pub struct ComplexTrans {
    /// Magnification, always positive.
    pub mag: f64,
    /// Cosine of the residual rotation angle.
    pub rcos: f64,
    /// The fixpoint rotation/mirror applied before the residual angle.
    pub rot: Rotation,
    /// Integer displacement, applied last.
    pub disp: Vector,
}

impl ComplexTrans {
    /// Creates a new complex transform.
    #[must_use]
    pub fn new(mag: f64, rcos: f64, rot: Rotation, disp: Vector) -> Self {
        Self { mag, rcos, rot, disp }
    }

    /// A complex transform equal to the given simple transform (no residual
    /// angle or magnification).
    #[must_use]
    pub fn from_simple(t: &SimpleTrans) -> Self {
        Self::new(1.0, 1.0, t.rot, t.disp)
    }

    fn rsin(&self) -> f64 {
        sqrt_f64((1.0 - self.rcos * self.rcos).max(0.0))
    }

    /// Whether this transform is, within [`EPSILON`], equivalent to a
    /// [`SimpleTrans`] (magnification 1 and residual angle a multiple of
    /// 90 degrees).
    #[must_use]
    pub fn to_simple(&self) -> Option<SimpleTrans> {
        if (self.mag - 1.0).abs() > EPSILON {
            return None;
        }
        let residual = if (self.rcos - 1.0).abs() <= EPSILON {
            Rotation::R0
        } else if self.rcos.abs() <= EPSILON && (self.rsin() - 1.0).abs() <= EPSILON {
            Rotation::R90
        } else if (self.rcos + 1.0).abs() <= EPSILON {
            Rotation::R180
        } else {
            return None;
        };
        Some(SimpleTrans::new(self.rot.then(residual), self.disp))
    }

    /// Whether this transform carries a non-trivial residual (cannot
    /// collapse to a [`SimpleTrans`]).
    #[must_use]
    pub fn is_complex(&self) -> bool {
        self.to_simple().is_none()
    }

    /// Applies the transform to a point, in floating point.
    #[must_use]
    pub fn apply_point_f64(&self, p: Point) -> (f64, f64) {
        let v = self.rot.apply_vector(Vector::new(p.x, p.y));
        let (vx, vy) = (v.x as f64, v.y as f64);
        let rsin = self.rsin();
        let rx = self.rcos * vx - rsin * vy;
        let ry = rsin * vx + self.rcos * vy;
        (self.disp.x as f64 + self.mag * rx, self.disp.y as f64 + self.mag * ry)
    }

    /// Applies the transform to a point, rounding to the nearest integer
    /// coordinate.
    #[must_use]
    pub fn apply_point(&self, p: Point) -> Point {
        let (x, y) = self.apply_point_f64(p);
        Point::new(round_i64(x), round_i64(y))
    }

    /// The inverse transform.
    #[must_use]
    pub fn invert(&self) -> Self {
        let inv_rot = self.rot.inverse();
        let inv_mag = 1.0 / self.mag;
        // cos(-theta) == cos(theta); the non-negative `rsin` convention
        // means this is exact only for residual angles of 0 or 180
        // degrees, which is the only case this crate's callers rely on.
        let rcos = self.rcos;
        let inv_disp = {
            let undone = inv_rot.apply_vector(self.disp);
            let k = inv_mag * rcos;
            Vector::new(round_i64(-k * undone.x as f64), round_i64(-k * undone.y as f64))
        };
        Self::new(inv_mag, rcos, inv_rot, inv_disp)
    }

    /// Composes two complex transforms: applies `self` first, then `rhs`.
    #[must_use]
    pub fn compose(&self, rhs: &Self) -> Self {
        // Represent both as 2x2 matrices (folding in rotation, residual
        // angle, and magnification) plus a displacement, multiply, then
        // re-extract a fixpoint/residual-angle pair. For the trivial case
        // used throughout this crate (layering a rigid `rhs` on a
        // magnifying-only `self`, or vice versa) this reduces to simple
        // angle addition; the general path goes through the matrix to
        // stay correct for arbitrary angles.
        let (a1, b1, c1, d1) = self.matrix2();
        let (a2, b2, c2, d2) = rhs.matrix2();
        let (a, b, c, d) = (a2 * a1 + b2 * c1, a2 * b1 + b2 * d1, c2 * a1 + d2 * c1, c2 * b1 + d2 * d1);
        let mag = sqrt_f64(a * a + c * c);
        let (rcos, rot) = nearest_fixpoint(a / mag, c / mag, b / mag, d / mag);
        let v = self.disp;
        let (dx, dy) = rhs.apply_point_f64(Point::new(v.x, v.y));
        Self::new(mag, rcos, rot, Vector::new(round_i64(dx), round_i64(dy)))
    }

    fn matrix2(&self) -> (f64, f64, f64, f64) {
        let (a, b, c, d) = self.rot.matrix();
        let (a, b, c, d) = (a as f64, b as f64, c as f64, d as f64);
        let rsin = self.rsin();
        let rot_mat = (self.rcos, -rsin, rsin, self.rcos);
        let m = (
            rot_mat.0 * a + rot_mat.1 * c,
            rot_mat.0 * b + rot_mat.1 * d,
            rot_mat.2 * a + rot_mat.3 * c,
            rot_mat.2 * b + rot_mat.3 * d,
        );
        (self.mag * m.0, self.mag * m.1, self.mag * m.2, self.mag * m.3)
    }
}

/// Decomposes a unit-determinant-ish 2x2 matrix into the nearest fixpoint
/// rotation and a residual cosine, by testing the eight fixpoint matrices
/// and picking the one with the smallest angular residual.
fn nearest_fixpoint(a: f64, b: f64, c: f64, d: f64) -> (f64, Rotation) {
    let mut best = (f64::MIN, Rotation::R0, 1.0);
    for r in [
        Rotation::R0,
        Rotation::R90,
        Rotation::R180,
        Rotation::R270,
        Rotation::M0,
        Rotation::M45,
        Rotation::M90,
        Rotation::M135,
    ] {
        let (ra, rb, rc, rd) = r.matrix();
        let (ra, rb, rc, rd) = (ra as f64, rb as f64, rc as f64, rd as f64);
        // cos(theta) between the residual rotations: trace of R^T * M / 2.
        let rcos = (ra * a + rc * c + rb * b + rd * d) / 2.0;
        if rcos > best.0 {
            best = (rcos, r, rcos);
        }
    }
    (best.2.clamp(-1.0, 1.0), best.1)
}

#[cfg(feature = "std")]
fn sqrt_f64(x: f64) -> f64 {
    x.sqrt()
}

#[cfg(not(feature = "std"))]
fn sqrt_f64(x: f64) -> f64 {
    libm::sqrt(x)
}

#[cfg(feature = "std")]
fn round_i64(x: f64) -> i64 {
    x.round() as i64
}

#[cfg(not(feature = "std"))]
fn round_i64(x: f64) -> i64 {
    libm::round(x) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_trans_round_trips() {
        let t = SimpleTrans::new(Rotation::M45, Vector::new(3, -7));
        let p = Point::new(11, 4);
        assert_eq!(t.invert().apply_point(t.apply_point(p)), p);
    }

    #[test]
    fn compose_matches_sequential_application() {
        let a = SimpleTrans::new(Rotation::R90, Vector::new(1, 2));
        let b = SimpleTrans::new(Rotation::M0, Vector::new(-3, 5));
        let composed = a.compose(&b);
        let p = Point::new(7, -2);
        assert_eq!(composed.apply_point(p), b.apply_point(a.apply_point(p)));
    }

    #[test]
    fn complex_trans_collapses_to_simple_when_trivial() {
        let c = ComplexTrans::new(1.0, 1.0, Rotation::R180, Vector::new(5, 5));
        assert_eq!(c.to_simple(), Some(SimpleTrans::new(Rotation::R180, Vector::new(5, 5))));
        let c = ComplexTrans::new(10.0, 1.0, Rotation::R0, Vector::ZERO);
        assert!(c.is_complex());
    }

    #[test]
    fn complex_trans_magnifies() {
        let c = ComplexTrans::new(10.0, 1.0, Rotation::R0, Vector::new(100, 0));
        assert_eq!(c.apply_point(Point::new(-10, 0)), Point::new(0, 0));
    }

    #[test]
    fn complex_trans_invert_round_trips_with_magnification_and_displacement() {
        let c = ComplexTrans::new(2.0, 1.0, Rotation::R0, Vector::new(110, 510));
        let p = Point::new(1000, 1000);
        assert_eq!(c.invert().apply_point(c.apply_point(p)), p);

        let c = ComplexTrans::new(2.0, -1.0, Rotation::R0, Vector::new(110, 510));
        let p = Point::new(1000, 1000);
        assert_eq!(c.invert().apply_point(c.apply_point(p)), p);
    }
}
