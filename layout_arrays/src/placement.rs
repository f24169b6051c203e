// Copyright 2025 the Layout Arrays Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Placement descriptors: the five non-trivial array shapes and the
//! lattice-projection region query for regular arrays.

use alloc::vec::Vec;

use smallvec::SmallVec;

use layout_box_tree::BoxTree;
use layout_geom::{Box, Coord, Point, Rotation, SimpleTrans, Vector, EPSILON};

/// Small inline buffer for the handful of vectors a single `invert`/
/// `transform_vectors` call reshapes before rebuilding an iterated
/// descriptor's tree; most placements in practice carry few enough
/// instances that this never spills to the heap.
pub(crate) type VecBuf = SmallVec<[Vector; 8]>;

/// Primary ordering key for a placement descriptor, carried explicitly so
/// comparisons across variants never rely on enum discriminant order.
pub type TypeTag = u8;

/// A placement descriptor: one of the five non-`Single` array shapes. A
/// `None` descriptor at the [`crate::Array`] level stands for `Single`
/// directly, so it has no variant here.
#[derive(Clone, Debug)]
pub enum PlacementKind {
    /// Regular 2D lattice: `amax * bmax` instances at `i*a + j*b`.
    Regular { a: Vector, b: Vector, amax: u32, bmax: u32 },
    /// [`PlacementKind::Regular`] plus a residual complex factor.
    RegularComplex { a: Vector, b: Vector, amax: u32, bmax: u32, rcos: f64, mag: f64 },
    /// An explicit, spatially indexed list of displacement vectors.
    Iterated { tree: BoxTree<Vector>, bbox: Box },
    /// [`PlacementKind::Iterated`] plus a residual complex factor.
    IteratedComplex { tree: BoxTree<Vector>, bbox: Box, rcos: f64, mag: f64 },
    /// A single instance with a residual complex factor (no lattice/list).
    SingleComplex { rcos: f64, mag: f64 },
}

impl PlacementKind {
    /// Builds an `Iterated` descriptor from a vector list, indexing it for
    /// touching queries and computing its tight point bbox.
    #[must_use]
    pub fn iterated(vectors: impl IntoIterator<Item = Vector>) -> Self {
        let (tree, bbox) = build_vector_tree(vectors);
        Self::Iterated { tree, bbox }
    }

    /// Builds an `IteratedComplex` descriptor.
    #[must_use]
    pub fn iterated_complex(vectors: impl IntoIterator<Item = Vector>, rcos: f64, mag: f64) -> Self {
        let (tree, bbox) = build_vector_tree(vectors);
        Self::IteratedComplex { tree, bbox, rcos, mag }
    }

    /// The ordering/bucketing key. Assigned arbitrarily but consistently
    /// (there is no externally observable "correct" numbering); see
    /// `DESIGN.md` for the resolution.
    #[must_use]
    pub const fn type_tag(&self) -> TypeTag {
        match self {
            Self::Regular { .. } => 1,
            Self::RegularComplex { .. } => 2,
            Self::Iterated { .. } => 3,
            Self::IteratedComplex { .. } => 4,
            Self::SingleComplex { .. } => 5,
        }
    }

    /// The residual `(rcos, mag)` complex factor, if any.
    #[must_use]
    pub const fn complex_factor(&self) -> Option<(f64, f64)> {
        match self {
            Self::RegularComplex { rcos, mag, .. }
            | Self::IteratedComplex { rcos, mag, .. }
            | Self::SingleComplex { rcos, mag } => Some((*rcos, *mag)),
            Self::Regular { .. } | Self::Iterated { .. } => None,
        }
    }

    /// Representative displacement vectors whose bbox envelope bounds all
    /// instances. For `Regular`/`RegularComplex` these are the four corner
    /// indices of the (possibly oblique) index parallelogram; for the
    /// iterated variants, the four corners of the precomputed point bbox
    /// (a conservative but not always tight envelope, adequate for bbox
    /// aggregation, which `begin`/`begin_touching` do not use).
    fn extreme_points(&self) -> [Vector; 4] {
        match self {
            Self::Regular { a, b, amax, bmax } | Self::RegularComplex { a, b, amax, bmax, .. } => {
                let (imax, jmax) = (amax.saturating_sub(1), bmax.saturating_sub(1));
                corner_combinations(*a, *b, imax, jmax)
            }
            Self::Iterated { bbox, .. } | Self::IteratedComplex { bbox, .. } => {
                if is_true_empty(bbox) {
                    [Vector::ZERO; 4]
                } else {
                    let (p1, p2) = (bbox.p1(), bbox.p2());
                    let hi = Point::new(p2.x - 1, p2.y - 1);
                    [
                        Vector::from(p1),
                        Vector::new(hi.x, p1.y),
                        Vector::new(p1.x, hi.y),
                        Vector::from(hi),
                    ]
                }
            }
            Self::SingleComplex { .. } => [Vector::ZERO; 4],
        }
    }

    /// Total instance count.
    #[must_use]
    pub fn size(&self) -> u64 {
        match self {
            Self::Regular { amax, bmax, .. } | Self::RegularComplex { amax, bmax, .. } => {
                u64::from(*amax) * u64::from(*bmax)
            }
            Self::Iterated { tree, .. } | Self::IteratedComplex { tree, .. } => tree.len() as u64,
            Self::SingleComplex { .. } => 1,
        }
    }

    /// Inverts this descriptor in place, given the placement's original
    /// base transform (before inversion). Returns a displacement that the
    /// caller must additionally fold into the inverted base's own
    /// displacement (zero for the iterated variants, which can absorb it
    /// per-vector instead).
    ///
    /// Each instance's full transform composes the base with this
    /// descriptor's per-instance vector and (if present) the residual
    /// complex factor; inverting the two pieces independently only
    /// reproduces the true per-instance inverse if the residual factor's
    /// scaling and the base displacement are accounted for together. For
    /// `Regular`/`RegularComplex`/`SingleComplex`, a lattice must still
    /// pass through the origin at index zero, so the part of the inverse
    /// that doesn't fit that shape is returned instead of stored in `a`/`b`.
    pub fn invert(&mut self, base: &SimpleTrans) -> Vector {
        let rot = base.rot;
        let invk = match self {
            Self::RegularComplex { rcos, mag, .. } | Self::IteratedComplex { rcos, mag, .. } | Self::SingleComplex { rcos, mag } => *rcos / *mag,
            Self::Regular { .. } | Self::Iterated { .. } => 1.0,
        };
        let const_shift = scale_vector(base.disp, 1.0 - invk);
        match self {
            Self::Regular { a, b, .. } | Self::RegularComplex { a, b, .. } => {
                let rot_twice = rot.then(rot);
                *a = scale_vector(rot_twice.apply_vector(*a), -invk);
                *b = scale_vector(rot_twice.apply_vector(*b), -invk);
            }
            Self::Iterated { tree, bbox } | Self::IteratedComplex { tree, bbox, .. } => {
                let vectors: VecBuf = tree.iter().map(|v| scale_vector(rot.apply_vector(*v), -invk) + const_shift).collect();
                let (new_tree, new_bbox) = build_vector_tree(vectors);
                *tree = new_tree;
                *bbox = new_bbox;
            }
            Self::SingleComplex { .. } => {}
        }
        match self {
            Self::RegularComplex { mag, .. } | Self::IteratedComplex { mag, .. } | Self::SingleComplex { mag, .. } => {
                *mag = 1.0 / *mag;
            }
            Self::Regular { .. } | Self::Iterated { .. } => {}
        }
        match self {
            Self::Regular { .. } | Self::RegularComplex { .. } | Self::SingleComplex { .. } => const_shift,
            Self::Iterated { .. } | Self::IteratedComplex { .. } => Vector::ZERO,
        }
    }

    /// Applies the linear part of an externally supplied transform — a
    /// rotation, plus a residual `(rcos, mag)` scale if `applied_complex`
    /// is given — to this descriptor's own vectors, leaving the base
    /// transform (handled by the caller) untouched. Used by
    /// [`crate::Array::transform_into`]'s conjugation: a placement's
    /// vectors are pure displacements relative to the base, so only the
    /// linear part of a parent-frame change of coordinates affects them,
    /// the same way `dbArray.h`'s `basic_array::transform` rotates/scales
    /// `m_a`/`m_b` without ever touching a displacement term.
    pub fn transform_vectors(&mut self, applied_rot: Rotation, applied_complex: Option<(f64, f64)>) {
        let step = |v: Vector| match applied_complex {
            Some((rcos, mag)) => apply_complex_linear_vector(rcos, mag, applied_rot.apply_vector(v)),
            None => applied_rot.apply_vector(v),
        };
        match self {
            Self::Regular { a, b, .. } | Self::RegularComplex { a, b, .. } => {
                *a = step(*a);
                *b = step(*b);
            }
            Self::Iterated { tree, bbox } | Self::IteratedComplex { tree, bbox, .. } => {
                let vectors: VecBuf = tree.iter().map(|v| step(*v)).collect();
                let (new_tree, new_bbox) = build_vector_tree(vectors);
                *tree = new_tree;
                *bbox = new_bbox;
            }
            Self::SingleComplex { .. } => {}
        }
    }

    /// Enumerates every instance displacement.
    #[must_use]
    pub fn begin(&self) -> PlacementIter<'_> {
        match self {
            Self::Regular { a, b, amax, bmax } | Self::RegularComplex { a, b, amax, bmax, .. } => {
                PlacementIter::lattice(*a, *b, 0, *amax, 0, *bmax)
            }
            Self::Iterated { tree, .. } | Self::IteratedComplex { tree, .. } => PlacementIter::Flat(tree.iter()),
            Self::SingleComplex { .. } => PlacementIter::Single(false),
        }
    }

    /// Direct-access enumeration starting at lattice index `(a0, b0)`
    /// instead of `(0, 0)`; falls back to [`PlacementKind::begin`] for the
    /// non-`Regular`/`RegularComplex` variants, which have no `(a, b)`
    /// index to seek to. Grounded on `dbArray.h`'s `basic_array::
    /// begin_regular(long, long)`, whose default implementation is
    /// likewise just `begin()` for non-lattice placements.
    #[must_use]
    pub fn begin_at(&self, a0: u32, b0: u32) -> PlacementIter<'_> {
        match self {
            Self::Regular { a, b, amax, bmax } | Self::RegularComplex { a, b, amax, bmax, .. } => {
                PlacementIter::lattice(*a, *b, a0, *amax, b0, *bmax)
            }
            Self::Iterated { .. } | Self::IteratedComplex { .. } | Self::SingleComplex { .. } => self.begin(),
        }
    }

    /// Enumerates a superset of instances whose displacement, combined
    /// with the object's bbox, touches `reduced_query` (already reduced by
    /// the [`crate::Array`] facade; see `array.rs`).
    #[must_use]
    pub fn begin_touching(&self, reduced_query: Box) -> PlacementIter<'_> {
        if reduced_query.is_empty() {
            return PlacementIter::Single(true);
        }
        match self {
            Self::Regular { a, b, amax, bmax } | Self::RegularComplex { a, b, amax, bmax, .. } => {
                match lattice_range(*a, *b, *amax, *bmax, reduced_query) {
                    Some((amini, amaxi, bmini, bmaxi)) => PlacementIter::lattice(*a, *b, amini, amaxi, bmini, bmaxi),
                    None => PlacementIter::lattice(*a, *b, 0, 0, 0, 0),
                }
            }
            Self::Iterated { tree, .. } | Self::IteratedComplex { tree, .. } => {
                PlacementIter::Touching(tree.touching(reduced_query))
            }
            Self::SingleComplex { .. } => PlacementIter::Single(false),
        }
    }

    /// Translation-free bbox contribution: the union, over
    /// [`PlacementKind::extreme_points`], of each point rotated by `rot`.
    /// Instance positions are never scaled by a residual complex factor —
    /// only the object's own footprint at each instance is magnified (see
    /// [`crate::Array::bbox_from_raw_bbox`]). Used by
    /// [`crate::Array::raw_bbox`].
    pub(crate) fn raw_extent(&self, rot: layout_geom::Rotation) -> Box {
        union_points(self.extreme_points().into_iter().map(|p| rot.apply_vector(p).as_point()))
    }

    /// Exact comparator: type tag, then descriptor-specific fields. Floats
    /// compare by [`f64::total_cmp`] so the repository's dedup is exact
    /// bit-for-bit, never fuzzy (see `DESIGN.md`).
    #[must_use]
    pub fn cmp_exact(&self, other: &Self) -> core::cmp::Ordering {
        self.type_tag().cmp(&other.type_tag()).then_with(|| match (self, other) {
            (Self::Regular { a: a1, b: b1, amax: am1, bmax: bm1 }, Self::Regular { a: a2, b: b2, amax: am2, bmax: bm2 }) => {
                cmp_vector(*a1, *a2).then_with(|| cmp_vector(*b1, *b2)).then(am1.cmp(am2)).then(bm1.cmp(bm2))
            }
            (
                Self::RegularComplex { a: a1, b: b1, amax: am1, bmax: bm1, rcos: r1, mag: m1 },
                Self::RegularComplex { a: a2, b: b2, amax: am2, bmax: bm2, rcos: r2, mag: m2 },
            ) => cmp_vector(*a1, *a2)
                .then_with(|| cmp_vector(*b1, *b2))
                .then(am1.cmp(am2))
                .then(bm1.cmp(bm2))
                .then_with(|| r1.total_cmp(r2))
                .then_with(|| m1.total_cmp(m2)),
            (Self::Iterated { tree: t1, .. }, Self::Iterated { tree: t2, .. }) => cmp_vector_seq(t1, t2),
            (Self::IteratedComplex { tree: t1, rcos: r1, mag: m1, .. }, Self::IteratedComplex { tree: t2, rcos: r2, mag: m2, .. }) => {
                cmp_vector_seq(t1, t2).then_with(|| r1.total_cmp(r2)).then_with(|| m1.total_cmp(m2))
            }
            (Self::SingleComplex { rcos: r1, mag: m1 }, Self::SingleComplex { rcos: r2, mag: m2 }) => {
                r1.total_cmp(r2).then_with(|| m1.total_cmp(m2))
            }
            // Unreachable once `type_tag` has compared equal, since each
            // tag maps to exactly one variant.
            _ => core::cmp::Ordering::Equal,
        })
    }

    /// Exact equality, derived from [`PlacementKind::cmp_exact`].
    #[must_use]
    pub fn eq_exact(&self, other: &Self) -> bool {
        self.cmp_exact(other) == core::cmp::Ordering::Equal
    }

    /// Epsilon-tolerant equality: as [`PlacementKind::eq_exact`], but
    /// `rcos`/`mag` compare within [`EPSILON`] rather than bit-for-bit.
    #[must_use]
    pub fn fuzzy_eq(&self, other: &Self) -> bool {
        if self.type_tag() != other.type_tag() {
            return false;
        }
        match (self, other) {
            (Self::Regular { a: a1, b: b1, amax: am1, bmax: bm1 }, Self::Regular { a: a2, b: b2, amax: am2, bmax: bm2 }) => {
                a1 == a2 && b1 == b2 && am1 == am2 && bm1 == bm2
            }
            (
                Self::RegularComplex { a: a1, b: b1, amax: am1, bmax: bm1, rcos: r1, mag: m1 },
                Self::RegularComplex { a: a2, b: b2, amax: am2, bmax: bm2, rcos: r2, mag: m2 },
            ) => a1 == a2 && b1 == b2 && am1 == am2 && bm1 == bm2 && fuzzy_eq_f64(*r1, *r2) && fuzzy_eq_f64(*m1, *m2),
            (Self::Iterated { tree: t1, .. }, Self::Iterated { tree: t2, .. }) => t1.iter().eq(t2.iter()),
            (Self::IteratedComplex { tree: t1, rcos: r1, mag: m1, .. }, Self::IteratedComplex { tree: t2, rcos: r2, mag: m2, .. }) => {
                t1.iter().eq(t2.iter()) && fuzzy_eq_f64(*r1, *r2) && fuzzy_eq_f64(*m1, *m2)
            }
            (Self::SingleComplex { rcos: r1, mag: m1 }, Self::SingleComplex { rcos: r2, mag: m2 }) => {
                fuzzy_eq_f64(*r1, *r2) && fuzzy_eq_f64(*m1, *m2)
            }
            _ => false,
        }
    }

    /// The key [`crate::repository::ArrayRepository`] hashes its per-tag
    /// bucket on: bit-exact on every field [`PlacementKind::cmp_exact`]
    /// compares (floats keyed by [`f64::to_bits`], which — like
    /// `total_cmp` — distinguishes `-0.0` from `0.0`), so two descriptors
    /// hash equal exactly when `cmp_exact` orders them equal. `type_tag`
    /// is left out since the repository already partitions by it before
    /// ever consulting this key.
    #[must_use]
    pub(crate) fn dedup_key(&self) -> DedupKey {
        match self {
            Self::Regular { a, b, amax, bmax } => DedupKey::Regular { a: (a.x, a.y), b: (b.x, b.y), amax: *amax, bmax: *bmax },
            Self::RegularComplex { a, b, amax, bmax, rcos, mag } => {
                DedupKey::RegularComplex { a: (a.x, a.y), b: (b.x, b.y), amax: *amax, bmax: *bmax, rcos: rcos.to_bits(), mag: mag.to_bits() }
            }
            Self::Iterated { tree, .. } => DedupKey::Iterated { vectors: tree.iter().map(|v| (v.x, v.y)).collect() },
            Self::IteratedComplex { tree, rcos, mag, .. } => {
                DedupKey::IteratedComplex { vectors: tree.iter().map(|v| (v.x, v.y)).collect(), rcos: rcos.to_bits(), mag: mag.to_bits() }
            }
            Self::SingleComplex { rcos, mag } => DedupKey::SingleComplex { rcos: rcos.to_bits(), mag: mag.to_bits() },
        }
    }
}

/// Hashable mirror of [`PlacementKind::cmp_exact`]'s comparison fields,
/// used to key [`crate::repository::ArrayRepository`]'s per-bucket
/// `hashbrown::HashMap`. A `Vec`-keyed `Iterated`/`IteratedComplex` variant
/// relies on [`build_vector_tree`] always sorting its tree the same way
/// regardless of insertion order, so two descriptors built from the same
/// vector set in different orders still hash equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum DedupKey {
    Regular { a: (Coord, Coord), b: (Coord, Coord), amax: u32, bmax: u32 },
    RegularComplex { a: (Coord, Coord), b: (Coord, Coord), amax: u32, bmax: u32, rcos: u64, mag: u64 },
    Iterated { vectors: Vec<(Coord, Coord)> },
    IteratedComplex { vectors: Vec<(Coord, Coord)>, rcos: u64, mag: u64 },
    SingleComplex { rcos: u64, mag: u64 },
}

fn fuzzy_eq_f64(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPSILON
}

fn cmp_vector(a: Vector, b: Vector) -> core::cmp::Ordering {
    a.x.cmp(&b.x).then(a.y.cmp(&b.y))
}

fn cmp_vector_seq(a: &BoxTree<Vector>, b: &BoxTree<Vector>) -> core::cmp::Ordering {
    a.iter().cmp(b.iter())
}

fn corner_combinations(a: Vector, b: Vector, imax: u32, jmax: u32) -> [Vector; 4] {
    let corner = |i: u32, j: u32| Vector::new(a.x * Coord::from(i) + b.x * Coord::from(j), a.y * Coord::from(i) + b.y * Coord::from(j));
    [corner(0, 0), corner(imax, 0), corner(0, jmax), corner(imax, jmax)]
}

/// Applies the residual `(rcos, mag)` linear map (scale + rotate about the
/// origin, no translation) to a vector, rounding to the nearest integer.
pub(crate) fn apply_complex_linear_vector(rcos: f64, mag: f64, v: Vector) -> Vector {
    let rsin = non_negative_rsin(rcos);
    let (vx, vy) = (v.x as f64, v.y as f64);
    let rx = rcos * vx - rsin * vy;
    let ry = rsin * vx + rcos * vy;
    Vector::new(round_coord(mag * rx), round_coord(mag * ry))
}

/// Applies the residual linear map to every corner of `b` and returns the
/// (conservative) bbox of the four transformed corners.
pub(crate) fn apply_complex_linear_box(rcos: f64, mag: f64, b: Box) -> Box {
    if b.is_empty() {
        return Box::EMPTY;
    }
    let (p1, p2) = (b.p1(), b.p2());
    let corners = [p1, Point::new(p2.x, p1.y), Point::new(p1.x, p2.y), p2];
    union_points(corners.into_iter().map(|p| apply_complex_linear_vector(rcos, mag, Vector::from(p)).as_point()))
}

/// Scales a vector by a plain scalar (no rotation), rounding to the
/// nearest integer coordinate.
fn scale_vector(v: Vector, s: f64) -> Vector {
    Vector::new(round_coord(s * v.x as f64), round_coord(s * v.y as f64))
}

fn non_negative_rsin(rcos: f64) -> f64 {
    (1.0 - rcos * rcos).max(0.0).sqrt()
}

fn round_coord(x: f64) -> Coord {
    let truncated = x as Coord;
    let frac = x - truncated as f64;
    if frac >= 0.5 {
        truncated + 1
    } else if frac <= -0.5 {
        truncated - 1
    } else {
        truncated
    }
}

/// A literal-min/max point accumulation, distinct from [`Box::united`]:
/// a single point `p` accumulates as `Box::new(p, p)`, a degenerate box
/// that [`Box::is_empty`] would (incorrectly, for this purpose) call
/// empty. Used wherever a set of *points* (not real-extent shapes) needs a
/// tight envelope — see `DESIGN.md`.
pub(crate) fn union_points(points: impl Iterator<Item = Point>) -> Box {
    let mut it = points;
    let Some(first) = it.next() else { return Box::EMPTY };
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in it {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Box::new(Point::new(min_x, min_y), Point::new(max_x, max_y))
}

/// Whether `b` is the true "no points at all" sentinel, as opposed to a
/// legitimate degenerate single-point accumulation (`p1 == p2`), which
/// [`Box::is_empty`] cannot distinguish (both satisfy `p1 >= p2`).
pub(crate) fn is_true_empty(b: &Box) -> bool {
    b.p1().x > b.p2().x || b.p1().y > b.p2().y
}

/// Direct componentwise sum of two point accumulations (Minkowski sum of
/// the two axis-aligned extents they describe).
pub(crate) fn minkowski_sum(a: Box, b: Box) -> Box {
    Box::new(Point::new(a.p1().x + b.p1().x, a.p1().y + b.p1().y), Point::new(a.p2().x + b.p2().x, a.p2().y + b.p2().y))
}

fn build_vector_tree(vectors: impl IntoIterator<Item = Vector>) -> (BoxTree<Vector>, Box) {
    let mut tree = BoxTree::new();
    let mut bbox = Box::EMPTY;
    for v in vectors {
        tree.insert(v);
        bbox = if is_true_empty(&bbox) {
            Box::new(v.as_point(), Point::new(v.x + 1, v.y + 1))
        } else {
            bbox.united(&Box::new(v.as_point(), Point::new(v.x + 1, v.y + 1)))
        };
    }
    tree.sort(|v| Box::new(v.as_point(), Point::new(v.x + 1, v.y + 1)));
    (tree, bbox)
}

/// The lattice-projection region query (see spec §4.3 in spirit): given
/// lattice vectors `a`, `b`, counts `amax`, `bmax`, and a query box already
/// reduced to the object's own displacement frame, returns the minimal
/// enveloping index range `(amini, amaxi, bmini, bmaxi)`, or `None` if it
/// is empty.
fn lattice_range(a: Vector, b: Vector, amax: u32, bmax: u32, query: Box) -> Option<(u32, u32, u32, u32)> {
    if query.is_empty() {
        return None;
    }
    let (eff_a, amax_eff) = if !a.is_zero() {
        (a, amax)
    } else if !b.is_zero() {
        (Vector::new(b.y, -b.x), 1)
    } else {
        (Vector::new(1, 0), 1)
    };
    let (eff_b, bmax_eff) = if !b.is_zero() {
        (b, bmax)
    } else if !a.is_zero() {
        (Vector::new(-a.y, a.x), 1)
    } else {
        (Vector::new(0, 1), 1)
    };

    let det = (eff_a.x * eff_b.y - eff_a.y * eff_b.x) as f64;
    if det.abs() < 0.5 {
        return Some((0, amax_eff, 0, bmax_eff));
    }

    let corners = [query.p1(), Point::new(query.p2().x, query.p1().y), Point::new(query.p1().x, query.p2().y), query.p2()];
    let mut amin = f64::INFINITY;
    let mut amax_d = f64::NEG_INFINITY;
    let mut bmin = f64::INFINITY;
    let mut bmax_d = f64::NEG_INFINITY;
    for p in corners {
        let (px, py) = (p.x as f64, p.y as f64);
        let ia = (px * eff_b.y as f64 - py * eff_b.x as f64) / det;
        let ib = (eff_a.x as f64 * py - eff_a.y as f64 * px) / det;
        amin = amin.min(ia);
        amax_d = amax_d.max(ia);
        bmin = bmin.min(ib);
        bmax_d = bmax_d.max(ib);
    }

    let ceiling = u32::MAX - 1;
    let amini = if amin < EPSILON { 0 } else { clamp_index(ceil_f64(amin - EPSILON), amax_eff, ceiling) };
    let amaxi = if amax_d < -EPSILON { 0 } else { clamp_index(floor_f64(amax_d + EPSILON) + 1, amax_eff, ceiling) };
    let bmini = if bmin < EPSILON { 0 } else { clamp_index(ceil_f64(bmin - EPSILON), bmax_eff, ceiling) };
    let bmaxi = if bmax_d < -EPSILON { 0 } else { clamp_index(floor_f64(bmax_d + EPSILON) + 1, bmax_eff, ceiling) };

    if amini >= amaxi || bmini >= bmaxi {
        return None;
    }
    Some((amini, amaxi, bmini, bmaxi))
}

fn clamp_index(v: f64, amax_eff: u32, ceiling: u32) -> u32 {
    let v = v.max(0.0).min(f64::from(u32::MAX));
    (v as u32).min(amax_eff).min(ceiling)
}

fn floor_f64(x: f64) -> f64 {
    let t = x as i64;
    if (t as f64) > x {
        (t - 1) as f64
    } else {
        t as f64
    }
}

fn ceil_f64(x: f64) -> f64 {
    let t = x as i64;
    if (t as f64) < x {
        (t + 1) as f64
    } else {
        t as f64
    }
}

/// Iterator over a placement descriptor's instance displacements, as
/// returned by [`PlacementKind::begin`]/[`PlacementKind::begin_touching`].
pub enum PlacementIter<'a> {
    /// `Regular`/`RegularComplex`: row-major over `[amini,amaxi) x [bmini,bmaxi)`,
    /// `i` fastest. `last` is the `(i, j)` of the most recently yielded
    /// instance, exposed to [`crate::ArrayIter::index_a`]/`index_b`.
    Lattice { a: Vector, b: Vector, i: u32, imax: u32, i0: u32, j: u32, jmax: u32, last: Option<(u32, u32)> },
    /// `Iterated`/`IteratedComplex`, unfiltered.
    Flat(layout_box_tree::Iter<'a, Vector>),
    /// `Iterated`/`IteratedComplex`, filtered by a touching query.
    Touching(layout_box_tree::TouchingIter<'a, Vector>),
    /// `SingleComplex`: `bool` is whether the single instance has already
    /// been consumed (or was excluded up front by an empty query).
    Single(bool),
}

impl<'a> PlacementIter<'a> {
    fn lattice(a: Vector, b: Vector, amini: u32, amaxi: u32, bmini: u32, bmaxi: u32) -> Self {
        Self::Lattice { a, b, i: amini, imax: amaxi, i0: amini, j: bmini, jmax: bmaxi, last: None }
    }

    /// The `(i, j)` lattice index of the most recently yielded instance, if
    /// this is a `Regular`/`RegularComplex` iterator and `next()` has
    /// yielded at least once.
    #[must_use]
    pub fn current_index(&self) -> Option<(u32, u32)> {
        match self {
            Self::Lattice { last, .. } => *last,
            Self::Flat(_) | Self::Touching(_) | Self::Single(_) => None,
        }
    }

    /// The quad the most recently yielded item belongs to, for iterated
    /// placements; [`layout_box_tree::QuadId::NONE`] otherwise.
    #[must_use]
    pub fn quad_id(&self) -> layout_box_tree::QuadId {
        match self {
            Self::Touching(it) => it.quad_id(),
            Self::Lattice { .. } | Self::Flat(_) | Self::Single(_) => layout_box_tree::QuadId::NONE,
        }
    }

    /// The bbox of [`PlacementIter::quad_id`]'s quad, or the world box.
    #[must_use]
    pub fn quad_box(&self) -> Box {
        match self {
            Self::Touching(it) => it.quad_box(),
            Self::Lattice { .. } | Self::Flat(_) | Self::Single(_) => Box::world(),
        }
    }

    /// Abandons the remaining items in the current quad, for iterated
    /// placements; a no-op otherwise.
    pub fn skip_quad(&mut self) {
        if let Self::Touching(it) = self {
            it.skip_quad();
        }
    }
}

impl Iterator for PlacementIter<'_> {
    type Item = Vector;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Lattice { a, b, i, imax, i0, j, jmax, last } => {
                if *i >= *imax || *j >= *jmax {
                    return None;
                }
                let disp = Vector::new(a.x * Coord::from(*i) + b.x * Coord::from(*j), a.y * Coord::from(*i) + b.y * Coord::from(*j));
                *last = Some((*i, *j));
                *i += 1;
                if *i >= *imax {
                    *i = *i0;
                    *j += 1;
                }
                Some(disp)
            }
            Self::Flat(it) => it.next().copied(),
            Self::Touching(it) => it.next().copied(),
            Self::Single(done) => {
                if *done {
                    None
                } else {
                    *done = true;
                    Some(Vector::ZERO)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(x0: i64, y0: i64, x1: i64, y1: i64) -> Box {
        Box::new(Point::new(x0, y0), Point::new(x1, y1))
    }

    #[test]
    fn regular_enumeration_is_row_major_i_fastest() {
        let p = PlacementKind::Regular { a: Vector::new(0, 100), b: Vector::new(200, 0), amax: 2, bmax: 3 };
        let got: Vec<Vector> = p.begin().collect();
        let expected = [(0, 0), (0, 100), (200, 0), (200, 100), (400, 0), (400, 100)]
            .map(|(x, y)| Vector::new(x, y));
        assert_eq!(got, expected);
        assert_eq!(p.size(), 6);
    }

    #[test]
    fn regular_touching_scenario_one() {
        let p = PlacementKind::Regular { a: Vector::new(0, 100), b: Vector::new(200, 0), amax: 2, bmax: 3 };
        let hits: Vec<Vector> = p.begin_touching(b(-30, -40, 190, 70)).collect();
        assert_eq!(hits, [Vector::new(0, 0)]);

        let none: Vec<Vector> = p.begin_touching(b(-30, 10, 190, 80)).collect();
        assert!(none.is_empty());

        let all: Vec<Vector> = p.begin_touching(b(-30, 0, 400, 100)).collect();
        assert_eq!(all.len(), 6);
    }

    #[test]
    fn degenerate_a_axis_does_not_duplicate_enumeration() {
        let p = PlacementKind::Regular { a: Vector::ZERO, b: Vector::new(200, 0), amax: 1, bmax: 3 };
        let got: Vec<Vector> = p.begin().collect();
        assert_eq!(got, [Vector::new(0, 0), Vector::new(200, 0), Vector::new(400, 0)]);
    }

    #[test]
    fn oblique_regular_enumeration_scenario_two() {
        let p = PlacementKind::Regular { a: Vector::new(10, 100), b: Vector::new(-200, 20), amax: 2, bmax: 3 };
        let got: Vec<Vector> = p.begin().collect();
        let expected = [(0, 0), (10, 100), (-200, 20), (-190, 120), (-400, 40), (-390, 140)].map(|(x, y)| Vector::new(x, y));
        assert_eq!(got, expected);
    }

    #[test]
    fn iterated_complex_enumeration_scenario_three() {
        let p = PlacementKind::iterated_complex([Vector::new(100, 500), Vector::new(-100, 200), Vector::new(-200, -100)], 1.0, 2.0);
        let mut got: Vec<Vector> = p.begin().collect();
        got.sort_by_key(|v| (v.x, v.y));
        let mut expected = [Vector::new(100, 500), Vector::new(-100, 200), Vector::new(-200, -100)];
        expected.sort_by_key(|v| (v.x, v.y));
        assert_eq!(got, expected);
        assert_eq!(p.size(), 3);
    }

    #[test]
    fn begin_at_restricts_to_the_given_index_sub_rectangle() {
        let p = PlacementKind::Regular { a: Vector::new(0, 100), b: Vector::new(200, 0), amax: 2, bmax: 3 };
        let got: Vec<Vector> = p.begin_at(1, 1).collect();
        let expected = [(200, 100), (400, 100)].map(|(x, y)| Vector::new(x, y));
        assert_eq!(got, expected);

        let single = PlacementKind::SingleComplex { rcos: 1.0, mag: 10.0 };
        let got: Vec<Vector> = single.begin_at(5, 5).collect();
        assert_eq!(got, [Vector::ZERO]);
    }

    #[test]
    fn exact_comparator_orders_by_type_tag_first() {
        let regular = PlacementKind::Regular { a: Vector::new(0, 100), b: Vector::new(200, 0), amax: 2, bmax: 3 };
        let single = PlacementKind::SingleComplex { rcos: 1.0, mag: 10.0 };
        assert!(regular.cmp_exact(&single).is_lt());
    }

    #[test]
    fn repository_dedup_keys_match_for_equal_descriptors() {
        let a = PlacementKind::Regular { a: Vector::new(0, 100), b: Vector::new(200, 0), amax: 2, bmax: 3 };
        let c = PlacementKind::Regular { a: Vector::new(0, 100), b: Vector::new(200, 0), amax: 2, bmax: 3 };
        let d = PlacementKind::Regular { a: Vector::new(0, 100), b: Vector::new(200, 0), amax: 2, bmax: 4 };
        assert!(a.eq_exact(&c));
        assert!(!a.eq_exact(&d));
    }
}
