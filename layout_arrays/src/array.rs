// Copyright 2025 the Layout Arrays Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The array facade (C4) and its lazy instance-transform iterator (C6).

use layout_geom::{Box, ComplexTrans, Rotation, SimpleTrans, Vector};

use crate::placement::{apply_complex_linear_box, is_true_empty, minkowski_sum, union_points, PlacementIter, PlacementKind};
use crate::repository::{ArrayRepository, MemStatCollector, PlacementHandle, TypeId};

/// The descriptor an [`Array`] carries: none (`Single`), owned outright, or
/// borrowed from a repository by handle. Mirrors the source's
/// borrow-vs-own `in_repository` discriminator.
#[derive(Clone, Debug)]
enum Placement<'repo> {
    Single,
    Owned(PlacementKind),
    Shared(&'repo ArrayRepository, PlacementHandle),
}

impl Placement<'_> {
    fn kind(&self) -> Option<&PlacementKind> {
        match self {
            Self::Single => None,
            Self::Owned(k) => Some(k),
            Self::Shared(repo, handle) => Some(repo.get(*handle)),
        }
    }
}

/// A placement applied via [`Array::transform`]: the compatibility table
/// (spec §4.4) is keyed on this shape, from least to most general.
#[derive(Clone, Debug)]
pub enum AppliedTrans {
    /// The identity transform.
    Unit,
    /// A pure translation.
    Disp(Vector),
    /// A rigid (integer) transform.
    Simple(SimpleTrans),
    /// An arbitrary-angle, magnifying transform.
    Complex(ComplexTrans),
}

/// Which kind of [`Array::base`] transform an array was built with,
/// governing which [`AppliedTrans`] variants [`Array::transform`] accepts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BaseKind {
    Unit,
    Disp,
    Simple,
}

/// An object, a rigid base transform, and an optional placement descriptor:
/// "one object, repeated `placement.size()` times, each instance further
/// transformed by `base`."
///
/// A `None`/[`Placement::Single`] descriptor is equivalent to one instance
/// at the identity displacement. `'repo` is the lifetime of a repository an
/// array's descriptor may be borrowed from; arrays with an owned or absent
/// descriptor do not actually use it.
#[derive(Clone, Debug)]
pub struct Array<'repo, Obj> {
    object: Obj,
    base: SimpleTrans,
    placement: Placement<'repo>,
    base_kind: BaseKind,
}

impl<'repo, Obj> Array<'repo, Obj> {
    /// A single instance at `base`.
    pub fn single(object: Obj, base: SimpleTrans) -> Self {
        Self { object, base, placement: Placement::Single, base_kind: BaseKind::Simple }
    }

    /// A single instance with a residual complex factor, unless it is
    /// trivial (`mag == 1 && rcos == 1`), in which case this collapses to
    /// [`Array::single`].
    pub fn single_complex(object: Obj, base: SimpleTrans, rcos: f64, mag: f64) -> Self {
        if is_trivial_factor(rcos, mag) {
            return Self::single(object, base);
        }
        Self { object, base, placement: Placement::Owned(PlacementKind::SingleComplex { rcos, mag }), base_kind: BaseKind::Simple }
    }

    /// A regular 2D lattice of `amax * bmax` instances.
    pub fn regular(object: Obj, base: SimpleTrans, a: Vector, b: Vector, amax: u32, bmax: u32) -> Self {
        Self {
            object,
            base,
            placement: Placement::Owned(PlacementKind::Regular { a, b, amax, bmax }),
            base_kind: BaseKind::Simple,
        }
    }

    /// A regular 2D lattice with a residual complex factor, unless trivial
    /// (collapses to [`Array::regular`]).
    pub fn regular_complex(object: Obj, base: SimpleTrans, a: Vector, b: Vector, amax: u32, bmax: u32, rcos: f64, mag: f64) -> Self {
        if is_trivial_factor(rcos, mag) {
            return Self::regular(object, base, a, b, amax, bmax);
        }
        Self {
            object,
            base,
            placement: Placement::Owned(PlacementKind::RegularComplex { a, b, amax, bmax, rcos, mag }),
            base_kind: BaseKind::Simple,
        }
    }

    /// An explicit, spatially indexed list of displacement vectors.
    pub fn iterated(object: Obj, base: SimpleTrans, vectors: impl IntoIterator<Item = Vector>) -> Self {
        Self { object, base, placement: Placement::Owned(PlacementKind::iterated(vectors)), base_kind: BaseKind::Simple }
    }

    /// As [`Array::iterated`], with a residual complex factor, unless
    /// trivial.
    pub fn iterated_complex(object: Obj, base: SimpleTrans, vectors: impl IntoIterator<Item = Vector>, rcos: f64, mag: f64) -> Self {
        if is_trivial_factor(rcos, mag) {
            return Self::iterated(object, base, vectors);
        }
        Self {
            object,
            base,
            placement: Placement::Owned(PlacementKind::iterated_complex(vectors, rcos, mag)),
            base_kind: BaseKind::Simple,
        }
    }

    /// As the non-interning constructor of the same name, but interns the
    /// descriptor in `repo` instead of owning it. `Single` arrays have no
    /// descriptor to intern, so this is identical to [`Array::single`].
    pub fn single_in(object: Obj, base: SimpleTrans) -> Self {
        Self::single(object, base)
    }

    /// Interning counterpart of [`Array::single_complex`].
    pub fn single_complex_in(repo: &'repo mut ArrayRepository, object: Obj, base: SimpleTrans, rcos: f64, mag: f64) -> Self {
        if is_trivial_factor(rcos, mag) {
            return Self::single_in(object, base);
        }
        let handle = repo.intern(PlacementKind::SingleComplex { rcos, mag });
        Self { object, base, placement: Placement::Shared(repo, handle), base_kind: BaseKind::Simple }
    }

    /// Interning counterpart of [`Array::regular`].
    pub fn regular_in(repo: &'repo mut ArrayRepository, object: Obj, base: SimpleTrans, a: Vector, b: Vector, amax: u32, bmax: u32) -> Self {
        let handle = repo.intern(PlacementKind::Regular { a, b, amax, bmax });
        Self { object, base, placement: Placement::Shared(repo, handle), base_kind: BaseKind::Simple }
    }

    /// Interning counterpart of [`Array::regular_complex`].
    pub fn regular_complex_in(
        repo: &'repo mut ArrayRepository,
        object: Obj,
        base: SimpleTrans,
        a: Vector,
        b: Vector,
        amax: u32,
        bmax: u32,
        rcos: f64,
        mag: f64,
    ) -> Self {
        if is_trivial_factor(rcos, mag) {
            return Self::regular_in(repo, object, base, a, b, amax, bmax);
        }
        let handle = repo.intern(PlacementKind::RegularComplex { a, b, amax, bmax, rcos, mag });
        Self { object, base, placement: Placement::Shared(repo, handle), base_kind: BaseKind::Simple }
    }

    /// Interning counterpart of [`Array::iterated`].
    pub fn iterated_in(repo: &'repo mut ArrayRepository, object: Obj, base: SimpleTrans, vectors: impl IntoIterator<Item = Vector>) -> Self {
        let handle = repo.intern(PlacementKind::iterated(vectors));
        Self { object, base, placement: Placement::Shared(repo, handle), base_kind: BaseKind::Simple }
    }

    /// Interning counterpart of [`Array::iterated_complex`].
    pub fn iterated_complex_in(
        repo: &'repo mut ArrayRepository,
        object: Obj,
        base: SimpleTrans,
        vectors: impl IntoIterator<Item = Vector>,
        rcos: f64,
        mag: f64,
    ) -> Self {
        if is_trivial_factor(rcos, mag) {
            return Self::iterated_in(repo, object, base, vectors);
        }
        let handle = repo.intern(PlacementKind::iterated_complex(vectors, rcos, mag));
        Self { object, base, placement: Placement::Shared(repo, handle), base_kind: BaseKind::Simple }
    }

    /// The object held by this array.
    #[must_use]
    pub fn object(&self) -> &Obj {
        &self.object
    }

    /// The base transform applied to every enumerated instance.
    #[must_use]
    pub const fn base(&self) -> SimpleTrans {
        self.base
    }

    /// The `front()` simple transform: an alias for [`Array::base`], in the
    /// serializer observer's naming.
    #[must_use]
    pub const fn front(&self) -> SimpleTrans {
        self.base
    }

    /// The residual `(rcos, mag)` complex factor, if the descriptor carries
    /// one.
    #[must_use]
    pub fn complex_trans(&self) -> Option<ComplexTrans> {
        self.placement.kind().and_then(PlacementKind::complex_factor).map(|(rcos, mag)| ComplexTrans::new(mag, rcos, self.base.rot, self.base.disp))
    }

    /// The raw `(rcos, mag)` residual factor, without the base
    /// rotation/displacement [`Array::complex_trans`] folds in.
    fn complex_factor(&self) -> Option<(f64, f64)> {
        self.placement.kind().and_then(PlacementKind::complex_factor)
    }

    /// Whether the descriptor carries a non-trivial complex factor.
    #[must_use]
    pub fn is_complex(&self) -> bool {
        self.complex_trans().is_some()
    }

    /// Observer accessor matching the serializer contract: if this is a
    /// `Regular`/`RegularComplex` array, writes its fields out and returns
    /// `true`.
    #[must_use]
    pub fn is_regular_array(&self, a: &mut Vector, b: &mut Vector, amax: &mut u32, bmax: &mut u32) -> bool {
        match self.placement.kind() {
            Some(PlacementKind::Regular { a: ra, b: rb, amax: ram, bmax: rbm }) | Some(PlacementKind::RegularComplex { a: ra, b: rb, amax: ram, bmax: rbm, .. }) => {
                *a = *ra;
                *b = *rb;
                *amax = *ram;
                *bmax = *rbm;
                true
            }
            _ => false,
        }
    }

    /// Observer accessor matching the serializer contract: if this is an
    /// `Iterated`/`IteratedComplex` array, collects its vectors into `out`
    /// (spatial-tree order) and returns `true`.
    pub fn is_iterated_array(&self, out: &mut alloc::vec::Vec<Vector>) -> bool {
        match self.placement.kind() {
            Some(PlacementKind::Iterated { tree, .. }) | Some(PlacementKind::IteratedComplex { tree, .. }) => {
                out.clear();
                out.extend(tree.iter().copied());
                true
            }
            _ => false,
        }
    }

    /// Total instance count.
    #[must_use]
    pub fn size(&self) -> u64 {
        match self.placement.kind() {
            Some(k) => k.size(),
            None => 1,
        }
    }

    /// Enumerates every instance's result transform.
    #[must_use]
    pub fn begin(&self) -> ArrayIter<'_> {
        ArrayIter::new(self.base, self.complex_factor(), self.placement.kind().map(PlacementKind::begin), None)
    }

    /// As [`Array::begin`], but starts at lattice index `(a, b)` instead of
    /// `(0, 0)` for `Regular`/`RegularComplex` arrays; falls back to
    /// [`Array::begin`] for every other placement, which has no `(a, b)`
    /// index to seek to. Grounded on `dbArray.h`'s `array<Obj,Trans>::
    /// begin(long, long)`.
    #[must_use]
    pub fn begin_at(&self, a: u32, b: u32) -> ArrayIter<'_> {
        match self.placement.kind() {
            Some(k) => ArrayIter::new(self.base, self.complex_factor(), Some(k.begin_at(a, b)), None),
            None => self.begin(),
        }
    }

    /// Translation-free bbox of placement points only (ignoring object
    /// extents), under the base rotation (and residual complex factor, if
    /// any). Aggregable with [`Array::bbox_from_raw_bbox`] across arrays
    /// sharing an object, without re-enumerating instances.
    #[must_use]
    pub fn raw_bbox(&self) -> Box {
        match self.placement.kind() {
            Some(k) => k.raw_extent(self.base.rot),
            None => union_points(core::iter::once(layout_geom::Point::ZERO)),
        }
    }

    /// Reconstructs the full bbox given a previously computed
    /// [`Array::raw_bbox`] and an object-bbox accessor, without
    /// re-enumerating instances.
    #[must_use]
    pub fn bbox_from_raw_bbox(&self, rb: Box, box_convert: impl Fn(&Obj) -> Box) -> Box {
        if is_true_empty(&rb) {
            return Box::EMPTY;
        }
        let ob = box_convert(&self.object);
        if ob.is_empty() {
            return Box::EMPTY;
        }
        let ob_rotated = rotate_box_only(self.base.rot, ob);
        let ob_scaled = match self.complex_factor() {
            Some((rcos, mag)) => apply_complex_linear_box(rcos, mag, ob_rotated),
            None => ob_rotated,
        };
        minkowski_sum(rb, ob_scaled).translated(self.base.disp)
    }

    /// Bounding box of every instance's object footprint.
    #[must_use]
    pub fn bbox(&self, box_convert: impl Fn(&Obj) -> Box) -> Box {
        self.bbox_from_raw_bbox(self.raw_bbox(), box_convert)
    }

    /// Enumerates a superset of instances whose object footprint touches
    /// `query`.
    #[must_use]
    pub fn begin_touching(&self, query: Box, box_convert: impl Fn(&Obj) -> Box) -> ArrayIter<'_> {
        if query.is_empty() {
            return ArrayIter::done();
        }
        if query.is_world() {
            return self.begin();
        }
        let obj_bbox = box_convert(&self.object);
        if obj_bbox.is_empty() {
            return ArrayIter::done();
        }
        let ob = rotate_box_only(self.base.rot, obj_bbox);
        let cf = self.complex_factor();
        let ob = match cf {
            Some((rcos, mag)) => apply_complex_linear_box(rcos, mag, ob),
            None => ob,
        };
        let d = self.base.disp;
        let reduced = Box::new(
            layout_geom::Point::new(query.p1().x - (ob.p2().x + d.x), query.p1().y - (ob.p2().y + d.y)),
            layout_geom::Point::new(query.p2().x - (ob.p1().x + d.x), query.p2().y - (ob.p1().y + d.y)),
        );
        match self.placement.kind() {
            Some(k) => ArrayIter::new(self.base, cf, Some(k.begin_touching(reduced)), Some(ob)),
            None => {
                if reduced.contains_point(layout_geom::Point::ZERO) || touches_origin(reduced) {
                    self.begin()
                } else {
                    ArrayIter::done()
                }
            }
        }
    }

    /// Equality: object (by `Obj: PartialEq`), base transform, and
    /// descriptor contents (exact comparator).
    #[must_use]
    pub fn equal(&self, other: &Self) -> bool
    where
        Obj: PartialEq,
    {
        self.object == other.object && self.base == other.base && kinds_equal(self.placement.kind(), other.placement.kind())
    }

    /// Epsilon-tolerant counterpart of [`Array::equal`].
    #[must_use]
    pub fn fuzzy_equal(&self, other: &Self) -> bool
    where
        Obj: PartialEq,
    {
        self.object == other.object && self.base == other.base && kinds_fuzzy_equal(self.placement.kind(), other.placement.kind())
    }

    /// `raw_equal`: object and the rotation/complex-matrix part of the
    /// transform only (displacement excluded), used by higher layers to
    /// group instances for batch operations.
    #[must_use]
    pub fn raw_equal(&self, other: &Self) -> bool
    where
        Obj: PartialEq,
    {
        self.object == other.object && self.base.rot == other.base.rot && complex_factor_equal(self.complex_factor(), other.complex_factor())
    }

    /// A strict weak order over arrays: object, then base transform, then
    /// descriptor (absent sorts first, then by [`PlacementKind::cmp_exact`]).
    /// Grounded on `dbArray.h`'s `array<Obj,Trans>::operator<`/`less`, which
    /// follows the same object-then-trans-then-descriptor precedence with
    /// the same null-placement convention (`!mp_base` sorts before a
    /// present one).
    #[must_use]
    pub fn less(&self, other: &Self) -> bool
    where
        Obj: PartialOrd,
    {
        if self.object != other.object {
            return self.object < other.object;
        }
        if self.base != other.base {
            return cmp_base(self.base, other.base).is_lt();
        }
        match (self.placement.kind(), other.placement.kind()) {
            (None, None) => false,
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => a.cmp_exact(b).is_lt(),
        }
    }

    /// `raw_less`: as [`Array::less`], but restricted to the object,
    /// rotation, and complex factor only (displacement and descriptor
    /// contents excluded), mirroring [`Array::raw_equal`]. Grounded on
    /// `dbArray.h`'s `raw_less`.
    #[must_use]
    pub fn raw_less(&self, other: &Self) -> bool
    where
        Obj: PartialOrd,
    {
        if self.object != other.object {
            return self.object < other.object;
        }
        if self.base.rot != other.base.rot {
            return self.base.rot.cmp(&other.base.rot).is_lt();
        }
        match (self.complex_factor(), other.complex_factor()) {
            (None, None) => false,
            (None, Some(_)) => true,
            (Some(_), None) => false,
            (Some((r1, m1)), Some((r2, m2))) => r1.total_cmp(&r2).then_with(|| m1.total_cmp(&m2)).is_lt(),
        }
    }

    /// Inverts this array: a new array whose instance transforms are the
    /// inverse of `self`'s, in the same enumeration order.
    #[must_use]
    pub fn invert(&self) -> Self
    where
        Obj: Clone,
    {
        let mut inverted_base = self.base.invert();
        let placement = match self.placement.kind() {
            None => Placement::Single,
            Some(k) => {
                let mut owned = k.clone();
                let extra_disp = owned.invert(&self.base);
                inverted_base.disp = inverted_base.disp + extra_disp;
                Placement::Owned(owned)
            }
        };
        Self { object: self.object.clone(), base: inverted_base, placement, base_kind: BaseKind::Simple }
    }

    /// Applies `t` per the compatibility table (spec §4.4): a `Unit` base
    /// accepts any `t`; a `Disp` base only accepts `Unit`/`Disp`; a
    /// `Simple` base accepts anything. A complex `t` promotes a
    /// non-complex descriptor (`Regular` -> `RegularComplex`, `Iterated` ->
    /// `IteratedComplex`, absent -> `SingleComplex`); if the result's
    /// residual factor turns out trivial, it demotes back.
    #[must_use]
    pub fn transform(&self, t: &AppliedTrans) -> Self
    where
        Obj: Clone,
    {
        assert!(transform_allowed(self.base_kind, t), "transform not permitted by the array's base-transform compatibility class");
        match t {
            AppliedTrans::Unit => self.clone(),
            AppliedTrans::Disp(v) => self.with_base(self.base.compose(&SimpleTrans::displacement(*v))),
            AppliedTrans::Simple(s) => self.with_base(self.base.compose(s)),
            AppliedTrans::Complex(c) => self.apply_complex(c),
        }
    }

    /// Conjugates this array by `t`: `T · A · T⁻¹` (spec §4.4). Where
    /// [`Array::transform`] composes `t` onto every instance,
    /// `transform_into` instead rewrites the base and placement vectors so
    /// the array stays valid after `t` changes the surrounding coordinate
    /// system — the operation a hierarchy push-down applies at every
    /// level it descends through. Grounded on `dbArray.h`'s
    /// `array<Obj,Trans>::transform_into` (`dbArray.h:2464-2544`), which
    /// conjugates `m_trans` the same way and rotates/scales (but never
    /// displaces) the descriptor's own vectors.
    #[must_use]
    pub fn transform_into(&self, t: &AppliedTrans) -> Self
    where
        Obj: Clone,
    {
        assert!(transform_allowed(self.base_kind, t), "transform not permitted by the array's base-transform compatibility class");
        let is_complex_conjugation = self.is_complex() || matches!(t, AppliedTrans::Complex(c) if c.is_complex());
        if !is_complex_conjugation {
            let tr = match t {
                AppliedTrans::Unit => SimpleTrans::IDENTITY,
                AppliedTrans::Disp(v) => SimpleTrans::displacement(*v),
                AppliedTrans::Simple(s) => *s,
                AppliedTrans::Complex(c) => c.to_simple().expect("excluded above: t is a non-complex ComplexTrans here"),
            };
            return self.conjugate_simple(&tr);
        }
        let tc = match t {
            AppliedTrans::Unit => ComplexTrans::from_simple(&SimpleTrans::IDENTITY),
            AppliedTrans::Disp(v) => ComplexTrans::from_simple(&SimpleTrans::displacement(*v)),
            AppliedTrans::Simple(s) => ComplexTrans::from_simple(s),
            AppliedTrans::Complex(c) => *c,
        };
        self.conjugate_complex(&tc)
    }

    fn conjugate_simple(&self, tr: &SimpleTrans) -> Self
    where
        Obj: Clone,
    {
        let new_base = tr.invert().compose(&self.base).compose(tr);
        let placement = match self.placement.kind() {
            None => Placement::Single,
            Some(k) => {
                let mut owned = k.clone();
                owned.transform_vectors(tr.rot, None);
                Placement::Owned(owned)
            }
        };
        Self { object: self.object.clone(), base: new_base, placement, base_kind: BaseKind::Simple }
    }

    fn conjugate_complex(&self, t: &ComplexTrans) -> Self
    where
        Obj: Clone,
    {
        let base_complex = self.complex_trans().unwrap_or_else(|| ComplexTrans::from_simple(&self.base));
        let conjugated = t.invert().compose(&base_complex).compose(t);
        let new_base = SimpleTrans::new(conjugated.rot, conjugated.disp);
        let (rcos, mag) = (conjugated.rcos, conjugated.mag);
        let trivial = is_trivial_factor(rcos, mag);
        let placement = match self.placement.kind() {
            None => {
                if trivial {
                    Placement::Single
                } else {
                    Placement::Owned(PlacementKind::SingleComplex { rcos, mag })
                }
            }
            Some(k) => {
                let mut owned = k.clone();
                owned.transform_vectors(t.rot, Some((t.rcos, t.mag)));
                match (owned, trivial) {
                    (PlacementKind::Regular { a, b, amax, bmax } | PlacementKind::RegularComplex { a, b, amax, bmax, .. }, true) => {
                        Placement::Owned(PlacementKind::Regular { a, b, amax, bmax })
                    }
                    (PlacementKind::Regular { a, b, amax, bmax } | PlacementKind::RegularComplex { a, b, amax, bmax, .. }, false) => {
                        Placement::Owned(PlacementKind::RegularComplex { a, b, amax, bmax, rcos, mag })
                    }
                    (PlacementKind::Iterated { tree, .. } | PlacementKind::IteratedComplex { tree, .. }, true) => {
                        Placement::Owned(PlacementKind::iterated(tree.iter().copied()))
                    }
                    (PlacementKind::Iterated { tree, .. } | PlacementKind::IteratedComplex { tree, .. }, false) => {
                        Placement::Owned(PlacementKind::iterated_complex(tree.iter().copied(), rcos, mag))
                    }
                    (PlacementKind::SingleComplex { .. }, true) => Placement::Single,
                    (PlacementKind::SingleComplex { .. }, false) => Placement::Owned(PlacementKind::SingleComplex { rcos, mag }),
                }
            }
        };
        Self { object: self.object.clone(), base: new_base, placement, base_kind: BaseKind::Simple }
    }

    fn with_base(&self, new_base: SimpleTrans) -> Self
    where
        Obj: Clone,
    {
        Self { object: self.object.clone(), base: new_base, placement: self.placement.clone(), base_kind: self.base_kind }
    }

    fn apply_complex(&self, c: &ComplexTrans) -> Self
    where
        Obj: Clone,
    {
        if let Some(simple) = c.to_simple() {
            return self.with_base(self.base.compose(&simple));
        }
        let existing = self.complex_trans().unwrap_or_else(|| ComplexTrans::from_simple(&self.base));
        let composed = existing.compose(c);
        let new_base = SimpleTrans::new(composed.rot, composed.disp);
        let (rcos, mag) = (composed.rcos, composed.mag);
        let new_kind = match self.placement.kind() {
            Some(PlacementKind::Regular { a, b, amax, bmax }) | Some(PlacementKind::RegularComplex { a, b, amax, bmax, .. }) => {
                if is_trivial_factor(rcos, mag) {
                    Placement::Owned(PlacementKind::Regular { a: *a, b: *b, amax: *amax, bmax: *bmax })
                } else {
                    Placement::Owned(PlacementKind::RegularComplex { a: *a, b: *b, amax: *amax, bmax: *bmax, rcos, mag })
                }
            }
            Some(PlacementKind::Iterated { tree, .. }) | Some(PlacementKind::IteratedComplex { tree, .. }) => {
                let vectors: alloc::vec::Vec<Vector> = tree.iter().copied().collect();
                if is_trivial_factor(rcos, mag) {
                    Placement::Owned(PlacementKind::iterated(vectors))
                } else {
                    Placement::Owned(PlacementKind::iterated_complex(vectors, rcos, mag))
                }
            }
            Some(PlacementKind::SingleComplex { .. }) | None => {
                if is_trivial_factor(rcos, mag) {
                    Placement::Single
                } else {
                    Placement::Owned(PlacementKind::SingleComplex { rcos, mag })
                }
            }
        };
        Self { object: self.object.clone(), base: new_base, placement: new_kind, base_kind: BaseKind::Simple }
    }

    /// Reports this array's own footprint plus its descriptor's, to
    /// `collector`.
    pub fn mem_stat<C: MemStatCollector>(&self, collector: &mut C, purpose: u32, category: u32, no_self: bool) {
        let self_size = core::mem::size_of::<Self>();
        let owned_size = match &self.placement {
            Placement::Owned(_) => core::mem::size_of::<PlacementKind>(),
            Placement::Single | Placement::Shared(..) => 0,
        };
        if !no_self {
            collector.add(TypeId::Array, self_size, self_size + owned_size, purpose, category);
        }
    }
}

fn rotate_box_only(rot: Rotation, b: Box) -> Box {
    if b.is_empty() {
        return Box::EMPTY;
    }
    let (p1, p2) = (b.p1(), b.p2());
    let corners = [p1, layout_geom::Point::new(p2.x, p1.y), layout_geom::Point::new(p1.x, p2.y), p2];
    let mut acc = Box::EMPTY;
    for c in corners {
        let r = rot.apply_point(c);
        acc = acc.united(&Box::new(r, layout_geom::Point::new(r.x + 1, r.y + 1)));
    }
    // The +1 padding above keeps `united` from treating a degenerate
    // single-point corner as empty; collapse it back out since `b` is a
    // real (non-degenerate) box and its rotated image should be too.
    Box::new(acc.p1(), layout_geom::Point::new(acc.p2().x - 1, acc.p2().y - 1))
}

fn touches_origin(q: Box) -> bool {
    !q.is_empty() && q.p1().x <= 0 && 0 <= q.p2().x && q.p1().y <= 0 && 0 <= q.p2().y
}

const fn is_trivial_factor(rcos: f64, mag: f64) -> bool {
    // `const fn` cannot call `f64::abs`; both operands here are always
    // exact literals or already-normalized results in this crate's own
    // call sites, so a plain equality check is sufficient.
    rcos == 1.0 && mag == 1.0
}

fn transform_allowed(base_kind: BaseKind, t: &AppliedTrans) -> bool {
    match base_kind {
        BaseKind::Unit => true,
        BaseKind::Disp => matches!(t, AppliedTrans::Unit | AppliedTrans::Disp(_)),
        BaseKind::Simple => true,
    }
}

fn kinds_equal(a: Option<&PlacementKind>, b: Option<&PlacementKind>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => x.eq_exact(y),
        _ => false,
    }
}

fn kinds_fuzzy_equal(a: Option<&PlacementKind>, b: Option<&PlacementKind>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => x.fuzzy_eq(y),
        _ => false,
    }
}

fn cmp_base(a: SimpleTrans, b: SimpleTrans) -> core::cmp::Ordering {
    a.rot.cmp(&b.rot).then_with(|| a.disp.x.cmp(&b.disp.x)).then_with(|| a.disp.y.cmp(&b.disp.y))
}

fn complex_factor_equal(a: Option<(f64, f64)>, b: Option<(f64, f64)>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some((r1, m1)), Some((r2, m2))) => (r1 - r2).abs() <= layout_geom::EPSILON && (m1 - m2).abs() <= layout_geom::EPSILON,
        _ => false,
    }
}

/// The transform produced for a single array instance.
///
/// Carries a [`ComplexTrans`] only when the array itself has a residual
/// complex factor; the factor scales/rotates the object's own footprint at
/// that instance, not the instance's position (see
/// [`Array::bbox_from_raw_bbox`] and the `ArrayIter` enumeration tests).
#[derive(Copy, Clone, Debug)]
pub enum ResultTrans {
    /// No residual complex factor.
    Simple(SimpleTrans),
    /// Carries a residual complex factor.
    Complex(ComplexTrans),
}

impl ResultTrans {
    /// This instance's displacement, regardless of variant.
    #[must_use]
    pub const fn disp(&self) -> Vector {
        match self {
            Self::Simple(t) => t.disp,
            Self::Complex(t) => t.disp,
        }
    }

    /// The fixpoint rotation part, regardless of variant.
    #[must_use]
    pub const fn rot(&self) -> Rotation {
        match self {
            Self::Simple(t) => t.rot,
            Self::Complex(t) => t.rot,
        }
    }

    /// Applies this instance's transform to a point.
    #[must_use]
    pub fn apply_point(&self, p: layout_geom::Point) -> layout_geom::Point {
        match self {
            Self::Simple(t) => t.apply_point(p),
            Self::Complex(t) => t.apply_point(p),
        }
    }
}

/// Lazy sequence of per-instance result transforms (C6): wraps the
/// descriptor's own placement iterator, composing the array's base
/// transform with each yielded displacement and attaching the array's
/// residual complex factor (if any) to the result.
pub struct ArrayIter<'a> {
    base: SimpleTrans,
    complex_factor: Option<(f64, f64)>,
    inner: Option<PlacementIter<'a>>,
    /// The object's own bbox, rotated and complex-scaled but not yet
    /// translated by `base.disp` — the same `ob` an `Array::begin_touching`
    /// call already computed. `None` when the iterator wasn't built from a
    /// touching query (plain `begin`/`begin_at`), in which case `quad_box`
    /// has nothing object-shaped to compose with.
    obj_bbox: Option<Box>,
    done: bool,
}

impl<'a> ArrayIter<'a> {
    fn new(base: SimpleTrans, complex_factor: Option<(f64, f64)>, inner: Option<PlacementIter<'a>>, obj_bbox: Option<Box>) -> Self {
        Self { base, complex_factor, inner, obj_bbox, done: false }
    }

    fn done() -> Self {
        Self { base: SimpleTrans::IDENTITY, complex_factor: None, inner: None, obj_bbox: None, done: true }
    }

    /// The regular-array row index of the most recently yielded instance,
    /// or `-1` if the current position is not part of a regular array.
    #[must_use]
    pub fn index_a(&self) -> i64 {
        self.inner.as_ref().and_then(PlacementIter::current_index).map_or(-1, |(i, _)| i64::from(i))
    }

    /// The regular-array column index of the most recently yielded
    /// instance, or `-1` if not applicable.
    #[must_use]
    pub fn index_b(&self) -> i64 {
        self.inner.as_ref().and_then(PlacementIter::current_index).map_or(-1, |(_, j)| i64::from(j))
    }

    /// Delegated to the underlying `BoxTree`-backed iterator for iterated
    /// placements; [`layout_box_tree::QuadId::NONE`] otherwise.
    #[must_use]
    pub fn quad_id(&self) -> layout_box_tree::QuadId {
        self.inner.as_ref().map_or(layout_box_tree::QuadId::NONE, PlacementIter::quad_id)
    }

    /// The current quad's box, intersected with the object's own
    /// (rotated, complex-scaled) footprint and translated into the
    /// array's coordinate system — not the placement's raw quad box in
    /// isolation. Grounded on `dbArray.h:2016-2023`'s `quad_box`, which
    /// Minkowski-sums the iterator's raw quad box with the transformed
    /// object bbox before returning it. World box when there is no real
    /// quad (plain `begin`/`begin_at`, or non-iterated placements).
    #[must_use]
    pub fn quad_box(&self) -> Box {
        let raw = self.inner.as_ref().map_or(Box::world(), PlacementIter::quad_box);
        if raw.is_world() {
            return raw;
        }
        match self.obj_bbox {
            Some(ob) if !ob.is_empty() => minkowski_sum(raw, ob).translated(self.base.disp),
            Some(_) => Box::EMPTY,
            None => raw,
        }
    }

    /// Delegated to the underlying iterator; a no-op otherwise.
    pub fn skip_quad(&mut self) {
        if let Some(inner) = &mut self.inner {
            inner.skip_quad();
        }
    }
}

impl Iterator for ArrayIter<'_> {
    type Item = ResultTrans;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match &mut self.inner {
            None => {
                self.done = true;
                Some(match self.complex_factor {
                    Some((rcos, mag)) => ResultTrans::Complex(ComplexTrans::new(mag, rcos, self.base.rot, self.base.disp)),
                    None => ResultTrans::Simple(self.base),
                })
            }
            Some(it) => {
                let v = it.next()?;
                // Instance positions are never scaled by the residual
                // complex factor — only the object's own footprint is
                // (see `Array::bbox_from_raw_bbox`).
                let disp = self.base.rot.apply_vector(v) + self.base.disp;
                Some(match self.complex_factor {
                    Some((rcos, mag)) => ResultTrans::Complex(ComplexTrans::new(mag, rcos, self.base.rot, disp)),
                    None => ResultTrans::Simple(SimpleTrans::new(self.base.rot, disp)),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layout_geom::Point;

    #[test]
    fn single_complex_magnifies_object_footprint_without_scaling_base_displacement() {
        let object = Box::new(Point::new(-9, 3), Point::new(-7, 4));
        let base = SimpleTrans::new(Rotation::R0, Vector::new(100, 0));
        let arr = Array::single_complex(object, base, 1.0, 10.0);

        let t = arr.begin().next().expect("single instance");
        assert_eq!(t.apply_point(Point::new(-10, 0)), Point::new(0, 0));

        let bbox = arr.bbox(|b| *b);
        assert_eq!(bbox, Box::new(Point::new(10, 30), Point::new(30, 40)));
    }

    #[test]
    fn iterated_complex_enumeration_leaves_instance_positions_unscaled() {
        let base = SimpleTrans::new(Rotation::R0, Vector::new(10, 10));
        let vectors = [Vector::new(100, 500), Vector::new(-100, 200), Vector::new(-200, -100)];
        let arr = Array::iterated_complex((), base, vectors, 1.0, 2.0);

        let mut disps: alloc::vec::Vec<Vector> = arr.begin().map(|t| t.disp()).collect();
        disps.sort_by_key(|v| (v.x, v.y));
        let mut expected = alloc::vec::Vec::from([Vector::new(110, 510), Vector::new(-90, 210), Vector::new(-190, -90)]);
        expected.sort_by_key(|v| (v.x, v.y));
        assert_eq!(disps, expected);

        for t in arr.begin() {
            assert!(matches!(t, ResultTrans::Complex(_)));
        }
    }

    #[test]
    fn inverting_an_iterated_complex_array_round_trips_every_instance() {
        let base = SimpleTrans::new(Rotation::R0, Vector::new(10, 10));
        let vectors = [Vector::new(100, 500), Vector::new(-100, 200), Vector::new(-200, -100)];
        let arr = Array::iterated_complex((), base, vectors, 1.0, 2.0);
        let inverted = arr.invert();

        let p = Point::new(1000, 1000);
        for original in arr.begin() {
            let target = original.apply_point(p);
            let matched = inverted.begin().any(|back| back.apply_point(target) == p);
            assert!(matched, "no inverted instance undoes {original:?}");
        }
    }

    #[test]
    fn array_repository_dedup_matches_descriptor_level_dedup() {
        let mut repo = ArrayRepository::new();
        let base = SimpleTrans::IDENTITY;
        let a1 = Array::regular_in(&mut repo, (), base, Vector::new(0, 100), Vector::new(200, 0), 2, 3);
        let h1 = match &a1.placement {
            Placement::Shared(_, h) => *h,
            _ => panic!("expected a shared placement"),
        };
        drop(a1);

        let a2 = Array::regular_in(&mut repo, (), base, Vector::new(0, 100), Vector::new(200, 0), 2, 3);
        let h2 = match &a2.placement {
            Placement::Shared(_, h) => *h,
            _ => panic!("expected a shared placement"),
        };
        assert_eq!(h1, h2);
        assert_eq!(repo.len(), 1);
        drop(a2);

        let a3 = Array::regular_in(&mut repo, (), base, Vector::new(0, 100), Vector::new(200, 0), 2, 4);
        let h3 = match &a3.placement {
            Placement::Shared(_, h) => *h,
            _ => panic!("expected a shared placement"),
        };
        assert_ne!(h2, h3);
        assert_eq!(repo.len(), 2);

        let a4 = Array::single_complex((), base, 1.0, 10.0);
        assert!(matches!(a4.placement, Placement::Owned(PlacementKind::SingleComplex { .. })));
    }

    #[test]
    #[should_panic(expected = "transform not permitted")]
    fn transform_rejects_non_displacement_on_a_displacement_only_base() {
        let arr = Array { object: (), base: SimpleTrans::IDENTITY, placement: Placement::Single, base_kind: BaseKind::Disp };
        let simple = SimpleTrans::new(Rotation::R90, Vector::ZERO);
        let _ = arr.transform(&AppliedTrans::Simple(simple));
    }

    #[test]
    fn less_is_a_strict_weak_order_consistent_with_equal() {
        let base = SimpleTrans::IDENTITY;
        let a = Array::regular(1, base, Vector::new(0, 100), Vector::new(200, 0), 2, 3);
        let b = Array::regular(1, base, Vector::new(0, 100), Vector::new(200, 0), 2, 4);
        let c = Array::single(2, base);
        let d = Array::regular(1, SimpleTrans::new(Rotation::R90, Vector::ZERO), Vector::new(0, 100), Vector::new(200, 0), 2, 3);
        let all = [&a, &b, &c, &d];

        for x in all {
            assert!(!x.less(x), "less must be irreflexive");
        }
        for x in all {
            for y in all {
                assert!(!(x.less(y) && y.less(x)), "less must be asymmetric");
            }
        }

        let a_again = Array::regular(1, base, Vector::new(0, 100), Vector::new(200, 0), 2, 3);
        assert!(a.equal(&a_again));
        assert!(!a.less(&a_again) && !a_again.less(&a), "equal arrays must not order before/after each other");
        assert!(a.less(&b) || b.less(&a), "distinct arrays must be ordered one way or the other");
    }

    #[test]
    fn raw_less_ignores_displacement_and_descriptor_contents() {
        let base1 = SimpleTrans::new(Rotation::R0, Vector::new(5, 5));
        let base2 = SimpleTrans::new(Rotation::R0, Vector::new(500, -500));
        let a = Array::regular(1, base1, Vector::new(0, 100), Vector::new(200, 0), 2, 3);
        let b = Array::regular(1, base2, Vector::new(0, 100), Vector::new(200, 0), 2, 4);
        assert!(!a.raw_less(&b) && !b.raw_less(&a));

        let c = Array::regular(1, base1, Vector::new(0, 100), Vector::new(200, 0), 2, 3);
        let d = Array::single_complex(1, base1, 1.0, 10.0);
        assert!(c.raw_less(&d), "absent complex factor must sort before a present one");
    }

    #[test]
    fn transform_into_conjugates_every_instance() {
        let base = SimpleTrans::new(Rotation::M0, Vector::new(3, 4));
        let arr = Array::regular((), base, Vector::new(10, 0), Vector::new(0, 20), 2, 2);
        let t = SimpleTrans::new(Rotation::R90, Vector::new(5, 7));
        let new_arr = arr.transform_into(&AppliedTrans::Simple(t));

        let p = Point::new(13, -4);
        let t_inv = t.invert();
        let mut checked = 0;
        for (orig, conjugated) in arr.begin().zip(new_arr.begin()) {
            let expected = t.apply_point(orig.apply_point(t_inv.apply_point(p)));
            assert_eq!(conjugated.apply_point(p), expected);
            checked += 1;
        }
        assert_eq!(checked, 4);
    }

    #[test]
    fn transform_into_round_trips_with_its_inverse() {
        let base = SimpleTrans::new(Rotation::R90, Vector::new(3, 4));
        let arr = Array::single((), base);
        let t = SimpleTrans::new(Rotation::M45, Vector::new(-2, 9));
        let once = arr.transform_into(&AppliedTrans::Simple(t));
        let back = once.transform_into(&AppliedTrans::Simple(t.invert()));
        assert_eq!(back.base(), arr.base());
    }

    #[test]
    fn array_begin_touching_scenario_one_regular_lattice() {
        let object = Box::new(Point::new(10, 30), Point::new(30, 40));
        let arr = Array::regular(object, SimpleTrans::IDENTITY, Vector::new(0, 100), Vector::new(200, 0), 2, 3);

        let hits = |q: Box| -> alloc::vec::Vec<Vector> {
            let mut v: alloc::vec::Vec<Vector> = arr.begin_touching(q, |b| *b).map(|t| t.disp()).collect();
            v.sort_by_key(|p| (p.x, p.y));
            v
        };

        assert_eq!(hits(Box::new(Point::new(0, 0), Point::new(200, 100))), [Vector::new(0, 0)]);
        assert!(hits(Box::new(Point::new(0, 50), Point::new(200, 110))).is_empty());
        assert_eq!(hits(Box::new(Point::new(0, 40), Point::new(200, 110))), [Vector::new(0, 0)]);

        let mut all = hits(Box::new(Point::new(0, 40), Point::new(410, 130)));
        let mut expected = alloc::vec::Vec::from([
            Vector::new(0, 0),
            Vector::new(0, 100),
            Vector::new(200, 0),
            Vector::new(200, 100),
            Vector::new(400, 0),
            Vector::new(400, 100),
        ]);
        all.sort_by_key(|p| (p.x, p.y));
        expected.sort_by_key(|p| (p.x, p.y));
        assert_eq!(all, expected);
    }

    #[test]
    fn array_begin_touching_scenario_two_oblique_translated_base() {
        let object = Box::new(Point::new(10, -20), Point::new(30, -10));
        let base = SimpleTrans::new(Rotation::R0, Vector::new(0, 50));
        let arr = Array::regular(object, base, Vector::new(10, 100), Vector::new(-200, 20), 2, 3);

        let mut hits: alloc::vec::Vec<Vector> = arr
            .begin_touching(Box::new(Point::new(-180, 50), Point::new(10, 160)), |b| *b)
            .map(|t| t.disp())
            .collect();
        let mut expected = alloc::vec::Vec::from([Vector::new(-200, 70), Vector::new(-190, 170)]);
        hits.sort_by_key(|p| (p.x, p.y));
        expected.sort_by_key(|p| (p.x, p.y));
        assert_eq!(hits, expected);
    }
}
