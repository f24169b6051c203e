// Copyright 2025 the Layout Arrays Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Content-addressed repository for interned placement descriptors.

use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::placement::{DedupKey, PlacementKind};

/// A stable reference to a descriptor interned in an [`ArrayRepository`].
///
/// Unlike a `&'repo PlacementKind`, a handle does not borrow the
/// repository, so an [`crate::Array`] can carry one independently of any
/// particular `intern` call; [`ArrayRepository::get`] resolves it back to
/// the descriptor. Handles stay valid for as long as the repository is not
/// [`ArrayRepository::clear`]ed, since descriptor storage is append-only —
/// `intern` never removes or moves an existing entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PlacementHandle {
    bucket: u8,
    index: u32,
}

/// One variant's storage: an append-only list of descriptors (so
/// [`PlacementHandle`] indices never go stale) plus a hash index keyed on
/// [`DedupKey`], giving `intern` an O(1) expected lookup instead of the
/// binary search a sorted order vector would need.
#[derive(Default, Clone, Debug)]
struct Bucket {
    storage: Vec<PlacementKind>,
    index: HashMap<DedupKey, u32>,
}

impl Bucket {
    fn find(&self, desc: &PlacementKind) -> Option<u32> {
        self.index.get(&desc.dedup_key()).copied()
    }
}

/// Content-addressed store for [`PlacementKind`] descriptors, partitioned
/// into one bucket per variant.
///
/// `intern` guarantees: structurally equal descriptors (by
/// [`PlacementKind::eq_exact`]) return the same handle; handles remain
/// valid for the repository's lifetime (until [`ArrayRepository::clear`]);
/// the repository owns its contents and frees them on drop.
#[derive(Default, Clone, Debug)]
pub struct ArrayRepository {
    buckets: [Bucket; 5],
}

impl ArrayRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_index(tag: u8) -> usize {
        debug_assert!((1..=5).contains(&tag), "type_tag out of range");
        (tag - 1) as usize
    }

    /// Interns `desc`, returning a handle shared by every structurally
    /// equal descriptor interned so far.
    pub fn intern(&mut self, desc: PlacementKind) -> PlacementHandle {
        let bucket_idx = Self::bucket_index(desc.type_tag());
        let bucket = &mut self.buckets[bucket_idx];
        if let Some(index) = bucket.find(&desc) {
            return PlacementHandle { bucket: bucket_idx as u8, index };
        }
        let new_index = bucket.storage.len() as u32;
        bucket.index.insert(desc.dedup_key(), new_index);
        bucket.storage.push(desc);
        PlacementHandle { bucket: bucket_idx as u8, index: new_index }
    }

    /// Resolves a handle back to its descriptor.
    #[must_use]
    pub fn get(&self, handle: PlacementHandle) -> &PlacementKind {
        &self.buckets[handle.bucket as usize].storage[handle.index as usize]
    }

    /// Total number of distinct descriptors interned across all buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.storage.len()).sum()
    }

    /// Whether no descriptors have been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every interned descriptor; all previously issued handles
    /// become invalid.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.storage.clear();
            bucket.index.clear();
        }
    }

    /// Reports this repository's own footprint plus the aggregated
    /// footprint of its interned descriptors to `collector`. `purpose` and
    /// `category` are opaque tags forwarded unchanged, matching the
    /// external memory-statistics collaborator's contract.
    pub fn mem_stat<C: MemStatCollector>(&self, collector: &mut C, purpose: u32, category: u32) {
        let self_size = core::mem::size_of::<Self>();
        let children_size: usize = self
            .buckets
            .iter()
            .map(|b| b.storage.capacity() * core::mem::size_of::<PlacementKind>() + b.index.capacity() * core::mem::size_of::<(DedupKey, u32)>())
            .sum();
        collector.add(TypeId::ArrayRepository, self_size, self_size + children_size, purpose, category);
    }
}

/// Opaque type discriminant forwarded to a [`MemStatCollector`], mirroring
/// the external memory-statistics collaborator's `type_id` parameter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TypeId {
    /// An [`ArrayRepository`].
    ArrayRepository,
    /// An [`crate::Array`].
    Array,
}

/// Collaborator contract for memory-statistics collection. `size_self` is
/// this object's own footprint; `size_plus_children` additionally includes
/// everything it owns. Implementations typically accumulate these into a
/// report keyed by `(purpose, category)`.
pub trait MemStatCollector {
    /// Records one object's footprint.
    fn add(&mut self, type_id: TypeId, size_self: usize, size_plus_children: usize, purpose: u32, category: u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use layout_geom::Vector;

    fn regular(bmax: u32) -> PlacementKind {
        PlacementKind::Regular { a: Vector::new(0, 100), b: Vector::new(200, 0), amax: 2, bmax }
    }

    #[test]
    fn dedup_returns_same_handle_for_equal_descriptors() {
        let mut repo = ArrayRepository::new();
        let h1 = repo.intern(regular(3));
        let h2 = repo.intern(regular(3));
        assert_eq!(h1, h2);
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn distinct_descriptors_in_same_bucket_get_distinct_handles() {
        let mut repo = ArrayRepository::new();
        let h1 = repo.intern(regular(3));
        let h2 = repo.intern(regular(4));
        assert_ne!(h1, h2);
        assert_eq!(repo.len(), 2);
    }

    #[test]
    fn different_variants_land_in_different_buckets() {
        let mut repo = ArrayRepository::new();
        let h1 = repo.intern(regular(3));
        let h2 = repo.intern(PlacementKind::SingleComplex { rcos: 1.0, mag: 10.0 });
        assert_ne!(h1, h2);
        assert_eq!(repo.len(), 2);
    }

    #[test]
    fn handles_remain_valid_after_further_interning() {
        let mut repo = ArrayRepository::new();
        let h1 = repo.intern(regular(3));
        for bmax in 4..20 {
            repo.intern(regular(bmax));
        }
        assert!(repo.get(h1).eq_exact(&regular(3)));
    }

    #[test]
    fn clear_drops_everything() {
        let mut repo = ArrayRepository::new();
        repo.intern(regular(3));
        repo.clear();
        assert!(repo.is_empty());
    }
}
