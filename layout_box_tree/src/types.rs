// Copyright 2025 the Layout Arrays Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Quad identifiers.

/// Stable identifier for a quad visited during a touching query.
///
/// `QuadId::NONE` (value zero) denotes "no quad" — the state of a fresh
/// [`crate::TouchingIter`] before its first `next()`, and the permanent
/// state of a flat [`crate::Iter`], which does not traverse tree structure
/// at all.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct QuadId(u32);

impl QuadId {
    /// The "no quad" sentinel.
    pub const NONE: Self = Self(0);

    #[allow(clippy::cast_possible_truncation, reason = "node arenas are capped well under u32::MAX entries")]
    pub(crate) const fn from_node_index(idx: usize) -> Self {
        Self(idx as u32 + 1)
    }

    /// The raw numeric value; zero iff this is [`QuadId::NONE`].
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    pub(crate) const fn node_index(self) -> Option<usize> {
        if self.0 == 0 { None } else { Some((self.0 - 1) as usize) }
    }
}
