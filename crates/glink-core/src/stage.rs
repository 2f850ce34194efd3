//! Pipeline stage kinds and a fixed-size per-stage container.

use std::fmt;
use std::ops::{Index, IndexMut};

use num_derive::{FromPrimitive, ToPrimitive};

/// One of the six programmable pipeline stages.
///
/// The declaration order is the slot order used everywhere a set of stages is
/// folded or iterated: vertex, hull, domain, geometry, fragment, compute.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive, ToPrimitive,
)]
#[repr(u8)]
pub enum StageKind {
    Vertex = 0,
    /// Tessellation control.
    Hull = 1,
    /// Tessellation evaluation.
    Domain = 2,
    Geometry = 3,
    Fragment = 4,
    Compute = 5,
}

impl StageKind {
    pub const COUNT: usize = 6;

    pub const ALL: [StageKind; Self::COUNT] = [
        StageKind::Vertex,
        StageKind::Hull,
        StageKind::Domain,
        StageKind::Geometry,
        StageKind::Fragment,
        StageKind::Compute,
    ];

    /// Slot index in `0..COUNT`.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            StageKind::Vertex => "vertex",
            StageKind::Hull => "hull",
            StageKind::Domain => "domain",
            StageKind::Geometry => "geometry",
            StageKind::Fragment => "fragment",
            StageKind::Compute => "compute",
        }
    }

    /// Parse the lowercase name produced by [`StageKind::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One value per [`StageKind`], indexed by the stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PerStage<T>([T; StageKind::COUNT]);

impl<T> PerStage<T> {
    pub fn from_fn(mut f: impl FnMut(StageKind) -> T) -> Self {
        Self(std::array::from_fn(|i| f(StageKind::ALL[i])))
    }

    /// Iterate `(kind, value)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (StageKind, &T)> {
        StageKind::ALL.into_iter().zip(self.0.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (StageKind, &mut T)> {
        StageKind::ALL.into_iter().zip(self.0.iter_mut())
    }

    pub fn as_array(&self) -> &[T; StageKind::COUNT] {
        &self.0
    }

    pub fn map<U>(&self, mut f: impl FnMut(StageKind, &T) -> U) -> PerStage<U> {
        PerStage::from_fn(|k| f(k, &self.0[k.index()]))
    }
}

impl<T> PerStage<Option<T>> {
    /// Iterate the occupied slots in slot order.
    pub fn present(&self) -> impl Iterator<Item = (StageKind, &T)> {
        self.iter().filter_map(|(k, v)| v.as_ref().map(|v| (k, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}

impl<T: Default> Default for PerStage<T> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}

impl<T> Index<StageKind> for PerStage<T> {
    type Output = T;

    fn index(&self, kind: StageKind) -> &T {
        &self.0[kind.index()]
    }
}

impl<T> IndexMut<StageKind> for PerStage<T> {
    fn index_mut(&mut self, kind: StageKind) -> &mut T {
        &mut self.0[kind.index()]
    }
}

/// A set of stages packed into a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StageMask(u8);

impl StageMask {
    pub const EMPTY: StageMask = StageMask(0);

    pub fn single(kind: StageKind) -> Self {
        Self(1 << kind.index())
    }

    pub fn insert(&mut self, kind: StageKind) {
        self.0 |= 1 << kind.index();
    }

    pub fn contains(self, kind: StageKind) -> bool {
        self.0 & (1 << kind.index()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = StageKind> {
        StageKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl FromIterator<StageKind> for StageMask {
    fn from_iter<I: IntoIterator<Item = StageKind>>(iter: I) -> Self {
        let mut mask = StageMask::EMPTY;
        for kind in iter {
            mask.insert(kind);
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use num_traits::FromPrimitive;

    use super::*;

    #[test]
    fn slot_order_matches_discriminants() {
        for (i, kind) in StageKind::ALL.into_iter().enumerate() {
            assert_eq!(kind.index(), i);
            assert_eq!(StageKind::from_usize(i), Some(kind));
        }
        assert_eq!(StageKind::from_usize(StageKind::COUNT), None);
    }

    #[test]
    fn present_skips_empty_slots() {
        let mut slots: PerStage<Option<u32>> = PerStage::default();
        assert!(slots.is_empty());
        slots[StageKind::Fragment] = Some(7);
        slots[StageKind::Vertex] = Some(3);
        let present: Vec<_> = slots.present().map(|(k, v)| (k, *v)).collect();
        assert_eq!(
            present,
            vec![(StageKind::Vertex, 3), (StageKind::Fragment, 7)]
        );
    }

    #[test]
    fn mask_round_trips_kinds() {
        let mask: StageMask = [StageKind::Geometry, StageKind::Vertex].into_iter().collect();
        assert!(mask.contains(StageKind::Vertex));
        assert!(!mask.contains(StageKind::Fragment));
        assert_eq!(
            mask.iter().collect::<Vec<_>>(),
            vec![StageKind::Vertex, StageKind::Geometry]
        );
    }
}
