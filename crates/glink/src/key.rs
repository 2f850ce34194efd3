//! Cache keys over the six stage slots.

use std::hash::Hasher;

use glink_core::{PerStage, StageKind};
use rustc_hash::FxHasher;

use crate::stage::StageId;

/// Folded in place of an empty slot.
const EMPTY_SLOT: u64 = 0x9e37_79b9_7f4a_7c15;

/// The stage ids bound to each slot, in slot order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StageTuple(PerStage<Option<StageId>>);

impl StageTuple {
    pub fn new(slots: PerStage<Option<StageId>>) -> Self {
        Self(slots)
    }

    pub fn get(&self, kind: StageKind) -> Option<StageId> {
        self.0[kind]
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: StageId) -> bool {
        self.0.present().any(|(_, slot)| *slot == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StageKind, StageId)> + '_ {
        self.0.present().map(|(kind, id)| (kind, *id))
    }
}

/// Hash of a [`StageTuple`].
///
/// Equal tuples always fold to equal keys. Distinct tuples may collide, so
/// a key alone never identifies a program; the tuple is compared on lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CacheKey(u32);

impl CacheKey {
    /// Key of the all-empty tuple. No non-empty tuple folds to it.
    pub const NONE: CacheKey = CacheKey(0);

    pub fn fold(tuple: &StageTuple) -> Self {
        if tuple.is_empty() {
            return Self::NONE;
        }
        let mut hasher = FxHasher::default();
        for kind in StageKind::ALL {
            hasher.write_u64(tuple.get(kind).map_or(EMPTY_SLOT, StageId::raw));
        }
        let hash = hasher.finish();
        match (hash ^ (hash >> 32)) as u32 {
            0 => CacheKey(1),
            folded => CacheKey(folded),
        }
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}
