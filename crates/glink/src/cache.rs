//! Memoized programs, one per distinct stage tuple.

use std::rc::Rc;

use glink_core::PerStage;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::active::ActiveStageSet;
use crate::key::{CacheKey, StageTuple};
use crate::program::LinkedProgram;
use crate::stage::{Stage, StageId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Every [`LinkedProgram`] created so far, bucketed by [`CacheKey`].
///
/// A bucket holds all programs whose tuples fold to the same key. Lookups
/// compare the full tuple, so a key collision creates a second entry
/// instead of returning the wrong program.
#[derive(Debug, Default)]
pub struct ProgramLinkCache {
    buckets: FxHashMap<CacheKey, Vec<LinkedProgram>>,
    /// Entry resolved for the active set as it was last seen.
    current: Option<(CacheKey, usize)>,
    hits: u64,
    misses: u64,
}

impl ProgramLinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The program for `active`, created on first sight of its tuple.
    ///
    /// Returns `None` when every slot is empty. The resolved entry is
    /// remembered until [`invalidate_current`](Self::invalidate_current).
    pub fn get_or_create(&mut self, active: &ActiveStageSet) -> Option<&mut LinkedProgram> {
        let (key, index) = match self.current {
            Some(current) => current,
            None => {
                let tuple = active.tuple();
                let key = CacheKey::fold(&tuple);
                if key.is_none() {
                    return None;
                }
                let index = self.find_or_insert(key, tuple, active.stages());
                self.current = Some((key, index));
                (key, index)
            }
        };
        self.buckets.get_mut(&key)?.get_mut(index)
    }

    fn find_or_insert(&mut self, key: CacheKey, tuple: StageTuple, stages: &PerStage<Option<Rc<Stage>>>) -> usize {
        let bucket = self.buckets.entry(key).or_default();
        if let Some(index) = bucket.iter().position(|p| *p.tuple() == tuple) {
            self.hits += 1;
            return index;
        }
        self.misses += 1;
        let program = LinkedProgram::new(key, tuple, stages);
        trace!(key = key.raw(), program = program.label(), "new cache entry");
        bucket.push(program);
        bucket.len() - 1
    }

    /// Forget the resolved entry; the next lookup hashes the active set again.
    pub fn invalidate_current(&mut self) {
        self.current = None;
    }

    pub fn current(&self) -> Option<&LinkedProgram> {
        let (key, index) = self.current?;
        self.buckets.get(&key)?.get(index)
    }

    pub fn get(&self, tuple: &StageTuple) -> Option<&LinkedProgram> {
        self.buckets
            .get(&CacheKey::fold(tuple))?
            .iter()
            .find(|p| p.tuple() == tuple)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkedProgram> {
        self.buckets.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.len(),
        }
    }

    /// Take out every program whose tuple contains `id`.
    pub(crate) fn remove_using(&mut self, id: StageId) -> Vec<LinkedProgram> {
        let mut removed = Vec::new();
        for bucket in self.buckets.values_mut() {
            let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(bucket)
                .into_iter()
                .partition(|p| p.tuple().contains(id));
            *bucket = kept;
            removed.extend(gone);
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        if !removed.is_empty() {
            self.current = None;
        }
        removed
    }

    /// Take out every program.
    pub(crate) fn drain(&mut self) -> Vec<LinkedProgram> {
        self.current = None;
        self.buckets.drain().flat_map(|(_, bucket)| bucket).collect()
    }
}
