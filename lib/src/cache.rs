//! Bounded set of resident patch trees or snapshots, keyed by patch id.
//!
//! Every known id has an entry; only resident ones hold a value. When more
//! than `capacity` values are resident, the least recently used one that no
//! caller still holds is unloaded. Entries still referenced are skipped, so
//! the resident count may stay above capacity until they are released.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use log::debug;

use crate::errors::Result;
use crate::patch::PatchId;

/// A value the cache can unload.
pub(crate) trait Resident {
    /// Whether anything outside the cache still holds `this`.
    fn is_shared(this: &Arc<Self>) -> bool {
        Arc::strong_count(this) > 1
    }

    /// Persist pending state before the value is dropped from the cache.
    fn unload(&self) -> Result<()>;
}

#[derive(Debug)]
pub(crate) struct ResidentCache<V> {
    entries: BTreeMap<PatchId, Option<Arc<V>>>,
    /// Resident ids, least recently used first.
    lru: VecDeque<PatchId>,
    capacity: usize,
    kind: &'static str,
}

impl<V: Resident> ResidentCache<V> {
    pub fn new(capacity: usize, kind: &'static str) -> Self {
        ResidentCache {
            entries: BTreeMap::new(),
            lru: VecDeque::new(),
            capacity,
            kind,
        }
    }

    /// Record `id` as existing on disk without loading it.
    pub fn register(&mut self, id: PatchId) {
        self.entries.entry(id).or_insert(None);
    }

    pub fn contains(&self, id: PatchId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<PatchId> {
        self.entries.keys().copied().collect()
    }

    /// Greatest known id `<= id`.
    pub fn latest(&self, id: PatchId) -> Option<PatchId> {
        self.entries.range(..=id).next_back().map(|(id, _)| *id)
    }

    pub fn last_id(&self) -> Option<PatchId> {
        self.entries.keys().next_back().copied()
    }

    pub fn resident(&self) -> usize {
        self.lru.len()
    }

    /// Resident values, by id.
    pub fn values(&self) -> impl Iterator<Item = &Arc<V>> {
        self.entries.values().flatten()
    }

    /// Make `value` resident under `id`.
    pub fn insert(&mut self, id: PatchId, value: Arc<V>) -> Result<()> {
        self.entries.insert(id, Some(value));
        self.touch(id);
        self.shrink()
    }

    /// Value of `id`, loaded with `load` when not resident. `None` when the
    /// id is unknown or `load` finds nothing.
    pub fn get_or_load(
        &mut self,
        id: PatchId,
        load: impl FnOnce() -> Result<Option<V>>,
    ) -> Result<Option<Arc<V>>> {
        let value = match self.entries.get(&id) {
            None => return Ok(None),
            Some(Some(value)) => Arc::clone(value),
            Some(None) => match load()? {
                Some(value) => {
                    let value = Arc::new(value);
                    self.entries.insert(id, Some(Arc::clone(&value)));
                    value
                }
                None => return Ok(None),
            },
        };
        self.touch(id);
        self.shrink()?;
        Ok(Some(value))
    }

    fn touch(&mut self, id: PatchId) {
        self.lru.retain(|x| *x != id);
        self.lru.push_back(id);
    }

    fn shrink(&mut self) -> Result<()> {
        while self.lru.len() > self.capacity {
            if !self.evict_one()? {
                break;
            }
        }
        Ok(())
    }

    /// Unload the least recently used value nobody else holds.
    fn evict_one(&mut self) -> Result<bool> {
        for i in 0..self.lru.len() {
            let id = self.lru[i];
            let Some(Some(value)) = self.entries.get(&id) else {
                self.lru.remove(i);
                return Ok(true);
            };
            if V::is_shared(value) {
                continue;
            }
            value.unload()?;
            debug!("evicting {} {id}", self.kind);
            self.entries.insert(id, None);
            self.lru.remove(i);
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Page {
        unloads: AtomicUsize,
    }

    impl Resident for Page {
        fn unload(&self) -> Result<()> {
            self.unloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn evicts_least_recently_used_unreferenced() {
        let mut cache = ResidentCache::<Page>::new(2, "page");
        for id in [0, 1, 2] {
            cache.register(id);
        }
        let held = cache.get_or_load(0, || Ok(Some(Page::default()))).unwrap().unwrap();
        cache.get_or_load(1, || Ok(Some(Page::default()))).unwrap();
        cache.get_or_load(2, || Ok(Some(Page::default()))).unwrap();
        // 0 is the oldest but still held, so 1 goes
        assert_eq!(cache.resident(), 2);
        assert_eq!(cache.values().count(), 2);
        assert!(cache.values().any(|p| Arc::ptr_eq(p, &held)));

        drop(held);
        cache.get_or_load(1, || Ok(Some(Page::default()))).unwrap();
        assert_eq!(cache.resident(), 2);
        assert_eq!(cache.ids(), vec![0, 1, 2]);
        assert_eq!(cache.latest(5), Some(2));
        assert!(cache.get_or_load(9, || Ok(Some(Page::default()))).unwrap().is_none());
    }

    #[test]
    fn everything_held_stays_resident() {
        let mut cache = ResidentCache::<Page>::new(1, "page");
        let a = Arc::new(Page::default());
        let b = Arc::new(Page::default());
        cache.insert(0, Arc::clone(&a)).unwrap();
        cache.insert(1, Arc::clone(&b)).unwrap();
        assert_eq!(cache.resident(), 2);
        assert_eq!(a.unloads.load(Ordering::SeqCst), 0);
        drop(a);
        cache.insert(2, Arc::new(Page::default())).unwrap();
        // 0 and the unheld newcomer are unloaded, the held 1 stays
        assert_eq!(cache.resident(), 1);
        assert!(cache.values().all(|p| Arc::ptr_eq(p, &b)));
    }
}
