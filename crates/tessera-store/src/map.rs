//! Sharded-map store (`stdmap`).
//!
//! The reference backend: a [`DashMap`] from content to id per namespace,
//! plus a second one from id back to content for reads. Slower and larger
//! than `cchm`, but simple enough to serve as the oracle in tests and as a
//! sub-backend of the tree store.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::config::StoreConfig;
use crate::id::{InsertedState, StateId, MAX_KEY, MAX_LENGTH};
use crate::state::FullState;
use crate::storage::{
    check_fixed_length, fatal, missing_state, range_within, StateStorage, StorageStats,
    StoreError,
};
use crate::Slot;

/// One namespace: forward map and reverse map.
struct Namespace {
    /// Content → key.
    forward: DashMap<Arc<[Slot]>, u64>,
    /// Key → content.
    reverse: DashMap<u64, Arc<[Slot]>>,
    next_key: AtomicU64,
    entries: AtomicUsize,
    slots: AtomicUsize,
}

impl Namespace {
    fn new(capacity: usize) -> Self {
        Self {
            forward: DashMap::with_capacity(capacity),
            reverse: DashMap::with_capacity(capacity),
            next_key: AtomicU64::new(1),
            entries: AtomicUsize::new(0),
            slots: AtomicUsize::new(0),
        }
    }

    fn len(&self) -> usize {
        self.entries.load(Ordering::Relaxed)
    }

    fn lookup(&self, key: u64) -> Option<Arc<[Slot]>> {
        self.reverse.get(&key).map(|content| Arc::clone(content.value()))
    }
}

pub struct MapStore {
    roots: Namespace,
    subs: Namespace,
    max_entries: usize,
    fixed_length: Option<usize>,
}

impl MapStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self::with_capacity(1 << config.root_log2, config.fixed_length)
    }

    /// `max_entries` bounds each namespace; the maps start small and grow.
    pub fn with_capacity(max_entries: usize, fixed_length: Option<usize>) -> Self {
        let initial = max_entries.min(1 << 16);
        Self {
            roots: Namespace::new(initial),
            subs: Namespace::new(initial),
            max_entries: max_entries.min(MAX_KEY as usize),
            fixed_length,
        }
    }

    #[inline]
    fn namespace(&self, is_root: bool) -> &Namespace {
        if is_root {
            &self.roots
        } else {
            &self.subs
        }
    }

    /// Number of entries in both namespaces.
    pub fn len(&self) -> usize {
        self.roots.len() + self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStorage for MapStore {
    fn name(&self) -> &'static str {
        "stdmap"
    }

    fn find(&self, data: &[Slot], is_root: bool) -> StateId {
        match self.namespace(is_root).forward.get(data) {
            Some(key) => StateId::new(data.len(), *key),
            None => StateId::NOT_FOUND,
        }
    }

    /// Uses a single `entry()` call for atomic check-and-insert: the forward
    /// shard lock is held while the key is assigned and the reverse entry is
    /// written, so a key visible in `forward` always resolves in `reverse`.
    fn insert(&self, data: &[Slot], is_root: bool) -> InsertedState {
        assert!(
            data.len() <= MAX_LENGTH,
            "stdmap: state of {} slots exceeds the {MAX_LENGTH} slot limit",
            data.len()
        );
        if is_root {
            check_fixed_length("stdmap", self.fixed_length, data.len());
        }
        let ns = self.namespace(is_root);
        if let Some(key) = ns.forward.get(data) {
            return InsertedState::new(StateId::new(data.len(), *key), false);
        }
        let content: Arc<[Slot]> = Arc::from(data);
        match ns.forward.entry(Arc::clone(&content)) {
            Entry::Occupied(occupied) => {
                InsertedState::new(StateId::new(data.len(), *occupied.get()), false)
            }
            Entry::Vacant(vacant) => {
                let key = ns.next_key.fetch_add(1, Ordering::Relaxed);
                if key > self.max_entries as u64 {
                    drop(vacant);
                    fatal(
                        StoreError::CapacityExhausted {
                            table: "stdmap",
                            capacity: self.max_entries,
                        },
                        &self.stats(),
                    );
                }
                ns.reverse.insert(key, content);
                vacant.insert(key);
                ns.slots.fetch_add(data.len(), Ordering::Relaxed);
                ns.entries.fetch_add(1, Ordering::Relaxed);
                InsertedState::new(StateId::new(data.len(), key), true)
            }
        }
    }

    fn get(&self, id: StateId, is_root: bool) -> FullState<'_> {
        match self.namespace(is_root).lookup(id.key()) {
            Some(content) if content.len() == id.length() => {
                FullState::owned(content.to_vec(), is_root)
            }
            _ => missing_state("stdmap", id, is_root),
        }
    }

    fn get_partial(&self, id: StateId, offset: usize, out: &mut [Slot], is_root: bool) -> bool {
        if !id.exists() || !range_within(offset, out.len(), id.length()) {
            return false;
        }
        match self.namespace(is_root).lookup(id.key()) {
            Some(content) if content.len() == id.length() => {
                out.copy_from_slice(&content[offset..offset + out.len()]);
                true
            }
            _ => false,
        }
    }

    fn state_has_fixed_length(&self) -> bool {
        self.fixed_length.is_some()
    }

    fn stats(&self) -> StorageStats {
        let roots = self.roots.len();
        let subs = self.subs.len();
        let slots =
            self.roots.slots.load(Ordering::Relaxed) + self.subs.slots.load(Ordering::Relaxed);
        // Forward key and pointer, Arc header, reverse key and pointer.
        let per_entry = 8 + 16 + 16 + 24;
        StorageStats {
            backend: "stdmap",
            root_entries: roots,
            sub_entries: subs,
            bytes_used: slots * std::mem::size_of::<Slot>() + (roots + subs) * per_entry,
            bytes_reserved: 0,
            max_fill: roots.max(subs) as f64 / self.max_entries as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::Delta;

    #[test]
    fn test_store_insert() {
        let store = MapStore::new(&StoreConfig::small());
        let s1 = store.insert(&[1], true);
        let dup = store.insert(&[1], true);
        let s2 = store.insert(&[2], true);

        assert!(s1.inserted);
        assert!(!dup.inserted);
        assert_eq!(s1.state, dup.state);
        assert!(s2.inserted);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_get_and_find() {
        let store = MapStore::new(&StoreConfig::small());
        let id = store.insert(&[3, 1, 4, 1, 5], true).state;
        assert_eq!(store.get(id, true).as_slice(), &[3, 1, 4, 1, 5]);
        assert_eq!(store.find(&[3, 1, 4, 1, 5], true), id);
        assert_eq!(store.find(&[3, 1, 4, 1, 5], false), StateId::NOT_FOUND);

        let mut out = [0; 3];
        assert!(store.get_partial(id, 2, &mut out, true));
        assert_eq!(out, [4, 1, 5]);
    }

    #[test]
    fn test_namespaces_are_independent() {
        let store = MapStore::new(&StoreConfig::small());
        assert!(store.insert(&[9, 9], true).inserted);
        assert!(store.insert(&[9, 9], false).inserted);
        assert_eq!(store.stats().root_entries, 1);
        assert_eq!(store.stats().sub_entries, 1);
    }

    #[test]
    fn test_default_delta() {
        let store = MapStore::new(&StoreConfig::small());
        let base = store.insert(&[1, 2, 3], true).state;
        let next = store.insert_delta(base, &Delta::new(2, &[7, 8]), true).state;
        assert_eq!(store.get(next, true).as_slice(), &[1, 2, 7, 8]);
    }

    #[test]
    fn test_cached_delta_leaves_cache_untouched() {
        let store = MapStore::new(&StoreConfig::small());
        let mut cache = store.thread_init(1);
        let base = store.insert(&[1, 2, 3], true).state;
        let next = store.insert_delta_cached(&mut cache, base, &Delta::new(0, &[9]), true);
        assert!(next.inserted);
        assert_eq!(store.get(next.state, true).as_slice(), &[9, 2, 3]);
        assert_eq!(
            store.insert_delta(base, &Delta::new(0, &[9]), true).state,
            next.state
        );
        assert_eq!(cache.hits() + cache.misses(), 0);
    }

    #[test]
    #[should_panic(expected = "stdmap is full")]
    fn test_capacity_is_fatal() {
        let store = MapStore::with_capacity(2, None);
        store.insert(&[1], true);
        store.insert(&[2], true);
        store.insert(&[3], true);
    }

    #[test]
    fn test_reads_during_concurrent_inserts() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(MapStore::new(&StoreConfig::small()));
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut ids = vec![];
                    for i in 0..250u32 {
                        let data = [t, i, t ^ i];
                        let id = store.insert(&data, true).state;
                        // A fresh id resolves at once, whoever inserts next.
                        assert_eq!(store.get(id, true).as_slice(), &data);
                        ids.push((id, data));
                    }
                    ids
                })
            })
            .collect();
        let mut keys = vec![];
        for h in handles {
            for (id, data) in h.join().unwrap() {
                assert_eq!(store.get(id, true).as_slice(), &data);
                keys.push(id.key());
            }
        }
        keys.sort_unstable();
        assert_eq!(keys, (1..=1000).collect::<Vec<u64>>());
        assert_eq!(store.len(), 1000);
    }

    #[test]
    fn test_concurrent_insert() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(MapStore::new(&StoreConfig::small()));
        let mut handles = vec![];

        // Spawn multiple threads inserting overlapping states
        for t in 0..4u32 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                let mut won = 0;
                for i in 0..100u32 {
                    if store.insert(&[i, t % 2], true).inserted {
                        won += 1;
                    }
                }
                won
            }));
        }

        let won: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // Two distinct values of `t % 2`, 100 values of `i`
        assert_eq!(won, 200);
        assert_eq!(store.len(), 200);
    }
}
