//! Chunked tree store (`treedbs_<sub>`, `treedbsmod`).
//!
//! A root state of `L` slots is split into `header_len` verbatim slots and
//! chunks of `chunk_len` slots (the last one may be short). Each chunk is
//! hash-consed as a non-root entry of the *data* store, and the root entry is
//! the tuple
//!
//! ```text
//! [header..., chunk0_lo, chunk0_hi, chunk1_lo, chunk1_hi, ...]
//! ```
//!
//! hash-consed as a root entry of the *roots* store. States that differ in
//! one chunk share every other chunk, so the tree grows by one chunk and one
//! tuple per new state.
//!
//! The public id is `StateId::new(L, root_key)`. The roots-store id is
//! recomputed from `L` ([`tuple_len`]), so lengths stay O(1) to determine.
//! States no longer than the header are stored raw as their own tuple.
//!
//! Non-root content is stored flat in the data store, next to the chunks.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::config::StoreConfig;
use crate::delta::Delta;
use crate::hashcons::HashConsStore;
use crate::id::{InsertedState, StateId, MAX_LENGTH};
use crate::map::MapStore;
use crate::state::FullState;
use crate::storage::{
    check_fixed_length, range_within, StateStorage, StorageStats, WorkerCache,
};
use crate::Slot;

/// Length of the root tuple of a state of `len` slots.
#[inline]
pub fn tuple_len(len: usize, header_len: usize, chunk_len: usize) -> usize {
    if len <= header_len {
        len
    } else {
        header_len + 2 * (len - header_len).div_ceil(chunk_len)
    }
}

pub struct TreeStore {
    name: &'static str,
    roots: Arc<dyn StateStorage>,
    data: Arc<dyn StateStorage>,
    shared: bool,
    header_len: usize,
    chunk_len: usize,
    fixed_length: Option<usize>,
}

impl TreeStore {
    /// `treedbs_cchm`: roots and chunks in two hash-consing stores.
    pub fn over_cchm(config: &StoreConfig) -> Self {
        let roots = HashConsStore::with_sizes(
            config.root_log2,
            (config.root_log2 + 1).min(31),
            config.arena_log2,
            None,
        );
        let data = HashConsStore::with_sizes(
            config.data_log2,
            (config.data_log2 + 1).min(31),
            config.arena_log2,
            None,
        );
        Self::from_parts("treedbs_cchm", Arc::new(roots), Arc::new(data), false, config)
    }

    /// `treedbs_stdmap`: roots and chunks in two sharded maps.
    pub fn over_stdmap(config: &StoreConfig) -> Self {
        let roots = MapStore::with_capacity(1 << config.root_log2, None);
        let data = MapStore::with_capacity(1 << config.data_log2, None);
        Self::from_parts("treedbs_stdmap", Arc::new(roots), Arc::new(data), false, config)
    }

    /// `treedbsmod`: one hash-consing store holds both the tuples (root
    /// namespace) and the chunks (non-root namespace).
    pub fn shared_cchm(config: &StoreConfig) -> Self {
        let log2 = config.root_log2.max(config.data_log2);
        let store: Arc<dyn StateStorage> = Arc::new(HashConsStore::with_sizes(
            log2,
            (log2 + 1).min(31),
            config.arena_log2,
            None,
        ));
        Self::from_parts("treedbsmod", Arc::clone(&store), store, true, config)
    }

    pub fn from_parts(
        name: &'static str,
        roots: Arc<dyn StateStorage>,
        data: Arc<dyn StateStorage>,
        shared: bool,
        config: &StoreConfig,
    ) -> Self {
        assert!(config.chunk_len >= 1, "{name}: chunk length must be at least 1");
        Self {
            name,
            roots,
            data,
            shared,
            header_len: config.header_len,
            chunk_len: config.chunk_len,
            fixed_length: config.fixed_length,
        }
    }

    #[inline]
    fn tuple_len(&self, len: usize) -> usize {
        tuple_len(len, self.header_len, self.chunk_len)
    }

    #[inline]
    fn chunk_count(&self, len: usize) -> usize {
        len.saturating_sub(self.header_len).div_ceil(self.chunk_len)
    }

    /// Logical range `[start, end)` of chunk `i` of a state of `len` slots.
    #[inline]
    fn chunk_range(&self, i: usize, len: usize) -> (usize, usize) {
        let start = self.header_len + i * self.chunk_len;
        (start, (start + self.chunk_len).min(len))
    }

    #[inline]
    fn chunk_ref(&self, tuple: &[Slot], i: usize) -> StateId {
        let at = self.header_len + 2 * i;
        StateId::from_slots(tuple[at], tuple[at + 1])
    }

    #[inline]
    fn roots_id(&self, id: StateId) -> StateId {
        StateId::new(self.tuple_len(id.length()), id.key())
    }

    #[inline]
    fn public_id(&self, len: usize, inserted: InsertedState) -> InsertedState {
        InsertedState::new(inserted.state.with_length(len), inserted.inserted)
    }

    fn check_input(&self, len: usize) {
        assert!(
            len <= MAX_LENGTH,
            "{}: state of {len} slots exceeds the {MAX_LENGTH} slot limit",
            self.name
        );
        check_fixed_length(self.name, self.fixed_length, len);
    }

    fn read_tuple(&self, id: StateId) -> Vec<Slot> {
        self.roots.get(self.roots_id(id), true).to_vec()
    }

    /// Build the root tuple of `data`, interning its chunks.
    fn build_tuple(&self, data: &[Slot]) -> Vec<Slot> {
        if data.len() <= self.header_len {
            return data.to_vec();
        }
        let mut tuple = Vec::with_capacity(self.tuple_len(data.len()));
        tuple.extend_from_slice(&data[..self.header_len]);
        for chunk in data[self.header_len..].chunks(self.chunk_len) {
            tuple.extend_from_slice(&self.data.insert(chunk, false).state.to_slots());
        }
        tuple
    }

    fn insert_root(&self, data: &[Slot]) -> InsertedState {
        self.check_input(data.len());
        let tuple = self.build_tuple(data);
        self.public_id(data.len(), self.roots.insert(&tuple, true))
    }

    /// Apply `delta` to the base whose tuple is `tuple`, re-interning only
    /// the chunks it touches.
    fn derive(&self, base: StateId, tuple: &[Slot], delta: &Delta<'_>) -> InsertedState {
        let old_len = base.length();
        let new_len = delta.result_len(old_len);
        self.check_input(new_len);

        if old_len <= self.header_len {
            // Raw base; the result may need splitting.
            let mut data = tuple.to_vec();
            delta.apply_to(&mut data);
            return self.insert_root(&data);
        }

        let old_chunks = self.chunk_count(old_len);
        let new_chunks = self.chunk_count(new_len);
        let mut next = Vec::with_capacity(self.tuple_len(new_len));
        next.extend_from_slice(&tuple[..self.header_len]);
        delta.apply_window(0, &mut next);

        let mut scratch: SmallVec<[Slot; 16]> = SmallVec::new();
        for i in 0..new_chunks {
            let (start, end) = self.chunk_range(i, new_len);
            if i < old_chunks {
                let old = self.chunk_ref(tuple, i);
                if old.length() == end - start && !delta.overlaps(start, end - start) {
                    next.extend_from_slice(&old.to_slots());
                    continue;
                }
                scratch.clear();
                scratch.extend_from_slice(self.data.get(old, false).as_slice());
                scratch.resize(end - start, 0);
            } else {
                scratch.clear();
                scratch.resize(end - start, 0);
            }
            delta.apply_window(start, &mut scratch);
            next.extend_from_slice(&self.data.insert(&scratch, false).state.to_slots());
        }
        self.public_id(new_len, self.roots.insert(&next, true))
    }
}

impl StateStorage for TreeStore {
    fn name(&self) -> &'static str {
        self.name
    }

    fn find(&self, data: &[Slot], is_root: bool) -> StateId {
        if !is_root {
            return self.data.find(data, false);
        }
        let tuple = if data.len() <= self.header_len {
            data.to_vec()
        } else {
            let mut tuple = data[..self.header_len].to_vec();
            for chunk in data[self.header_len..].chunks(self.chunk_len) {
                let id = self.data.find(chunk, false);
                if !id.exists() {
                    return StateId::NOT_FOUND;
                }
                tuple.extend_from_slice(&id.to_slots());
            }
            tuple
        };
        let found = self.roots.find(&tuple, true);
        if found.exists() {
            found.with_length(data.len())
        } else {
            StateId::NOT_FOUND
        }
    }

    fn insert(&self, data: &[Slot], is_root: bool) -> InsertedState {
        if is_root {
            self.insert_root(data)
        } else {
            self.data.insert(data, false)
        }
    }

    fn insert_delta(&self, base: StateId, delta: &Delta<'_>, is_root: bool) -> InsertedState {
        if !is_root {
            return self.data.insert_delta(base, delta, false);
        }
        let tuple = self.read_tuple(base);
        self.derive(base, &tuple, delta)
    }

    fn insert_delta_cached(
        &self,
        cache: &mut WorkerCache,
        base: StateId,
        delta: &Delta<'_>,
        is_root: bool,
    ) -> InsertedState {
        if !is_root {
            return self.data.insert_delta(base, delta, false);
        }
        if let Some(tuple) = cache.lookup(base) {
            return self.derive(base, tuple, delta);
        }
        let tuple = self.read_tuple(base);
        cache.remember(base, &tuple);
        self.derive(base, &tuple, delta)
    }

    fn get(&self, id: StateId, is_root: bool) -> FullState<'_> {
        if !is_root {
            return self.data.get(id, false);
        }
        let tuple = self.read_tuple(id);
        let len = id.length();
        if len <= self.header_len {
            return FullState::owned(tuple, true);
        }
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&tuple[..self.header_len]);
        for i in 0..self.chunk_count(len) {
            out.extend_from_slice(self.data.get(self.chunk_ref(&tuple, i), false).as_slice());
        }
        debug_assert_eq!(out.len(), len);
        FullState::owned(out, true)
    }

    fn get_partial(&self, id: StateId, offset: usize, out: &mut [Slot], is_root: bool) -> bool {
        if !is_root {
            return self.data.get_partial(id, offset, out, false);
        }
        let len = id.length();
        if !id.exists() || !range_within(offset, out.len(), len) {
            return false;
        }
        if out.is_empty() {
            return true;
        }
        let tuple = self.read_tuple(id);
        if len <= self.header_len {
            out.copy_from_slice(&tuple[offset..offset + out.len()]);
            return true;
        }
        let end = offset + out.len();

        // Header part.
        if offset < self.header_len {
            let hi = end.min(self.header_len);
            out[..hi - offset].copy_from_slice(&tuple[offset..hi]);
        }
        if end <= self.header_len {
            return true;
        }
        // Overlapping chunks only.
        let first = offset.saturating_sub(self.header_len) / self.chunk_len;
        let last = (end - 1 - self.header_len) / self.chunk_len;
        for i in first..=last {
            let (start, stop) = self.chunk_range(i, len);
            let lo = start.max(offset);
            let hi = stop.min(end);
            if lo >= hi {
                continue;
            }
            let chunk = self.chunk_ref(&tuple, i);
            if !self
                .data
                .get_partial(chunk, lo - start, &mut out[lo - offset..hi - offset], false)
            {
                return false;
            }
        }
        true
    }

    fn state_has_fixed_length(&self) -> bool {
        self.fixed_length.is_some()
    }

    fn needs_thread_init(&self) -> bool {
        true
    }

    fn stats(&self) -> StorageStats {
        let mut stats = StorageStats {
            backend: self.name,
            ..Default::default()
        };
        stats.absorb(&self.roots.stats());
        if !self.shared {
            stats.absorb(&self.data.stats());
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_modes(config: &StoreConfig) -> Vec<TreeStore> {
        vec![
            TreeStore::over_cchm(config),
            TreeStore::over_stdmap(config),
            TreeStore::shared_cchm(config),
        ]
    }

    #[test]
    fn test_tuple_len() {
        assert_eq!(tuple_len(3, 4, 2), 3);
        assert_eq!(tuple_len(4, 4, 2), 4);
        assert_eq!(tuple_len(5, 4, 2), 6);
        assert_eq!(tuple_len(10, 0, 4), 6);
        assert_eq!(tuple_len(0, 0, 4), 0);
    }

    #[test]
    fn test_round_trip() {
        for store in all_modes(&StoreConfig::small().with_chunks(2, 3)) {
            for data in [vec![], vec![1], vec![1, 2], vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]] {
                let ins = store.insert(&data, true);
                assert!(ins.inserted, "{}: {data:?}", store.name());
                assert_eq!(ins.state.length(), data.len());
                assert_eq!(store.get(ins.state, true).as_slice(), &data[..]);
                assert_eq!(store.find(&data, true), ins.state);
                assert!(!store.insert(&data, true).inserted);
            }
        }
    }

    #[test]
    fn test_chunks_are_shared() {
        let store = TreeStore::over_cchm(&StoreConfig::small().with_chunks(0, 4));
        let a: Vec<Slot> = (0..16).collect();
        let mut b = a.clone();
        b[5] = 99;
        store.insert(&a, true);
        store.insert(&b, true);
        let stats = store.stats();
        assert_eq!(stats.root_entries, 2);
        // Four chunks for the first state, one new chunk for the second.
        assert_eq!(stats.sub_entries, 5);
    }

    #[test]
    fn test_delta_touches_only_patched_chunks() {
        for store in all_modes(&StoreConfig::small().with_chunks(1, 2)) {
            let base = store.insert(&[10, 1, 2, 3, 4, 5, 6], true).state;
            let before = store.stats().sub_entries;
            let next = store.insert_delta(base, &Delta::new(3, &[30]), true);
            assert!(next.inserted);
            assert_eq!(store.get(next.state, true).as_slice(), &[10, 1, 2, 30, 4, 5, 6]);
            assert_eq!(store.stats().sub_entries - before, 1, "{}", store.name());

            // Same result by full insert resolves to the same id.
            assert_eq!(store.insert(&[10, 1, 2, 30, 4, 5, 6], true).state, next.state);
        }
    }

    #[test]
    fn test_delta_zero_extends() {
        for store in all_modes(&StoreConfig::small().with_chunks(2, 3)) {
            let base = store.insert(&[1, 2, 3, 4], true).state;
            let next = store.insert_patch(base, 8, &[9], true).state;
            assert_eq!(next.length(), 9);
            assert_eq!(store.get(next, true).as_slice(), &[1, 2, 3, 4, 0, 0, 0, 0, 9]);

            // Raw base growing past the header.
            let raw = store.insert(&[5], true).state;
            let grown = store.insert_patch(raw, 3, &[7, 7], true).state;
            assert_eq!(store.get(grown, true).as_slice(), &[5, 0, 0, 7, 7]);
        }
    }

    #[test]
    fn test_cached_delta_matches_uncached() {
        let store = TreeStore::shared_cchm(&StoreConfig::small().with_chunks(0, 2));
        assert!(store.needs_thread_init());
        let mut cache = store.thread_init(0);
        let base = store.insert(&[1, 2, 3, 4, 5, 6], true).state;

        let a = store.insert_delta_cached(&mut cache, base, &Delta::new(0, &[7]), true);
        let b = store.insert_delta_cached(&mut cache, base, &Delta::new(5, &[8]), true);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 1);

        assert_eq!(store.insert_delta(base, &Delta::new(0, &[7]), true).state, a.state);
        assert_eq!(store.get(b.state, true).as_slice(), &[1, 2, 3, 4, 5, 8]);
    }

    #[test]
    fn test_partial_reads() {
        for store in all_modes(&StoreConfig::small().with_chunks(3, 2)) {
            let data: Vec<Slot> = (100..111).collect();
            let id = store.insert(&data, true).state;
            for offset in 0..data.len() {
                for len in 0..=data.len() - offset {
                    let mut out = vec![0; len];
                    assert!(store.get_partial(id, offset, &mut out, true));
                    assert_eq!(out, &data[offset..offset + len], "{offset}+{len}");
                }
            }
            let mut out = [0; 2];
            assert!(!store.get_partial(id, 10, &mut out, true));
        }
    }

    #[test]
    fn test_non_root_entries_are_flat() {
        for store in all_modes(&StoreConfig::small()) {
            let sub = store.insert(&[4, 4, 4], false);
            let root = store.insert(&[4, 4, 4], true);
            assert!(root.inserted);
            assert!(sub.inserted, "{}", store.name());
            assert_eq!(store.get(sub.state, false).as_slice(), &[4, 4, 4]);
            assert_eq!(store.get(root.state, true).as_slice(), &[4, 4, 4]);
        }
    }

    #[test]
    #[should_panic(expected = "fixed to 4")]
    fn test_fixed_length_enforced_on_delta() {
        let store = TreeStore::over_cchm(&StoreConfig::small().with_fixed_length(4));
        let base = store.insert(&[1, 2, 3, 4], true).state;
        store.insert_patch(base, 4, &[5], true);
    }
}
