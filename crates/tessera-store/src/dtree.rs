//! Binary tree compression (`dtree`).
//!
//! States are decomposed into a balanced binary tree of intern tables.
//! Leaves are the slot values themselves;
//! a node at height `h` interns the pair of its children's indices at height
//! `h - 1`. Two states sharing a sub-vector share the corresponding subtree.
//!
//! Example for 4 slots `[s0, s1, s2, s3]`:
//! ```text
//!          top (h = 2)
//!         /       \
//!    pair_01    pair_23     (h = 1)
//!    /    \     /    \
//!   s0    s1  s2     s3     (leaves)
//! ```
//!
//! Vectors are zero-padded to the next power of two. A per-namespace root
//! table interns `(length, top)`, so a vector and its zero-padded extension
//! get different ids.

use std::sync::OnceLock;

use crate::config::StoreConfig;
use crate::delta::Delta;
use crate::id::{InsertedState, StateId, LENGTH_BITS, MAX_LENGTH};
use crate::state::FullState;
use crate::storage::{
    check_fixed_length, fatal, missing_state, range_within, StateStorage, StorageStats,
    StoreResult,
};
use crate::table::InternTable;
use crate::Slot;

/// Tallest tree: vectors of up to `2^24` slots.
const MAX_HEIGHT: usize = LENGTH_BITS as usize;

#[inline]
fn pack(left: u32, right: u32) -> u64 {
    ((left as u64) << 32) | right as u64
}

#[inline]
fn unpack(key: u64) -> (u32, u32) {
    ((key >> 32) as u32, key as u32)
}

/// Height of the tree for a vector of `len` slots.
#[inline]
fn height(len: usize) -> usize {
    if len <= 1 {
        0
    } else {
        len.next_power_of_two().trailing_zeros() as usize
    }
}

pub struct DTreeStore {
    /// `levels[h - 1]` holds the nodes at height `h`.
    levels: Box<[OnceLock<InternTable>]>,
    level_log2: u32,
    roots: InternTable,
    subs: InternTable,
    fixed_length: Option<usize>,
}

impl DTreeStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            levels: (0..MAX_HEIGHT).map(|_| OnceLock::new()).collect(),
            level_log2: config.data_log2,
            roots: InternTable::new("dtree roots", config.root_log2),
            subs: InternTable::new("dtree sub-roots", config.root_log2),
            fixed_length: config.fixed_length,
        }
    }

    #[inline]
    fn level(&self, h: usize) -> &InternTable {
        self.levels[h - 1].get_or_init(|| InternTable::new("dtree node level", self.level_log2))
    }

    #[inline]
    fn tops(&self, is_root: bool) -> &InternTable {
        if is_root {
            &self.roots
        } else {
            &self.subs
        }
    }

    /// Abort on exhaustion; the tree would be inconsistent otherwise.
    #[inline]
    fn or_fatal<T>(&self, r: StoreResult<T>) -> T {
        match r {
            Ok(v) => v,
            Err(e) => fatal(e, &self.stats()),
        }
    }

    fn intern_pair(&self, h: usize, left: u32, right: u32) -> u32 {
        self.or_fatal(self.level(h).intern(pack(left, right))).0
    }

    #[inline]
    fn children(&self, h: usize, node: u32) -> (u32, u32) {
        unpack(self.level(h).key(node))
    }

    /// Top node of `data`, built bottom-up.
    fn build(&self, data: &[Slot]) -> u32 {
        let h = height(data.len());
        if h == 0 {
            return data.first().copied().unwrap_or(0);
        }
        let mut current = data.to_vec();
        current.resize(1 << h, 0);
        for level in 1..=h {
            let next: Vec<u32> = current
                .chunks_exact(2)
                .map(|pair| self.intern_pair(level, pair[0], pair[1]))
                .collect();
            current = next;
        }
        debug_assert_eq!(current.len(), 1);
        current[0]
    }

    fn intern_top(&self, len: usize, top: u32, is_root: bool) -> InsertedState {
        let (index, inserted) = self.or_fatal(self.tops(is_root).intern(pack(len as u32, top)));
        InsertedState::new(StateId::new(len, index as u64 + 1), inserted)
    }

    /// `(length, top)` of a stored vector.
    fn top_of(&self, id: StateId, is_root: bool) -> u32 {
        let table = self.tops(is_root);
        if !id.exists() || id.key() as usize > table.len() {
            missing_state("dtree", id, is_root);
        }
        let (len, top) = unpack(table.key(id.key() as u32 - 1));
        if len as usize != id.length() {
            missing_state("dtree", id, is_root);
        }
        top
    }

    fn expand(&self, h: usize, node: u32, out: &mut Vec<Slot>) {
        if h == 0 {
            out.push(node);
            return;
        }
        let (l, r) = self.children(h, node);
        self.expand(h - 1, l, out);
        self.expand(h - 1, r, out);
    }

    /// Copy the part of subtree `node` (covering `[start, start + 2^h)`) that
    /// falls in `[lo, lo + out.len())`.
    fn walk(&self, h: usize, node: u32, start: usize, lo: usize, out: &mut [Slot]) {
        let width = 1usize << h;
        if start >= lo + out.len() || start + width <= lo {
            return;
        }
        if h == 0 {
            out[start - lo] = node;
            return;
        }
        let (l, r) = self.children(h, node);
        self.walk(h - 1, l, start, lo, out);
        self.walk(h - 1, r, start + width / 2, lo, out);
    }

    /// Rebuild only the nodes whose range the delta touches.
    fn patch(&self, h: usize, node: u32, start: usize, delta: &Delta<'_>) -> u32 {
        let width = 1usize << h;
        if !delta.overlaps(start, width) {
            return node;
        }
        if h == 0 {
            return delta.data()[start - delta.offset()];
        }
        let (l, r) = self.children(h, node);
        let nl = self.patch(h - 1, l, start, delta);
        let nr = self.patch(h - 1, r, start + width / 2, delta);
        if (nl, nr) == (l, r) {
            return node;
        }
        self.intern_pair(h, nl, nr)
    }

    /// Distinct interior nodes across all levels.
    pub fn node_count(&self) -> usize {
        self.levels
            .iter()
            .filter_map(OnceLock::get)
            .map(InternTable::len)
            .sum()
    }
}

impl StateStorage for DTreeStore {
    fn name(&self) -> &'static str {
        "dtree"
    }

    fn find(&self, data: &[Slot], is_root: bool) -> StateId {
        let h = height(data.len());
        let top = if h == 0 {
            data.first().copied().unwrap_or(0)
        } else {
            let mut current = data.to_vec();
            current.resize(1 << h, 0);
            for level in 1..=h {
                let mut next = Vec::with_capacity(current.len() / 2);
                for pair in current.chunks_exact(2) {
                    let Some(table) = self.levels[level - 1].get() else {
                        return StateId::NOT_FOUND;
                    };
                    match table.find(pack(pair[0], pair[1])) {
                        Some(idx) => next.push(idx),
                        None => return StateId::NOT_FOUND,
                    }
                }
                current = next;
            }
            current[0]
        };
        match self.tops(is_root).find(pack(data.len() as u32, top)) {
            Some(index) => StateId::new(data.len(), index as u64 + 1),
            None => StateId::NOT_FOUND,
        }
    }

    fn insert(&self, data: &[Slot], is_root: bool) -> InsertedState {
        assert!(
            data.len() <= MAX_LENGTH,
            "dtree: state of {} slots exceeds the {MAX_LENGTH} slot limit",
            data.len()
        );
        if is_root {
            check_fixed_length("dtree", self.fixed_length, data.len());
        }
        let top = self.build(data);
        self.intern_top(data.len(), top, is_root)
    }

    fn insert_delta(&self, base: StateId, delta: &Delta<'_>, is_root: bool) -> InsertedState {
        let old_len = base.length();
        let new_len = delta.result_len(old_len);
        let top = self.top_of(base, is_root);
        let h = height(old_len);
        if height(new_len) != h {
            // The padded width grows: rebuild from scratch.
            let mut data = self.get(base, is_root).to_vec();
            delta.apply_to(&mut data);
            return self.insert(&data, is_root);
        }
        if is_root {
            check_fixed_length("dtree", self.fixed_length, new_len);
        }
        let top = self.patch(h, top, 0, delta);
        self.intern_top(new_len, top, is_root)
    }

    fn get(&self, id: StateId, is_root: bool) -> FullState<'_> {
        let top = self.top_of(id, is_root);
        let len = id.length();
        let h = height(len);
        let mut out = Vec::with_capacity(1 << h);
        if len > 0 {
            self.expand(h, top, &mut out);
        }
        out.truncate(len);
        FullState::owned(out, is_root)
    }

    fn get_partial(&self, id: StateId, offset: usize, out: &mut [Slot], is_root: bool) -> bool {
        if !id.exists() || !range_within(offset, out.len(), id.length()) {
            return false;
        }
        let top = self.top_of(id, is_root);
        if !out.is_empty() {
            self.walk(height(id.length()), top, 0, offset, out);
        }
        true
    }

    fn state_has_fixed_length(&self) -> bool {
        self.fixed_length.is_some()
    }

    fn stats(&self) -> StorageStats {
        let levels: Vec<&InternTable> = self.levels.iter().filter_map(OnceLock::get).collect();
        let tables = levels.iter().copied().chain([&self.roots, &self.subs]);
        let (mut used, mut reserved, mut fill) = (0, 0, 0.0f64);
        for table in tables {
            used += table.used_bytes();
            reserved += table.reserved_bytes();
            fill = fill.max(table.fill());
        }
        StorageStats {
            backend: "dtree",
            root_entries: self.roots.len(),
            sub_entries: self.subs.len() + self.node_count(),
            bytes_used: used,
            bytes_reserved: reserved,
            max_fill: fill,
        }
    }
}
