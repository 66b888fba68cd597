//! Lock-free hash-consing store for whole vectors (`cchm`).
//!
//! Two tables:
//!
//! - the *content table*, open addressing with linear probing over the full
//!   vector hash. Each slot packs a hash tag and the entry's logical index;
//! - the *root index*, mapping the logical index to the entry's offset in
//!   the arena. [`StateId`] keys are `logical index + 1`, so ids stay
//!   compact however large the content table is.
//!
//! Entries are stored inline in a [`SlotArena`]: one header slot (length and
//! root flag) followed by the data.
//!
//! Content slot encoding:
//!
//! ```text
//!  63   62   61         40 39                0
//! +----+----+-------------+-------------------+
//! |BUSY|DONE| tag (22 b)  | logical index + 1 |
//! +----+----+-------------+-------------------+
//! ```
//!
//! A thread claims an `EMPTY` slot by CAS to `BUSY | tag`, writes the entry,
//! publishes the root index entry (`Release`), then stores
//! `DONE | tag | index` (`Release`). Probers meeting a `BUSY` slot with their
//! own tag spin until it is published and then compare the content; other
//! tags are skipped without waiting.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::arena::SlotArena;
use crate::config::StoreConfig;
use crate::id::{InsertedState, StateId, MAX_LENGTH};
use crate::state::{hash_slots, FullState};
use crate::storage::{
    check_fixed_length, fatal, missing_state, range_within, StateStorage, StorageStats,
    StoreError,
};
use crate::Slot;

const EMPTY: u64 = 0;
const BUSY_BIT: u64 = 1 << 63;
const DONE_BIT: u64 = 1 << 62;
const TAG_SHIFT: u32 = 40;
const TAG_MASK: u64 = ((1 << 22) - 1) << TAG_SHIFT;
const INDEX_MASK: u64 = (1 << TAG_SHIFT) - 1;

const ROOT_FLAG: Slot = 1 << 31;

#[inline]
fn tag_of(hash: u64) -> u64 {
    ((hash >> 42) << TAG_SHIFT) & TAG_MASK
}

#[inline]
fn header(len: usize, is_root: bool) -> Slot {
    len as Slot | if is_root { ROOT_FLAG } else { 0 }
}

/// Outcome of looking at one probe position.
enum Probe {
    Found(StateId),
    Claimed,
    Next,
}

pub struct HashConsStore {
    content: Box<[AtomicU64]>,
    index: Box<[AtomicU64]>,
    arena: SlotArena,
    mask: usize,
    next_index: AtomicUsize,
    roots: AtomicUsize,
    subs: AtomicUsize,
    fixed_length: Option<usize>,
}

impl HashConsStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self::with_sizes(
            config.root_log2,
            config.data_log2,
            config.arena_log2,
            config.fixed_length,
        )
    }

    /// Explicit sizes: `2^index_log2` entries, `2^content_log2` probe slots,
    /// `2^arena_log2` slots of entry storage.
    pub fn with_sizes(
        index_log2: u32,
        content_log2: u32,
        arena_log2: u32,
        fixed_length: Option<usize>,
    ) -> Self {
        let content_len = 1usize << content_log2;
        let index_len = 1usize << index_log2;
        Self {
            content: (0..content_len).map(|_| AtomicU64::new(EMPTY)).collect(),
            index: (0..index_len).map(|_| AtomicU64::new(0)).collect(),
            arena: SlotArena::new("cchm arena", arena_log2),
            mask: content_len - 1,
            next_index: AtomicUsize::new(0),
            roots: AtomicUsize::new(0),
            subs: AtomicUsize::new(0),
            fixed_length,
        }
    }

    /// Number of entries in both namespaces.
    pub fn len(&self) -> usize {
        self.roots.load(Ordering::Relaxed) + self.subs.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn offset_of(&self, logical: usize) -> Option<usize> {
        let off = self.index.get(logical)?.load(Ordering::Acquire);
        (off != 0).then(|| off as usize - 1)
    }

    /// Offset of a published entry named by a content slot value.
    #[inline]
    fn entry_offset(&self, slot_value: u64) -> usize {
        let logical = (slot_value & INDEX_MASK) as usize - 1;
        match self.offset_of(logical) {
            Some(off) => off,
            None => unreachable!("content slot published before its index entry"),
        }
    }

    fn matches(&self, slot_value: u64, data: &[Slot], is_root: bool) -> Option<StateId> {
        let off = self.entry_offset(slot_value);
        if self.arena.load(off) != header(data.len(), is_root) {
            return None;
        }
        (self.arena.read(off + 1, data.len()) == data)
            .then(|| StateId::new(data.len(), slot_value & INDEX_MASK))
    }

    /// Inspect one probe position; `claim` decides whether an empty slot is
    /// taken (insert) or ends the search (find).
    #[inline]
    fn probe(
        &self,
        pos: usize,
        tag: u64,
        data: &[Slot],
        is_root: bool,
        claim: bool,
    ) -> Option<Probe> {
        let slot = &self.content[pos];
        let mut v = slot.load(Ordering::Acquire);
        loop {
            if v == EMPTY {
                if !claim {
                    return None;
                }
                match slot.compare_exchange(
                    EMPTY,
                    BUSY_BIT | tag,
                    Ordering::Acquire,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Some(Probe::Claimed),
                    Err(actual) => {
                        v = actual;
                        continue;
                    }
                }
            }
            if v & TAG_MASK != tag {
                return Some(Probe::Next);
            }
            if v & BUSY_BIT != 0 {
                std::hint::spin_loop();
                v = slot.load(Ordering::Acquire);
                continue;
            }
            return Some(match self.matches(v, data, is_root) {
                Some(id) => Probe::Found(id),
                None => Probe::Next,
            });
        }
    }

    fn publish(&self, pos: usize, tag: u64, data: &[Slot], is_root: bool) -> InsertedState {
        let logical = self.next_index.fetch_add(1, Ordering::Relaxed);
        if logical >= self.index.len() {
            self.content[pos].store(EMPTY, Ordering::Release);
            fatal(
                StoreError::CapacityExhausted {
                    table: "cchm root index",
                    capacity: self.index.len(),
                },
                &self.stats(),
            );
        }
        let off = match self.arena.alloc(data.len() + 1) {
            Ok(off) => off,
            Err(e) => {
                self.content[pos].store(EMPTY, Ordering::Release);
                fatal(e, &self.stats());
            }
        };
        self.arena.write(off, &[header(data.len(), is_root)]);
        self.arena.write(off + 1, data);

        let key = logical as u64 + 1;
        self.index[logical].store(off as u64 + 1, Ordering::Release);
        self.content[pos].store(DONE_BIT | tag | key, Ordering::Release);

        if is_root {
            self.roots.fetch_add(1, Ordering::Relaxed);
        } else {
            self.subs.fetch_add(1, Ordering::Relaxed);
        }
        InsertedState::new(StateId::new(data.len(), key), true)
    }

    #[inline]
    fn check_input(&self, data: &[Slot], is_root: bool) {
        assert!(
            data.len() <= MAX_LENGTH,
            "cchm: state of {} slots exceeds the {MAX_LENGTH} slot limit",
            data.len()
        );
        if is_root {
            check_fixed_length("cchm", self.fixed_length, data.len());
        }
    }

    /// Locate a published entry, checking it against the id.
    fn locate(&self, id: StateId, is_root: bool) -> usize {
        if !id.exists() {
            missing_state("cchm", id, is_root);
        }
        let off = match self.offset_of(id.key() as usize - 1) {
            Some(off) => off,
            None => missing_state("cchm", id, is_root),
        };
        if self.arena.load(off) != header(id.length(), is_root) {
            missing_state("cchm", id, is_root);
        }
        off
    }
}

impl StateStorage for HashConsStore {
    fn name(&self) -> &'static str {
        "cchm"
    }

    fn find(&self, data: &[Slot], is_root: bool) -> StateId {
        let hash = hash_slots(data, is_root);
        let tag = tag_of(hash);
        let mut pos = hash as usize & self.mask;
        for _ in 0..=self.mask {
            match self.probe(pos, tag, data, is_root, false) {
                None => return StateId::NOT_FOUND,
                Some(Probe::Found(id)) => return id,
                Some(_) => pos = (pos + 1) & self.mask,
            }
        }
        StateId::NOT_FOUND
    }

    fn insert(&self, data: &[Slot], is_root: bool) -> InsertedState {
        self.check_input(data, is_root);
        let hash = hash_slots(data, is_root);
        let tag = tag_of(hash);
        let mut pos = hash as usize & self.mask;
        for _ in 0..=self.mask {
            match self.probe(pos, tag, data, is_root, true) {
                Some(Probe::Found(id)) => return InsertedState::new(id, false),
                Some(Probe::Claimed) => return self.publish(pos, tag, data, is_root),
                _ => pos = (pos + 1) & self.mask,
            }
        }
        fatal(
            StoreError::CapacityExhausted {
                table: "cchm content table",
                capacity: self.content.len(),
            },
            &self.stats(),
        )
    }

    fn get(&self, id: StateId, is_root: bool) -> FullState<'_> {
        let off = self.locate(id, is_root);
        FullState::borrowed(self.arena.read(off + 1, id.length()), is_root)
    }

    fn get_partial(&self, id: StateId, offset: usize, out: &mut [Slot], is_root: bool) -> bool {
        if !id.exists() || !range_within(offset, out.len(), id.length()) {
            return false;
        }
        let off = self.locate(id, is_root);
        out.copy_from_slice(self.arena.read(off + 1 + offset, out.len()));
        true
    }

    fn access_to_states(&self) -> bool {
        true
    }

    fn state_has_fixed_length(&self) -> bool {
        self.fixed_length.is_some()
    }

    fn stats(&self) -> StorageStats {
        let entries = self.len();
        StorageStats {
            backend: "cchm",
            root_entries: self.roots.load(Ordering::Relaxed),
            sub_entries: self.subs.load(Ordering::Relaxed),
            bytes_used: self.arena.used_bytes() + entries * 16,
            bytes_reserved: self.content.len() * 8
                + self.index.len() * 8
                + self.arena.reserved_bytes(),
            max_fill: (entries as f64 / self.content.len() as f64)
                .max(entries as f64 / self.index.len() as f64)
                .max(self.arena.fill()),
        }
    }
}
