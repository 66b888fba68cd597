//! The contract every storage backend implements.

use std::fmt;

use thiserror::Error;
use tracing::error;

use crate::delta::Delta;
use crate::id::{InsertedState, StateId};
use crate::state::FullState;
use crate::Slot;

/// Storage error.
///
/// Capacity exhaustion is never returned to a caller of the hot-path
/// operations; it is raised through [`fatal`]. The other variants only show
/// up while a store is being configured.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{table} is full ({capacity} entries reserved)")]
    CapacityExhausted { table: &'static str, capacity: usize },

    #[error("unknown storage backend '{0}'")]
    UnknownBackend(String),

    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Abort exploration with diagnostics.
///
/// Continuing after a table overflowed would silently break deduplication,
/// so there is no recovery path.
#[cold]
#[track_caller]
pub fn fatal(err: StoreError, stats: &StorageStats) -> ! {
    error!(
        error = %err,
        backend = stats.backend,
        root_entries = stats.root_entries,
        sub_entries = stats.sub_entries,
        bytes_used = stats.bytes_used,
        bytes_reserved = stats.bytes_reserved,
        "state store exhausted, aborting"
    );
    panic!("fatal storage error: {err}");
}

/// Counters reported by a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageStats {
    pub backend: &'static str,
    /// Entries in the root namespace.
    pub root_entries: usize,
    /// Entries in the sub-state namespace (tree chunks, nodes).
    pub sub_entries: usize,
    /// Bytes holding entries (grows with the number of stored states).
    pub bytes_used: usize,
    /// Bytes set aside up front (tables, arena capacity).
    pub bytes_reserved: usize,
    /// Highest load factor across the backend's tables.
    pub max_fill: f64,
}

impl StorageStats {
    /// Fold the statistics of an inner table into `self`.
    pub fn absorb(&mut self, inner: &StorageStats) {
        self.root_entries += inner.root_entries;
        self.sub_entries += inner.sub_entries;
        self.bytes_used += inner.bytes_used;
        self.bytes_reserved += inner.bytes_reserved;
        self.max_fill = self.max_fill.max(inner.max_fill);
    }
}

impl fmt::Display for StorageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} roots, {} sub-states, {} B used / {} B reserved, max fill {:.1}%",
            self.backend,
            self.root_entries,
            self.sub_entries,
            self.bytes_used,
            self.bytes_reserved,
            self.max_fill * 100.0
        )
    }
}

/// Per-worker side table.
///
/// Owned by exactly one worker. Remembers the decoded root tuple of the last
/// base state a delta was applied to, so the successors of one expansion do
/// not re-read it. A miss is always safe: the backend falls back to reading
/// the base.
#[derive(Debug, Default)]
pub struct WorkerCache {
    worker: usize,
    base: StateId,
    tuple: Vec<Slot>,
    hits: u64,
    misses: u64,
}

impl WorkerCache {
    pub fn new(worker: usize) -> Self {
        Self {
            worker,
            ..Default::default()
        }
    }

    #[inline]
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Cached tuple for `base`, if it is the remembered one.
    #[inline]
    pub fn lookup(&mut self, base: StateId) -> Option<&[Slot]> {
        if base.exists() && self.base == base {
            self.hits += 1;
            Some(&self.tuple)
        } else {
            self.misses += 1;
            None
        }
    }

    pub fn remember(&mut self, base: StateId, tuple: &[Slot]) {
        self.base = base;
        self.tuple.clear();
        self.tuple.extend_from_slice(tuple);
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

/// A deduplicating store of slot vectors.
///
/// All methods take `&self` and are safe to call from many threads at once.
/// Inserting content that is already present returns the existing id with
/// `inserted == false`; when several threads race on the same content exactly
/// one of them observes `inserted == true` and all receive the same id.
///
/// Root entries (explorable states) and non-root entries (internal
/// fragments) live in separate namespaces: the same slots may be stored once
/// in each.
pub trait StateStorage: Send + Sync {
    /// Backend name as used in configuration.
    fn name(&self) -> &'static str;

    /// Look up content without inserting it.
    fn find(&self, data: &[Slot], is_root: bool) -> StateId;

    /// Insert-or-find.
    fn insert(&self, data: &[Slot], is_root: bool) -> InsertedState;

    /// Apply `delta` to the entry `base` and insert the result.
    fn insert_delta(&self, base: StateId, delta: &Delta<'_>, is_root: bool) -> InsertedState {
        let mut data = self.get(base, is_root).to_vec();
        delta.apply_to(&mut data);
        self.insert(&data, is_root)
    }

    /// Delta insert from a raw slice, without building a `Delta` first.
    #[inline]
    fn insert_patch(
        &self,
        base: StateId,
        offset: usize,
        data: &[Slot],
        is_root: bool,
    ) -> InsertedState {
        self.insert_delta(base, &Delta::new(offset, data), is_root)
    }

    /// Delta insert that may consult the caller's side table.
    fn insert_delta_cached(
        &self,
        _cache: &mut WorkerCache,
        base: StateId,
        delta: &Delta<'_>,
        is_root: bool,
    ) -> InsertedState {
        self.insert_delta(base, delta, is_root)
    }

    /// Materialize an entry. Panics if `id` was never inserted.
    fn get(&self, id: StateId, is_root: bool) -> FullState<'_>;

    /// Copy `out.len()` slots starting at `offset` into `out`.
    ///
    /// Returns false if `id` does not exist or the range is out of bounds.
    fn get_partial(&self, id: StateId, offset: usize, out: &mut [Slot], is_root: bool) -> bool {
        if !id.exists() || !range_within(offset, out.len(), id.length()) {
            return false;
        }
        let state = self.get(id, is_root);
        out.copy_from_slice(&state.as_slice()[offset..offset + out.len()]);
        true
    }

    /// Length of the entry in slots, from the id alone.
    #[inline]
    fn determine_length(&self, id: StateId) -> usize {
        id.length()
    }

    /// Whether `get` returns references into backend storage.
    fn access_to_states(&self) -> bool {
        false
    }

    /// Whether all root states of a run have the same length.
    fn state_has_fixed_length(&self) -> bool {
        false
    }

    /// Whether workers should route delta inserts through a [`WorkerCache`].
    fn needs_thread_init(&self) -> bool {
        false
    }

    /// Create the side table for one worker.
    fn thread_init(&self, worker: usize) -> WorkerCache {
        WorkerCache::new(worker)
    }

    fn stats(&self) -> StorageStats;
}

/// Whether `len` slots from `offset` fit in an entry of `length` slots.
#[inline]
pub(crate) fn range_within(offset: usize, len: usize, length: usize) -> bool {
    offset.checked_add(len).is_some_and(|end| end <= length)
}

/// Panic for a lookup of an id the store never produced.
#[cold]
#[track_caller]
pub(crate) fn missing_state(backend: &str, id: StateId, is_root: bool) -> ! {
    panic!("{backend}: {id:?} (root: {is_root}) was never inserted");
}

/// Contract check shared by fixed-length stores.
#[inline]
#[track_caller]
pub(crate) fn check_fixed_length(backend: &str, expected: Option<usize>, actual: usize) {
    if let Some(expected) = expected {
        assert_eq!(
            actual, expected,
            "{backend}: state of {actual} slots in a store fixed to {expected}"
        );
    }
}
