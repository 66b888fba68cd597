//! State handles.
//!
//! A [`StateId`] packs the length of a stored vector (in slots) together with
//! a backend-chosen lookup key, so the length of any state can be recovered
//! from its handle alone:
//!
//! ```text
//!  63            40 39                              0
//! +----------------+---------------------------------+
//! | length (24 b)  | key (40 b, never zero)          |
//! +----------------+---------------------------------+
//! ```
//!
//! The all-zero value is the "not found" sentinel.

use std::fmt;

/// Number of bits used for the lookup key.
pub const KEY_BITS: u32 = 40;
/// Number of bits used for the length.
pub const LENGTH_BITS: u32 = 24;
/// Largest key a backend may hand out.
pub const MAX_KEY: u64 = (1 << KEY_BITS) - 1;
/// Largest state length, in slots.
pub const MAX_LENGTH: usize = (1 << LENGTH_BITS) - 1;

const KEY_MASK: u64 = MAX_KEY;

/// Opaque handle for a stored state or sub-state.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(u64);

impl StateId {
    /// The "not found / does not exist" sentinel.
    pub const NOT_FOUND: StateId = StateId(0);

    /// Pack a length and a non-zero key.
    ///
    /// Panics if the key is zero or either field exceeds its bit budget.
    #[inline]
    pub fn new(length: usize, key: u64) -> Self {
        assert!(key != 0, "state key must be non-zero");
        assert!(key <= MAX_KEY, "state key {key:#x} exceeds {KEY_BITS} bits");
        assert!(
            length <= MAX_LENGTH,
            "state length {length} exceeds {LENGTH_BITS} bits"
        );
        StateId(((length as u64) << KEY_BITS) | key)
    }

    #[inline]
    pub fn exists(self) -> bool {
        self.0 != 0
    }

    /// Length of the identified state in slots.
    #[inline]
    pub fn length(self) -> usize {
        (self.0 >> KEY_BITS) as usize
    }

    /// Backend lookup key (non-zero for every existing state).
    #[inline]
    pub fn key(self) -> u64 {
        self.0 & KEY_MASK
    }

    /// Same key, different length. Used by backends that store a different
    /// physical vector than the logical one.
    #[inline]
    pub fn with_length(self, length: usize) -> Self {
        StateId::new(length, self.key())
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_u64(v: u64) -> Self {
        StateId(v)
    }

    /// Split into two slots (low word first), for storing ids inside vectors.
    #[inline]
    pub fn to_slots(self) -> [u32; 2] {
        [self.0 as u32, (self.0 >> 32) as u32]
    }

    #[inline]
    pub fn from_slots(lo: u32, hi: u32) -> Self {
        StateId((lo as u64) | ((hi as u64) << 32))
    }
}

impl fmt::Debug for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exists() {
            write!(f, "StateId(len={}, key={:#x})", self.length(), self.key())
        } else {
            write!(f, "StateId(NOT_FOUND)")
        }
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Result of an insert: the id of the entry and whether this call created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsertedState {
    pub state: StateId,
    pub inserted: bool,
}

impl InsertedState {
    #[inline]
    pub fn new(state: StateId, inserted: bool) -> Self {
        Self { state, inserted }
    }

    #[inline]
    pub fn state(&self) -> StateId {
        self.state
    }

    #[inline]
    pub fn inserted(&self) -> bool {
        self.inserted
    }
}
