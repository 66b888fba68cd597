//! Materialized states and content hashing.

use std::borrow::Cow;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};

use ahash::RandomState;

use crate::Slot;

/// Fixed seeds so content hashes are stable across runs.
const HASH_SEEDS: [u64; 4] = [
    0x2d35_8dcc_aa6c_78a5,
    0x9e37_79b9_7f4a_7c15,
    0x517c_c1b7_2722_0a95,
    0x6a09_e667_f3bc_c909,
];

#[inline]
fn hash_state() -> RandomState {
    RandomState::with_seeds(HASH_SEEDS[0], HASH_SEEDS[1], HASH_SEEDS[2], HASH_SEEDS[3])
}

/// Hash a vector together with its namespace.
///
/// Every backend keyed on content uses this, so root and non-root copies of
/// the same slots hash differently.
#[inline]
pub fn hash_slots(data: &[Slot], is_root: bool) -> u64 {
    let mut hasher = hash_state().build_hasher();
    is_root.hash(&mut hasher);
    data.hash(&mut hasher);
    hasher.finish()
}

/// Hash a single 64-bit key (pair tables, root tables).
#[inline]
pub fn hash_u64(key: u64) -> u64 {
    let h = (key ^ HASH_SEEDS[0]).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    let h = (h ^ (h >> 29)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    h ^ (h >> 32)
}

/// Immutable view of one stored entry.
///
/// Backends that can hand out references into their own storage return the
/// borrowed form; the others materialize an owned copy.
#[derive(Clone)]
pub struct FullState<'a> {
    is_root: bool,
    data: Cow<'a, [Slot]>,
}

impl<'a> FullState<'a> {
    #[inline]
    pub fn borrowed(data: &'a [Slot], is_root: bool) -> Self {
        Self {
            is_root,
            data: Cow::Borrowed(data),
        }
    }

    #[inline]
    pub fn owned(data: Vec<Slot>, is_root: bool) -> Self {
        Self {
            is_root,
            data: Cow::Owned(data),
        }
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[Slot] {
        &self.data
    }

    /// Whether this view points into backend storage.
    #[inline]
    pub fn is_borrowed(&self) -> bool {
        matches!(self.data, Cow::Borrowed(_))
    }

    pub fn to_vec(&self) -> Vec<Slot> {
        self.data.to_vec()
    }

    pub fn into_owned(self) -> FullState<'static> {
        FullState {
            is_root: self.is_root,
            data: Cow::Owned(self.data.into_owned()),
        }
    }

    #[inline]
    pub fn content_hash(&self) -> u64 {
        hash_slots(&self.data, self.is_root)
    }
}

impl PartialEq for FullState<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.is_root == other.is_root && self.data[..] == other.data[..]
    }
}

impl Eq for FullState<'_> {}

impl Hash for FullState<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.is_root.hash(state);
        self.data[..].hash(state);
    }
}

impl fmt::Debug for FullState<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FullState")
            .field("is_root", &self.is_root)
            .field("data", &&self.data[..])
            .finish()
    }
}

impl fmt::Display for FullState<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_depends_on_namespace() {
        let data = [1, 2, 3];
        assert_eq!(hash_slots(&data, true), hash_slots(&data, true));
        assert_ne!(hash_slots(&data, true), hash_slots(&data, false));
        assert_ne!(hash_slots(&data, true), hash_slots(&[1, 2, 4], true));
    }

    #[test]
    fn test_equality_ignores_storage_form() {
        let data = vec![4, 5, 6];
        let a = FullState::borrowed(&data, true);
        let b = FullState::owned(data.clone(), true);
        let c = FullState::owned(data.clone(), false);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.is_borrowed());
        assert!(!b.is_borrowed());
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_display() {
        let s = FullState::owned(vec![42, 7], true);
        assert_eq!(s.to_string(), "[42, 7]");
    }

    #[test]
    fn test_hash_u64_spreads() {
        assert_ne!(hash_u64(1), hash_u64(2));
        assert_ne!(hash_u64(1 << 32), hash_u64(1));
    }
}
