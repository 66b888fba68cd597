//! Lockless intern table for 64-bit keys, using open addressing with linear
//! probing.
//!
//! Maps each distinct key to a dense index (`0, 1, 2, ...` in insertion
//! order) and back. Used for the node levels of the binary tree store, where
//! a key is a packed `(left, right)` pair.
//!
//! Slot life cycle: `EMPTY (0)` → `BUSY` (claimed by one thread, which is
//! writing the key) → `index + 1` (published). Memory ordering:
//!
//! - claiming is a CAS with `Acquire` on success;
//! - the key and the reverse entry are written before the slot is published
//!   with `Release`;
//! - readers load the slot with `Acquire` before looking at the key, and spin
//!   while it is `BUSY`;
//! - the entry counter is `Relaxed`, it is only used for statistics and the
//!   capacity check.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::state::hash_u64;
use crate::storage::{StoreError, StoreResult};

const EMPTY: u32 = 0;
const BUSY: u32 = u32::MAX;

pub struct InternTable {
    name: &'static str,
    keys: Box<[AtomicU64]>,
    slots: Box<[AtomicU32]>,
    reverse: Box<[AtomicU64]>,
    mask: usize,
    count: AtomicUsize,
}

impl InternTable {
    /// Table with `2^log2` slots. At most 3/4 of them can be filled.
    pub fn new(name: &'static str, log2: u32) -> Self {
        assert!(
            (4..=31).contains(&log2),
            "{name}: table size exponent {log2} out of range 4..=31"
        );
        let len = 1usize << log2;
        let max_entries = len / 4 * 3;
        Self {
            name,
            keys: (0..len).map(|_| AtomicU64::new(0)).collect(),
            slots: (0..len).map(|_| AtomicU32::new(EMPTY)).collect(),
            reverse: (0..max_entries).map(|_| AtomicU64::new(0)).collect(),
            mask: len - 1,
            count: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn wait_published(&self, idx: usize) -> u32 {
        loop {
            let v = self.slots[idx].load(Ordering::Acquire);
            if v != BUSY {
                return v;
            }
            std::hint::spin_loop();
        }
    }

    /// Index of `key`, if present.
    pub fn find(&self, key: u64) -> Option<u32> {
        let mut idx = hash_u64(key) as usize & self.mask;
        for _ in 0..=self.mask {
            let v = self.wait_published(idx);
            if v == EMPTY {
                return None;
            }
            if self.keys[idx].load(Ordering::Relaxed) == key {
                return Some(v - 1);
            }
            idx = (idx + 1) & self.mask;
        }
        None
    }

    /// Index of `key`, inserting it if absent. The flag is true if this call
    /// inserted it.
    pub fn intern(&self, key: u64) -> StoreResult<(u32, bool)> {
        let mut idx = hash_u64(key) as usize & self.mask;
        for _ in 0..=self.mask {
            let slot = &self.slots[idx];
            let mut v = self.wait_published(idx);

            while v == EMPTY {
                match slot.compare_exchange(EMPTY, BUSY, Ordering::Acquire, Ordering::Acquire) {
                    Ok(_) => return self.publish(idx, key).map(|i| (i, true)),
                    Err(_) => {
                        // Lost the claim, see what the winner wrote.
                        v = self.wait_published(idx);
                    }
                }
            }

            if self.keys[idx].load(Ordering::Relaxed) == key {
                return Ok((v - 1, false));
            }
            idx = (idx + 1) & self.mask;
        }
        Err(self.exhausted())
    }

    fn publish(&self, idx: usize, key: u64) -> StoreResult<u32> {
        let entry = self.count.fetch_add(1, Ordering::Relaxed);
        if entry >= self.reverse.len() {
            // Release the claim so nobody spins on it.
            self.slots[idx].store(EMPTY, Ordering::Release);
            return Err(self.exhausted());
        }
        self.keys[idx].store(key, Ordering::Relaxed);
        self.reverse[entry].store(key, Ordering::Release);
        self.slots[idx].store(entry as u32 + 1, Ordering::Release);
        Ok(entry as u32)
    }

    fn exhausted(&self) -> StoreError {
        StoreError::CapacityExhausted {
            table: self.name,
            capacity: self.reverse.len(),
        }
    }

    /// Key stored under `index`. Panics if the index was never handed out.
    #[inline]
    pub fn key(&self, index: u32) -> u64 {
        assert!(
            (index as usize) < self.len(),
            "{}: index {index} was never interned",
            self.name
        );
        self.reverse[index as usize].load(Ordering::Acquire)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed).min(self.reverse.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.reverse.len()
    }

    pub fn fill(&self) -> f64 {
        self.len() as f64 / self.slots.len() as f64
    }

    /// Bytes per live entry: key, slot and reverse entry.
    pub fn used_bytes(&self) -> usize {
        self.len() * (8 + 4 + 8)
    }

    pub fn reserved_bytes(&self) -> usize {
        self.slots.len() * (8 + 4) + self.reverse.len() * 8
    }
}

impl std::fmt::Debug for InternTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternTable")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_intern_find() {
        let table = InternTable::new("test", 10);

        assert_eq!(table.intern(42).unwrap(), (0, true));
        assert_eq!(table.intern(99).unwrap(), (1, true));
        assert_eq!(table.intern(42).unwrap(), (0, false)); // duplicate
        assert_eq!(table.intern(12345).unwrap(), (2, true));

        assert_eq!(table.find(42), Some(0));
        assert_eq!(table.find(99), Some(1));
        assert_eq!(table.find(999), None);
        assert_eq!(table.key(2), 12345);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_extreme_keys() {
        let table = InternTable::new("test", 8);
        assert!(table.intern(0).unwrap().1);
        assert!(table.intern(u64::MAX).unwrap().1);
        assert!(!table.intern(0).unwrap().1);
        assert_eq!(table.key(0), 0);
        assert_eq!(table.key(1), u64::MAX);
    }

    #[test]
    fn test_capacity_exhausted() {
        let table = InternTable::new("small", 4); // 16 slots, 12 entries
        for k in 0..12u64 {
            table.intern(k).unwrap();
        }
        assert!(matches!(
            table.intern(100),
            Err(StoreError::CapacityExhausted { table: "small", .. })
        ));
        // Existing keys are still found.
        assert_eq!(table.intern(3).unwrap(), (3, false));
    }

    #[test]
    fn test_concurrent_intern_same_keys() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(InternTable::new("shared", 14));
        let mut handles = vec![];
        for _ in 0..4 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                let mut won = 0;
                let mut ids = vec![];
                for k in 0..2000u64 {
                    let (idx, inserted) = table.intern(k * 7919).unwrap();
                    if inserted {
                        won += 1;
                    }
                    ids.push(idx);
                }
                (won, ids)
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let total_won: usize = results.iter().map(|(w, _)| w).sum();
        assert_eq!(total_won, 2000);
        assert_eq!(table.len(), 2000);
        for (_, ids) in &results[1..] {
            assert_eq!(ids, &results[0].1);
        }
        for k in 0..2000u64 {
            let idx = table.find(k * 7919).unwrap();
            assert_eq!(table.key(idx), k * 7919);
        }
    }
}
