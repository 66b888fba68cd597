//! Paged bump arena for state vectors.
//!
//! Entries are written once and never freed; the arena lives as long as the
//! store that owns it. Capacity is fixed at construction and exceeding it is
//! a [`StoreError::CapacityExhausted`]. Pages are materialized on first use,
//! so a generously sized arena only costs address space until it fills. An
//! entry longer than a page gets a run of whole pages of its own.
//!
//! Memory ordering: slots are written with `Relaxed` stores between
//! [`SlotArena::alloc`] and the owner's `Release` publication of the offset.
//! A reader that obtained the offset through an `Acquire` load may view the
//! range as plain `&[u32]`; the range is never written again.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::OnceLock;

use crate::storage::{StoreError, StoreResult};
use crate::Slot;

/// Default page size, in slots (256 KiB per page).
pub const DEFAULT_PAGE_LOG2: u32 = 16;

pub struct SlotArena {
    table: &'static str,
    pages: Box<[OnceLock<Box<[AtomicU32]>>]>,
    page_log2: u32,
    capacity: usize,
    cursor: AtomicUsize,
    committed_pages: AtomicUsize,
}

impl SlotArena {
    /// Arena of `2^capacity_log2` slots.
    pub fn new(table: &'static str, capacity_log2: u32) -> Self {
        Self::with_page_log2(table, capacity_log2, DEFAULT_PAGE_LOG2)
    }

    pub fn with_page_log2(table: &'static str, capacity_log2: u32, page_log2: u32) -> Self {
        let page_log2 = page_log2.min(capacity_log2);
        let capacity = 1usize << capacity_log2;
        let num_pages = capacity >> page_log2;
        let pages = (0..num_pages).map(|_| OnceLock::new()).collect();
        Self {
            table,
            pages,
            page_log2,
            capacity,
            cursor: AtomicUsize::new(0),
            committed_pages: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn page_len(&self) -> usize {
        1 << self.page_log2
    }

    /// Largest entry the arena can hold.
    #[inline]
    pub fn max_entry(&self) -> usize {
        self.capacity
    }

    fn exhausted(&self) -> StoreError {
        StoreError::CapacityExhausted {
            table: self.table,
            capacity: self.capacity,
        }
    }

    /// Reserve `len` contiguous slots.
    ///
    /// An entry that fits in a page never straddles one. A longer entry
    /// starts on a page boundary and takes whole pages, backed by a single
    /// allocation, so its range stays contiguous.
    pub fn alloc(&self, len: usize) -> StoreResult<usize> {
        if len > self.capacity {
            return Err(self.exhausted());
        }
        let page_len = self.page_len();
        let mask = page_len - 1;
        let span = len.div_ceil(page_len);
        let mut cur = self.cursor.load(Ordering::Relaxed);
        loop {
            let mut start = cur;
            if (start & mask) + len > page_len && start & mask != 0 {
                start = (start | mask) + 1;
            }
            let end = if span > 1 { start + span * page_len } else { start + len };
            if end > self.capacity {
                return Err(self.exhausted());
            }
            match self
                .cursor
                .compare_exchange_weak(cur, end, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => {
                    if len > 0 {
                        self.page(start >> self.page_log2, span.max(1));
                    }
                    return Ok(start);
                }
                Err(actual) => {
                    cur = actual;
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Materialize page `idx`, sized to cover `span` pages.
    fn page(&self, idx: usize, span: usize) -> &[AtomicU32] {
        self.pages[idx].get_or_init(|| {
            self.committed_pages.fetch_add(span, Ordering::Relaxed);
            (0..span << self.page_log2).map(|_| AtomicU32::new(0)).collect()
        })
    }

    /// The materialized block holding `offset`, and the index within it.
    ///
    /// Pages inside a multi-page entry stay empty; their offsets resolve to
    /// the block that starts the entry.
    fn committed(&self, offset: usize) -> (&[AtomicU32], usize) {
        let mut idx = offset >> self.page_log2;
        while idx < self.pages.len() {
            if let Some(block) = self.pages[idx].get() {
                let within = offset - (idx << self.page_log2);
                if within < block.len() {
                    return (block, within);
                }
                break;
            }
            if idx == 0 {
                break;
            }
            idx -= 1;
        }
        panic!("{}: offset {offset} was never allocated", self.table)
    }

    /// Fill an allocated range.
    pub fn write(&self, offset: usize, data: &[Slot]) {
        if data.is_empty() {
            return;
        }
        let (block, within) = self.committed(offset);
        for (dst, &v) in block[within..within + data.len()].iter().zip(data) {
            dst.store(v, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn load(&self, offset: usize) -> Slot {
        let (block, within) = self.committed(offset);
        block[within].load(Ordering::Relaxed)
    }

    /// View a published range.
    pub fn read(&self, offset: usize, len: usize) -> &[Slot] {
        if len == 0 {
            return &[];
        }
        let (block, within) = self.committed(offset);
        let cells = &block[within..within + len];
        // SAFETY: `AtomicU32` has the same in-memory representation as `u32`.
        // The range was fully written before its offset was published with
        // `Release`, the caller synchronized with that publication, and
        // allocated ranges are never written again.
        unsafe { std::slice::from_raw_parts(cells.as_ptr() as *const Slot, len) }
    }

    /// Slots handed out so far.
    #[inline]
    pub fn used_slots(&self) -> usize {
        self.cursor.load(Ordering::Relaxed).min(self.capacity)
    }

    #[inline]
    pub fn capacity_slots(&self) -> usize {
        self.capacity
    }

    pub fn used_bytes(&self) -> usize {
        self.used_slots() * std::mem::size_of::<Slot>()
    }

    pub fn reserved_bytes(&self) -> usize {
        self.capacity * std::mem::size_of::<Slot>()
    }

    /// Bytes of pages actually materialized.
    pub fn committed_bytes(&self) -> usize {
        self.committed_pages.load(Ordering::Relaxed) * self.page_len() * std::mem::size_of::<Slot>()
    }

    pub fn fill(&self) -> f64 {
        self.used_slots() as f64 / self.capacity as f64
    }
}

impl std::fmt::Debug for SlotArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotArena")
            .field("table", &self.table)
            .field("used_slots", &self.used_slots())
            .field("capacity", &self.capacity)
            .field("page_log2", &self.page_log2)
            .finish()
    }
}
