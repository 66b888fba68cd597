//! Localized modifications of stored states.

use crate::Slot;

/// Write `data` into an existing vector starting at `offset`.
///
/// If `offset + len` runs past the end of the base vector, the result is
/// zero-extended first: a delta never truncates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delta<'a> {
    offset: usize,
    data: &'a [Slot],
}

impl<'a> Delta<'a> {
    /// Borrow `data` as the replacement slots.
    #[inline]
    pub fn new(offset: usize, data: &'a [Slot]) -> Self {
        Self { offset, data }
    }

    /// Use the first `length` slots of `buffer`. Lets callers keep a fixed
    /// stack buffer and describe a shorter write.
    #[inline]
    pub fn with_length(offset: usize, length: usize, buffer: &'a [Slot]) -> Self {
        assert!(
            length <= buffer.len(),
            "delta length {length} exceeds buffer of {} slots",
            buffer.len()
        );
        Self {
            offset,
            data: &buffer[..length],
        }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
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
    pub fn data(&self) -> &'a [Slot] {
        self.data
    }

    /// One past the last slot written.
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.data.len()
    }

    /// Length of the result when applied to a vector of `base_len` slots.
    #[inline]
    pub fn result_len(&self, base_len: usize) -> usize {
        base_len.max(self.end())
    }

    /// Whether the write touches any slot in `[start, start + len)`.
    #[inline]
    pub fn overlaps(&self, start: usize, len: usize) -> bool {
        !self.is_empty() && self.offset < start + len && start < self.end()
    }

    /// Apply in place, zero-extending `target` when needed.
    pub fn apply_to(&self, target: &mut Vec<Slot>) {
        if target.len() < self.end() {
            target.resize(self.end(), 0);
        }
        target[self.offset..self.end()].copy_from_slice(self.data);
    }

    /// Apply to the window `[window_start, window_start + window.len())` of a
    /// larger vector. Slots of the delta outside the window are ignored.
    pub fn apply_window(&self, window_start: usize, window: &mut [Slot]) {
        let lo = self.offset.max(window_start);
        let hi = self.end().min(window_start + window.len());
        if lo >= hi {
            return;
        }
        window[lo - window_start..hi - window_start]
            .copy_from_slice(&self.data[lo - self.offset..hi - self.offset]);
    }
}
