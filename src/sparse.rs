//! Fixed-capacity byte storage indexed by absolute stream offset.
//!
//! [`SparseBuffer`] holds possibly discontiguous filled regions of a stream
//! whose total length is known up front. Filled regions are tracked with a
//! [`RangeSet`], which merges adjacent and overlapping commits.

use std::ops::Range;

use rangemap::RangeSet;

pub struct SparseBuffer {
    data: Vec<u8>,
    filled: RangeSet<u64>,
}

impl SparseBuffer {
    /// Allocate storage for `capacity` bytes. The capacity never changes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            filled: RangeSet::new(),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.data.len() as u64
    }

    /// The filled run starting at `offset`, or `None` if `offset` holds no data.
    pub fn read(&self, offset: u64) -> Option<&[u8]> {
        let run = self.filled.get(&offset)?;
        Some(&self.data[offset as usize..run.end as usize])
    }

    pub fn has_data(&self, offset: u64) -> bool {
        self.filled.contains(&offset)
    }

    /// Writable span from `offset` up to the next filled region (or the end).
    ///
    /// Empty when `offset` is already filled or lies outside the buffer.
    pub fn write(&mut self, offset: u64) -> &mut [u8] {
        let end = self.writable_end(offset);
        &mut self.data[offset.min(end) as usize..end as usize]
    }

    /// Length of the span [`write`](Self::write) would return.
    pub fn writable_len(&self, offset: u64) -> usize {
        (self.writable_end(offset).saturating_sub(offset)) as usize
    }

    fn writable_end(&self, offset: u64) -> u64 {
        let capacity = self.capacity();
        if offset >= capacity || self.filled.contains(&offset) {
            return offset.min(capacity);
        }

        self.filled
            .overlapping(&(offset..capacity))
            .next()
            .map_or(capacity, |next| next.start)
    }

    /// Mark `[start, end)` as filled after its bytes were copied in.
    pub fn commit(&mut self, start: u64, end: u64) {
        debug_assert!(end <= self.capacity(), "commit past capacity");
        if start < end {
            self.filled.insert(start..end);
        }
    }

    pub fn filled_ranges(&self) -> Vec<Range<u64>> {
        self.filled.iter().cloned().collect()
    }

    pub fn filled_bytes(&self) -> u64 {
        self.filled.iter().map(|r| r.end - r.start).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.filled_bytes() == self.capacity()
    }
}

impl std::fmt::Debug for SparseBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseBuffer")
            .field("capacity", &self.capacity())
            .field("filled", &self.filled)
            .finish()
    }
}
