//! Growable in-memory stream.
//!
//! Design: the backing `Vec` is kept at its full physical length, so
//! `data.len()` is the capacity and `size` marks how much of it is content.
//! Growth is fallible (`try_reserve_exact`): when an allocation is refused the
//! stream keeps its old buffer and writes shrink to whatever still fits.
//!
//! Invariants:
//! - `position <= size <= data.len()`
//! - bytes in `data[size..]` are not content and may be stale

use std::ops::{Index, IndexMut};

use serde_json::json;

use super::base::Stream;
use super::driver::{SeekOrigin, StreamDriver};
use crate::error::{Result, StreamError};
use crate::log::{LogEntry, LogLevel};

/// Capacity of a stream created with [`BufferStream::new`].
pub const DEFAULT_CAPACITY: usize = 16;

/// Seekable stream over an owned, growable byte buffer. Always open.
#[derive(Debug)]
pub struct BufferStream {
    data: Vec<u8>,
    size: usize,
    position: usize,
}

impl Default for BufferStream {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferStream {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Empty stream with `capacity` bytes preallocated. If the allocation is
    /// refused the stream starts with no capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut stream = Self {
            data: Vec::new(),
            size: 0,
            position: 0,
        };
        stream.set_capacity(capacity);
        stream
    }

    /// Stream holding a copy of `initial`, cursor at the start.
    #[must_use]
    pub fn from_bytes(initial: &[u8]) -> Self {
        Self::from_bytes_with_capacity(initial, initial.len())
    }

    /// Stream holding a copy of `initial` with at least `capacity` bytes
    /// allocated, cursor at the start.
    #[must_use]
    pub fn from_bytes_with_capacity(initial: &[u8], capacity: usize) -> Self {
        let mut stream = Self::with_capacity(capacity.max(initial.len()));
        let written = stream.write_bytes_at_cursor(initial);
        stream.size = written;
        stream.position = 0;
        stream
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Physical allocation size in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Logical content.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.size]
    }

    /// Consume the stream, keeping only the logical content.
    #[must_use]
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.data.truncate(self.size);
        self.data
    }

    // -----------------------------------------------------------------------
    // Capacity management
    // -----------------------------------------------------------------------

    /// Resize the allocation to exactly `capacity` bytes, preserving content
    /// up to the smaller of the old and new capacity.
    ///
    /// Returns `false` with nothing changed if the allocation is refused.
    /// Shrinking below the logical size truncates the content and clamps the
    /// cursor.
    pub fn set_capacity(&mut self, capacity: usize) -> bool {
        let old = self.data.len();
        if capacity > old {
            if self.data.try_reserve_exact(capacity - old).is_err() {
                LogEntry::new(LogLevel::Warn, "buffer.grow.failed")
                    .with_bytes(capacity as u64)
                    .with_details(json!({ "capacity": old }))
                    .emit();
                return false;
            }
            self.data.resize(capacity, 0);
        } else if capacity < old {
            self.data.truncate(capacity);
            self.data.shrink_to_fit();
        }
        if self.size > capacity {
            self.size = capacity;
            self.position = self.position.min(capacity);
            return self.refresh_logical_size().is_ok();
        }
        true
    }

    /// Make room for `count` bytes at the cursor, growing to the next power
    /// of two. Returns how many bytes actually fit.
    fn reserve_at_cursor(&mut self, count: usize) -> usize {
        let needed = self.position.saturating_add(count);
        if needed <= self.data.len() {
            return count;
        }
        match needed.checked_next_power_of_two() {
            Some(capacity) if self.set_capacity(capacity) => count,
            _ => self.data.len().saturating_sub(self.position),
        }
    }

    fn write_bytes_at_cursor(&mut self, bytes: &[u8]) -> usize {
        let count = self.reserve_at_cursor(bytes.len()).min(bytes.len());
        let end = self.position + count;
        self.data[self.position..end].copy_from_slice(&bytes[..count]);
        self.position = end;
        self.size = self.size.max(end);
        count
    }

    /// Write `count` copies of `value` at the cursor under the same growth
    /// policy as writes. Returns the bytes actually written.
    pub fn fill(&mut self, value: u8, count: usize) -> usize {
        let count = self.reserve_at_cursor(count);
        let end = self.position + count;
        self.data[self.position..end].fill(value);
        self.position = end;
        self.size = self.size.max(end);
        count
    }

    /// Shrink the logical size to `max(target, 0)`.
    ///
    /// Fails without change unless `target` is below the current size.
    /// Capacity is untouched.
    pub fn truncate(&mut self, target: i64) -> bool {
        if target >= self.size as i64 {
            return false;
        }
        self.size = target.max(0) as usize;
        self.position = self.position.min(self.size);
        true
    }

    /// Drop all content and reallocate to `capacity` bytes.
    pub fn clear(&mut self, capacity: usize) -> bool {
        self.size = 0;
        self.position = 0;
        self.set_capacity(capacity)
    }

    // -----------------------------------------------------------------------
    // Indexed access
    // -----------------------------------------------------------------------

    /// Resolve an index where negatives count back from the logical end.
    fn resolve_index(&self, index: i64) -> Option<usize> {
        let size = self.size as i64;
        let resolved = if index < 0 { index.checked_add(size)? } else { index };
        (0..size).contains(&resolved).then_some(resolved as usize)
    }

    fn out_of_bounds(&self, index: i64) -> StreamError {
        StreamError::IndexOutOfBounds {
            index,
            size: self.size as i64,
        }
    }

    /// Byte at `index` (negative counts from the end).
    pub fn byte_at(&self, index: i64) -> Result<u8> {
        self.resolve_index(index)
            .map(|i| self.data[i])
            .ok_or_else(|| self.out_of_bounds(index))
    }

    /// Overwrite the byte at `index` (negative counts from the end).
    pub fn set_byte_at(&mut self, index: i64, value: u8) -> Result<()> {
        let i = self
            .resolve_index(index)
            .ok_or_else(|| self.out_of_bounds(index))?;
        self.data[i] = value;
        Ok(())
    }
}

impl Index<i64> for BufferStream {
    type Output = u8;

    /// Panics outside `[-size, size)`.
    fn index(&self, index: i64) -> &u8 {
        match self.resolve_index(index) {
            Some(i) => &self.data[i],
            None => panic!("index {index} out of bounds for stream of size {}", self.size),
        }
    }
}

impl IndexMut<i64> for BufferStream {
    fn index_mut(&mut self, index: i64) -> &mut u8 {
        match self.resolve_index(index) {
            Some(i) => &mut self.data[i],
            None => panic!("index {index} out of bounds for stream of size {}", self.size),
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

impl StreamDriver for BufferStream {
    fn is_open(&self) -> bool {
        true
    }

    fn driver_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let count = buf.len().min(self.size - self.position);
        let end = self.position + count;
        buf[..count].copy_from_slice(&self.data[self.position..end]);
        self.position = end;
        Ok(count)
    }

    fn driver_write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.write_bytes_at_cursor(buf))
    }

    /// Clamps the target into `[0, size]`; seeking never grows the stream.
    fn driver_seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<bool> {
        let base = match origin {
            SeekOrigin::Start => 0,
            SeekOrigin::Current => self.position as i64,
            SeekOrigin::End => self.size as i64,
        };
        let target = base.saturating_add(offset).clamp(0, self.size as i64);
        self.position = target as usize;
        Ok(true)
    }

    fn driver_position(&self) -> Result<i64> {
        Ok(self.position as i64)
    }

    fn logical_size(&self) -> i64 {
        self.size as i64
    }

    fn set_logical_size(&mut self, size: i64) {
        self.size = size.clamp(0, self.data.len() as i64) as usize;
        self.position = self.position.min(self.size);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
