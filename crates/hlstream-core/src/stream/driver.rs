//! Primitive I/O driver contract.
//!
//! A concrete stream supplies byte transfer, seeking and position queries
//! against its resource, plus a slot for the logical size that the base layer
//! maintains. Everything else is provided by [`Stream`](super::Stream).

use crate::error::Result;

/// Reference point for a seek offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeekOrigin {
    Start,
    Current,
    End,
}

/// Byte-level operations each backend implements.
///
/// Callers normally go through [`Stream`](super::Stream), which checks
/// `is_open` first; driver methods may assume an open stream.
pub trait StreamDriver {
    fn is_open(&self) -> bool;

    /// Read up to `buf.len()` bytes at the cursor. `Ok(0)` means exhausted.
    fn driver_read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write up to `buf.len()` bytes at the cursor, returning how many were
    /// actually written.
    fn driver_write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Move the cursor. `Ok(false)` when the target was rejected.
    fn driver_seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<bool>;

    fn driver_position(&self) -> Result<i64>;

    /// Cached logical size.
    fn logical_size(&self) -> i64;

    fn set_logical_size(&mut self, size: i64);
}
