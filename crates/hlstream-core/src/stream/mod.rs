//! Streams: the driver contract, the shared base operations, and the two
//! concrete backends.

pub mod base;
pub mod buffer;
pub mod driver;
pub mod file;

pub use base::{READ_CHUNK_SIZE, Stream};
pub use buffer::{BufferStream, DEFAULT_CAPACITY};
pub use driver::{SeekOrigin, StreamDriver};
pub use file::{AccessMode, COPY_CHUNK_SIZE, FileStream};
