//! # hlstream-core
//!
//! Seekable byte streams with a shared set of text, raw and binary operations.
//!
//! Two concrete streams implement the same small driver contract:
//! [`BufferStream`] over an owned growable byte buffer and [`FileStream`] over
//! an OS file handle. Everything above the driver (line reads, chunked reads,
//! logical size tracking, the little-endian wire format) lives once in the
//! [`Stream`] trait and runs unmodified over either backend.

pub mod config;
pub mod error;
pub mod log;
pub mod path;
pub mod stream;
pub mod wire;

pub use config::OpenRetryPolicy;
pub use error::{Result, StreamError};
pub use stream::{AccessMode, BufferStream, FileStream, SeekOrigin, Stream, StreamDriver};
pub use wire::WireScalar;
