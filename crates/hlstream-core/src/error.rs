//! Error taxonomy shared by every stream operation.

use std::path::PathBuf;

use thiserror::Error;

use crate::stream::SeekOrigin;

#[derive(Debug, Error)]
pub enum StreamError {
    /// The operation needs an open stream.
    #[error("stream is not open")]
    NotOpen,
    /// Every open attempt allowed by the retry policy failed.
    #[error("file could not be opened: {} ({attempts} attempt(s))", path.display())]
    FileCouldNotOpen {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    /// The backend rejected a seek the operation depends on.
    #[error("seek to {offset} from {origin:?} was rejected")]
    SeekFailed { offset: i64, origin: SeekOrigin },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// A typed load ran out of bytes before the value was complete.
    #[error("unexpected end of stream: expected {expected} bytes, got {actual}")]
    UnexpectedEof { expected: usize, actual: usize },
    /// A length prefix that cannot describe a byte span.
    #[error("invalid length prefix {0}")]
    InvalidLength(i32),
    #[error("invalid utf-8 in string payload: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("index {index} out of bounds for stream of size {size}")]
    IndexOutOfBounds { index: i64, size: i64 },
}

pub type Result<T> = std::result::Result<T, StreamError>;
