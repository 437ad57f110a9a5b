//! File-backed stream.
//!
//! `FileStream` owns an OS file handle opened in one of six access modes,
//! each with the semantics of the matching binary `fopen` mode. Binary only:
//! no newline translation happens below the text reads of the base layer.
//!
//! Opening goes through a bounded sleep-and-retry loop driven by
//! [`OpenRetryPolicy`]. The associated functions at the bottom (`read_file`,
//! `copy_file`, ...) each open a short-lived stream for one operation.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde_json::json;

use super::base::Stream;
use super::driver::{SeekOrigin, StreamDriver};
use crate::config::{self, OpenRetryPolicy};
use crate::error::{Result, StreamError};
use crate::log::{LogEntry, LogLevel};
use crate::path;

/// Transfer buffer size of [`FileStream::copy_file`].
pub const COPY_CHUNK_SIZE: usize = 4096;

// ---------------------------------------------------------------------------
// Access modes
// ---------------------------------------------------------------------------

/// How a file is opened; fixed for the lifetime of the open handle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// `rb`: read an existing file.
    #[default]
    Read,
    /// `wb`: create or truncate, write only.
    Write,
    /// `ab`: create if missing, every write goes to the end.
    Append,
    /// `r+b`: read and write an existing file.
    ReadWrite,
    /// `w+b`: create or truncate, read and write.
    ReadWriteCreate,
    /// `a+b`: create if missing, read anywhere, writes go to the end.
    ReadAppend,
}

/// Open flags derived from an access mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub readable: bool,
    pub writable: bool,
    pub append: bool,
    pub truncate: bool,
    pub create: bool,
}

impl AccessMode {
    /// The binary `fopen` mode string with the same semantics.
    #[must_use]
    pub const fn fopen_mode(self) -> &'static str {
        match self {
            Self::Read => "rb",
            Self::Write => "wb",
            Self::Append => "ab",
            Self::ReadWrite => "r+b",
            Self::ReadWriteCreate => "w+b",
            Self::ReadAppend => "a+b",
        }
    }

    /// Parse an `fopen` mode string (`"r"`, `"w+"`, `"rb+"`, `"a+b"`, ...).
    ///
    /// `b` is accepted and implied; any other modifier is rejected.
    #[must_use]
    pub fn parse(mode: &str) -> Option<Self> {
        let mut bytes = mode.bytes();
        let base = bytes.next()?;
        let mut plus = false;
        for modifier in bytes {
            match modifier {
                b'+' => plus = true,
                b'b' => {}
                _ => return None,
            }
        }
        match (base, plus) {
            (b'r', false) => Some(Self::Read),
            (b'w', false) => Some(Self::Write),
            (b'a', false) => Some(Self::Append),
            (b'r', true) => Some(Self::ReadWrite),
            (b'w', true) => Some(Self::ReadWriteCreate),
            (b'a', true) => Some(Self::ReadAppend),
            _ => None,
        }
    }

    #[must_use]
    pub const fn flags(self) -> OpenFlags {
        let (readable, writable, append, truncate, create) = match self {
            Self::Read => (true, false, false, false, false),
            Self::Write => (false, true, false, true, true),
            Self::Append => (false, true, true, false, true),
            Self::ReadWrite => (true, true, false, false, false),
            Self::ReadWriteCreate => (true, true, false, true, true),
            Self::ReadAppend => (true, true, true, false, true),
        };
        OpenFlags {
            readable,
            writable,
            append,
            truncate,
            create,
        }
    }

    /// Whether opening may create the file.
    #[must_use]
    pub const fn creates(self) -> bool {
        self.flags().create
    }

    #[must_use]
    pub fn open_options(self) -> OpenOptions {
        let flags = self.flags();
        let mut options = OpenOptions::new();
        options
            .read(flags.readable)
            .write(flags.writable && !flags.append)
            .append(flags.append)
            .truncate(flags.truncate)
            .create(flags.create);
        options
    }
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// Seekable stream over an exclusively owned OS file handle.
///
/// Created closed; [`open`](Self::open) acquires the handle, [`close`](Self::close)
/// or dropping the stream releases it.
#[derive(Debug, Default)]
pub struct FileStream {
    path: PathBuf,
    handle: Option<File>,
    access_mode: AccessMode,
    size: i64,
    retry_override: Option<OpenRetryPolicy>,
}

impl FileStream {
    /// A closed stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and open in one step.
    pub fn opened(path: impl AsRef<Path>, mode: AccessMode) -> Result<Self> {
        let mut stream = Self::new();
        stream.open(path, mode)?;
        Ok(stream)
    }

    /// Use `policy` for this stream's opens instead of the process-wide one.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: OpenRetryPolicy) -> Self {
        self.retry_override = Some(policy);
        self
    }

    /// The policy the next open will use.
    #[must_use]
    pub fn retry_policy(&self) -> OpenRetryPolicy {
        self.retry_override.unwrap_or_else(config::retry_policy)
    }

    /// Normalized path of the last successful open.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    /// Open `path` in `mode`, closing any handle held first.
    ///
    /// Failed attempts are retried per the retry policy; when every attempt
    /// fails the last OS error is returned inside
    /// [`StreamError::FileCouldNotOpen`]. The logical size is read from file
    /// metadata right away.
    pub fn open(&mut self, path: impl AsRef<Path>, mode: AccessMode) -> Result<()> {
        if self.handle.is_some() {
            self.close()?;
        }
        let path = path::normalize(path.as_ref());
        let handle = open_with_retry(&path, mode, self.retry_policy())?;
        let size = handle.metadata()?.len();
        self.handle = Some(handle);
        self.path = path;
        self.access_mode = mode;
        self.size = i64::try_from(size).unwrap_or(i64::MAX);
        Ok(())
    }

    /// Release the handle. Fails with [`StreamError::NotOpen`] if none is held.
    pub fn close(&mut self) -> Result<()> {
        let handle = self.handle.take().ok_or(StreamError::NotOpen)?;
        drop(handle);
        self.size = 0;
        Ok(())
    }

    fn handle_mut(&mut self) -> Result<&mut File> {
        self.handle.as_mut().ok_or(StreamError::NotOpen)
    }

    // -----------------------------------------------------------------------
    // Whole-file helpers
    // -----------------------------------------------------------------------

    /// Entire file as text (`\r` removed).
    pub fn read_file(path: impl AsRef<Path>) -> Result<String> {
        Self::opened(path, AccessMode::Read)?.read_all()
    }

    /// Entire file as raw bytes.
    pub fn read_file_bytes(path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let mut stream = Self::opened(path, AccessMode::Read)?;
        let size = usize::try_from(stream.size()?).unwrap_or(usize::MAX);
        stream.read_bytes(size)
    }

    /// Text from the start of the file up to the first `delimiter`.
    pub fn read_file_until(path: impl AsRef<Path>, delimiter: &str) -> Result<String> {
        Self::opened(path, AccessMode::Read)?.read_until(delimiter)
    }

    /// Replace the file's content with `text`, creating it if needed.
    pub fn write_file(path: impl AsRef<Path>, text: &str) -> Result<usize> {
        Self::opened(path, AccessMode::Write)?.write_str(text)
    }

    /// Append `text`, creating the file if needed.
    pub fn append_file(path: impl AsRef<Path>, text: &str) -> Result<usize> {
        Self::opened(path, AccessMode::Append)?.write_str(text)
    }

    pub fn file_size(path: impl AsRef<Path>) -> Result<i64> {
        Self::opened(path, AccessMode::Read)?.size()
    }

    /// Create an empty file (and its directory). Returns `false` if the file
    /// already exists.
    pub fn create_file(path: impl AsRef<Path>) -> Result<bool> {
        if Self::exists(&path) {
            return Ok(false);
        }
        Self::opened(path, AccessMode::Write)?;
        Ok(true)
    }

    pub fn remove_file(path: impl AsRef<Path>) -> bool {
        std::fs::remove_file(path::normalize(path.as_ref())).is_ok()
    }

    /// Whether `path` names an existing regular file.
    pub fn exists(path: impl AsRef<Path>) -> bool {
        path::normalize(path.as_ref()).is_file()
    }

    /// Truncate an existing file to zero length. Returns `false` if it does
    /// not exist.
    pub fn clear_file(path: impl AsRef<Path>) -> Result<bool> {
        if !Self::exists(&path) {
            return Ok(false);
        }
        Self::opened(path, AccessMode::Write)?;
        Ok(true)
    }

    /// Rename `old` to `new`.
    ///
    /// Returns `false` if `old` is missing, or `new` exists and `overwrite`
    /// is not set. With `overwrite` the destination is removed first.
    /// Renaming a file onto itself leaves it untouched and returns `true`.
    pub fn rename_file(
        old: impl AsRef<Path>,
        new: impl AsRef<Path>,
        overwrite: bool,
    ) -> Result<bool> {
        let old = path::normalize(old.as_ref());
        let new = path::normalize(new.as_ref());
        if !Self::exists(&old) {
            return Ok(false);
        }
        if path::same_file(&old, &new) {
            return Ok(true);
        }
        if !overwrite && Self::exists(&new) {
            return Ok(false);
        }
        if overwrite && Self::exists(&new) {
            std::fs::remove_file(&new)?;
        }
        path::ensure_parent_dir(&new)?;
        std::fs::rename(&old, &new)?;
        Ok(true)
    }

    /// Move `file` into directory `dir`, keeping its file name.
    pub fn move_file(
        file: impl AsRef<Path>,
        dir: impl AsRef<Path>,
        overwrite: bool,
    ) -> Result<bool> {
        let file = file.as_ref();
        let Some(name) = file.file_name() else {
            return Ok(false);
        };
        Self::rename_file(file, dir.as_ref().join(name), overwrite)
    }

    /// Copy `old` to `new` through a [`COPY_CHUNK_SIZE`] buffer.
    ///
    /// Returns `false` if `old` is missing, `new` exists and `overwrite` is
    /// not set, or both name the same file (nothing is truncated).
    pub fn copy_file(
        old: impl AsRef<Path>,
        new: impl AsRef<Path>,
        overwrite: bool,
    ) -> Result<bool> {
        let old = path::normalize(old.as_ref());
        let new = path::normalize(new.as_ref());
        if !Self::exists(&old)
            || path::same_file(&old, &new)
            || (!overwrite && Self::exists(&new))
        {
            return Ok(false);
        }
        let mut source = Self::opened(old, AccessMode::Read)?;
        let mut target = Self::opened(new, AccessMode::Write)?;
        let mut chunk = [0u8; COPY_CHUNK_SIZE];
        loop {
            let read = source.read_raw(&mut chunk)?;
            if read == 0 {
                break;
            }
            target.write_raw(&chunk[..read])?;
        }
        Ok(true)
    }
}

fn try_open(path: &Path, mode: AccessMode) -> std::io::Result<File> {
    if mode.creates() {
        path::ensure_parent_dir(path)?;
    }
    mode.open_options().open(path)
}

fn open_with_retry(path: &Path, mode: AccessMode, policy: OpenRetryPolicy) -> Result<File> {
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match try_open(path, mode) {
            Ok(handle) => return Ok(handle),
            Err(source) if attempt < attempts => {
                LogEntry::new(LogLevel::Warn, "file.open.retry")
                    .with_path(path.display().to_string())
                    .with_attempt(attempt)
                    .with_details(json!({
                        "mode": mode.fopen_mode(),
                        "error": source.to_string(),
                        "timeout_ms": policy.timeout_ms,
                    }))
                    .emit();
                std::thread::sleep(policy.delay());
                attempt += 1;
            }
            Err(source) => {
                LogEntry::new(LogLevel::Error, "file.open.failed")
                    .with_path(path.display().to_string())
                    .with_attempt(attempt)
                    .with_details(json!({
                        "mode": mode.fopen_mode(),
                        "error": source.to_string(),
                    }))
                    .emit();
                return Err(StreamError::FileCouldNotOpen {
                    path: path.to_path_buf(),
                    attempts: attempt,
                    source,
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

impl StreamDriver for FileStream {
    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn driver_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let handle = self.handle_mut()?;
        loop {
            match handle.read(buf) {
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                result => return Ok(result?),
            }
        }
    }

    fn driver_write(&mut self, buf: &[u8]) -> Result<usize> {
        self.handle_mut()?.write_all(buf)?;
        Ok(buf.len())
    }

    /// Negative absolute targets and OS seek errors report `false`.
    fn driver_seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<bool> {
        let target = match origin {
            SeekOrigin::Start => match u64::try_from(offset) {
                Ok(offset) => SeekFrom::Start(offset),
                Err(_) => return Ok(false),
            },
            SeekOrigin::Current => SeekFrom::Current(offset),
            SeekOrigin::End => SeekFrom::End(offset),
        };
        Ok(self.handle_mut()?.seek(target).is_ok())
    }

    fn driver_position(&self) -> Result<i64> {
        let mut handle: &File = self.handle.as_ref().ok_or(StreamError::NotOpen)?;
        let position = handle.stream_position()?;
        Ok(i64::try_from(position).unwrap_or(i64::MAX))
    }

    fn logical_size(&self) -> i64 {
        self.size
    }

    fn set_logical_size(&mut self, size: i64) {
        self.size = size;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fopen_mode_mapping() {
        assert_eq!(AccessMode::Read.fopen_mode(), "rb");
        assert_eq!(AccessMode::Write.fopen_mode(), "wb");
        assert_eq!(AccessMode::Append.fopen_mode(), "ab");
        assert_eq!(AccessMode::ReadWrite.fopen_mode(), "r+b");
        assert_eq!(AccessMode::ReadWriteCreate.fopen_mode(), "w+b");
        assert_eq!(AccessMode::ReadAppend.fopen_mode(), "a+b");
    }

    #[test]
    fn test_parse_mode_round_trips_fopen_strings() {
        for mode in [
            AccessMode::Read,
            AccessMode::Write,
            AccessMode::Append,
            AccessMode::ReadWrite,
            AccessMode::ReadWriteCreate,
            AccessMode::ReadAppend,
        ] {
            assert_eq!(AccessMode::parse(mode.fopen_mode()), Some(mode));
        }
    }

    #[test]
    fn test_parse_mode_accepts_modifier_orders() {
        assert_eq!(AccessMode::parse("r"), Some(AccessMode::Read));
        assert_eq!(AccessMode::parse("rb+"), Some(AccessMode::ReadWrite));
        assert_eq!(AccessMode::parse("w+"), Some(AccessMode::ReadWriteCreate));
        assert_eq!(AccessMode::parse("ab"), Some(AccessMode::Append));
    }

    #[test]
    fn test_parse_mode_invalid() {
        assert_eq!(AccessMode::parse(""), None);
        assert_eq!(AccessMode::parse("z"), None);
        assert_eq!(AccessMode::parse("rt"), None);
        assert_eq!(AccessMode::parse("wx"), None);
    }

    #[test]
    fn test_flags_write_create_trunc() {
        let f = AccessMode::Write.flags();
        assert!(!f.readable);
        assert!(f.writable);
        assert!(f.truncate);
        assert!(f.create);
        assert!(!f.append);
    }

    #[test]
    fn test_flags_read_append() {
        let f = AccessMode::ReadAppend.flags();
        assert!(f.readable);
        assert!(f.append);
        assert!(f.create);
        assert!(!f.truncate);
        assert!(AccessMode::ReadAppend.creates());
        assert!(!AccessMode::ReadWrite.creates());
    }

    #[test]
    fn test_new_stream_is_closed() {
        let mut s = FileStream::new();
        assert!(!s.is_open());
        assert!(matches!(s.size(), Err(StreamError::NotOpen)));
        assert!(matches!(s.close(), Err(StreamError::NotOpen)));
        assert!(matches!(s.read_line(), Err(StreamError::NotOpen)));
    }

    #[test]
    fn test_retry_override_wins() {
        let policy = OpenRetryPolicy::new(7, 1.0);
        let s = FileStream::new().with_retry_policy(policy);
        assert_eq!(s.retry_policy(), policy);
    }
}
