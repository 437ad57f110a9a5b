//! Implementation-agnostic stream operations.
//!
//! Built only on the [`StreamDriver`] primitives: chunked reads, delimiter
//! scanning, text and raw writes, the typed little-endian dump/load pairs and
//! logical size tracking.
//!
//! Design: the logical size is never asked of the backend directly. After any
//! write the base seeks to the end, records that position as the new size and
//! seeks back ([`Stream::refresh_logical_size`]), so `size()` stays a cheap
//! cached read.

use std::fmt;

use serde_json::json;

use super::driver::{SeekOrigin, StreamDriver};
use crate::error::{Result, StreamError};
use crate::log::{LogEntry, LogLevel};
use crate::wire::{self, MAX_PREFIXED_LEN, WireScalar};

/// Largest single driver read issued by the chunked read loops.
pub const READ_CHUNK_SIZE: usize = 4096;

fn require_open(open: bool) -> Result<()> {
    if open {
        Ok(())
    } else {
        Err(StreamError::NotOpen)
    }
}

/// First index of `needle` in `haystack`. `needle` must be non-empty.
fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Log `event` and return `false` when `len` bytes cannot be described by
/// an `i32` length.
fn within_prefix_limit(len: usize, event: &str) -> bool {
    if len <= MAX_PREFIXED_LEN {
        return true;
    }
    LogEntry::new(LogLevel::Error, event)
        .with_bytes(len as u64)
        .with_details(json!({ "limit": MAX_PREFIXED_LEN }))
        .emit();
    false
}

/// Driver reads into `buf` until it is full or `source` is exhausted.
fn read_into(source: &mut dyn StreamDriver, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = source.driver_read(&mut buf[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

fn seek_or_fail<S: StreamDriver + ?Sized>(
    stream: &mut S,
    offset: i64,
    origin: SeekOrigin,
) -> Result<()> {
    if stream.driver_seek(offset, origin)? {
        Ok(())
    } else {
        Err(StreamError::SeekFailed { offset, origin })
    }
}

/// Strip every `\r` and decode, replacing invalid UTF-8.
fn normalize_text(mut bytes: Vec<u8>) -> String {
    bytes.retain(|&b| b != b'\r');
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}

/// Operations shared by every stream, provided for any [`StreamDriver`].
///
/// Every method fails with [`StreamError::NotOpen`] on a stream that is not
/// open. Nothing here retries.
pub trait Stream: StreamDriver {
    // -----------------------------------------------------------------------
    // Position
    // -----------------------------------------------------------------------

    /// Move the cursor relative to `origin`. Returns whether the backend
    /// accepted the target.
    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<bool> {
        require_open(self.is_open())?;
        self.driver_seek(offset, origin)
    }

    fn rewind(&mut self) -> Result<bool> {
        self.seek(0, SeekOrigin::Start)
    }

    fn position(&self) -> Result<i64> {
        require_open(self.is_open())?;
        self.driver_position()
    }

    /// Cached logical size.
    fn size(&self) -> Result<i64> {
        require_open(self.is_open())?;
        Ok(self.logical_size())
    }

    /// Whether the cursor is at or past the logical end.
    ///
    /// Computed from position and size; native end-of-file flags are not
    /// consulted since they are unreliable on streams opened for writing.
    fn eof(&self) -> Result<bool> {
        Ok(self.position()? >= self.size()?)
    }

    /// Re-derive the logical size: seek to the end, record the position,
    /// seek back.
    ///
    /// Fails with [`StreamError::SeekFailed`] if either seek is rejected; the
    /// cached size is then left as it was.
    fn refresh_logical_size(&mut self) -> Result<()> {
        let position = self.driver_position()?;
        seek_or_fail(self, 0, SeekOrigin::End)?;
        let size = self.driver_position()?;
        seek_or_fail(self, position, SeekOrigin::Start)?;
        self.set_logical_size(size);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Read up to `count` bytes. Fewer come back only when the stream is
    /// exhausted first.
    fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        require_open(self.is_open())?;
        let mut out = Vec::with_capacity(count.min(READ_CHUNK_SIZE));
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        while out.len() < count {
            let want = (count - out.len()).min(READ_CHUNK_SIZE);
            let read = self.driver_read(&mut chunk[..want])?;
            if read == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..read]);
        }
        Ok(out)
    }

    /// [`read_bytes`](Self::read_bytes) as text, with `\r` removed.
    fn read_text(&mut self, count: usize) -> Result<String> {
        self.read_bytes(count).map(normalize_text)
    }

    /// Everything from the cursor to the end, as text with `\r` removed.
    fn read_all(&mut self) -> Result<String> {
        require_open(self.is_open())?;
        let mut out = Vec::new();
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let read = self.driver_read(&mut chunk)?;
            if read == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..read]);
        }
        Ok(normalize_text(out))
    }

    /// Read up to the first `delimiter` and return the text before it.
    ///
    /// The delimiter is consumed: the cursor ends right after it, never
    /// further. Without a match the rest of the stream is returned. An empty
    /// delimiter reads to the end. `\r` bytes are removed from the result.
    fn read_until(&mut self, delimiter: &str) -> Result<String> {
        require_open(self.is_open())?;
        let needle = delimiter.as_bytes();
        if needle.is_empty() {
            return self.read_all();
        }
        let mut out = Vec::new();
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let read = self.driver_read(&mut chunk)?;
            if read == 0 {
                break;
            }
            // A match may straddle the previous chunk boundary.
            let search_from = out.len().saturating_sub(needle.len() - 1);
            out.extend_from_slice(&chunk[..read]);
            if let Some(found) = find_subslice(&out[search_from..], needle) {
                let start = search_from + found;
                let overshoot = out.len() - (start + needle.len());
                if overshoot > 0 {
                    self.driver_seek(-(overshoot as i64), SeekOrigin::Current)?;
                }
                out.truncate(start);
                break;
            }
        }
        Ok(normalize_text(out))
    }

    fn read_line(&mut self) -> Result<String> {
        self.read_until("\n")
    }

    /// Remaining content split on `\n`; a final newline does not produce a
    /// trailing empty line.
    fn read_lines(&mut self) -> Result<Vec<String>> {
        let text = self.read_all()?;
        let mut lines: Vec<String> = text.split('\n').map(str::to_owned).collect();
        if lines.last().is_some_and(String::is_empty) {
            lines.pop();
        }
        Ok(lines)
    }

    /// One driver read into `buf`, no chunking.
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        require_open(self.is_open())?;
        self.driver_read(buf)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// One driver write of `buf`, then a size refresh. Returns the bytes the
    /// backend accepted, which may be fewer than `buf.len()`.
    fn write_raw(&mut self, buf: &[u8]) -> Result<usize> {
        require_open(self.is_open())?;
        let written = self.driver_write(buf)?;
        self.refresh_logical_size()?;
        Ok(written)
    }

    fn write_str(&mut self, text: &str) -> Result<usize> {
        self.write_raw(text.as_bytes())
    }

    fn write_line(&mut self, text: &str) -> Result<usize> {
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        self.write_str(&line)
    }

    /// Write preformatted arguments, e.g. `stream.write_formatted(format_args!("{x}:{y}"))`.
    fn write_formatted(&mut self, args: fmt::Arguments<'_>) -> Result<usize> {
        self.write_str(&fmt::format(args))
    }

    /// Copy `count` bytes from `source`'s cursor into this stream, leaving
    /// `source`'s cursor where it was, also when reading `source` fails.
    ///
    /// Counts beyond what an `i32` length can describe are refused: an error
    /// event is logged and `Ok(0)` returned.
    fn write_raw_from(&mut self, source: &mut dyn StreamDriver, count: usize) -> Result<usize> {
        require_open(self.is_open())?;
        require_open(source.is_open())?;
        if !within_prefix_limit(count, "stream.copy.oversized") {
            return Ok(0);
        }
        let origin = source.driver_position()?;
        let mut scratch = vec![0u8; count];
        let filled = read_into(source, &mut scratch);
        let restored = seek_or_fail(source, origin, SeekOrigin::Start);
        let filled = filled?;
        restored?;
        self.write_raw(&scratch[..filled])
    }

    // -----------------------------------------------------------------------
    // Binary dump/load
    // -----------------------------------------------------------------------

    /// Write `value` in its fixed-width little-endian encoding.
    fn dump<T: WireScalar>(&mut self, value: T) -> Result<usize> {
        self.write_raw(&wire::encode(value))
    }

    /// Read one fixed-width little-endian value.
    fn load<T: WireScalar>(&mut self) -> Result<T> {
        let bytes = self.read_bytes(T::WIDTH)?;
        if bytes.len() < T::WIDTH {
            return Err(StreamError::UnexpectedEof {
                expected: T::WIDTH,
                actual: bytes.len(),
            });
        }
        Ok(T::decode_le(&bytes))
    }

    /// Write an `i32` length prefix followed by the raw bytes.
    ///
    /// Payloads longer than `i32::MAX` bytes are refused: an error event is
    /// logged and `Ok(0)` returned.
    fn dump_byte_string(&mut self, payload: &[u8]) -> Result<usize> {
        if !within_prefix_limit(payload.len(), "stream.dump.oversized") {
            return Ok(0);
        }
        match wire::frame_prefixed(payload) {
            Some(framed) => self.write_raw(&framed),
            None => Ok(0),
        }
    }

    fn dump_str(&mut self, text: &str) -> Result<usize> {
        self.dump_byte_string(text.as_bytes())
    }

    /// Read an `i32` length prefix and exactly that many bytes.
    fn load_byte_string(&mut self) -> Result<Vec<u8>> {
        let len: i32 = self.load()?;
        let expected = usize::try_from(len).map_err(|_| StreamError::InvalidLength(len))?;
        let bytes = self.read_bytes(expected)?;
        if bytes.len() < expected {
            return Err(StreamError::UnexpectedEof {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(bytes)
    }

    fn load_string(&mut self) -> Result<String> {
        Ok(String::from_utf8(self.load_byte_string()?)?)
    }
}

impl<S: StreamDriver + ?Sized> Stream for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::CaptureSink;

    /// Minimal backend: a fixed vector that hands out at most `max_read`
    /// bytes per driver read.
    struct ChunkyDriver {
        data: Vec<u8>,
        pos: usize,
        size: i64,
        max_read: usize,
        open: bool,
        /// Reads fail once the cursor reaches this offset.
        fail_reads_at: usize,
        reject_absolute_seeks: bool,
    }

    impl ChunkyDriver {
        fn new(data: &[u8], max_read: usize) -> Self {
            Self {
                data: data.to_vec(),
                pos: 0,
                size: data.len() as i64,
                max_read,
                open: true,
                fail_reads_at: usize::MAX,
                reject_absolute_seeks: false,
            }
        }
    }

    impl StreamDriver for ChunkyDriver {
        fn is_open(&self) -> bool {
            self.open
        }

        fn driver_read(&mut self, buf: &mut [u8]) -> Result<usize> {
            if self.pos >= self.fail_reads_at {
                return Err(std::io::Error::other("device gone").into());
            }
            let n = buf.len().min(self.max_read).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn driver_write(&mut self, buf: &[u8]) -> Result<usize> {
            let end = self.pos + buf.len();
            if end > self.data.len() {
                self.data.resize(end, 0);
            }
            self.data[self.pos..end].copy_from_slice(buf);
            self.pos = end;
            Ok(buf.len())
        }

        fn driver_seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<bool> {
            if self.reject_absolute_seeks && origin == SeekOrigin::Start {
                return Ok(false);
            }
            let base = match origin {
                SeekOrigin::Start => 0,
                SeekOrigin::Current => self.pos as i64,
                SeekOrigin::End => self.data.len() as i64,
            };
            let target = base + offset;
            if target < 0 || target > self.data.len() as i64 {
                return Ok(false);
            }
            self.pos = target as usize;
            Ok(true)
        }

        fn driver_position(&self) -> Result<i64> {
            Ok(self.pos as i64)
        }

        fn logical_size(&self) -> i64 {
            self.size
        }

        fn set_logical_size(&mut self, size: i64) {
            self.size = size;
        }
    }

    #[test]
    fn closed_stream_rejects_every_operation() {
        let mut s = ChunkyDriver::new(b"abc", 8);
        s.open = false;
        assert!(matches!(s.position(), Err(StreamError::NotOpen)));
        assert!(matches!(s.size(), Err(StreamError::NotOpen)));
        assert!(matches!(s.seek(0, SeekOrigin::Start), Err(StreamError::NotOpen)));
        assert!(matches!(s.read_bytes(1), Err(StreamError::NotOpen)));
        assert!(matches!(s.read_line(), Err(StreamError::NotOpen)));
        assert!(matches!(s.write_str("x"), Err(StreamError::NotOpen)));
        assert!(matches!(s.dump(1u8), Err(StreamError::NotOpen)));
        assert!(matches!(s.load::<u8>(), Err(StreamError::NotOpen)));
    }

    #[test]
    fn read_bytes_loops_over_short_driver_reads() {
        let mut s = ChunkyDriver::new(b"abcdefghij", 3);
        assert_eq!(s.read_bytes(7).unwrap(), b"abcdefg");
        assert_eq!(s.read_bytes(100).unwrap(), b"hij");
        assert!(s.read_bytes(5).unwrap().is_empty());
        assert!(s.eof().unwrap());
    }

    #[test]
    fn read_until_finds_delimiter_across_chunks() {
        let mut s = ChunkyDriver::new(b"key::value::tail", 3);
        assert_eq!(s.read_until("::").unwrap(), "key");
        assert_eq!(s.position().unwrap(), 5);
        assert_eq!(s.read_until("::").unwrap(), "value");
        assert_eq!(s.read_until("::").unwrap(), "tail");
        assert!(s.eof().unwrap());
    }

    #[test]
    fn read_until_without_match_returns_rest() {
        let mut s = ChunkyDriver::new(b"no delimiter here", 4);
        assert_eq!(s.read_until("|").unwrap(), "no delimiter here");
        assert!(s.eof().unwrap());
    }

    #[test]
    fn read_until_empty_delimiter_reads_everything() {
        let mut s = ChunkyDriver::new(b"a\nb", 2);
        assert_eq!(s.read_until("").unwrap(), "a\nb");
    }

    #[test]
    fn text_reads_strip_carriage_returns() {
        let mut s = ChunkyDriver::new(b"one\r\ntwo\r\n", 64);
        assert_eq!(s.read_line().unwrap(), "one");
        assert_eq!(s.read_all().unwrap(), "two\n");
        s.rewind().unwrap();
        assert_eq!(s.read_text(5).unwrap(), "one\n");
    }

    #[test]
    fn read_lines_drops_single_trailing_empty_line() {
        let mut s = ChunkyDriver::new(b"a\n\nb\n", 2);
        assert_eq!(s.read_lines().unwrap(), vec!["a", "", "b"]);
        let mut empty = ChunkyDriver::new(b"", 2);
        assert!(empty.read_lines().unwrap().is_empty());
    }

    #[test]
    fn invalid_utf8_is_replaced_in_text_reads() {
        let mut s = ChunkyDriver::new(&[b'o', b'k', 0xFF], 8);
        assert_eq!(s.read_all().unwrap(), "ok\u{FFFD}");
    }

    #[test]
    fn writes_refresh_logical_size() {
        let mut s = ChunkyDriver::new(b"", 8);
        s.write_line("hello").unwrap();
        assert_eq!(s.size().unwrap(), 6);
        s.write_formatted(format_args!("{}-{}", 1, 2)).unwrap();
        assert_eq!(s.size().unwrap(), 9);
        assert_eq!(s.position().unwrap(), 9);
    }

    #[test]
    fn refresh_restores_position() {
        let mut s = ChunkyDriver::new(b"0123456789", 8);
        s.seek(4, SeekOrigin::Start).unwrap();
        s.set_logical_size(0);
        s.refresh_logical_size().unwrap();
        assert_eq!(s.size().unwrap(), 10);
        assert_eq!(s.position().unwrap(), 4);
    }

    #[test]
    fn load_past_end_reports_unexpected_eof() {
        let mut s = ChunkyDriver::new(&[1, 2], 8);
        match s.load::<u32>() {
            Err(StreamError::UnexpectedEof { expected, actual }) => {
                assert_eq!(expected, 4);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn load_string_rejects_negative_length() {
        let mut s = ChunkyDriver::new(&(-1_i32).to_le_bytes(), 8);
        assert!(matches!(
            s.load_string(),
            Err(StreamError::InvalidLength(-1))
        ));
    }

    #[test]
    fn load_string_rejects_invalid_utf8() {
        let mut s = ChunkyDriver::new(&[1, 0, 0, 0, 0xC3], 8);
        assert!(matches!(s.load_string(), Err(StreamError::InvalidUtf8(_))));
    }

    #[test]
    fn write_raw_from_keeps_source_position() {
        let mut source = ChunkyDriver::new(b"0123456789", 3);
        source.seek(2, SeekOrigin::Start).unwrap();
        let mut target = ChunkyDriver::new(b"", 8);
        assert_eq!(target.write_raw_from(&mut source, 5).unwrap(), 5);
        assert_eq!(source.position().unwrap(), 2);
        target.rewind().unwrap();
        assert_eq!(target.read_bytes(10).unwrap(), b"23456");
    }

    #[test]
    fn oversized_copy_and_dump_are_refused_and_logged() {
        let capture = CaptureSink::new();
        let _sink = capture.install();

        let mut source = ChunkyDriver::new(b"abc", 3);
        let mut target = ChunkyDriver::new(b"", 8);
        let count = MAX_PREFIXED_LEN + 1;
        assert_eq!(target.write_raw_from(&mut source, count).unwrap(), 0);
        assert_eq!(target.size().unwrap(), 0);
        assert_eq!(source.position().unwrap(), 0);

        let copies = capture.events("stream.copy.oversized");
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].level, LogLevel::Error);
        assert_eq!(copies[0].bytes, Some(count as u64));

        // A real payload this large cannot be allocated in a test; the dump
        // path shares the same length gate.
        assert!(!within_prefix_limit(count, "stream.dump.oversized"));
        assert!(within_prefix_limit(MAX_PREFIXED_LEN, "stream.dump.oversized"));
        let dumps = capture.events("stream.dump.oversized");
        assert_eq!(dumps.len(), 1);
        assert_eq!(dumps[0].bytes, Some(count as u64));
    }

    #[test]
    fn write_raw_from_restores_source_after_read_error() {
        let mut source = ChunkyDriver::new(b"0123456789", 2);
        source.seek(1, SeekOrigin::Start).unwrap();
        source.fail_reads_at = 5;
        let mut target = ChunkyDriver::new(b"", 8);
        assert!(matches!(
            target.write_raw_from(&mut source, 8),
            Err(StreamError::Io(_))
        ));
        assert_eq!(source.position().unwrap(), 1);
        assert_eq!(target.size().unwrap(), 0);
    }

    #[test]
    fn refresh_reports_rejected_seek_back() {
        let mut s = ChunkyDriver::new(b"0123456789", 8);
        s.seek(4, SeekOrigin::Start).unwrap();
        s.reject_absolute_seeks = true;
        assert!(matches!(
            s.refresh_logical_size(),
            Err(StreamError::SeekFailed {
                offset: 4,
                origin: SeekOrigin::Start
            })
        ));
        assert!(matches!(
            s.write_str("x"),
            Err(StreamError::SeekFailed { .. })
        ));
    }

    #[test]
    fn find_subslice_basics() {
        assert_eq!(find_subslice(b"abcabc", b"ca"), Some(2));
        assert_eq!(find_subslice(b"ab", b"abc"), None);
    }
}
