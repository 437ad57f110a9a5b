//! Structured JSONL logging for stream events.
//!
//! Provides:
//! - [`LogEntry`]: one JSON object per line with required `timestamp`, `level`
//!   and `event` fields plus optional context.
//! - A process-wide sink (stderr by default, minimum level `warn`) that can be
//!   swapped for any `Write + Send` target.
//! - [`CaptureSink`]: an in-memory sink for inspecting emitted lines.
//!
//! Logging never fails a stream operation; write errors on the sink are
//! dropped.

use std::io::Write;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// Severity level, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Canonical structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub event: String,

    /// File the event concerns, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// 1-based attempt number for retried operations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Byte count involved in the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    #[must_use]
    pub fn new(level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            level,
            event: event.into(),
            path: None,
            attempt: None,
            bytes: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    #[must_use]
    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Send this entry to the process-wide sink.
    pub fn emit(self) {
        emit(&self);
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

struct Sink {
    /// `None` writes to stderr.
    writer: Option<Box<dyn Write + Send>>,
    min_level: LogLevel,
}

static SINK: Mutex<Sink> = Mutex::new(Sink {
    writer: None,
    min_level: LogLevel::Warn,
});

/// Write `entry` to the sink if its level passes the threshold.
pub fn emit(entry: &LogEntry) {
    let mut sink = SINK.lock();
    if entry.level < sink.min_level {
        return;
    }
    let Ok(line) = entry.to_jsonl() else {
        return;
    };
    let _ = match sink.writer.as_mut() {
        Some(writer) => writeln!(writer, "{line}"),
        None => writeln!(std::io::stderr().lock(), "{line}"),
    };
}

/// Route log lines to `writer` instead of stderr.
pub fn set_sink(writer: Box<dyn Write + Send>) {
    SINK.lock().writer = Some(writer);
}

/// Route log lines back to stderr.
pub fn reset_sink() {
    SINK.lock().writer = None;
}

/// Set the minimum level that reaches the sink.
pub fn set_min_level(level: LogLevel) {
    SINK.lock().min_level = level;
}

#[must_use]
pub fn min_level() -> LogLevel {
    SINK.lock().min_level
}

/// Cloneable in-memory sink; every clone appends to the same buffer.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CaptureSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a clone of this capture as the process-wide sink until the
    /// returned guard is dropped. Only one capture is installed at a time;
    /// a second `install` blocks until the first guard is gone.
    #[must_use = "the capture is uninstalled when the guard is dropped"]
    pub fn install(&self) -> CaptureGuard {
        let exclusive = CAPTURE.lock();
        set_sink(Box::new(self.clone()));
        CaptureGuard {
            _exclusive: exclusive,
        }
    }

    /// Captured lines parsed back into entries. Unparseable lines are skipped.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        let buf = self.buf.lock();
        String::from_utf8_lossy(&buf)
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Captured entries for one event name.
    #[must_use]
    pub fn events(&self, event: &str) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.event == event)
            .collect()
    }
}

static CAPTURE: Mutex<()> = Mutex::new(());

/// Routes log lines back to stderr when dropped.
pub struct CaptureGuard {
    _exclusive: MutexGuard<'static, ()>,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        reset_sink();
    }
}

impl Write for CaptureSink {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

/// RFC 3339 UTC timestamp from seconds since the epoch.
fn format_utc(secs: u64, millis: u32) -> String {
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;

    // Civil-from-days over 400-year eras.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        rem / 3_600,
        (rem % 3_600) / 60,
        rem % 60,
    )
}
