//! Process-wide tunables for file opening.
//!
//! Opening a file can fail transiently (sharing violations, a file briefly
//! held by another process). [`FileStream::open`](crate::FileStream::open)
//! retries such failures according to an [`OpenRetryPolicy`]:
//! - `repeats` (default 0): extra attempts after the first one fails.
//! - `timeout_ms` (default 100): sleep between two attempts, in milliseconds.
//!
//! The policy is global and mutable; a change affects every open issued
//! afterwards. Individual streams may carry their own override.

use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Default extra open attempts.
pub const DEFAULT_OPEN_REPEATS: u32 = 0;
/// Default delay between open attempts, in milliseconds.
pub const DEFAULT_OPEN_TIMEOUT_MS: f64 = 100.0;

/// Bounded sleep-and-retry policy for acquiring a file handle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenRetryPolicy {
    /// Extra attempts after the first failure.
    pub repeats: u32,
    /// Delay between attempts in milliseconds.
    pub timeout_ms: f64,
}

impl Default for OpenRetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl OpenRetryPolicy {
    pub const DEFAULT: Self = Self {
        repeats: DEFAULT_OPEN_REPEATS,
        timeout_ms: DEFAULT_OPEN_TIMEOUT_MS,
    };

    #[must_use]
    pub const fn new(repeats: u32, timeout_ms: f64) -> Self {
        Self {
            repeats,
            timeout_ms,
        }
    }

    /// Total number of open attempts (first try plus repeats).
    #[must_use]
    pub const fn attempts(self) -> u32 {
        self.repeats.saturating_add(1)
    }

    /// Sleep between two attempts. Negative or non-finite timeouts mean no sleep.
    #[must_use]
    pub fn delay(self) -> Duration {
        if self.timeout_ms.is_finite() && self.timeout_ms > 0.0 {
            Duration::from_nanos((self.timeout_ms * 1_000_000.0) as u64)
        } else {
            Duration::ZERO
        }
    }
}

static POLICY: RwLock<OpenRetryPolicy> = RwLock::new(OpenRetryPolicy::DEFAULT);

/// Current process-wide retry policy.
#[must_use]
pub fn retry_policy() -> OpenRetryPolicy {
    *POLICY.read()
}

/// Replace the process-wide retry policy, returning the previous one.
pub fn set_retry_policy(policy: OpenRetryPolicy) -> OpenRetryPolicy {
    std::mem::replace(&mut *POLICY.write(), policy)
}

/// Set only the repeat count.
pub fn set_open_repeats(repeats: u32) {
    POLICY.write().repeats = repeats;
}

/// Set only the delay between attempts.
pub fn set_open_timeout_ms(timeout_ms: f64) {
    POLICY.write().timeout_ms = timeout_ms;
}

/// Restore the defaults.
pub fn reset_retry_policy() {
    *POLICY.write() = OpenRetryPolicy::DEFAULT;
}
