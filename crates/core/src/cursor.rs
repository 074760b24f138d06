//! Cursor & cache policy (component C, §4.3).
//!
//! Grounded on the teacher's `cursor.rs` interval/jitter calculation,
//! generalized to track a process-wide monotonic floor (`last_issued`)
//! explicitly, since §4.3 step 4 requires the *global* cursor sequence to
//! never decrease across requests, not just relative to one client's cursor.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rand::Rng;

/// Tunables for cursor generation, normally sourced from `ServerOptions`.
#[derive(Debug, Clone)]
pub struct CursorConfig {
    /// Epoch from which intervals are counted.
    pub epoch: DateTime<Utc>,
    /// Interval duration in seconds (default 20s).
    pub interval_seconds: u64,
    /// Maximum jitter window in seconds (default 3600s).
    pub max_jitter_seconds: u64,
}

impl Default for CursorConfig {
    fn default() -> Self {
        CursorConfig {
            // Fixed build-time epoch, matching the grounding teacher.
            epoch: DateTime::parse_from_rfc3339("2024-10-09T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            interval_seconds: 20,
            max_jitter_seconds: 3600,
        }
    }
}

/// Process-wide cursor policy state: the epoch/interval/jitter
/// configuration plus the monotonic floor required by §4.3 invariant (a).
///
/// One instance is constructed at process startup and shared (§9: "treat as
/// a small protected object initialized once per process and reset in
/// tests").
pub struct CursorPolicy {
    config: CursorConfig,
    last_issued: AtomicU64,
}

impl CursorPolicy {
    pub fn new(config: CursorConfig) -> Self {
        CursorPolicy {
            config,
            last_issued: AtomicU64::new(0),
        }
    }

    /// The current interval index for `now`, given the configured epoch.
    fn current_interval(&self, now: DateTime<Utc>) -> u64 {
        let elapsed = now
            .signed_duration_since(self.config.epoch)
            .num_seconds()
            .max(0) as u64;
        elapsed / self.config.interval_seconds.max(1)
    }

    /// Generate the next cursor for a request, given the client's previous
    /// cursor (if any) and the current time. Steps follow §4.3 exactly.
    pub fn generate(&self, client_cursor: Option<u64>, now: DateTime<Utc>) -> u64 {
        let current = self.current_interval(now);
        let mut candidate = current.max(self.last_issued.load(Ordering::Relaxed));

        if let Some(c) = client_cursor {
            if c >= candidate {
                let max_jitter_intervals = self
                    .config
                    .max_jitter_seconds
                    .div_ceil(self.config.interval_seconds.max(1))
                    .max(1);
                let jitter = rand::thread_rng().gen_range(1..=max_jitter_intervals);
                candidate = c + jitter;
            }
        }

        self.last_issued.fetch_max(candidate, Ordering::Relaxed);
        candidate
    }

    /// Parse a client-supplied cursor string, ignoring anything malformed
    /// (an unparseable cursor is treated as absent, not an error — §4.3
    /// only requires cursors to be opaque and echoed verbatim).
    pub fn parse_client_cursor(raw: Option<&str>) -> Option<u64> {
        raw.and_then(|s| s.parse().ok())
    }
}
