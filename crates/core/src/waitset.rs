//! Wait/wake subsystem (component E, §4.5).
//!
//! Grounded on the teacher's single global `tokio::sync::broadcast` channel
//! in `StreamStore` (one channel, every waiter filters by path). Generalized
//! here into one [`WaitSet`] per stream instance so that registering or
//! draining waiters on one stream never contends with another, and so a
//! stream's waiters can be tombstoned independently on delete/expiry — the
//! concurrency bound in §4.5 requires registration/drain to avoid the
//! per-stream append lock, which a dedicated `tokio::sync::Notify` gives for
//! free (it has its own internal synchronization, distinct from the
//! store's `parking_lot::Mutex`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Outcome of waiting on a [`WaitSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The condition passed to [`WaitSet::wait_until`] became true.
    DataAvailable,
    /// The stream was deleted or expired while waiting.
    Gone,
    /// The deadline elapsed before either of the above.
    TimedOut,
}

/// Per-stream wait/wake set. One instance lives inside each stream
/// instance; appends call [`WaitSet::wake_all`] after publishing the new
/// `nextOffset`, and deletion/expiry call [`WaitSet::tombstone`].
#[derive(Debug, Default)]
pub struct WaitSet {
    notify: Notify,
    tombstoned: AtomicBool,
}

impl WaitSet {
    pub fn new() -> Self {
        WaitSet::default()
    }

    /// Wake every currently registered waiter. Must be called *after* the
    /// new `nextOffset` has been published (§4.5: "the append path MUST,
    /// after publishing the new nextOffset, drain the waiter set").
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }

    /// Mark this stream gone and release every waiter with [`WaitOutcome::Gone`].
    pub fn tombstone(&self) {
        self.tombstoned.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_tombstoned(&self) -> bool {
        self.tombstoned.load(Ordering::SeqCst)
    }

    /// Wait until `condition` reports data is available, the set is
    /// tombstoned, or `timeout` elapses.
    ///
    /// `condition` is re-evaluated after registering interest in
    /// notifications (via [`tokio::sync::Notified::enable`]) and again
    /// after every wake, closing the append-between-check-and-enqueue race
    /// described in §4.5: a notification fired after `enable()` but before
    /// the `.await` is never lost.
    pub async fn wait_until(&self, timeout: Duration, mut condition: impl FnMut() -> bool) -> WaitOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if condition() {
                return WaitOutcome::DataAvailable;
            }
            if self.is_tombstoned() {
                return WaitOutcome::Gone;
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return WaitOutcome::TimedOut;
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return WaitOutcome::TimedOut;
            }
            // Woken: loop back around to re-check condition/tombstone.
        }
    }
}
