//! Session counters.
//!
//! Components update lock-free atomics; callers read serializable snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A snapshot of connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// Connection attempts, successful or not.
    pub attempts: u64,
    /// Attempts that failed or timed out.
    pub failed_attempts: u64,
    /// Successful connects.
    pub connects: u64,
    /// Connections lost after being established.
    pub disconnects: u64,
    /// Times the broker blocked the connection.
    pub blocks: u64,
}

#[derive(Debug, Default)]
pub(crate) struct AtomicConnectionStats {
    pub(crate) attempts: AtomicU64,
    pub(crate) failed_attempts: AtomicU64,
    pub(crate) connects: AtomicU64,
    pub(crate) disconnects: AtomicU64,
    pub(crate) blocks: AtomicU64,
}

impl AtomicConnectionStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of consumer dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    /// Actions accepted into the queue.
    pub queued: u64,
    /// Actions that ran to completion.
    pub executed: u64,
    /// Actions that panicked.
    pub faulted: u64,
    /// Actions discarded before running, by a drain or by shutdown.
    pub dropped: u64,
}

impl DispatcherStats {
    /// Actions accepted but not yet run or dropped.
    pub fn pending(&self) -> u64 {
        self.queued
            .saturating_sub(self.executed + self.faulted + self.dropped)
    }
}

#[derive(Debug, Default)]
pub(crate) struct AtomicDispatcherStats {
    pub(crate) queued: AtomicU64,
    pub(crate) executed: AtomicU64,
    pub(crate) faulted: AtomicU64,
    pub(crate) dropped: AtomicU64,
}

impl AtomicDispatcherStats {
    pub(crate) fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            queued: self.queued.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            faulted: self.faulted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
