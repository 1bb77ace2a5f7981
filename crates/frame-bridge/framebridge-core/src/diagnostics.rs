//! Per-stream delivery counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters updated on the producer side and on the script executor.
#[derive(Debug, Default)]
pub struct BridgeStats {
    pub(crate) frames_received: AtomicU64,
    pub(crate) frames_unbound: AtomicU64,
    pub(crate) frames_posted: AtomicU64,
    pub(crate) frames_delivered: AtomicU64,
    pub(crate) frames_rejected: AtomicU64,
    pub(crate) frames_discarded: AtomicU64,
    pub(crate) method_unavailable: AtomicU64,
    pub(crate) call_failures: AtomicU64,
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Frames handed to the bridge by the producer.
    pub frames_received: u64,
    /// Frames that arrived while no controller was bound.
    pub frames_unbound: u64,
    /// Frames queued on the script executor.
    pub frames_posted: u64,
    /// Frames whose controller call returned normally.
    pub frames_delivered: u64,
    /// Frames the executor refused (queue full or shut down).
    pub frames_rejected: u64,
    /// Queued frames dropped because the bridge or its controller went away.
    pub frames_discarded: u64,
    /// Calls skipped because the controller method was missing or not callable.
    pub method_unavailable: u64,
    /// Calls that raised inside the scripting runtime or panicked.
    pub call_failures: u64,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_unbound: self.frames_unbound.load(Ordering::Relaxed),
            frames_posted: self.frames_posted.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            method_unavailable: self.method_unavailable.load(Ordering::Relaxed),
            call_failures: self.call_failures.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Posted frames that have not yet produced an outcome.
    pub fn in_flight(&self) -> u64 {
        self.frames_posted.saturating_sub(
            self.frames_delivered
                + self.frames_discarded
                + self.method_unavailable
                + self.call_failures,
        )
    }
}
