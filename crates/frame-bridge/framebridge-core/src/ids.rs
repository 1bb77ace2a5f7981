//! Stream identifiers and the allocator that hands them out.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// First id handed out by [`StreamIdAllocator::new`] and the process-wide allocator.
pub const DEFAULT_ID_BASE: i64 = 1;

static PROCESS_WIDE: Lazy<Arc<StreamIdAllocator>> =
    Lazy::new(|| Arc::new(StreamIdAllocator::new()));

/// Identity of one video stream. Doubles as the texture id seen by the script side.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct StreamId(pub i64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic, thread-safe allocator for [`StreamId`]s.
///
/// Ids are strictly increasing in allocation order and never reused for the
/// lifetime of the allocator. An `i64` counter incremented once per stream does
/// not wrap in practice.
#[derive(Debug)]
pub struct StreamIdAllocator {
    next: AtomicI64,
}

impl StreamIdAllocator {
    /// Allocator starting at [`DEFAULT_ID_BASE`].
    pub fn new() -> Self {
        Self::starting_at(DEFAULT_ID_BASE)
    }

    pub fn starting_at(base: i64) -> Self {
        Self {
            next: AtomicI64::new(base),
        }
    }

    /// The allocator shared by every bridge in this process that was not given
    /// a dedicated one. Starts at [`DEFAULT_ID_BASE`] on first use.
    pub fn process_wide() -> Arc<StreamIdAllocator> {
        Arc::clone(&PROCESS_WIDE)
    }

    #[inline]
    pub fn alloc(&self) -> StreamId {
        StreamId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for StreamIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
