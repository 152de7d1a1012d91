//! Global version counters.
//!
//! Two independent monotonically increasing clocks: the global version that
//! seeds transaction snapshots and stamps commits, and the greedy version
//! from which the contention manager hands out arbitration timestamps.
//! Relaxed ordering throughout; no data is published through these counters.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::Version;

static GLOBAL_VERSION: AtomicU64 = AtomicU64::new(0);
static GREEDY_VERSION: AtomicU64 = AtomicU64::new(0);

/// Current global version.
#[inline]
pub(crate) fn global_version() -> Version {
    GLOBAL_VERSION.load(Ordering::Relaxed)
}

/// Increment the global version and return its new value.
#[inline]
pub(crate) fn inc_global_version() -> Version {
    GLOBAL_VERSION.fetch_add(1, Ordering::Relaxed) + 1
}

/// Hand out the next greedy timestamp. Earlier timestamps win arbitration.
#[inline]
pub(crate) fn inc_greedy_version() -> Version {
    GREEDY_VERSION.fetch_add(1, Ordering::Relaxed)
}
