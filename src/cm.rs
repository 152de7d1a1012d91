//! Contention manager.
//!
//! Greedy-timestamp arbitration with randomized exponential backoff. A
//! transaction starts non-greedy (timestamp = [`NO_TIMESTAMP`]) and always
//! yields to a lock holder. Once it has accumulated enough write stripes it
//! claims a timestamp from the greedy clock; between two greedy rivals the
//! earlier timestamp wins. Restarts keep an already claimed timestamp, so a
//! transaction that keeps losing eventually holds a small timestamp and
//! stops losing.

use core::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::clock;
use crate::engine::TransactionEngine;
use crate::lock::OwnerLock;
use crate::trace::trace_log;
use crate::Version;

/// Sentinel meaning "no greedy timestamp claimed".
pub(crate) const NO_TIMESTAMP: Version = Version::MAX;

/// Write-set size at which a transaction turns greedy. Shorter transactions
/// finish fast enough that always yielding is cheaper than arbitration.
const GREEDY_THRESHOLD: usize = 10;

/// Per-engine state shared with rival engines.
///
/// Stripe owner locks tag the address of this handle, and rivals resolve the
/// tag back to read the owner's timestamp. Handles are allocated once per
/// engine and leaked, so a stale tag read from a lock word can never dangle.
#[repr(align(64))]
pub(crate) struct CmHandle {
    ts: AtomicU64,
}

// The low bit of the handle address is stolen for the owner lock flag.
const _: () = assert!(align_of::<CmHandle>() > 1);

impl CmHandle {
    pub(crate) fn alloc() -> &'static Self {
        Box::leak(Box::new(Self {
            ts: AtomicU64::new(NO_TIMESTAMP),
        }))
    }

    #[inline]
    pub(crate) fn addr(&'static self) -> usize {
        self as *const Self as usize
    }

    /// # Safety
    ///
    /// `addr` must come from [`CmHandle::addr`] of a leaked handle.
    #[inline]
    pub(crate) unsafe fn from_addr(addr: usize) -> &'static Self {
        unsafe { &*(addr as *const Self) }
    }

    #[inline]
    fn timestamp(&self) -> Version {
        self.ts.load(Ordering::Relaxed)
    }

    /// Abort hint from a rival engine. Advisory only, the engine never
    /// checks it.
    fn request_abort(&self) {
        // TODO: deliver the hint to the owning engine so that long
        // transactions can abort voluntarily instead of spinning out the
        // rival.
        let _ = self;
    }
}

impl TransactionEngine {
    /// Fresh transaction: forget any greedy timestamp and reset backoff.
    pub(crate) fn cm_on_start(&mut self) {
        self.handle.ts.store(NO_TIMESTAMP, Ordering::Relaxed);
        self.cm_backoff = 0;
    }

    /// Restart: sleep for a randomized, exponentially growing number of
    /// nanoseconds.
    pub(crate) fn cm_on_restart(&mut self) {
        let jitter = (self.rng.next() & 0xF) as u16;

        self.cm_backoff = self.cm_backoff.wrapping_add(jitter);
        trace_log!("transaction restart, backing off {}ns", self.cm_backoff);
        std::thread::sleep(Duration::from_nanos(u64::from(self.cm_backoff)));
        self.cm_backoff <<= 1;
    }

    /// Claim a greedy timestamp once the write set is large enough.
    pub(crate) fn cm_on_write(&mut self) {
        if self.handle.timestamp() == NO_TIMESTAMP && self.write_set.len() >= GREEDY_THRESHOLD {
            self.handle
                .ts
                .store(clock::inc_greedy_version(), Ordering::Relaxed);
        }
    }

    /// Arbitrate against the holder of `lock`. Returns true if this engine
    /// must abort; false means keep spinning on the lock.
    pub(crate) fn cm_should_abort(&self, lock: &OwnerLock) -> bool {
        let ts = self.handle.timestamp();
        if ts == NO_TIMESTAMP {
            return true;
        }

        if let Some(owner) = lock.owner() {
            if owner.timestamp() < ts {
                return true;
            }

            owner.request_abort();
        }

        false
    }
}
