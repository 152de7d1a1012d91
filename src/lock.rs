//! The global stripe lock table.
//!
//! Every word of process memory maps onto one of [`LOCK_TABLE_SIZE`] stripes;
//! many distinct words intentionally share a stripe. A stripe carries two
//! lock words:
//!
//! - [`VersionLock`] — the stripe's read version with the top bit reserved as
//!   a "commit in progress" flag. Only the stripe's current write owner ever
//!   mutates it; readers revalidate around it with a pair of acquire loads.
//! - [`OwnerLock`] — an atomic word tagging the owning engine's contention
//!   manager handle with a lock flag in the low bit. Zero means free.
//!
//! # Ordering
//!
//! The owner CAS is acquire and its store-zero release. `VersionLock::lock`
//! is an AcqRel read-modify-write so a committer's data stores cannot float
//! above the point where the lock bit becomes visible, and both unlock
//! flavors are release stores so the data stores cannot sink below the
//! version publication. Readers load the data word with acquire (see
//! [`load_word`]) so the second version sample of the validated-read loop
//! cannot be reordered before the data load.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use once_cell::race::OnceBox;

use crate::cm::CmHandle;
use crate::{Version, Word};

/// Number of stripes in the global lock table.
pub(crate) const LOCK_TABLE_SIZE: usize = 4096;

const LOCK_TABLE_MASK: usize = LOCK_TABLE_SIZE - 1;

// Bitmask indexing requires a power-of-two table.
const _: () = assert!(LOCK_TABLE_SIZE & (LOCK_TABLE_SIZE - 1) == 0);

/// A stripe's read version plus the commit-in-progress flag in the top bit.
pub(crate) struct VersionLock {
    version: AtomicU64,
}

impl VersionLock {
    /// The bit where the lock is stored. (Different from the lock mask of
    /// `OwnerLock`.)
    pub(crate) const LOCK_MASK: Version = 1 << 63;

    const fn new() -> Self {
        Self {
            version: AtomicU64::new(0),
        }
    }

    /// Current version including the lock bit.
    #[inline]
    pub(crate) fn get(&self) -> Version {
        self.version.load(Ordering::Acquire)
    }

    /// Set the lock bit. Caller must hold the stripe's owner lock.
    #[inline]
    pub(crate) fn lock(&self) {
        self.version.fetch_or(Self::LOCK_MASK, Ordering::AcqRel);
    }

    /// Clear the lock bit without changing the version (abort path).
    #[inline]
    pub(crate) fn unlock(&self) {
        let v = self.version.load(Ordering::Relaxed);
        self.version.store(v & !Self::LOCK_MASK, Ordering::Release);
    }

    /// Publish a new version with the lock bit cleared (commit path).
    #[inline]
    pub(crate) fn unlock_with(&self, new_version: Version) {
        debug_assert!(new_version & Self::LOCK_MASK == 0);
        self.version.store(new_version, Ordering::Release);
    }
}

/// The stripe's write-owner word: contention manager handle address tagged
/// with a lock flag in the low bit.
pub(crate) struct OwnerLock {
    value: AtomicUsize,
}

impl OwnerLock {
    /// The bit where the lock is stored. (Different from the lock mask of
    /// `VersionLock`.)
    const LOCK_MASK: usize = 0b1;

    const fn new() -> Self {
        Self {
            value: AtomicUsize::new(0),
        }
    }

    /// Attempt to claim the stripe for `owner`. Fails if any engine
    /// (including `owner`) already holds it.
    #[inline]
    pub(crate) fn try_lock(&self, owner: &'static CmHandle) -> bool {
        let tagged = owner.addr() | Self::LOCK_MASK;
        self.value
            .compare_exchange(0, tagged, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release the stripe. Caller must be the owner.
    #[inline]
    pub(crate) fn unlock(&self) {
        self.value.store(0, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_locked(&self) -> bool {
        self.value.load(Ordering::Acquire) & Self::LOCK_MASK != 0
    }

    #[inline]
    pub(crate) fn is_locked_by(&self, owner: &'static CmHandle) -> bool {
        self.value.load(Ordering::Acquire) == (owner.addr() | Self::LOCK_MASK)
    }

    /// Contention manager handle of the current owner, if any.
    #[inline]
    pub(crate) fn owner(&self) -> Option<&'static CmHandle> {
        let value = self.value.load(Ordering::Acquire);
        if value == 0 {
            return None;
        }
        // SAFETY: non-zero values are only ever stored by `try_lock`, which
        // tags the address of a leaked, 'static CmHandle. Handles are never
        // freed, so the untagged address always points at a live handle.
        Some(unsafe { CmHandle::from_addr(value & !Self::LOCK_MASK) })
    }
}

/// One stripe of the lock table.
pub(crate) struct LockEntry {
    pub(crate) version: VersionLock,
    pub(crate) owner: OwnerLock,
}

impl LockEntry {
    const fn new() -> Self {
        Self {
            version: VersionLock::new(),
            owner: OwnerLock::new(),
        }
    }
}

// Sanity check for memory layout: two words, power-of-two size.
#[cfg(target_pointer_width = "64")]
const _: () = assert!(size_of::<LockEntry>() == 2 * size_of::<usize>());
const _: () = assert!(size_of::<LockEntry>() & (size_of::<LockEntry>() - 1) == 0);

/// Process-wide stripe table.
pub(crate) struct LockTable {
    entries: [LockEntry; LOCK_TABLE_SIZE],
}

impl LockTable {
    fn new() -> Self {
        Self {
            entries: [const { LockEntry::new() }; LOCK_TABLE_SIZE],
        }
    }

    /// Stripe for a given table index.
    #[inline]
    pub(crate) fn entry(&self, index: usize) -> &LockEntry {
        &self.entries[index]
    }
}

/// Index of the stripe guarding `address`.
#[inline]
pub(crate) fn lock_index(address: usize) -> usize {
    address & LOCK_TABLE_MASK
}

static LOCK_TABLE: OnceBox<LockTable> = OnceBox::new();

/// Global lock table singleton.
#[inline]
pub(crate) fn lock_table() -> &'static LockTable {
    LOCK_TABLE.get_or_init(|| Box::new(LockTable::new()))
}

/// Load a target word.
///
/// Acquire so the validated-read loop's second version sample cannot be
/// hoisted before the data load.
///
/// # Safety
///
/// `addr` must be word-aligned and valid for reads. Concurrent writers must
/// go through [`store_word`] (the commit path), never plain stores.
#[inline]
pub(crate) unsafe fn load_word(addr: *const Word) -> Word {
    unsafe { AtomicU64::from_ptr(addr.cast_mut()) }.load(Ordering::Acquire)
}

/// Store a target word. Relaxed: the caller holds the stripe's owner lock
/// with the version lock bit set, and publication happens through the
/// version release store.
///
/// # Safety
///
/// `addr` must be word-aligned and valid for writes, and the caller must own
/// the stripe's write lock.
#[inline]
pub(crate) unsafe fn store_word(addr: *mut Word, value: Word) {
    unsafe { AtomicU64::from_ptr(addr) }.store(value, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cm::CmHandle;

    #[test]
    fn version_lock_bit_roundtrip() {
        let lock = VersionLock::new();
        assert_eq!(lock.get(), 0);

        lock.lock();
        assert!(lock.get() & VersionLock::LOCK_MASK != 0);

        lock.unlock();
        assert_eq!(lock.get(), 0);

        lock.lock();
        lock.unlock_with(42);
        assert_eq!(lock.get(), 42);
    }

    #[test]
    fn owner_lock_tagging() {
        let lock = OwnerLock::new();
        let a = CmHandle::alloc();
        let b = CmHandle::alloc();

        assert!(!lock.is_locked());
        assert!(lock.owner().is_none());

        assert!(lock.try_lock(a));
        assert!(lock.is_locked());
        assert!(lock.is_locked_by(a));
        assert!(!lock.is_locked_by(b));
        assert!(core::ptr::eq(lock.owner().unwrap(), a));

        // Second acquisition fails even for the owner.
        assert!(!lock.try_lock(a));
        assert!(!lock.try_lock(b));

        lock.unlock();
        assert!(!lock.is_locked());
        assert!(lock.try_lock(b));
        assert!(lock.is_locked_by(b));
    }

    #[test]
    fn stripe_aliasing() {
        assert_eq!(lock_index(0), 0);
        assert_eq!(lock_index(8), 8);
        assert_eq!(lock_index(LOCK_TABLE_SIZE), 0);
        assert_eq!(lock_index(LOCK_TABLE_SIZE + 8), 8);
    }
}
