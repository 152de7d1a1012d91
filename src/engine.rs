//! The per-thread transaction engine.
//!
//! Each thread owns exactly one engine, reached through the free functions at
//! the bottom of this module. The engine runs the SwissTM-style protocol
//! against the global lock table and version clocks:
//!
//! - **Reads** are invisible. A validated double-sample of the stripe's read
//!   version brackets the data load; observing a version newer than the
//!   transaction snapshot triggers [`TransactionEngine::extend`], which
//!   widens the snapshot instead of aborting when the read set still
//!   validates.
//! - **Writes** acquire the stripe's owner lock eagerly (encounter-time) and
//!   buffer the intended value per address. Conflicts on the owner lock are
//!   arbitrated by the contention manager.
//! - **Commit** locks the read versions of all written stripes, bumps the
//!   global clock, revalidates the read set if anyone committed in between,
//!   applies the buffered writes, and releases every stripe at the new
//!   version.

use core::cell::RefCell;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::clock;
use crate::cm::CmHandle;
use crate::errors::TxError;
use crate::lock::{self, VersionLock};
use crate::pool::{PooledList, ReadSetEntry, WriteDataEntry, WriteSetEntry};
use crate::rand::Xoroshiro128pp;
use crate::trace::trace_log;
use crate::{Version, Word};

const INITIALIZED_BIT: u32 = 0b0001;
const RUNNING_BIT: u32 = 0b0010;
const READ_ONLY_BIT: u32 = 0b0100;

/// Engine lifecycle states, a bit-field over
/// {INITIALIZED, RUNNING, READ_ONLY}.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub(crate) enum State {
    Uninitialized = 0,
    Initialized = INITIALIZED_BIT,
    ReadWriteRunning = INITIALIZED_BIT | RUNNING_BIT,
    ReadOnlyRunning = INITIALIZED_BIT | RUNNING_BIT | READ_ONLY_BIT,
}

impl State {
    #[inline]
    pub(crate) fn is_running(self) -> bool {
        self as u32 & RUNNING_BIT != 0
    }
}

/// Whether an atomic block may join the transaction already running on the
/// calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionState {
    /// No transaction is running; the block must begin one.
    NoRunning,
    /// The running transaction absorbs the block.
    Compatible,
    /// The block cannot run inside the current transaction.
    Incompatible,
}

/// Sequence counter deciding how many PRNG jumps each new engine performs.
/// Masked to u8 to bound initialization time on thread-heavy processes.
static ENGINE_SEQ: AtomicU32 = AtomicU32::new(0);

pub(crate) struct TransactionEngine {
    state: State,
    /// Snapshot of the global version taken at begin or at the last extend.
    start_version: Version,
    /// Shared arbitration state; stripe owner locks tag its address.
    pub(crate) handle: &'static CmHandle,
    pub(crate) cm_backoff: u16,

    read_set: PooledList<ReadSetEntry>,
    pub(crate) write_set: PooledList<WriteSetEntry>,
    write_data: PooledList<WriteDataEntry>,

    pub(crate) rng: Xoroshiro128pp,
}

impl TransactionEngine {
    fn new() -> Self {
        Self {
            state: State::Uninitialized,
            start_version: 0,
            handle: CmHandle::alloc(),
            cm_backoff: 0,
            read_set: PooledList::new(),
            write_set: PooledList::new(),
            write_data: PooledList::new(),
            rng: Xoroshiro128pp::new(),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> State {
        self.state
    }

    /// One-time per-thread initialization. Idempotent.
    pub(crate) fn init(&mut self) {
        if self.state != State::Uninitialized {
            return;
        }

        // Allocate the global support state before the first transaction.
        lock::lock_table();

        // Decorrelate this engine's generator from every other engine's.
        let jumps = ENGINE_SEQ.fetch_add(1, Ordering::Relaxed) & 0xFF;
        for _ in 0..jumps {
            self.rng.jump();
        }

        trace_log!("transaction engine initialized after {} rng jumps", jumps);
        self.state = State::Initialized;
    }

    pub(crate) fn is_read_write_compatible(&self) -> PromotionState {
        if !self.state.is_running() {
            PromotionState::NoRunning
        } else if self.state == State::ReadWriteRunning {
            PromotionState::Compatible
        } else {
            PromotionState::Incompatible
        }
    }

    pub(crate) fn is_read_only_compatible(&self) -> PromotionState {
        if !self.state.is_running() {
            PromotionState::NoRunning
        } else {
            // Both running modes absorb a nested read-only block.
            PromotionState::Compatible
        }
    }

    pub(crate) fn begin_read_write(&mut self) {
        if self.state == State::ReadWriteRunning {
            self.cm_on_restart();
        } else {
            assert_eq!(
                self.state,
                State::Initialized,
                "transaction begun on an uninitialized engine"
            );
            self.cm_on_start();
        }

        self.start_version = clock::global_version();
        self.state = State::ReadWriteRunning;
    }

    pub(crate) fn begin_read_only(&mut self) {
        if self.state == State::ReadOnlyRunning {
            self.cm_on_restart();
        } else {
            assert_eq!(
                self.state,
                State::Initialized,
                "transaction begun on an uninitialized engine"
            );
            self.cm_on_start();
        }

        self.start_version = clock::global_version();
        self.state = State::ReadOnlyRunning;
    }

    /// Transactionally read the word at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must be word-aligned and valid for reads for the duration of
    /// the transaction.
    pub(crate) unsafe fn read_word(&mut self, addr: *const Word) -> Result<Word, TxError> {
        debug_assert!(self.state.is_running());

        let index = lock::lock_index(addr as usize);
        let entry = lock::lock_table().entry(index);

        if entry.owner.is_locked_by(self.handle) {
            // Own stripe: serve the speculative value. An address sharing
            // the stripe that was never written cannot change underneath us
            // while the owner lock is held, so the direct load is stable.
            return Ok(match self.write_data.get(addr as usize) {
                Some(pending) => pending.data(),
                None => unsafe { lock::load_word(addr) },
            });
        }

        let mut v1 = entry.version.get();
        let data = loop {
            if v1 & VersionLock::LOCK_MASK != 0 {
                // A commit to this stripe is in flight; the value is
                // transient.
                spin_loop();
                v1 = entry.version.get();
                continue;
            }

            let data = unsafe { lock::load_word(addr) };

            let v2 = entry.version.get();
            if v2 == v1 {
                break data;
            }
            v1 = v2;
        };

        // Only the first read of a stripe records a version. A re-read that
        // observes a newer version must fail validation below and restart,
        // never re-baseline the entry, or the transaction could return two
        // different values for the same address.
        if !self.read_set.contains(index) {
            self.read_set.create(index).set_version(v1);
        }

        if v1 > self.start_version && !self.extend() {
            self.rollback();
            return Err(TxError::Inconsistent);
        }

        Ok(data)
    }

    /// Transactionally write the bits of `*addr` selected by `mask`.
    ///
    /// # Safety
    ///
    /// `addr` must be word-aligned and valid for reads and writes for the
    /// duration of the transaction.
    pub(crate) unsafe fn write_word(
        &mut self,
        addr: *mut Word,
        data: Word,
        mask: Word,
    ) -> Result<(), TxError> {
        debug_assert_eq!(self.state, State::ReadWriteRunning);

        let index = lock::lock_index(addr as usize);
        let entry = lock::lock_table().entry(index);

        if entry.owner.is_locked_by(self.handle) {
            if let Some(pending) = self.write_data.get_mut(addr as usize) {
                pending.merge(data, mask);
                return Ok(());
            }
            self.write_data.create(addr as usize).set(data, mask);
            return Ok(());
        }

        loop {
            if entry.owner.is_locked() {
                if self.cm_should_abort(&entry.owner) {
                    self.rollback();
                    return Err(TxError::Contention);
                }
                spin_loop();
                continue;
            }

            if entry.owner.try_lock(self.handle) {
                self.write_set.create(index);
                break;
            }
        }

        if entry.version.get() > self.start_version && !self.extend() {
            self.rollback();
            return Err(TxError::Inconsistent);
        }

        let mut data = data;
        if mask != Word::MAX {
            // Capture the untouched bits now so that commit's whole-word
            // store is correct.
            data = (data & mask) | (unsafe { lock::load_word(addr) } & !mask);
        }
        self.write_data.create(addr as usize).set(data, mask);

        self.cm_on_write();
        Ok(())
    }

    /// Widen the snapshot to the current global version without aborting.
    /// Fails if the read set no longer validates.
    fn extend(&mut self) -> bool {
        let new_version = clock::global_version();
        if self.validate_read_set() {
            self.start_version = new_version;
            return true;
        }
        false
    }

    fn validate_read_set(&self) -> bool {
        let table = lock::lock_table();
        for entry in self.read_set.iter() {
            let stripe = table.entry(entry.index());
            let v = stripe.version.get();
            if v != entry.version() {
                // A locked stripe is fine when we are the one committing it.
                if v & VersionLock::LOCK_MASK == 0 || !stripe.owner.is_locked_by(self.handle) {
                    return false;
                }
            }
        }
        true
    }

    /// Attempt to commit. On success the transaction's writes are visible
    /// atomically; on failure every lock is released, the buffers are
    /// cleared, and the engine is back at `Initialized`.
    pub(crate) fn commit(&mut self) -> Result<(), TxError> {
        assert!(self.state.is_running(), "commit outside a transaction");

        if self.state == State::ReadOnlyRunning {
            self.clear_buffers();
            self.state = State::Initialized;
            return Ok(());
        }

        if !self.write_set.is_empty() {
            let table = lock::lock_table();

            for entry in self.write_set.iter() {
                table.entry(entry.index()).version.lock();
            }

            let new_version = clock::inc_global_version();

            if new_version > self.start_version + 1 {
                // Someone committed since this transaction began (or last
                // extended); the read set must still hold.
                if !self.validate_read_set() {
                    for entry in self.write_set.iter() {
                        table.entry(entry.index()).version.unlock();
                    }
                    self.rollback();
                    self.state = State::Initialized;
                    trace_log!("commit validation failed at version {}", new_version);
                    return Err(TxError::Validation);
                }
            }

            for pending in self.write_data.iter() {
                // SAFETY: the address was validated by write_word's caller;
                // the stripe's owner lock is held and its version lock bit
                // is set, so concurrent readers retry.
                unsafe { commit_word(pending) };
            }

            for entry in self.write_set.iter() {
                let stripe = table.entry(entry.index());
                stripe.version.unlock_with(new_version);
                stripe.owner.unlock();
            }
        }

        self.clear_buffers();
        self.state = State::Initialized;
        Ok(())
    }

    /// Abort the running transaction unconditionally.
    pub(crate) fn end(&mut self) {
        assert!(self.state.is_running(), "end outside a transaction");

        self.rollback();
        self.state = State::Initialized;
    }

    /// Release every held owner lock and clear the buffers. Does not touch
    /// the engine state; callers decide where the engine goes next.
    fn rollback(&mut self) {
        let table = lock::lock_table();
        for entry in self.write_set.iter() {
            table.entry(entry.index()).owner.unlock();
        }

        self.clear_buffers();
    }

    fn clear_buffers(&mut self) {
        self.read_set.clear();
        self.write_set.clear();
        self.write_data.clear();
    }
}

/// Apply one buffered write to target memory.
///
/// # Safety
///
/// The caller must hold the owner lock of the address's stripe with the
/// version lock bit set.
unsafe fn commit_word(pending: &WriteDataEntry) {
    let addr = pending.address() as *mut Word;
    let current = unsafe { lock::load_word(addr) };
    let merged = (current & !pending.mask()) | (pending.data() & pending.mask());
    unsafe { lock::store_word(addr, merged) };
}

thread_local! {
    static ENGINE: RefCell<TransactionEngine> = RefCell::new(TransactionEngine::new());
}

/// Run `f` against the calling thread's engine.
pub(crate) fn with_engine<R>(f: impl FnOnce(&mut TransactionEngine) -> R) -> R {
    ENGINE.with(|engine| f(&mut engine.borrow_mut()))
}
