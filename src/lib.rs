//! Mozaik: word-granularity software transactional memory.
//!
//! # Architecture
//!
//! Mozaik implements a SwissTM-style algorithm: invisible reads validated
//! against per-stripe version counters, encounter-time write locking, and a
//! two-phase commit stamped by a global version clock.
//!
//! - **Stripes**: every word of memory maps onto one of 4096 entries of a
//!   process-wide lock table. A stripe pairs a read version (top bit =
//!   commit in progress) with a write-owner word (low bit = locked, rest
//!   identifies the owner).
//! - **Reads**: optimistic. A double sample of the stripe version brackets
//!   the data load; a version newer than the snapshot extends the snapshot
//!   instead of aborting when the read set still validates.
//! - **Writes**: buffered per address with a bit mask, the stripe owner lock
//!   taken eagerly. Conflicting writers are arbitrated by a greedy-timestamp
//!   contention manager with randomized exponential backoff.
//! - **Commit**: locks the read versions of written stripes, bumps the
//!   global clock, revalidates the read set if anyone committed in between,
//!   stores the buffered words, and releases everything at the new version.
//!
//! # Usage
//!
//! Call [`thread_init`] once per thread, then wrap work in [`atomic`] or
//! [`atomic_read`]. Inside a block, access memory through [`TCell`], the
//! typed [`access`] functions, or the raw word API.
//!
//! ```
//! use mozaik::{atomic, TCell};
//!
//! mozaik::thread_init();
//!
//! let from = TCell::new(100u64);
//! let to = TCell::new(0u64);
//!
//! atomic(|| {
//!     let amount = 30;
//!     from.set(from.get()? - amount)?;
//!     to.set(to.get()? + amount)
//! })
//! .unwrap();
//! ```
//!
//! DANGER AHEAD: the closure passed to [`atomic`] may run multiple times.
//! Keep I/O and other irrevocable effects out of it.

pub mod access;
mod clock;
mod cm;
mod engine;
mod errors;
mod lock;
mod pool;
pub mod rand;
mod trace;
mod var;

pub use engine::PromotionState;
pub use errors::TxError;
pub use var::TCell;

/// The unit of transactional access.
pub type Word = u64;

/// Version timestamps handed out by the global clock.
pub type Version = u64;

/// Initialize the calling thread's transaction engine. Must precede any
/// other call from that thread. Idempotent.
pub fn thread_init() {
    engine::with_engine(|engine| engine.init());
}

/// Whether a read-write atomic block can run on the calling thread right
/// now.
pub fn is_read_write_compatible() -> PromotionState {
    engine::with_engine(|engine| engine.is_read_write_compatible())
}

/// Whether a read-only atomic block can run on the calling thread right now.
pub fn is_read_only_compatible() -> PromotionState {
    engine::with_engine(|engine| engine.is_read_only_compatible())
}

/// Start (or restart) a read-write transaction on the calling thread.
pub fn begin_read_write() {
    engine::with_engine(|engine| engine.begin_read_write());
}

/// Start (or restart) a read-only transaction on the calling thread.
pub fn begin_read_only() {
    engine::with_engine(|engine| engine.begin_read_only());
}

/// Commit the running transaction. On failure the engine has already
/// released its locks and cleared its buffers; a retry-eligible error means
/// the caller may begin again.
pub fn commit() -> Result<(), TxError> {
    engine::with_engine(|engine| engine.commit())
}

/// Abort the running transaction unconditionally, releasing all held locks
/// and speculative state.
pub fn end() {
    engine::with_engine(|engine| engine.end());
}

/// Transactionally read the word at `addr`. Must be called inside an active
/// transaction on the calling thread.
///
/// # Safety
///
/// `addr` must be word-aligned and valid for reads for the duration of the
/// transaction, and concurrent access to the word must go through this STM.
pub unsafe fn read_word(addr: *const Word) -> Result<Word, TxError> {
    engine::with_engine(|engine| unsafe { engine.read_word(addr) })
}

/// Transactionally write the bits of `*addr` selected by `mask`. Must be
/// called inside an active read-write transaction on the calling thread.
///
/// # Safety
///
/// `addr` must be word-aligned and valid for reads and writes for the
/// duration of the transaction, and concurrent access to the word must go
/// through this STM.
pub unsafe fn write_word(addr: *mut Word, data: Word, mask: Word) -> Result<(), TxError> {
    engine::with_engine(|engine| unsafe { engine.write_word(addr, data, mask) })
}

/// Ends the transaction if the guarded scope unwinds before committing, so
/// panics escaping a user closure never leak stripe locks.
struct TxScope {
    armed: bool,
}

impl TxScope {
    fn new() -> Self {
        Self { armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TxScope {
    fn drop(&mut self) {
        if self.armed {
            engine::with_engine(|engine| {
                if engine.state().is_running() {
                    engine.end();
                }
            });
        }
    }
}

/// Execute `body` atomically in a read-write transaction.
///
/// If a compatible transaction is already running on this thread the block
/// joins it and only commits when the outermost block commits. Inside a
/// read-only transaction this fails fast with
/// [`TxError::IncompatibleNesting`].
///
/// Retry-eligible errors restart the block (with contention-manager
/// backoff), so `body` may run any number of times; such errors must
/// originate from the engine itself. A panic unwinding out of `body` aborts
/// the transaction before propagating.
pub fn atomic<T, F>(mut body: F) -> Result<T, TxError>
where
    F: FnMut() -> Result<T, TxError>,
{
    match is_read_write_compatible() {
        PromotionState::Compatible => return body(),
        PromotionState::Incompatible => return Err(TxError::IncompatibleNesting),
        PromotionState::NoRunning => {}
    }

    loop {
        begin_read_write();
        let scope = TxScope::new();

        match body() {
            Ok(value) => {
                let committed = commit();
                scope.disarm();
                match committed {
                    Ok(()) => return Ok(value),
                    Err(error) if error.should_retry() => continue,
                    Err(error) => return Err(error),
                }
            }
            Err(error) if error.should_retry() => {
                // The engine rolled back but stays in the running state, so
                // the next begin is a restart and applies backoff.
                scope.disarm();
                continue;
            }
            Err(error) => return Err(error), // scope aborts the transaction
        }
    }
}

/// Execute `body` atomically in a read-only transaction.
///
/// Joins any transaction already running on this thread. The same retry and
/// panic rules as [`atomic`] apply; writes are not allowed inside the block.
pub fn atomic_read<T, F>(mut body: F) -> Result<T, TxError>
where
    F: FnMut() -> Result<T, TxError>,
{
    match is_read_only_compatible() {
        PromotionState::Compatible => return body(),
        PromotionState::Incompatible => return Err(TxError::IncompatibleNesting),
        PromotionState::NoRunning => {}
    }

    loop {
        begin_read_only();
        let scope = TxScope::new();

        match body() {
            Ok(value) => {
                let committed = commit();
                scope.disarm();
                match committed {
                    Ok(()) => return Ok(value),
                    Err(error) if error.should_retry() => continue,
                    Err(error) => return Err(error),
                }
            }
            Err(error) if error.should_retry() => {
                scope.disarm();
                continue;
            }
            Err(error) => return Err(error),
        }
    }
}
