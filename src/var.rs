//! Transactional cells.
//!
//! [`TCell`] owns a whole word of transactional memory and stores the typed
//! value in it, so it can be shared between threads and accessed safely —
//! unlike the raw pointer API, where the caller vouches for the containing
//! word.

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;

use crate::access::TxWord;
use crate::errors::TxError;
use crate::Word;

/// A word-backed transactional variable.
///
/// All shared access goes through [`TCell::get`] and [`TCell::set`] inside
/// an atomic block; the STM serializes concurrent transactions touching the
/// cell.
///
/// # Example
///
/// ```
/// use mozaik::{atomic, TCell};
///
/// mozaik::thread_init();
/// let cell = TCell::new(41u64);
///
/// atomic(|| {
///     let v = cell.get()?;
///     cell.set(v + 1)
/// })
/// .unwrap();
/// ```
pub struct TCell<T> {
    word: UnsafeCell<Word>,
    _marker: PhantomData<T>,
}

// Concurrent access is mediated by the transaction engine.
unsafe impl<T: Send> Send for TCell<T> {}
unsafe impl<T: Send> Sync for TCell<T> {}

impl<T: TxWord> TCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            word: UnsafeCell::new(value.to_word()),
            _marker: PhantomData,
        }
    }

    /// Read the cell. Must be called inside an active transaction.
    pub fn get(&self) -> Result<T, TxError> {
        // SAFETY: the cell owns its word, which is aligned and lives as
        // long as &self.
        let word = unsafe { crate::read_word(self.word.get()) }?;
        Ok(T::from_word(word))
    }

    /// Write the cell. Must be called inside an active read-write
    /// transaction.
    pub fn set(&self, value: T) -> Result<(), TxError> {
        // SAFETY: as in `get`.
        unsafe { crate::write_word(self.word.get(), value.to_word(), Word::MAX) }
    }

    /// Read the cell without synchronization.
    ///
    /// # Safety
    ///
    /// The caller must guarantee no transaction is concurrently writing the
    /// cell — e.g. during single-threaded setup or after all worker threads
    /// have joined.
    pub unsafe fn unsynchronized_read(&self) -> T {
        T::from_word(unsafe { *self.word.get() })
    }

    /// Write the cell without synchronization.
    ///
    /// # Safety
    ///
    /// The caller must guarantee no transaction is concurrently accessing
    /// the cell.
    pub unsafe fn unsynchronized_write(&self, value: T) {
        unsafe { *self.word.get() = value.to_word() };
    }
}

impl<T: TxWord + Default> Default for TCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for TCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TCell").finish_non_exhaustive()
    }
}
