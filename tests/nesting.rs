//! Atomic block nesting and promotion rules.

use std::cell::Cell;

use mozaik::{atomic, atomic_read, TCell, TxError};

#[test]
fn read_write_inside_read_only_fails_fast() {
    mozaik::thread_init();

    let cell = TCell::new(5u64);
    let attempts = Cell::new(0u32);

    let result = atomic_read(|| {
        attempts.set(attempts.get() + 1);
        let _ = cell.get()?;
        atomic(|| cell.set(6))
    });

    assert_eq!(result, Err(TxError::IncompatibleNesting));
    // Non-retry: the outer block must not have restarted.
    assert_eq!(attempts.get(), 1);
    assert_eq!(unsafe { cell.unsynchronized_read() }, 5);
}

#[test]
fn read_write_joins_enclosing_read_write() {
    mozaik::thread_init();

    let cell = TCell::new(1u64);

    atomic(|| {
        cell.set(2)?;

        atomic(|| {
            assert_eq!(cell.get()?, 2);
            cell.set(3)
        })?;

        // The nested block's write is part of this transaction.
        assert_eq!(cell.get()?, 3);
        Ok(())
    })
    .unwrap();

    assert_eq!(unsafe { cell.unsynchronized_read() }, 3);
}

#[test]
fn read_only_joins_enclosing_read_write() {
    mozaik::thread_init();

    let cell = TCell::new(9u64);

    atomic(|| {
        cell.set(10)?;
        let seen = atomic_read(|| cell.get())?;
        assert_eq!(seen, 10);
        Ok(())
    })
    .unwrap();
}

#[test]
fn read_only_joins_enclosing_read_only() {
    mozaik::thread_init();

    let cell = TCell::new(4u64);

    let value = atomic_read(|| atomic_read(|| cell.get())).unwrap();
    assert_eq!(value, 4);
}
