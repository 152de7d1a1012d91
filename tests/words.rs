//! Transactional word access against plain aligned memory.

use mozaik::{atomic, atomic_read, PromotionState, Word};

const ENTRIES: usize = 16;

#[test]
fn word_read_only() {
    mozaik::thread_init();

    let mut words: Vec<Word> = (0..ENTRIES as Word).collect();
    let base = words.as_mut_ptr();

    atomic_read(|| {
        for i in 0..ENTRIES {
            let value = unsafe { mozaik::read_word(base.add(i)) }?;
            assert_eq!(value, i as Word);
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn word_read_write() {
    mozaik::thread_init();

    let mut words: Vec<Word> = (0..ENTRIES as Word).collect();
    let base = words.as_mut_ptr();

    // First block: write the even entries, then observe evens updated and
    // odds untouched from inside the same transaction.
    atomic(|| {
        for i in 0..ENTRIES {
            assert_eq!(unsafe { mozaik::read_word(base.add(i)) }?, i as Word);
        }

        for i in (0..ENTRIES).step_by(2) {
            unsafe { mozaik::write_word(base.add(i), (i * 2) as Word, Word::MAX) }?;
        }

        for i in 0..ENTRIES {
            let expected = if i % 2 == 0 { i * 2 } else { i } as Word;
            assert_eq!(unsafe { mozaik::read_word(base.add(i)) }?, expected);
        }
        Ok(())
    })
    .unwrap();

    for (i, &word) in words.iter().enumerate() {
        let expected = if i % 2 == 0 { i * 2 } else { i } as Word;
        assert_eq!(word, expected);
    }

    // Second block: finish the odds and verify the full pattern.
    let base = words.as_mut_ptr();
    atomic(|| {
        for i in (1..ENTRIES).step_by(2) {
            unsafe { mozaik::write_word(base.add(i), (i * 2) as Word, Word::MAX) }?;
        }

        for i in 0..ENTRIES {
            assert_eq!(unsafe { mozaik::read_word(base.add(i)) }?, (i * 2) as Word);
        }
        Ok(())
    })
    .unwrap();

    for (i, &word) in words.iter().enumerate() {
        assert_eq!(word, (i * 2) as Word);
    }
}

#[test]
fn repeated_writes_last_value_wins() {
    mozaik::thread_init();

    let mut word: Word = 0;
    let addr = &mut word as *mut Word;

    atomic(|| {
        unsafe { mozaik::write_word(addr, 1, Word::MAX) }?;
        unsafe { mozaik::write_word(addr, 2, Word::MAX) }?;
        assert_eq!(unsafe { mozaik::read_word(addr) }?, 2);
        unsafe { mozaik::write_word(addr, 3, Word::MAX) }
    })
    .unwrap();

    assert_eq!(word, 3);
}

#[test]
fn empty_commit_is_idempotent() {
    mozaik::thread_init();

    let mut word: Word = 17;
    let addr = &mut word as *mut Word;

    mozaik::begin_read_write();
    assert_eq!(unsafe { mozaik::read_word(addr) }.unwrap(), 17);
    mozaik::commit().unwrap();

    assert_eq!(word, 17);
}

#[test]
fn end_discards_speculative_writes() {
    mozaik::thread_init();

    let mut word: Word = 7;
    let addr = &mut word as *mut Word;

    mozaik::begin_read_write();
    unsafe { mozaik::write_word(addr, 99, Word::MAX) }.unwrap();
    mozaik::end();

    assert_eq!(word, 7);

    // The stripe is usable again afterwards.
    atomic(|| unsafe { mozaik::write_word(addr, 8, Word::MAX) }).unwrap();
    assert_eq!(word, 8);
}

#[test]
fn promotion_queries_follow_engine_state() {
    mozaik::thread_init();

    assert_eq!(mozaik::is_read_write_compatible(), PromotionState::NoRunning);
    assert_eq!(mozaik::is_read_only_compatible(), PromotionState::NoRunning);

    mozaik::begin_read_only();
    assert_eq!(
        mozaik::is_read_write_compatible(),
        PromotionState::Incompatible
    );
    assert_eq!(mozaik::is_read_only_compatible(), PromotionState::Compatible);
    mozaik::commit().unwrap();

    mozaik::begin_read_write();
    assert_eq!(mozaik::is_read_write_compatible(), PromotionState::Compatible);
    assert_eq!(mozaik::is_read_only_compatible(), PromotionState::Compatible);
    mozaik::end();

    assert_eq!(mozaik::is_read_write_compatible(), PromotionState::NoRunning);
}
