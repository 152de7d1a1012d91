//! Sub-word accessors and typed cells.

use mozaik::access;
use mozaik::{atomic, atomic_read, TCell, Word};

#[test]
fn half_word_store_preserves_neighbor() {
    mozaik::thread_init();

    let mut words: [Word; 2] = [0x1111_2222_3333_4444, 0];
    let lo = words.as_mut_ptr() as *mut u32;
    // Second half of word 0.
    let hi = unsafe { lo.add(1) };

    atomic(|| unsafe { access::write(hi, 0xDEAD_BEEFu32) }).unwrap();

    let (first, second) =
        atomic_read(|| Ok((unsafe { access::read(lo) }?, unsafe { access::read(hi) }?))).unwrap();
    assert_eq!(first, 0x3333_4444u32);
    assert_eq!(second, 0xDEAD_BEEFu32);

    #[cfg(target_endian = "little")]
    assert_eq!(words[0], 0xDEAD_BEEF_3333_4444);
    assert_eq!(words[1], 0);
}

#[test]
fn narrow_writes_interleave() {
    mozaik::thread_init();

    // Sixteen u16 slots backed by word-aligned storage.
    let mut backing = [0u64; 4];
    let base = backing.as_mut_ptr() as *mut u16;

    atomic(|| {
        for i in 0..16u16 {
            unsafe { access::write(base.add(i as usize), i) }?;
        }
        Ok(())
    })
    .unwrap();

    atomic(|| {
        for i in (0..16u16).step_by(2) {
            unsafe { access::write(base.add(i as usize), i * 2) }?;
        }

        for i in 0..16u16 {
            let expected = if i % 2 == 0 { i * 2 } else { i };
            assert_eq!(unsafe { access::read(base.add(i as usize)) }?, expected);
        }
        Ok(())
    })
    .unwrap();

    atomic_read(|| {
        for i in 0..16u16 {
            let expected = if i % 2 == 0 { i * 2 } else { i };
            assert_eq!(unsafe { access::read(base.add(i as usize)) }?, expected);
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn signed_values_roundtrip() {
    mozaik::thread_init();

    let mut backing = [0u64; 1];
    let addr = backing.as_mut_ptr() as *mut i32;

    atomic(|| unsafe { access::write(addr, -123_456i32) }).unwrap();

    let value = atomic_read(|| unsafe { access::read(addr) }).unwrap();
    assert_eq!(value, -123_456i32);
}

#[test]
fn cells_roundtrip() {
    mozaik::thread_init();

    let cell = TCell::new(-7i64);
    assert_eq!(atomic_read(|| cell.get()).unwrap(), -7);

    atomic(|| {
        let v = cell.get()?;
        cell.set(v * -3)
    })
    .unwrap();

    assert_eq!(unsafe { cell.unsynchronized_read() }, 21);
}
