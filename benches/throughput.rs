//! Single-thread transaction throughput.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use mozaik::{atomic, atomic_read, TCell};

fn bench_read_only(c: &mut Criterion) {
    mozaik::thread_init();
    let cells: Vec<TCell<u64>> = (0..16u64).map(TCell::new).collect();

    c.bench_function("read_only_16_words", |b| {
        b.iter(|| {
            let sum = atomic_read(|| {
                let mut sum = 0;
                for cell in &cells {
                    sum += cell.get()?;
                }
                Ok(sum)
            })
            .unwrap();
            black_box(sum)
        })
    });
}

fn bench_read_write(c: &mut Criterion) {
    mozaik::thread_init();
    let cells: Vec<TCell<u64>> = (0..16u64).map(TCell::new).collect();

    c.bench_function("increment_16_words", |b| {
        b.iter(|| {
            atomic(|| {
                for cell in &cells {
                    let v = cell.get()?;
                    cell.set(v + 1)?;
                }
                Ok(())
            })
            .unwrap();
        })
    });
}

fn bench_single_word(c: &mut Criterion) {
    mozaik::thread_init();
    let cell = TCell::new(0u64);

    c.bench_function("increment_1_word", |b| {
        b.iter(|| {
            atomic(|| {
                let v = cell.get()?;
                cell.set(v + 1)
            })
            .unwrap();
        })
    });
}

criterion_group!(benches, bench_read_only, bench_read_write, bench_single_word);
criterion_main!(benches);
