// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 smtl contributors
//
// FIFO hot-path benchmarks: uncontended push/poll pairs and a batched
// producer/consumer cycle.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use smtl::fifo::Fifo;

fn heap_fifo(slots: usize) -> &'static Fifo {
    let words = Fifo::size_of(slots) / 8;
    let buf: Box<[u64]> = vec![0u64; words].into_boxed_slice();
    let base = Box::leak(buf).as_mut_ptr() as *mut u8;
    unsafe { Fifo::init(base, slots) }
}

fn bench_fifo(c: &mut Criterion) {
    let fifo = heap_fifo(4096);

    c.bench_function("fifo_push_poll", |b| {
        b.iter(|| {
            fifo.push(black_box(42));
            black_box(fifo.poll())
        })
    });

    c.bench_function("fifo_batch_32", |b| {
        b.iter(|| {
            for v in 0..32i64 {
                fifo.push(black_box(v));
            }
            for _ in 0..32 {
                black_box(fifo.poll());
            }
        })
    });
}

criterion_group!(benches, bench_fifo);
criterion_main!(benches);
