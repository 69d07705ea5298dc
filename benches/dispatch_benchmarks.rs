//! Benchmarks for event dispatch.
//!
//! Run with: cargo bench

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use luminex_events::{Dispatcher, Event, EventName};
use serde_json::json;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

/// Dispatcher with `count` no-op handlers on BufEnter.
fn dispatcher_with(count: usize) -> Dispatcher {
    let dispatcher = Dispatcher::new();
    for _ in 0..count {
        // Subscriptions live as long as the dispatcher
        let _ = dispatcher.on(EventName::BufEnter, |_| async { Ok(()) });
    }
    dispatcher
}

/// Benchmarks fan-out to a growing number of handlers.
fn bench_fire(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("fire");

    for count in [0, 1, 10, 100].iter() {
        let dispatcher = dispatcher_with(*count);
        group.bench_with_input(BenchmarkId::new("buf_enter", count), count, |b, _| {
            b.iter(|| rt.block_on(dispatcher.fire(Event::BufEnter(black_box(1)))))
        });
    }

    group.finish();
}

/// Benchmarks decoding plus firing of a cursor notification.
fn bench_fire_raw(c: &mut Criterion) {
    let rt = runtime();
    let dispatcher = dispatcher_with(10);

    c.bench_function("fire_raw_cursor_moved", |b| {
        b.iter(|| {
            rt.block_on(dispatcher.fire_raw(
                "CursorMoved",
                vec![json!(1), black_box(json!([10, 4]))],
            ))
        })
    });
}

criterion_group!(benches, bench_fire, bench_fire_raw);
criterion_main!(benches);
