//! Benchmarks for hook dispatch and seeking
//!
//! Compares plain registry dispatch with the merged every-event/by-id walk,
//! and measures the backward seek at different seed estimates.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use tracekit_core::hooks::{Hook, HookData, HookRegistry, Priority};
use tracekit_core::source::{MemoryDecoder, MemoryTraceBuilder};
use tracekit_core::{EventContext, PhaseHooks, TraceTime, Traceset};

fn registry(hooks: i32) -> HookRegistry<u64> {
    let mut registry = HookRegistry::new();
    for i in 0..hooks {
        registry.add(
            Hook::new(move |_: &HookData, v: &u64| *v == u64::MAX - i as u64),
            HookData::none(),
            Priority(i * 10),
        );
    }
    registry
}

/// Four cpus, `events` events spread evenly, every tenth one an irq
fn traceset(events: u64) -> Traceset {
    let mut builder = MemoryTraceBuilder::new("bench");
    for cpu in 0..4 {
        builder = builder.tracefile(format!("cpu_{}", cpu), cpu);
    }
    for i in 0..events {
        let name = if i % 10 == 0 { "irq_entry" } else { "syscall_entry" };
        builder = builder.event((i % 4) as usize, TraceTime::from_nanos(100 * i), name, json!({}));
    }
    let mut decoder = MemoryDecoder::new();
    let handle = decoder.insert(builder.build().unwrap()).unwrap();
    let mut traceset = Traceset::new(Box::new(decoder));
    traceset.attach(handle).unwrap();
    traceset
}

fn bench_registry_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_call");
    for hooks in [1, 8, 32] {
        let a = registry(hooks);
        let b = registry(hooks);
        group.bench_with_input(BenchmarkId::new("single", hooks), &a, |bench, a| {
            bench.iter(|| black_box(a.call(black_box(&7))))
        });
        group.bench_with_input(BenchmarkId::new("merged", hooks), &(a, b), |bench, (a, b)| {
            bench.iter(|| black_box(HookRegistry::call_merge(Some(a), &7, Some(b), &7)))
        });
    }
    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    let mut hooks = PhaseHooks::default();
    hooks.event.add_fn(Priority::DEFAULT, |_, ctx: &EventContext| {
        black_box(ctx.event.timestamp);
        false
    });
    // irq_entry is the first event, so it takes type id 0
    let irq = 0;
    hooks.event_by_id.find_or_create(irq).add(
        Hook::new(|_, ctx: &EventContext| black_box(ctx.event.type_id) == u32::MAX),
        HookData::none(),
        Priority::STATS,
    );

    c.bench_function("replay_10k_events", |b| {
        let mut traceset = traceset(10_000);
        b.iter(|| {
            traceset.begin(&hooks).unwrap();
            traceset.seek_by_time(TraceTime::ZERO).unwrap();
            let read = traceset.middle(TraceTime::MAX, None, None).unwrap();
            traceset.end(&hooks);
            black_box(read)
        })
    });
}

fn bench_seek_backward(c: &mut Criterion) {
    let mut group = c.benchmark_group("seek_n_backward");
    for ratio in [1.0, 100.0, 10_000.0] {
        group.bench_with_input(BenchmarkId::new("ratio_ns", ratio), &ratio, |b, &ratio| {
            let mut traceset = traceset(20_000);
            b.iter(|| {
                traceset.seek_by_time(TraceTime::from_nanos(1_500_000)).unwrap();
                black_box(traceset.seek_n_backward(500, Some(ratio)).unwrap())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_registry_call, bench_replay, bench_seek_backward);
criterion_main!(benches);
