//! End-to-end replay through the public API: hook ordering, event budgets,
//! per-type dispatch across traces and traces loaded from JSON documents.

use std::sync::{Arc, Mutex};

use serde_json::json;

use tracekit_core::hooks::{Hook, HookData, HookRegistry, Priority};
use tracekit_core::source::{MemoryDecoder, MemoryTraceBuilder};
use tracekit_core::{EventContext, Filter, PhaseHooks, TraceTime, Traceset};

fn ns(n: u64) -> TraceTime {
    TraceTime::from_nanos(n)
}

/// Two traces with interleaved timestamps on two cpus each
fn two_traces() -> Traceset {
    let mut decoder = MemoryDecoder::new();
    let mut handles = Vec::new();
    for (name, offset) in [("host_a", 0u64), ("host_b", 5)] {
        let mut builder = MemoryTraceBuilder::new(name)
            .tracefile("cpu_0", 0)
            .tracefile("cpu_1", 1);
        for i in 0..4u64 {
            let event = if i % 2 == 0 { "sched_switch" } else { "irq_entry" };
            builder = builder.event((i % 2) as usize, ns(10 * (i + 1) + offset), event, json!({}));
        }
        handles.push(decoder.insert(builder.build().unwrap()).unwrap());
    }
    let mut traceset = Traceset::new(Box::new(decoder));
    for handle in handles {
        traceset.attach(handle).unwrap();
    }
    traceset
}

#[test]
fn test_lower_priority_value_runs_first() {
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let mut registry: HookRegistry<()> = HookRegistry::new();

    let o = Arc::clone(&order);
    registry.add(
        Hook::new(move |_, _: &()| {
            o.lock().unwrap().push("h1");
            false
        }),
        HookData::none(),
        Priority(5),
    );
    let o = Arc::clone(&order);
    registry.add(
        Hook::new(move |_, _: &()| {
            o.lock().unwrap().push("h2");
            false
        }),
        HookData::none(),
        Priority(1),
    );

    registry.call(&());
    assert_eq!(*order.lock().unwrap(), vec!["h2", "h1"]);
}

#[test]
fn test_budget_beyond_remaining_events() {
    let mut traceset = two_traces();
    traceset.begin(&PhaseHooks::default()).unwrap();
    assert_eq!(traceset.middle(TraceTime::MAX, Some(5), None).unwrap(), 5);
    assert_eq!(traceset.middle(TraceTime::MAX, Some(10), None).unwrap(), 3);
    traceset.end(&PhaseHooks::default());
}

#[test]
fn test_merged_order_across_traces() {
    let mut traceset = two_traces();
    let seen: Arc<Mutex<Vec<(String, u64)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let mut hooks = PhaseHooks::default();
    hooks.event.add_fn(Priority::DEFAULT, move |_, ctx: &EventContext| {
        sink.lock()
            .unwrap()
            .push((ctx.trace.name().to_string(), ctx.event.timestamp.as_nanos()));
        false
    });

    traceset.begin(&hooks).unwrap();
    traceset.middle(TraceTime::MAX, None, None).unwrap();
    traceset.end(&hooks);

    let seen = seen.lock().unwrap();
    let times: Vec<u64> = seen.iter().map(|(_, t)| *t).collect();
    assert_eq!(times, vec![10, 15, 20, 25, 30, 35, 40, 45]);
    assert_eq!(seen[0].0, "host_a");
    assert_eq!(seen[1].0, "host_b");
}

#[test]
fn test_by_id_hooks_reach_every_trace() {
    let mut traceset = two_traces();
    let irqs: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = Arc::clone(&irqs);

    // both traces see sched_switch first, so irq_entry is type 1 in each
    let mut hooks = PhaseHooks::default();
    hooks.event_by_id.find_or_create(1).add(
        Hook::new(move |_, ctx: &EventContext| {
            sink.lock().unwrap().push(ctx.trace.name().to_string());
            false
        }),
        HookData::none(),
        Priority::DEFAULT,
    );

    traceset.begin(&hooks).unwrap();
    traceset.middle(TraceTime::MAX, None, None).unwrap();
    traceset.end(&hooks);

    assert_eq!(*irqs.lock().unwrap(), vec!["host_a", "host_b", "host_a", "host_b"]);
    for trace in traceset.traces() {
        assert_eq!(trace.event_by_id().iter().count(), 0);
    }
}

#[test]
fn test_trace_hooks_run_per_trace() {
    let mut traceset = two_traces();
    let names: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = Arc::clone(&names);
    let mut hooks = PhaseHooks::default();
    hooks.trace.add_fn(Priority::DEFAULT, move |_, trace| {
        sink.lock().unwrap().push(trace.name().to_string());
        false
    });

    traceset.begin(&hooks).unwrap();
    traceset.end(&hooks);
    assert_eq!(
        *names.lock().unwrap(),
        vec!["host_a", "host_b", "host_b", "host_a"]
    );
}

#[test]
fn test_filter_on_tracefile_cpu() {
    let mut traceset = two_traces();
    traceset.set_filter(Some(Filter::parse("tracefile.cpu == 1").unwrap()));
    let count = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&count);
    let mut hooks = PhaseHooks::default();
    hooks.event.add_fn(Priority::DEFAULT, move |_, ctx: &EventContext| {
        assert_eq!(ctx.event.cpu(), 1);
        *sink.lock().unwrap() += 1;
        false
    });

    let read = traceset.process_time_range(&hooks, TraceTime::ZERO, TraceTime::MAX).unwrap();
    assert_eq!(read, 8);
    assert_eq!(*count.lock().unwrap(), 4);
}

#[test]
fn test_open_json_document() {
    let document = json!({
        "events": [
            {"name": "fs_open", "fields": [{"name": "fd", "type": "u32"}]}
        ],
        "tracefiles": [
            {"name": "cpu_0", "cpu": 0, "events": [
                {"timestamp": 100, "name": "fs_open", "fields": {"fd": 3}},
                {"timestamp": 300, "name": "fs_open", "fields": {"fd": 9}}
            ]},
            {"name": "cpu_1", "cpu": 1, "events": [
                {"timestamp": 200, "name": "fs_open", "fields": {"fd": 4}}
            ]}
        ]
    });
    let path = std::env::temp_dir().join(format!("tracekit-replay-{}.json", std::process::id()));
    std::fs::write(&path, document.to_string()).unwrap();

    let mut traceset = Traceset::new(Box::new(MemoryDecoder::new()));
    let trace = traceset.open_trace(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert!(trace.name().starts_with("tracekit-replay-"));
    assert_eq!(trace.time_span().start, ns(100));
    assert_eq!(trace.time_span().end, ns(300));

    let catalog = traceset.decoder().catalog().clone();
    let filter = Filter::parse_with_catalog("event.field.fs_open.fd > 3", catalog).unwrap();
    traceset.set_filter(Some(filter));

    let fds: Arc<Mutex<Vec<u32>>> = Arc::default();
    let sink = Arc::clone(&fds);
    let mut hooks = PhaseHooks::default();
    hooks.event.add_fn(Priority::DEFAULT, move |_, ctx: &EventContext| {
        sink.lock().unwrap().push(ctx.event.read_u32(0).unwrap());
        false
    });
    traceset.process_time_range(&hooks, TraceTime::ZERO, TraceTime::MAX).unwrap();
    assert_eq!(*fds.lock().unwrap(), vec![4, 9]);
}

#[test]
fn test_missing_document_is_reported() {
    let mut traceset = Traceset::new(Box::new(MemoryDecoder::new()));
    let err = traceset.open_trace("/nonexistent/tracekit/trace.json").unwrap_err();
    assert_eq!(err.error_code(), "TRACE_OPEN_FAILED");
    assert_eq!(traceset.number(), 0);
}
