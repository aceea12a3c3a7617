//! Filter expressions evaluated against replayed events.

use std::sync::{Arc, Mutex};

use serde_json::json;

use tracekit_core::hooks::Priority;
use tracekit_core::source::{EventLayout, FieldKind, MemoryDecoder, MemoryTraceBuilder};
use tracekit_core::{
    EventContext, ExecutionMode, Filter, FilterContext, PhaseHooks, ProcessState, TraceTime,
    Traceset,
};

fn syscalls() -> Traceset {
    let trace = MemoryTraceBuilder::new("syscalls")
        .layout(
            EventLayout::new("sys_open")
                .field("flags", FieldKind::U32)
                .field("path", FieldKind::String),
        )
        .tracefile("cpu_0", 0)
        .event(0, TraceTime::from_nanos(1), "foo", json!({}))
        .event(0, TraceTime::from_nanos(2), "sys_open", json!({"flags": 2, "path": "/tmp/a"}))
        .event(0, TraceTime::from_nanos(3), "foo", json!({}))
        .event(0, TraceTime::from_nanos(4), "sys_open", json!({"flags": 0, "path": "/etc/b"}))
        .build()
        .unwrap();
    let mut decoder = MemoryDecoder::new();
    let handle = decoder.insert(trace).unwrap();
    let mut traceset = Traceset::new(Box::new(decoder));
    traceset.attach(handle).unwrap();
    traceset
}

/// Replay everything, returning the timestamps the filter admitted
fn admitted(traceset: &mut Traceset) -> Vec<u64> {
    let times: Arc<Mutex<Vec<u64>>> = Arc::default();
    let sink = Arc::clone(&times);
    let mut hooks = PhaseHooks::default();
    hooks.event.add_fn(Priority::DEFAULT, move |_, ctx: &EventContext| {
        sink.lock().unwrap().push(ctx.event.timestamp.as_nanos());
        false
    });
    traceset
        .process_time_range(&hooks, TraceTime::ZERO, TraceTime::MAX)
        .unwrap();
    let times = times.lock().unwrap().clone();
    times
}

fn run_as(traceset: &Traceset, pid: u32) {
    let trace = traceset.get(0).unwrap();
    let mut state = trace.state_mut();
    state.upsert(ProcessState::new(pid, "bash"));
    state.schedule(0, pid);
}

#[test]
fn test_pid_and_event_name() {
    let expression = "pid == 42 && name == \"foo\"";

    let mut traceset = syscalls();
    run_as(&traceset, 42);
    traceset.set_filter(Some(Filter::parse(expression).unwrap()));
    assert_eq!(admitted(&mut traceset), vec![1, 3]);

    let mut traceset = syscalls();
    run_as(&traceset, 43);
    traceset.set_filter(Some(Filter::parse(expression).unwrap()));
    assert!(admitted(&mut traceset).is_empty());
}

#[test]
fn test_no_running_process_fails_closed() {
    let mut traceset = syscalls();
    traceset.set_filter(Some(Filter::parse("pid != 42").unwrap()));
    assert!(admitted(&mut traceset).is_empty());
}

#[test]
fn test_payload_fields_from_decoder_catalog() {
    let mut traceset = syscalls();
    let catalog = traceset.decoder().catalog().clone();
    let filter = Filter::parse_with_catalog(
        "event.field.sys_open.flags != 0 || event.field.sys_open.path == \"/etc/b\"",
        catalog,
    )
    .unwrap();
    traceset.set_filter(Some(filter));
    assert_eq!(admitted(&mut traceset), vec![2, 4]);
}

#[test]
fn test_negated_leaf_without_process_rejects() {
    for expression in ["pid != 42", "!(pid == 42)", "!(pid == 42) ^ name == foo"] {
        let mut traceset = syscalls();
        traceset.set_filter(Some(Filter::parse(expression).unwrap()));
        assert!(admitted(&mut traceset).is_empty(), "{}", expression);
    }

    // a decided event field still carries a disjunction
    let mut traceset = syscalls();
    traceset.set_filter(Some(Filter::parse("!(pid == 42) || name == foo").unwrap()));
    assert_eq!(admitted(&mut traceset), vec![1, 3]);
}

#[test]
fn test_long_conjunction() {
    let chain = |terms: usize| vec!["pid == 42"; terms].join(" && ");

    let mut traceset = syscalls();
    run_as(&traceset, 42);
    traceset.set_filter(Some(Filter::parse(&chain(200)).unwrap()));
    assert_eq!(admitted(&mut traceset), vec![1, 2, 3, 4]);

    let mut filter = Filter::parse("pid == 42").unwrap();
    let err = filter.update(&chain(200_000)).unwrap_err();
    assert_eq!(err.error_code(), "FILTER_SYNTAX");
    assert_eq!(filter.expression(), "pid == 42");
}

#[test]
fn test_negation_and_clone_agree() {
    let mut process = ProcessState::new(7, "sshd");
    process.execution_mode = ExecutionMode::Irq;

    let filter = Filter::parse("!(pid == 7 && execution_mode == irq) ^ process_name == sshd")
        .unwrap();
    let copy = filter.clone();
    let twice = Filter::parse(&format!("!(!({}))", filter.expression())).unwrap();

    let context = FilterContext {
        state: Some(&process),
        ..FilterContext::default()
    };
    let expected = filter.evaluate(&context);
    assert!(expected);
    assert_eq!(copy.evaluate(&context), expected);
    assert_eq!(twice.evaluate(&context), expected);
}

#[test]
fn test_syntax_errors_keep_previous_filter() {
    let mut filter = Filter::parse("pid == 1").unwrap();
    for bad in ["pid == ", "(pid == 1", "pid === 1", "pid ~ 1", "&& pid == 1"] {
        let err = filter.update(bad).unwrap_err();
        assert!(
            matches!(err.error_code(), "FILTER_SYNTAX" | "UNKNOWN_FIELD"),
            "{}: {}",
            bad,
            err
        );
    }
    assert_eq!(filter.expression(), "pid == 1");
}

#[test]
fn test_time_window_via_filter() {
    let mut traceset = syscalls();
    traceset.set_filter(Some(Filter::parse("event.time >= 2ns && event.time < 4ns").unwrap()));
    assert_eq!(admitted(&mut traceset), vec![2, 3]);
}
