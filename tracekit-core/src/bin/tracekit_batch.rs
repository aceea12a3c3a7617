//! tracekit batch driver - replay traces and summarize their events
//!
//! Opens every trace document given on the command line into one traceset,
//! replays it in chunks and reports how many events of each name the filter
//! admitted.
//!
//! Usage:
//!     tracekit-batch traces/*.json
//!     tracekit-batch --filter 'pid == 42 && name == "sys_open"' run.json
//!     tracekit-batch --start 1.5 --end 2 --dump run.json
//!     tracekit-batch --json --config engine.json run.json

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tracekit_core::source::MemoryDecoder;
use tracekit_core::{
    EngineConfig, EventContext, Filter, PhaseHooks, Result, TraceError, TraceTime, Traceset,
};

#[derive(Parser, Debug)]
#[command(name = "tracekit-batch")]
#[command(about = "Replay traces and summarize their events")]
#[command(version)]
struct Args {
    /// Trace documents or glob patterns
    #[arg(required = true)]
    traces: Vec<String>,

    /// Filter expression applied before counting
    #[arg(short, long)]
    filter: Option<String>,

    /// Replay from this time (seconds, `sec.frac` or `<n>ns`)
    #[arg(long)]
    start: Option<TraceTime>,

    /// Stop before this time
    #[arg(long)]
    end: Option<TraceTime>,

    /// Stop after this many events
    #[arg(long)]
    max_events: Option<usize>,

    /// Engine configuration JSON file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print one line per admitted event
    #[arg(long)]
    dump: bool,

    /// Output the summary (and dumped events) as JSON
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Summary {
    traceset: String,
    traces: Vec<String>,
    start: String,
    end: String,
    duration_secs: f64,
    events_read: usize,
    events_admitted: u64,
    by_name: BTreeMap<String, u64>,
}

#[derive(Serialize)]
struct DumpLine<'a> {
    time: String,
    trace: &'a str,
    tracefile: &'a str,
    cpu: u32,
    name: &'a str,
    pid: Option<u32>,
}

fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose { "tracekit=debug" } else { "tracekit=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(&args) {
        if args.json {
            match serde_json::to_string_pretty(&e.to_error_response()) {
                Ok(json) => println!("{}", json),
                Err(_) => eprintln!("Error: {}", e),
            }
        } else {
            eprintln!("Error [{}]: {}", e.error_code(), e);
        }
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    let mut traceset = Traceset::with_config(Box::new(MemoryDecoder::new()), config)?;
    for path in expand_paths(&args.traces)? {
        let trace = traceset.open_trace(&path)?;
        info!(path = %path.display(), trace = trace.name(), "Opened trace");
    }

    if let Some(expression) = &args.filter {
        let catalog = traceset.decoder().catalog().clone();
        traceset.set_filter(Some(Filter::parse_with_catalog(expression, catalog)?));
    }

    let counts: Arc<Mutex<BTreeMap<String, u64>>> = Arc::default();
    let hooks = counting_hooks(&traceset, Arc::clone(&counts), args.dump, args.json);

    let span = traceset.time_span();
    let start = args.start.unwrap_or(span.start);
    let end = args.end.unwrap_or(TraceTime::MAX);

    traceset.begin(&hooks)?;
    let replayed = replay(&mut traceset, start, end, args.max_events);
    traceset.end(&hooks);
    let events_read = replayed?;

    let by_name = counts
        .lock()
        .map(|c| c.clone())
        .map_err(|_| TraceError::InternalError {
            reason: "event counter lock poisoned".to_string(),
        })?;
    let shown_end = if end == TraceTime::MAX { span.end } else { end };
    let summary = Summary {
        traceset: traceset.name().to_string(),
        traces: traceset.traces().iter().map(|t| t.name().to_string()).collect(),
        start: start.to_string(),
        end: shown_end.to_string(),
        duration_secs: (shown_end.as_secs_f64() - start.as_secs_f64()).max(0.0),
        events_read,
        events_admitted: by_name.values().sum(),
        by_name,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

/// Expand glob patterns; plain paths pass through untouched
fn expand_paths(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        if !pattern.contains(|c: char| matches!(c, '*' | '?' | '[')) {
            paths.push(PathBuf::from(pattern));
            continue;
        }
        let matches = glob::glob(pattern).map_err(|e| TraceError::TraceOpenFailed {
            path: pattern.clone(),
            reason: e.to_string(),
        })?;
        let before = paths.len();
        for entry in matches {
            paths.push(entry.map_err(|e| TraceError::IoError {
                message: e.to_string(),
            })?);
        }
        if paths.len() == before {
            return Err(TraceError::TraceOpenFailed {
                path: pattern.clone(),
                reason: "pattern matched no files".to_string(),
            });
        }
        debug!(pattern = %pattern, matched = paths.len() - before, "Expanded trace pattern");
    }
    Ok(paths)
}

fn counting_hooks(
    traceset: &Traceset,
    counts: Arc<Mutex<BTreeMap<String, u64>>>,
    dump: bool,
    json: bool,
) -> PhaseHooks {
    let mut hooks = PhaseHooks::default();
    hooks
        .event
        .add_fn(traceset.config().default_priority, move |_, ctx: &EventContext| {
            if let Ok(mut counts) = counts.lock() {
                *counts.entry(ctx.event.name.to_string()).or_default() += 1;
            }
            if dump {
                print_event(ctx, json);
            }
            false
        });
    hooks
}

fn print_event(ctx: &EventContext, json: bool) {
    let line = DumpLine {
        time: ctx.event.timestamp.to_string(),
        trace: ctx.trace.name(),
        tracefile: &ctx.event.tracefile.name,
        cpu: ctx.event.cpu(),
        name: &ctx.event.name,
        pid: ctx.process.as_ref().map(|p| p.pid),
    };
    if json {
        if let Ok(text) = serde_json::to_string(&line) {
            println!("{}", text);
        }
    } else {
        let pid = line.pid.map_or_else(|| "-".to_string(), |p| p.to_string());
        println!(
            "{} {}/{} cpu={} pid={} {}",
            line.time, line.trace, line.tracefile, line.cpu, pid, line.name
        );
    }
}

/// Chunked replay over `[start, end)`, bounded by `max_events` if given
fn replay(
    traceset: &mut Traceset,
    start: TraceTime,
    end: TraceTime,
    max_events: Option<usize>,
) -> Result<usize> {
    traceset.seek_by_time(start)?;
    let chunk = traceset.config().replay_chunk_events;
    let mut total = 0usize;
    loop {
        let budget = match max_events {
            Some(max) if total >= max => break,
            Some(max) => chunk.min(max - total),
            None => chunk,
        };
        let read = traceset.middle(end, Some(budget), None)?;
        total += read;
        if read < budget {
            break;
        }
    }
    Ok(total)
}

fn print_summary(summary: &Summary) {
    println!("Traceset: {}", summary.traceset);
    for trace in &summary.traces {
        println!("  trace {}", trace);
    }
    println!(
        "Window: {} .. {} ({:.6}s)",
        summary.start, summary.end, summary.duration_secs
    );
    println!(
        "Events: {} read, {} admitted",
        summary.events_read, summary.events_admitted
    );
    println!();

    let mut names: Vec<_> = summary.by_name.iter().collect();
    names.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (name, count) in names {
        println!("  {:>10}  {}", count, name);
    }
}
