// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! CLI tool for inspecting and replaying native memory tracker traces.

use clap::{ArgAction, Parser, Subcommand};
use nmt_core::callstack::CallStack;
use nmt_core::config::TrackerConfig;
use nmt_core::report::{Reporter, TextReportWriter};
use nmt_core::{ReportSink, ReportWriter, Tag, Tracker};
use std::io::{self, BufRead};
use std::path::PathBuf;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    prelude::*,
    registry::Registry,
};

macro_rules! die {
    ($fmt:literal, $($arg:tt)*) => {{
        eprintln!($fmt, $($arg)*);
        std::process::exit(1);
    }};

    ($msg:literal) => {{
        eprintln!($msg);
        std::process::exit(1);
    }};
}

#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

/// Bridges the `log` crate (used inside `nmt_core`) through to a `tracing`
/// subscriber, mirroring how library-internal logging is wired up for the
/// CLI binary without requiring the library itself to depend on `tracing`.
pub fn init_tracing(quiet: bool, verbose: u8) -> LevelFilter {
    let level_filter = if quiet {
        LevelFilter::ERROR
    } else {
        match verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };

    tracing_log::LogTracer::init().expect("Failed to set log tracer");

    let registry = Registry::default();

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("NMT_LOG")
        .from_env_lossy();

    let subscriber = registry.with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .compact(),
    );

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        die!("INTERNAL ERROR: setting default tracing::subscriber failed");
    }

    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing_panic::panic_hook(info);
        prev_hook(info); // daisy-chain to old panic hook
    }));

    level_filter
}

/// CLI tool for native memory tracker traces
#[derive(Parser, Debug)]
#[command(name = "nmt")]
#[command(about = "CLI tool for inspecting and replaying native memory tracker traces")]
struct ToolArgs {
    /// Suppress all output except for errors. This overrides the -v flag.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Turn on verbose output. Supply -v multiple times to increase verbosity.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Retain and resolve call stacks (costs a CallStackStorage chunk per
    /// distinct stack). Off by default, matching the tracker's own default.
    #[arg(short, long, default_value_t = false)]
    detailed: bool,

    /// Render reports as JSON instead of the default line-oriented text.
    #[cfg(feature = "json")]
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Command to run
    #[command(subcommand)]
    command: ToolCommand,
}

#[derive(Subcommand, Debug, Clone)]
enum ToolCommand {
    /// Replay an operation trace from a file (or stdin) and print the
    /// per-tag summary report.
    Summary {
        /// Path to the operation trace; reads stdin if omitted.
        path: Option<PathBuf>,
    },
    /// Replay an operation trace and print the in-order detail map.
    Detail {
        /// Path to the operation trace; reads stdin if omitted.
        path: Option<PathBuf>,
    },
    /// Replay an operation trace, printing both reports and the final
    /// degraded-mode status line.
    Replay {
        /// Path to the operation trace; reads stdin if omitted.
        path: Option<PathBuf>,
    },
}

/// One line of a recorded operation trace.
///
/// ```text
/// reserve <addr> <size> <tag>
/// commit <addr> <size>
/// uncommit <addr> <size>
/// release <addr> <size>
/// set_tag <addr> <size> <tag>
/// ```
///
/// Addresses and sizes are hex (`0x...`) or decimal; `#` lines and blank
/// lines are ignored.
fn parse_number(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn replay_line(tracker: &Tracker, line: &str) {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return;
    }
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((op, args)) = parts.split_first() else {
        return;
    };

    let tag_for = |tracker: &Tracker, name: &str| -> Tag {
        tracker.make_tag(name).unwrap_or(Tag::NONE)
    };

    match (*op, args) {
        ("reserve", [addr, size, tag]) => {
            let (Some(addr), Some(size)) = (parse_number(addr), parse_number(size)) else {
                die!("malformed reserve line: {line}");
            };
            tracker.reserve(addr, size, CallStack::empty(), tag_for(tracker, tag));
        }
        ("commit", [addr, size]) => {
            let (Some(addr), Some(size)) = (parse_number(addr), parse_number(size)) else {
                die!("malformed commit line: {line}");
            };
            tracker.commit(addr, size, CallStack::empty());
        }
        ("uncommit", [addr, size]) => {
            let (Some(addr), Some(size)) = (parse_number(addr), parse_number(size)) else {
                die!("malformed uncommit line: {line}");
            };
            tracker.uncommit(addr, size);
        }
        ("release", [addr, size]) => {
            let (Some(addr), Some(size)) = (parse_number(addr), parse_number(size)) else {
                die!("malformed release line: {line}");
            };
            tracker.release(addr, size);
        }
        ("set_tag", [addr, size, tag]) => {
            let (Some(addr), Some(size)) = (parse_number(addr), parse_number(size)) else {
                die!("malformed set_tag line: {line}");
            };
            tracker.set_tag(addr, size, tag_for(tracker, tag));
        }
        _ => die!("unrecognized trace line: {line}"),
    }
}

fn replay(tracker: &Tracker, path: &Option<PathBuf>) {
    match path {
        Some(path) => {
            let file = std::fs::File::open(path).unwrap_or_else(|e| die!("opening {path:?}: {e}"));
            for line in io::BufReader::new(file).lines() {
                let line = line.unwrap_or_else(|e| die!("reading {path:?}: {e}"));
                replay_line(tracker, &line);
            }
        }
        None => {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = line.unwrap_or_else(|e| die!("reading stdin: {e}"));
                replay_line(tracker, &line);
            }
        }
    }
}

#[cfg(feature = "json")]
fn writer(json: bool) -> Box<dyn ReportWriter> {
    if json {
        Box::new(nmt_core::JsonReportWriter)
    } else {
        Box::new(TextReportWriter)
    }
}

#[cfg(not(feature = "json"))]
fn writer(_json: bool) -> Box<dyn ReportWriter> {
    Box::new(TextReportWriter)
}

fn print_summary(tracker: &Tracker, json: bool) {
    let rows = Reporter::new(tracker).summary();
    ReportSink::Stdout
        .render_summary(writer(json).as_ref(), &rows)
        .unwrap_or_else(|e| die!("rendering summary: {e}"));
}

fn print_detail(tracker: &Tracker, json: bool) {
    let rows = Reporter::new(tracker).detail();
    ReportSink::Stdout
        .render_detail(writer(json).as_ref(), &rows)
        .unwrap_or_else(|e| die!("rendering detail: {e}"));
}

fn main() {
    let args = ToolArgs::parse();
    init_tracing(args.quiet, args.verbose);

    #[cfg(feature = "json")]
    let json = args.json;
    #[cfg(not(feature = "json"))]
    let json = false;

    let tracker = TrackerConfig::new().detailed_mode(args.detailed).build();

    match &args.command {
        ToolCommand::Summary { path } => {
            replay(&tracker, path);
            print_summary(&tracker, json);
        }
        ToolCommand::Detail { path } => {
            replay(&tracker, path);
            print_detail(&tracker, json);
        }
        ToolCommand::Replay { path } => {
            replay(&tracker, path);
            print_summary(&tracker, json);
            print_detail(&tracker, json);
            let status = tracker.status();
            if status.degraded {
                eprintln!(
                    "NMT degraded: {} mutation(s) dropped, tag_overflow={}",
                    status.dropped_mutations, status.tag_overflow
                );
            }
        }
    }
}
