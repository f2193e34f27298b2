// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A K.I.S.S. implementation of a native memory tracker (NMT) core.
//!
//! ##### About
//!
//! This crate tracks what a process has done with its virtual address
//! space — reserved, committed, released — as a function over byte
//! addresses, and attributes every byte to a small-integer *tag* (e.g.
//! `heap`, `gc`, `thread-stack`) plus the call stack that last touched it.
//!
//! The address space is represented as a [`vmatree::VMATree`]: the
//! minimum set of inflection points needed to describe a piecewise-constant
//! state function, stored in a randomized balanced tree ([`treap::Treap`])
//! so that reserving, committing, uncommitting, or releasing any range is
//! `O(log n)` in the number of *distinct* regions, never in the size of
//! the address space itself.
//!
//! A single [`tracker::Tracker`] instance is meant to be created once per
//! process and shared across every thread that reports memory operations;
//! all mutation is serialized by one internal mutex (the "NMT lock", §5 of
//! the design notes), and reporting either takes that same lock briefly
//! (to walk the tree) or reads a snapshot of the running per-tag counters
//! with no lock contention against the mutation path.
//!
//! # Example usage
//!
//! ```
//! use nmt_core::config::TrackerConfig;
//! use nmt_core::callstack::CallStack;
//!
//! let tracker = TrackerConfig::new().build();
//! let heap = tracker.make_tag("heap").expect("tag namespace has room");
//!
//! tracker.reserve(0x1000, 4096, CallStack::empty(), heap);
//! tracker.commit(0x1000, 2048, CallStack::empty());
//!
//! let totals = tracker.snapshot();
//! assert_eq!(totals[&heap].reserved, 4096);
//! assert_eq!(totals[&heap].committed, 2048);
//!
//! tracker.release(0x1000, 4096);
//! assert!(tracker.snapshot().get(&heap).is_none_or(|t| t.reserved == 0));
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

pub mod addr;
pub mod callstack;
pub mod config;
pub mod error;
pub mod region;
pub mod regions_tree;
pub mod report;
pub mod tagtable;
pub mod tracker;
pub mod treap;
pub mod vmatree;

pub use {
    addr::Position,
    config::TrackerConfig,
    error::{Error, Result},
    region::{IntervalChange, IntervalState, RegionData, StateType, Tag},
    report::{DetailRow, ReportSink, ReportWriter, Reporter, SummaryRow, TextReportWriter},
    tracker::{TagTotals, Tracker, TrackerStatus},
    vmatree::{SummaryDiff, TagDelta, VMATree},
};

#[cfg(feature = "json")]
pub use report::JsonReportWriter;
