// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Summary and detail reporting (component C9).
//!
//! The [`Reporter`] reads a [`Tracker`] (taking its NMT lock only for the
//! duration of the read) and produces an intermediate, serialization-free
//! representation (`SummaryRow`/`DetailRow`). A [`ReportWriter`] then
//! renders that representation to any [`std::io::Write`] sink: the
//! line-oriented text format of spec §6, or (behind the `json` feature) a
//! structured JSON form. This split keeps report *generation* (which
//! needs the lock) separate from report *serialization* (which doesn't).

use std::io::Write;

use crate::error::Result;
use crate::region::{StateType, Tag};
use crate::tracker::Tracker;

/// One line of a summary report: a tag's current reserved/committed totals.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub struct SummaryRow {
    /// Tag name, or `"<unnamed>"` if the tracker has no name registered
    /// for it (should not normally happen for a tag with nonzero bytes).
    pub tag_name: String,
    /// Bytes currently `Reserved` or `Committed`.
    pub reserved_bytes: u64,
    /// Bytes currently `Committed`.
    pub committed_bytes: u64,
}

/// One line of a detail report: a maximal run of `(state, tag, stack)`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub struct DetailRow {
    /// Inclusive start address.
    pub base: u64,
    /// Exclusive end address.
    pub end: u64,
    /// `reserved`/`committed`/`released`.
    pub state: &'static str,
    /// Tag name, or `"<unnamed>"` for an untagged `Released` run.
    pub tag_name: String,
    /// Call-stack frames, innermost first; empty for summary-only
    /// trackers or released runs.
    pub frames: Vec<String>,
}

/// Reads a [`Tracker`] and produces report rows.
pub struct Reporter<'a> {
    tracker: &'a Tracker,
}

impl<'a> Reporter<'a> {
    /// Borrows `tracker` for the lifetime of the reporter.
    #[must_use]
    pub fn new(tracker: &'a Tracker) -> Self {
        Self { tracker }
    }

    /// One row per tag with non-zero totals, per spec §6.
    #[must_use]
    pub fn summary(&self) -> Vec<SummaryRow> {
        let snapshot = self.tracker.snapshot();
        snapshot
            .into_iter()
            .filter(|(_, totals)| totals.reserved != 0 || totals.committed != 0)
            .map(|(tag, totals)| SummaryRow {
                tag_name: self.tag_label(tag),
                reserved_bytes: totals.reserved,
                committed_bytes: totals.committed,
            })
            .collect()
    }

    /// In-order detail map, merging adjacent nodes whose `(state, tag,
    /// stack)` triple is equal into a single row (I4 guarantees no two
    /// *consecutive* tree nodes describe equal state, but distinct
    /// interior nodes can still bound runs that look equal at the
    /// reporting granularity when released).
    #[must_use]
    pub fn detail(&self) -> Vec<DetailRow> {
        let mut rows: Vec<DetailRow> = Vec::new();
        let mut prev_key: Option<u64> = None;

        self.tracker.walk(|key, change| {
            if let Some(base) = prev_key {
                self.push_run(&mut rows, base, key, change.in_state);
            }
            prev_key = Some(key);
            true
        });

        rows
    }

    fn push_run(
        &self,
        rows: &mut Vec<DetailRow>,
        base: u64,
        end: u64,
        state: crate::region::IntervalState,
    ) {
        let tag_name = self.tag_label(state.meta.tag);
        let frames = self
            .tracker
            .resolve_stack(state.meta.stack_idx)
            .map(|stack| stack.frames().iter().map(ToString::to_string).collect())
            .unwrap_or_default();

        if let Some(last) = rows.last_mut() {
            if last.end == base && last.state == state.state.as_report_str() && last.tag_name == tag_name && last.frames == frames {
                last.end = end;
                return;
            }
        }

        rows.push(DetailRow {
            base,
            end,
            state: state.state.as_report_str(),
            tag_name,
            frames,
        });
    }

    fn tag_label(&self, tag: Tag) -> String {
        if tag == Tag::NONE {
            "<unnamed>".to_string()
        } else {
            self.tracker.tag_name(tag).unwrap_or_else(|| "<unnamed>".to_string())
        }
    }
}

/// Renders report rows to an [`std::io::Write`] sink. Implemented for the
/// text format (always available) and, behind the `json` feature, for
/// `serde_json`.
pub trait ReportWriter {
    /// Writes the summary report.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `sink` fails.
    fn write_summary(&self, rows: &[SummaryRow], sink: &mut dyn Write) -> Result<()>;

    /// Writes the detail report.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `sink` fails.
    fn write_detail(&self, rows: &[DetailRow], sink: &mut dyn Write) -> Result<()>;
}

/// Line-oriented plain-text renderer, per spec §6's exact format.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextReportWriter;

impl ReportWriter for TextReportWriter {
    fn write_summary(&self, rows: &[SummaryRow], sink: &mut dyn Write) -> Result<()> {
        for row in rows {
            writeln!(
                sink,
                "{}: reserved={}KB committed={}KB",
                row.tag_name,
                row.reserved_bytes / 1024,
                row.committed_bytes / 1024
            )?;
        }
        Ok(())
    }

    fn write_detail(&self, rows: &[DetailRow], sink: &mut dyn Write) -> Result<()> {
        for row in rows {
            let size_kb = (row.end - row.base) / 1024;
            writeln!(
                sink,
                "[{:#x} - {:#x}) {} {} {}KB",
                row.base, row.end, row.state, row.tag_name, size_kb
            )?;
            for frame in &row.frames {
                writeln!(sink, "    {frame}")?;
            }
        }
        Ok(())
    }
}

/// Structured JSON renderer, one array of rows per call.
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReportWriter;

#[cfg(feature = "json")]
impl ReportWriter for JsonReportWriter {
    fn write_summary(&self, rows: &[SummaryRow], sink: &mut dyn Write) -> Result<()> {
        serde_json::to_writer_pretty(sink, rows)?;
        Ok(())
    }

    fn write_detail(&self, rows: &[DetailRow], sink: &mut dyn Write) -> Result<()> {
        serde_json::to_writer_pretty(sink, rows)?;
        Ok(())
    }
}

/// Where a rendered report goes: a convenience wrapper so CLI code doesn't
/// need to juggle `Box<dyn Write>` directly.
pub enum ReportSink<'a> {
    /// Write directly to standard output.
    Stdout,
    /// Write into an in-memory buffer.
    Buffer(&'a mut Vec<u8>),
}

impl ReportSink<'_> {
    /// Runs `writer`'s rendering of `rows` into this sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    pub fn render_summary(&mut self, writer: &dyn ReportWriter, rows: &[SummaryRow]) -> Result<()> {
        match self {
            Self::Stdout => writer.write_summary(rows, &mut std::io::stdout()),
            Self::Buffer(buf) => writer.write_summary(rows, buf),
        }
    }

    /// Runs `writer`'s rendering of `rows` into this sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    pub fn render_detail(&mut self, writer: &dyn ReportWriter, rows: &[DetailRow]) -> Result<()> {
        match self {
            Self::Stdout => writer.write_detail(rows, &mut std::io::stdout()),
            Self::Buffer(buf) => writer.write_detail(rows, buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use test_log::test;

    #[test]
    fn summary_report_omits_zeroed_tags() {
        let tracker = TrackerConfig::default().build();
        let t1 = tracker.make_tag("heap").unwrap();
        let t2 = tracker.make_tag("gc").unwrap();
        tracker.reserve(0, 4096, crate::callstack::CallStack::empty(), t1);
        tracker.reserve(4096, 4096, crate::callstack::CallStack::empty(), t2);
        tracker.release(4096, 4096);

        let rows = Reporter::new(&tracker).summary();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tag_name, "heap");
        assert_eq!(rows[0].reserved_bytes, 4096);
    }

    #[test]
    fn text_summary_matches_expected_format() {
        let tracker = TrackerConfig::default().build();
        let tag = tracker.make_tag("heap").unwrap();
        tracker.reserve(0, 8192, crate::callstack::CallStack::empty(), tag);

        let rows = Reporter::new(&tracker).summary();
        let mut out = Vec::new();
        TextReportWriter.write_summary(&rows, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "heap: reserved=8KB committed=0KB\n");
    }

    #[test]
    fn detail_report_merges_adjacent_released_runs() {
        let tracker = TrackerConfig::default().build();
        let tag = tracker.make_tag("heap").unwrap();
        tracker.reserve(0, 100, crate::callstack::CallStack::empty(), tag);

        let rows = Reporter::new(&tracker).detail();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].base, 0);
        assert_eq!(rows[0].end, 100);
        assert_eq!(rows[0].state, StateType::Reserved.as_report_str());
    }

    #[test]
    fn detail_report_shows_resolved_frames_in_detailed_mode() {
        let tracker = TrackerConfig::default().detailed_mode(true).build();
        let tag = tracker.make_tag("heap").unwrap();
        let stack = crate::callstack::CallStack::new(vec![std::sync::Arc::from("malloc")]);
        tracker.reserve(0, 100, stack, tag);

        let rows = Reporter::new(&tracker).detail();
        assert_eq!(rows[0].frames, vec!["malloc".to_string()]);
    }
}
