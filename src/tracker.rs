// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The process-wide tracker façade (component C8): owns the NMT lock, the
//! call-stack and tag-name tables, and the per-tag summary counters.
//!
//! A single `Tracker` is meant to be created once per process (typically
//! behind a `OnceLock`/`lazy_static` at the call site) and shared across
//! every thread that reports memory operations. All tree mutation is
//! serialized by one [`Mutex`]; reporting either takes the same lock
//! (for `walk`) or reads a lock-free [`Tracker::snapshot`] of the
//! counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::addr::Position;
use crate::callstack::{CallStack, CallStackStorage, StackIndex};
use crate::config::TrackerConfig;
use crate::region::{IntervalChange, Tag};
use crate::regions_tree::RegionsTree;
use crate::tagtable::TagNameTable;
use crate::vmatree::VMATree;

/// Reserved and committed byte totals for one tag, as returned by
/// [`Tracker::snapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagTotals {
    /// Bytes currently `Reserved` or `Committed` under this tag.
    pub reserved: u64,
    /// Bytes currently `Committed` under this tag.
    pub committed: u64,
}

/// Degraded-mode status line (§7): surfaces the allocator-exhaustion and
/// tag-overflow counters without requiring callers to poll logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStatus {
    /// `true` once any mutation has been dropped or any counter clamped.
    pub degraded: bool,
    /// Count of mutations dropped because the node allocator was exhausted.
    pub dropped_mutations: u64,
    /// `true` once the tag namespace has been exhausted at least once.
    pub tag_overflow: bool,
}

struct Locked {
    regions: RegionsTree,
    counters: BTreeMap<Tag, TagTotals>,
    stacks: CallStackStorage,
}

impl Locked {
    /// Folds a `SummaryDiff` into the per-tag counters. Returns `true` if
    /// any counter would have gone negative and was clamped at zero (§7).
    fn apply(&mut self, diff: crate::vmatree::SummaryDiff) -> bool {
        let mut clamped = false;
        for (tag, delta) in diff.iter() {
            let entry = self.counters.entry(tag).or_default();
            let (reserved, r_clamped) = clamp_add(entry.reserved, delta.reserve);
            let (committed, c_clamped) = clamp_add(entry.committed, delta.commit);
            entry.reserved = reserved;
            entry.committed = committed;
            clamped |= r_clamped || c_clamped;
        }
        clamped
    }
}

/// Adds a signed delta to an unsigned counter, clamping at zero instead of
/// underflowing (§7: "clamp the counter at zero and flag the tracker as
/// degraded"), and reporting whether a clamp happened so the caller can
/// flag the tracker. Debug builds assert instead, surfacing the invariant
/// violation immediately during development.
fn clamp_add(counter: u64, delta: i64) -> (u64, bool) {
    let signed = i64::try_from(counter).unwrap_or(i64::MAX) + delta;
    debug_assert!(signed >= 0, "tag counter would go negative");
    if signed < 0 {
        (0, true)
    } else {
        (u64::try_from(signed).unwrap_or(0), false)
    }
}

/// The process-wide native memory tracker.
pub struct Tracker {
    locked: Mutex<Locked>,
    tags: TagNameTable,
    degraded: AtomicBool,
    max_nodes_exhausted: AtomicU64,
    detailed: bool,
    capture_depth: usize,
}

impl Tracker {
    /// Builds a tracker from a [`TrackerConfig`]. Prefer
    /// [`TrackerConfig::build`] over calling this directly.
    #[must_use]
    pub fn new(config: &TrackerConfig) -> Self {
        log::debug!(
            "initializing NMT tracker (detailed_mode={}, max_tags={})",
            config.detailed_mode,
            config.max_tags
        );
        Self {
            locked: Mutex::new(Locked {
                regions: RegionsTree::new(VMATree::new(config.treap_seed, config.max_nodes)),
                counters: BTreeMap::new(),
                stacks: CallStackStorage::new(config.callstack_chunk_size, config.detailed_mode),
            }),
            tags: TagNameTable::new(config.max_tags),
            degraded: AtomicBool::new(false),
            max_nodes_exhausted: AtomicU64::new(0),
            detailed: config.detailed_mode,
            capture_depth: config.capture_depth,
        }
    }

    /// `true` if this tracker retains and dedups call stacks.
    #[must_use]
    pub fn is_detailed(&self) -> bool {
        self.detailed
    }

    /// Maximum number of frames a captured stack retains, per `TrackerConfig::capture_depth`.
    #[must_use]
    pub fn capture_depth(&self) -> usize {
        self.capture_depth
    }

    /// Returns the tag for `name`, registering it on first use. `None` if
    /// the tag namespace is exhausted (§7).
    pub fn make_tag(&self, name: &str) -> Option<Tag> {
        let tag = self.tags.make_tag(name);
        if tag.is_none() {
            self.degraded.store(true, Ordering::Relaxed);
        }
        tag
    }

    /// Resolves a tag back to its registered name.
    #[must_use]
    pub fn tag_name(&self, tag: Tag) -> Option<String> {
        self.tags.get(tag)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Locked> {
        self.locked.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn note_drop(&self, dropped_before: u64, dropped_after: u64) {
        if dropped_after > dropped_before {
            self.max_nodes_exhausted.fetch_add(dropped_after - dropped_before, Ordering::Relaxed);
            self.degraded.store(true, Ordering::Relaxed);
        }
    }

    fn note_clamp(&self, clamped: bool) {
        if clamped {
            log::warn!("tag counter underflowed and was clamped at zero");
            self.degraded.store(true, Ordering::Relaxed);
        }
    }

    /// Records a reservation of `[addr, addr + size)` tagged `tag`,
    /// capturing `stack` if this tracker is in detailed mode.
    pub fn reserve(&self, addr: Position, size: u64, stack: CallStack, tag: Tag) {
        let mut locked = self.lock();
        let idx = locked.stacks.push(stack);
        let before = locked.regions.dropped_mutations();
        let diff = locked.regions.reserve(addr, size, idx, tag);
        let after = locked.regions.dropped_mutations();
        let clamped = locked.apply(diff);
        drop(locked);
        self.note_drop(before, after);
        self.note_clamp(clamped);
    }

    /// Records that `[addr, addr + size)` now has physical backing.
    pub fn commit(&self, addr: Position, size: u64, stack: CallStack) {
        let mut locked = self.lock();
        let idx = locked.stacks.push(stack);
        let before = locked.regions.dropped_mutations();
        let diff = locked.regions.commit(addr, size, idx);
        let after = locked.regions.dropped_mutations();
        let clamped = locked.apply(diff);
        drop(locked);
        self.note_drop(before, after);
        self.note_clamp(clamped);
    }

    /// Records that `[addr, addr + size)` no longer has physical backing.
    pub fn uncommit(&self, addr: Position, size: u64) {
        let mut locked = self.lock();
        let before = locked.regions.dropped_mutations();
        let diff = locked.regions.uncommit(addr, size);
        let after = locked.regions.dropped_mutations();
        let clamped = locked.apply(diff);
        drop(locked);
        self.note_drop(before, after);
        self.note_clamp(clamped);
    }

    /// Records that `[addr, addr + size)` is no longer reserved.
    pub fn release(&self, addr: Position, size: u64) {
        let mut locked = self.lock();
        let before = locked.regions.dropped_mutations();
        let diff = locked.regions.release(addr, size);
        let after = locked.regions.dropped_mutations();
        let clamped = locked.apply(diff);
        drop(locked);
        self.note_drop(before, after);
        self.note_clamp(clamped);
    }

    /// Rewrites the tag of `[addr, addr + size)` to `tag`.
    pub fn set_tag(&self, addr: Position, size: u64, tag: Tag) {
        let mut locked = self.lock();
        let before = locked.regions.dropped_mutations();
        let diff = locked.regions.set_tag(addr, size, tag);
        let after = locked.regions.dropped_mutations();
        let clamped = locked.apply(diff);
        drop(locked);
        self.note_drop(before, after);
        self.note_clamp(clamped);
    }

    /// A consistent copy of per-tag reserved/committed totals.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<Tag, TagTotals> {
        self.lock().counters.clone()
    }

    /// In-order visitor over every tree node, under the NMT lock.
    pub fn walk<F>(&self, f: F)
    where
        F: FnMut(Position, &IntervalChange) -> bool,
    {
        self.lock().regions.visit_in_order(f);
    }

    /// Resolves a call-stack handle to its frames. `None` in summary-only
    /// mode or for a handle from a different tracker instance.
    #[must_use]
    pub fn resolve_stack(&self, idx: StackIndex) -> Option<std::sync::Arc<CallStack>> {
        self.lock().stacks.get(idx)
    }

    /// The current degraded-mode status line (§7).
    #[must_use]
    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            degraded: self.degraded.load(Ordering::Relaxed),
            dropped_mutations: self.max_nodes_exhausted.load(Ordering::Relaxed),
            tag_overflow: self.tags.has_overflowed(),
        }
    }
}
