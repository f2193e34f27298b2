// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Thin adapter exposing reserve/commit/uncommit/release/set_tag over a
//! [`VMATree`] (component C7).
//!
//! Each operation is exactly one call into [`VMATree::register_mapping`]
//! (or `set_tag`), with the metadata merge discipline of the design notes
//! already baked in: `reserve` and `release` pass `use_tag_inplace = false`,
//! `commit` and `uncommit` pass `true` so the enclosing reservation's tag
//! is inherited rather than overwritten. This module owns no locking of
//! its own; callers (the tracker façade) are expected to serialize access.

use crate::addr::Position;
use crate::callstack::StackIndex;
use crate::region::{RegionData, StateType, Tag};
use crate::vmatree::{SummaryDiff, VMATree};

/// Adapter translating named memory operations into [`VMATree`] mutations.
pub struct RegionsTree {
    tree: VMATree,
}

impl RegionsTree {
    /// Wraps an existing, possibly non-empty, [`VMATree`].
    #[must_use]
    pub fn new(tree: VMATree) -> Self {
        Self { tree }
    }

    /// Number of inflection points currently stored.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.tree.node_count()
    }

    /// Number of mutations dropped by the simulated node allocator.
    #[must_use]
    pub fn dropped_mutations(&self) -> u64 {
        self.tree.dropped_mutations()
    }

    /// Claims `[addr, addr + size)` as `Reserved`, tagged and attributed to
    /// `stack`. A fresh reservation always supplies its own tag: no prior
    /// state is inherited.
    pub fn reserve(&mut self, addr: Position, size: u64, stack: StackIndex, tag: Tag) -> SummaryDiff {
        if size == 0 {
            return SummaryDiff::default();
        }
        self.tree.register_mapping(
            addr,
            addr + size,
            StateType::Reserved,
            RegionData::new(stack, tag),
            false,
        )
    }

    /// Backs `[addr, addr + size)` with physical memory, inheriting the
    /// tag of the enclosing reservation and adopting `stack` as the
    /// capturing call site.
    pub fn commit(&mut self, addr: Position, size: u64, stack: StackIndex) -> SummaryDiff {
        if size == 0 {
            return SummaryDiff::default();
        }
        self.tree.register_mapping(
            addr,
            addr + size,
            StateType::Committed,
            RegionData::new(stack, Tag::NONE),
            true,
        )
    }

    /// Drops physical backing for `[addr, addr + size)`, returning it to
    /// `Reserved` while preserving the enclosing reservation's tag. Per
    /// the design notes' resolution, the stack handle is *not* preserved:
    /// the range now records no capturing call site.
    pub fn uncommit(&mut self, addr: Position, size: u64) -> SummaryDiff {
        if size == 0 {
            return SummaryDiff::default();
        }
        self.tree.register_mapping(
            addr,
            addr + size,
            StateType::Reserved,
            RegionData::new(StackIndex::EMPTY, Tag::NONE),
            true,
        )
    }

    /// Returns `[addr, addr + size)` to `Released`, dropping its tag and
    /// stack handle entirely.
    pub fn release(&mut self, addr: Position, size: u64) -> SummaryDiff {
        if size == 0 {
            return SummaryDiff::default();
        }
        self.tree.register_mapping(addr, addr + size, StateType::Released, RegionData::EMPTY, false)
    }

    /// Rewrites the tag of every `Reserved`/`Committed` sub-interval over
    /// `[addr, addr + size)`, leaving state and stack handles untouched.
    pub fn set_tag(&mut self, addr: Position, size: u64, tag: Tag) -> SummaryDiff {
        if size == 0 {
            return SummaryDiff::default();
        }
        self.tree.set_tag(addr, addr + size, tag)
    }

    /// Walks every node in key order.
    pub fn visit_in_order<F>(&self, f: F)
    where
        F: FnMut(Position, &crate::region::IntervalChange) -> bool,
    {
        self.tree.visit_in_order(f);
    }

    /// Borrows the underlying tree for read-only operations (reporting).
    #[must_use]
    pub fn tree(&self) -> &VMATree {
        &self.tree
    }
}
