// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Per-interval payload: state, tag, and call-stack handle (component C5).

use crate::callstack::StackIndex;

/// What the process has done with a byte range.
///
/// `Released` is the identity element: it is the state of every byte the
/// tracker has never heard about, and carries no metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(test, derive(strum::EnumIter))]
pub enum StateType {
    /// Neither reserved nor committed.
    Released,
    /// The process has claimed the range but not backed it with memory.
    Reserved,
    /// Physical backing is promised for the range.
    Committed,
}

impl StateType {
    /// Renders the literal used in detail reports (`reserved`, `committed`, `released`).
    #[must_use]
    pub fn as_report_str(self) -> &'static str {
        match self {
            Self::Released => "released",
            Self::Reserved => "reserved",
            Self::Committed => "committed",
        }
    }
}

impl std::fmt::Display for StateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_report_str())
    }
}

/// A small-integer memory category, drawn from a bounded universe.
///
/// `Tag::NONE` is the sentinel reserved for "no category" and is the only
/// tag legal on a [`StateType::Released`] interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub(crate) u16);

impl Tag {
    /// Sentinel denoting "no category". Legal only on `Released` ranges.
    pub const NONE: Self = Self(0);

    /// Builds a tag from its raw numeric value.
    ///
    /// Most callers should go through `TagNameTable::make_tag` instead so
    /// that the tag has a name attached; this is exposed directly for
    /// tests and callers that already track names out-of-band.
    #[must_use]
    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// The raw numeric value, e.g. for indexing a counters table.
    #[must_use]
    pub fn raw(self) -> u16 {
        self.0
    }

    /// `true` for every tag except the `None` sentinel.
    #[must_use]
    pub fn is_some(self) -> bool {
        self != Self::NONE
    }
}

impl Default for Tag {
    fn default() -> Self {
        Self::NONE
    }
}

/// Tag plus call-stack handle: the metadata stored with an interval.
///
/// For any `Released` interval the tag must be [`Tag::NONE`] and the stack
/// handle must be [`StackIndex::EMPTY`] (invariant I5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionData {
    /// Handle into `CallStackStorage` identifying the capturing call site.
    pub stack_idx: StackIndex,
    /// Memory category.
    pub tag: Tag,
}

impl RegionData {
    /// The sentinel metadata legal on `Released` intervals.
    pub const EMPTY: Self = Self {
        stack_idx: StackIndex::EMPTY,
        tag: Tag::NONE,
    };

    /// Builds metadata for a live (`Reserved`/`Committed`) interval.
    #[must_use]
    pub fn new(stack_idx: StackIndex, tag: Tag) -> Self {
        Self { stack_idx, tag }
    }
}

impl Default for RegionData {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// `{StateType, RegionData}`. Two states are equivalent iff both fields match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalState {
    /// What the range currently is.
    pub state: StateType,
    /// Who it belongs to.
    pub meta: RegionData,
}

impl IntervalState {
    /// The state of virtual memory the tracker has never heard about.
    pub const RELEASED: Self = Self {
        state: StateType::Released,
        meta: RegionData::EMPTY,
    };

    #[must_use]
    pub fn new(state: StateType, meta: RegionData) -> Self {
        debug_assert!(
            state != StateType::Released || meta == RegionData::EMPTY,
            "Released intervals must carry only sentinel metadata (I5)"
        );
        Self { state, meta }
    }
}

impl Default for IntervalState {
    fn default() -> Self {
        Self::RELEASED
    }
}

/// The `(in, out)` pair stored at a tree node: the state of the interval
/// ending at the node's key, and the state of the interval starting there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalChange {
    /// State of `[prev_key, key)`.
    pub in_state: IntervalState,
    /// State of `[key, next_key)`.
    pub out_state: IntervalState,
}

impl IntervalChange {
    #[must_use]
    pub fn new(in_state: IntervalState, out_state: IntervalState) -> Self {
        Self {
            in_state,
            out_state,
        }
    }

    /// `true` iff `in == out`, i.e. this node records no inflection (I4
    /// forbids such nodes from existing in a normalized tree).
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.in_state == self.out_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;
    use test_log::test;

    #[test]
    fn every_state_has_a_distinct_report_literal() {
        let literals: Vec<_> = StateType::iter().map(StateType::as_report_str).collect();
        assert_eq!(literals, vec!["released", "reserved", "committed"]);
    }

    #[test]
    fn only_released_accepts_sentinel_metadata_by_construction() {
        for state in StateType::iter() {
            if state == StateType::Released {
                let _ = IntervalState::new(state, RegionData::EMPTY);
            } else {
                let meta = RegionData::new(StackIndex::EMPTY, Tag::from_raw(1));
                let _ = IntervalState::new(state, meta);
            }
        }
    }
}
