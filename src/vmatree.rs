// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The interval map over virtual address space (component C6, the
//! central piece of this crate).
//!
//! A [`VMATree`] stores the minimum set of inflection points needed to
//! describe, as a piecewise-constant function, the current state
//! (`Released`/`Reserved`/`Committed`) of every byte of address space
//! (invariants I1-I5 in the design doc). Its one mutating operation,
//! [`VMATree::register_mapping`], sets `[A, B)` to a new state/metadata,
//! renormalizes the surrounding nodes, and returns the signed per-tag
//! change in reserved/committed bytes so a caller can fold it into running
//! counters without ever re-walking the tree.

use rustc_hash::FxHashMap;

use crate::addr::Position;
use crate::region::{IntervalChange, IntervalState, RegionData, StateType, Tag};
use crate::treap::Treap;

/// Signed change in reserved/committed bytes for one tag, produced by a
/// single `register_mapping` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagDelta {
    /// Signed change in reserved bytes.
    pub reserve: i64,
    /// Signed change in committed bytes.
    pub commit: i64,
}

/// Per-tag signed change in reserved/committed bytes produced by one
/// [`VMATree::register_mapping`] call. The sum over all tags equals the
/// net change in the affected range.
#[derive(Debug, Clone, Default)]
pub struct SummaryDiff {
    tags: FxHashMap<Tag, TagDelta>,
}

impl SummaryDiff {
    fn entry(&mut self, tag: Tag) -> &mut TagDelta {
        self.tags.entry(tag).or_default()
    }

    fn add_removed(&mut self, old: IntervalState, len: u64) {
        if len == 0 {
            return;
        }
        #[allow(clippy::cast_possible_wrap)]
        let len = len as i64;
        if matches!(old.state, StateType::Reserved | StateType::Committed) {
            self.entry(old.meta.tag).reserve -= len;
        }
        if old.state == StateType::Committed {
            self.entry(old.meta.tag).commit -= len;
        }
    }

    fn add_inserted(&mut self, new: IntervalState, len: u64) {
        if len == 0 {
            return;
        }
        #[allow(clippy::cast_possible_wrap)]
        let len = len as i64;
        if matches!(new.state, StateType::Reserved | StateType::Committed) {
            self.entry(new.meta.tag).reserve += len;
        }
        if new.state == StateType::Committed {
            self.entry(new.meta.tag).commit += len;
        }
    }

    /// Folds `other`'s per-tag deltas into `self`.
    pub fn merge(&mut self, other: SummaryDiff) {
        for (tag, delta) in other.tags {
            let e = self.entry(tag);
            e.reserve += delta.reserve;
            e.commit += delta.commit;
        }
    }

    /// Iterates over non-zero per-tag deltas.
    pub fn iter(&self) -> impl Iterator<Item = (Tag, TagDelta)> + '_ {
        self.tags.iter().map(|(t, d)| (*t, *d))
    }

    /// `true` if every tag's delta is zero (or there are no tags at all).
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.tags.values().all(|d| d.reserve == 0 && d.commit == 0)
    }
}

/// What to do with the node at one of the two mutation boundaries (`A` or
/// `B`) once the splice plan has been computed.
enum Write {
    /// The position already matches the surrounding state; nothing to do.
    Skip,
    /// Remove the key (it existed before and is now a no-op).
    Delete,
    /// Write this value at the key (fresh insert or overwrite).
    Put(IntervalChange),
}

/// The interval map over the tracked process's virtual address space.
pub struct VMATree {
    tree: Treap<Position, IntervalChange>,
    /// Caps total node count, modeling the "node allocator returns nil"
    /// failure mode of §7. `None` means unbounded.
    max_nodes: Option<usize>,
    /// Count of mutations dropped because `max_nodes` was reached.
    dropped_mutations: u64,
}

impl VMATree {
    /// Creates an empty tree. `seed` drives the underlying treap's
    /// priority RNG. `max_nodes` models a bounded node allocator; `None`
    /// leaves it unbounded.
    #[must_use]
    pub fn new(seed: u64, max_nodes: Option<usize>) -> Self {
        Self {
            tree: Treap::new(seed),
            max_nodes,
            dropped_mutations: 0,
        }
    }

    /// Number of inflection points currently stored.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.tree.len()
    }

    /// Number of mutations dropped due to a simulated allocation failure.
    #[must_use]
    pub fn dropped_mutations(&self) -> u64 {
        self.dropped_mutations
    }

    /// The state function's value at `pos`: the state of the interval that
    /// covers it, or `Released` if no node covers it.
    #[must_use]
    pub fn state_at(&self, pos: Position) -> IntervalState {
        match self.tree.find_le(&pos) {
            None => IntervalState::RELEASED,
            Some((_, v)) => v.out_state,
        }
    }

    /// The run of uniform state starting at (or containing) `pos`, capped
    /// at `limit`: `(state, run_end)` where `run_end <= limit` is either
    /// the next inflection point or `limit` itself.
    fn run_covering(&self, pos: Position, limit: Position) -> (IntervalState, Position) {
        let state = self.state_at(pos);
        let end = match self.tree.find_gt(&pos) {
            Some((k, _)) if *k < limit => *k,
            _ => limit,
        };
        (state, end)
    }

    /// Sets `[a, b)` to `target_state` with `meta`, renormalizing the
    /// surrounding nodes so invariants I1-I5 hold, and returns the signed
    /// per-tag change in reserved/committed bytes.
    ///
    /// `use_tag_inplace` selects the metadata merge discipline (§4.4.2):
    /// when `true`, the tag of the range's prior enclosing state (read
    /// before any mutation) overrides `meta.tag`; `meta.stack_idx` is
    /// always honored as given. Callers pass `true` for commit and
    /// uncommit (inherit the reservation's tag), `false` for reserve,
    /// release, and set_tag's own internal rewrite calls. When
    /// `target_state` is `Released`, `meta` and `use_tag_inplace` are both
    /// ignored and the sentinel `RegionData::EMPTY` is stored instead (I5
    /// forbids any other metadata on a `Released` interval).
    ///
    /// `A == B` is defined as a no-op (§4.4.5); `A > B` is a caller error
    /// and is not checked here.
    pub fn register_mapping(
        &mut self,
        a: Position,
        b: Position,
        target_state: StateType,
        meta: RegionData,
        use_tag_inplace: bool,
    ) -> SummaryDiff {
        if a == b {
            return SummaryDiff::default();
        }

        let l = self.tree.find_le(&a).map(|(k, v)| (*k, *v));

        // The state prevailing over the range about to be mutated, read
        // before any mutation: the tag to inherit under
        // `use_tag_inplace`, and the seed for the sweep's running "old
        // state" / the default for `stB.out` if the sweep finds nothing.
        let mut continuation = match l {
            None => IntervalState::RELEASED,
            Some((_, lv)) => lv.out_state,
        };

        // I5: a Released interval carries only the sentinel metadata,
        // regardless of what the caller passed in `meta` or what
        // `use_tag_inplace` would otherwise inherit.
        let final_meta = if target_state == StateType::Released {
            RegionData::EMPTY
        } else if use_tag_inplace {
            RegionData::new(meta.stack_idx, continuation.meta.tag)
        } else {
            meta
        };
        let target = IntervalState::new(target_state, final_meta);

        // ---- Step A: splice at `a` ----
        let a_in_state = match l {
            None => IntervalState::RELEASED,
            Some((lk, lv)) => {
                if lk == a {
                    lv.in_state
                } else {
                    lv.out_state
                }
            }
        };

        let a_existed = matches!(l, Some((lk, _)) if lk == a);
        let st_a = IntervalChange::new(a_in_state, target);
        let a_write = if st_a.is_noop() {
            if a_existed {
                Write::Delete
            } else {
                Write::Skip
            }
        } else {
            Write::Put(st_a)
        };

        // ---- Step B: sweep (a, b] ----
        let mut removals = Vec::new();
        let mut diff = SummaryDiff::default();
        let mut prev = a;
        let mut cursor = self.tree.find_gt(&a).map(|(k, v)| (*k, *v));
        let mut st_b_out = continuation;
        let mut b_existed = false;

        loop {
            match cursor {
                None => break,
                Some((k, v)) if k > b => {
                    st_b_out = v.in_state;
                    break;
                }
                Some((k, v)) if k < b => {
                    diff.add_removed(continuation, k - prev);
                    removals.push(k);
                    prev = k;
                    continuation = v.out_state;
                    cursor = self.tree.find_gt(&k).map(|(k2, v2)| (*k2, *v2));
                }
                Some((_, v)) => {
                    // k == b
                    st_b_out = v.out_state;
                    b_existed = true;
                    break;
                }
            }
        }

        diff.add_removed(continuation, b - prev);

        let st_b = IntervalChange::new(target, st_b_out);
        let b_write = if st_b.is_noop() {
            if b_existed {
                Write::Delete
            } else {
                Write::Skip
            }
        } else {
            Write::Put(st_b)
        };

        // ---- Allocation budget check (§7: node allocator may return nil) ----
        if let Some(cap) = self.max_nodes {
            let mut projected = self.tree.len() - removals.len();
            if matches!(a_write, Write::Put(_)) && !a_existed {
                projected += 1;
            }
            if matches!(a_write, Write::Delete) {
                projected -= 1;
            }
            if matches!(b_write, Write::Put(_)) && !b_existed {
                projected += 1;
            }
            if matches!(b_write, Write::Delete) {
                projected -= 1;
            }
            if projected > cap {
                self.dropped_mutations += 1;
                log::warn!(
                    "NMT node allocator exhausted (cap={cap}); dropping mutation [{a:#x}, {b:#x})"
                );
                return SummaryDiff::default();
            }
        }

        // ---- Commit the plan ----
        for k in removals {
            self.tree.remove(&k);
        }
        match a_write {
            Write::Skip => {}
            Write::Delete => {
                self.tree.remove(&a);
            }
            Write::Put(v) => {
                self.tree.insert(a, v);
            }
        }
        match b_write {
            Write::Skip => {}
            Write::Delete => {
                self.tree.remove(&b);
            }
            Write::Put(v) => {
                self.tree.insert(b, v);
            }
        }

        diff.add_inserted(target, b - a);
        diff
    }

    /// Rewrites the tag of every non-`Released` sub-interval overlapping
    /// `[p, q)` to `new_tag`, leaving state and stack handles untouched
    /// (§4.4.2's `set_tag` discipline). Released gaps within the range are
    /// left alone (I5 forbids a non-`None` tag there). Crosses multiple
    /// enclosing reservations by rewriting each uniform-state run in turn.
    pub fn set_tag(&mut self, p: Position, q: Position, new_tag: Tag) -> SummaryDiff {
        if p >= q {
            return SummaryDiff::default();
        }

        let mut diff = SummaryDiff::default();
        let mut cursor = p;
        while cursor < q {
            let (state, run_end) = self.run_covering(cursor, q);
            if state.state != StateType::Released && state.meta.tag != new_tag {
                let sub = self.register_mapping(
                    cursor,
                    run_end,
                    state.state,
                    RegionData::new(state.meta.stack_idx, new_tag),
                    false,
                );
                diff.merge(sub);
            }
            cursor = run_end;
        }
        diff
    }

    /// Walks every node in key order.
    pub fn visit_in_order<F>(&self, f: F)
    where
        F: FnMut(Position, &IntervalChange) -> bool,
    {
        let mut f = f;
        self.tree.visit_in_order(|k, v| f(*k, v));
    }

    /// Walks nodes with `from <= key < to`.
    pub fn visit_range_in_order<F>(&self, from: Position, to: Position, f: F)
    where
        F: FnMut(Position, &IntervalChange) -> bool,
    {
        let mut f = f;
        self.tree.visit_range_in_order(&from, &to, |k, v| f(*k, v));
    }

    /// The node pair `(find_le(p), successor)` sandwiching `p`, used by
    /// `set_tag` to locate the reservation enclosing a position.
    #[must_use]
    pub fn find_enclosing_range(
        &self,
        p: Position,
    ) -> (
        Option<(Position, IntervalChange)>,
        Option<(Position, IntervalChange)>,
    ) {
        let (le, gt) = self.tree.find_enclosing_range(&p);
        (le.map(|(k, v)| (*k, *v)), gt.map(|(k, v)| (*k, *v)))
    }
}
