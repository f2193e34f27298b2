// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Deduplicating store of native call stacks (component C3).
//!
//! Grows in fixed-size chunks of pre-allocated slots. `push` hashes the
//! stack to pick a starting slot, then scans chunks in order, writing into
//! the first empty slot or returning the handle of an equal stack already
//! resident. No stack is ever evicted: `get` is a stable reference into a
//! chunk for the lifetime of the storage.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

/// One resolved frame of a captured call stack.
///
/// Symbolization (address → name) happens at capture time, upstream of
/// this crate; `CallStackStorage` only dedups and stores whatever string
/// frames the caller hands it.
pub type Frame = Arc<str>;

/// A captured native call stack, from innermost frame to outermost.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CallStack {
    frames: Vec<Frame>,
}

impl CallStack {
    /// Builds a call stack from already-symbolized frames.
    #[must_use]
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    /// The empty call stack (used where no stack was captured).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Frames, innermost first.
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

/// A compact handle into `CallStackStorage`, packed as `(chunk, slot)`.
///
/// Two indices compare equal iff they denote the same chunk and slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackIndex(u32);

impl StackIndex {
    /// Sentinel handle used for `Released` metadata and for every push in
    /// summary-only mode.
    pub const EMPTY: Self = Self(u32::MAX);

    fn pack(chunk: u16, slot: u16) -> Self {
        Self((u32::from(chunk) << 16) | u32::from(slot))
    }

    fn chunk(self) -> usize {
        (self.0 >> 16) as usize
    }

    fn slot(self) -> usize {
        (self.0 & 0xffff) as usize
    }
}

struct Chunk {
    slots: Vec<Option<Arc<CallStack>>>,
}

impl Chunk {
    fn new(size: usize) -> Self {
        Self {
            slots: vec![None; size],
        }
    }
}

/// Append-only dedup store of call stacks.
///
/// In summary-only mode (`detailed = false`) the store is inert: `push`
/// never allocates and always returns [`StackIndex::EMPTY`].
pub struct CallStackStorage {
    chunk_size: usize,
    detailed: bool,
    chunks: Vec<Chunk>,
}

impl CallStackStorage {
    /// Creates a new store. `chunk_size` is the number of slots per chunk
    /// (the spec suggests 256 as a typical value). When `detailed` is
    /// `false`, the store never allocates and `push` always returns
    /// [`StackIndex::EMPTY`].
    #[must_use]
    pub fn new(chunk_size: usize, detailed: bool) -> Self {
        assert!(chunk_size > 0, "chunk_size must be positive");
        Self {
            chunk_size,
            detailed,
            chunks: Vec::new(),
        }
    }

    /// `true` if this store dedups and retains call stacks.
    #[must_use]
    pub fn is_detailed(&self) -> bool {
        self.detailed
    }

    fn hash_slot(&self, stack: &CallStack) -> usize {
        let mut hasher = FxHasher::default();
        stack.hash(&mut hasher);
        (hasher.finish() as usize) % self.chunk_size
    }

    /// Dedup-inserts `stack`, returning a stable handle.
    ///
    /// Scans existing chunks at the stack's hash slot; if a chunk's slot is
    /// empty, writes there. If it already holds an equal stack, returns its
    /// handle. If no existing chunk accepts it, a new chunk is allocated.
    pub fn push(&mut self, stack: CallStack) -> StackIndex {
        if !self.detailed {
            return StackIndex::EMPTY;
        }

        let slot = self.hash_slot(&stack);

        for (chunk_idx, chunk) in self.chunks.iter_mut().enumerate() {
            match &chunk.slots[slot] {
                None => {
                    chunk.slots[slot] = Some(Arc::new(stack));
                    #[allow(clippy::cast_possible_truncation)]
                    return StackIndex::pack(chunk_idx as u16, slot as u16);
                }
                Some(existing) if **existing == stack => {
                    #[allow(clippy::cast_possible_truncation)]
                    return StackIndex::pack(chunk_idx as u16, slot as u16);
                }
                Some(_) => continue,
            }
        }

        let mut new_chunk = Chunk::new(self.chunk_size);
        new_chunk.slots[slot] = Some(Arc::new(stack));
        self.chunks.push(new_chunk);

        #[allow(clippy::cast_possible_truncation)]
        let chunk_idx = (self.chunks.len() - 1) as u16;
        #[allow(clippy::cast_possible_truncation)]
        StackIndex::pack(chunk_idx, slot as u16)
    }

    /// Resolves a handle back to its call stack.
    ///
    /// Returns `None` for [`StackIndex::EMPTY`] or an index from a
    /// different (e.g. summary-only) storage instance.
    #[must_use]
    pub fn get(&self, idx: StackIndex) -> Option<Arc<CallStack>> {
        if idx == StackIndex::EMPTY {
            return None;
        }
        self.chunks.get(idx.chunk())?.slots.get(idx.slot())?.clone()
    }

    /// Number of chunks currently allocated.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn frame(name: &str) -> Frame {
        Arc::from(name)
    }

    #[test]
    fn summary_only_mode_returns_sentinel() {
        let mut storage = CallStackStorage::new(8, false);
        let a = storage.push(CallStack::new(vec![frame("a")]));
        let b = storage.push(CallStack::new(vec![frame("b")]));
        assert_eq!(a, StackIndex::EMPTY);
        assert_eq!(b, StackIndex::EMPTY);
        assert_eq!(storage.chunk_count(), 0);
    }

    #[test]
    fn dedups_equal_stacks() {
        let mut storage = CallStackStorage::new(8, true);
        let s1 = CallStack::new(vec![frame("a"), frame("b")]);
        let s2 = CallStack::new(vec![frame("a"), frame("b")]);
        let idx1 = storage.push(s1);
        let idx2 = storage.push(s2);
        assert_eq!(idx1, idx2);
    }

    #[test]
    fn distinct_stacks_get_distinct_handles() {
        let mut storage = CallStackStorage::new(8, true);
        let idx1 = storage.push(CallStack::new(vec![frame("a")]));
        let idx2 = storage.push(CallStack::new(vec![frame("b")]));
        assert_ne!(idx1, idx2);
    }

    #[test]
    fn get_resolves_pushed_stack() {
        let mut storage = CallStackStorage::new(8, true);
        let stack = CallStack::new(vec![frame("main"), frame("alloc")]);
        let idx = storage.push(stack.clone());
        let resolved = storage.get(idx).expect("stack should resolve");
        assert_eq!(*resolved, stack);
    }

    #[test]
    fn collisions_overflow_to_new_chunk() {
        // chunk_size 1 forces every stack into slot 0, so every distinct
        // stack after the first must overflow into a fresh chunk.
        let mut storage = CallStackStorage::new(1, true);
        let idx1 = storage.push(CallStack::new(vec![frame("a")]));
        let idx2 = storage.push(CallStack::new(vec![frame("b")]));
        let idx3 = storage.push(CallStack::new(vec![frame("c")]));
        assert_ne!(idx1, idx2);
        assert_ne!(idx2, idx3);
        assert_eq!(storage.chunk_count(), 3);
    }

    #[test]
    fn empty_index_never_resolves() {
        let storage = CallStackStorage::new(8, true);
        assert!(storage.get(StackIndex::EMPTY).is_none());
    }
}
