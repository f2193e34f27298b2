// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::tracker::Tracker;

const DEFAULT_CALLSTACK_CHUNK_SIZE: usize = 256;
const DEFAULT_MAX_TAGS: u16 = 256;
const DEFAULT_CAPTURE_DEPTH: usize = 32;

/// Tracker configuration builder.
#[derive(Clone)]
pub struct TrackerConfig {
    /// Whether the tracker dedups and retains call stacks (`true`) or runs
    /// summary-only (`false`).
    pub(crate) detailed_mode: bool,

    /// Slots per [`crate::callstack::CallStackStorage`] chunk.
    pub(crate) callstack_chunk_size: usize,

    /// Maximum number of distinct tags (beyond `Tag::NONE`).
    pub(crate) max_tags: u16,

    /// Maximum number of frames retained per captured call stack.
    pub(crate) capture_depth: usize,

    /// Caps the underlying tree's node count, modeling a bounded node
    /// allocator (§7). `None` leaves it unbounded; this is `None` by
    /// default and is not part of the public builder surface since
    /// production trackers should not self-limit, but tests exercise it
    /// via `#[doc(hidden)]`.
    #[doc(hidden)]
    pub max_nodes: Option<usize>,

    /// Seed for the treap's priority RNG. Fixed by default for
    /// reproducible reports across restarts of the same binary.
    #[doc(hidden)]
    pub treap_seed: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            detailed_mode: false,
            callstack_chunk_size: DEFAULT_CALLSTACK_CHUNK_SIZE,
            max_tags: DEFAULT_MAX_TAGS,
            capture_depth: DEFAULT_CAPTURE_DEPTH,
            max_nodes: None,
            treap_seed: 0x5DEE_CE11,
        }
    }
}

impl TrackerConfig {
    /// Initializes a new config with the defaults above.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles call-stack capture and deduplication.
    ///
    /// Defaults to `false` (summary-only): every recording call is
    /// cheaper, but the detail report cannot show call sites.
    #[must_use]
    pub fn detailed_mode(mut self, detailed: bool) -> Self {
        self.detailed_mode = detailed;
        self
    }

    /// Sets the number of slots per call-stack storage chunk.
    ///
    /// Defaults to 256. Smaller chunks probe fewer slots per insert but
    /// overflow into new chunks more readily under hash collisions.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn callstack_chunk_size(mut self, n: usize) -> Self {
        assert!(n > 0, "callstack_chunk_size must be positive");
        self.callstack_chunk_size = n;
        self
    }

    /// Sets the maximum number of distinct tags this tracker will assign.
    ///
    /// Defaults to 256. Once exhausted, `make_tag` returns `None` and the
    /// tracker's status line reports `tag_overflow`.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn max_tags(mut self, n: u16) -> Self {
        assert!(n > 0, "max_tags must be positive");
        self.max_tags = n;
        self
    }

    /// Sets the maximum number of frames retained per captured call stack.
    ///
    /// Defaults to 32. This bounds caller-side capture cost; this crate
    /// does not itself walk the stack, so the limit is advisory for
    /// callers constructing a [`crate::callstack::CallStack`].
    #[must_use]
    pub fn capture_depth(mut self, n: usize) -> Self {
        self.capture_depth = n;
        self
    }

    /// Builds the tracker.
    #[must_use]
    pub fn build(self) -> Tracker {
        Tracker::new(&self)
    }
}
