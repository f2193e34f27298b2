// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Append-only mapping of tag names to compact numeric tags (component C4).
//!
//! Backed by (a) a flat zero-delimited character buffer, (b) an array
//! indexed by tag integer returning an offset into the buffer, and (c) a
//! hash bucket chain for name → tag lookup. All three mappings are guarded
//! by a single process-wide critical section; the tree itself never sees
//! names, only the small integer `Tag`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use rustc_hash::FxHasher;
use std::hash::Hasher;

use crate::region::Tag;

const BUCKET_COUNT: usize = 64;

fn string_hash(name: &str) -> usize {
    let mut hasher = FxHasher::default();
    hasher.write(name.as_bytes());
    (hasher.finish() as usize) % BUCKET_COUNT
}

struct Inner {
    /// Flat buffer of zero-delimited names, in registration order.
    buffer: String,
    /// Indexed by `tag.raw() - 1`; gives `(offset, len)` of that tag's name.
    offsets: Vec<(usize, usize)>,
    /// `string_hash(name) % BUCKET_COUNT` → chain of `(offset, len, tag)`.
    buckets: Vec<Vec<(usize, usize, Tag)>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            buffer: String::new(),
            offsets: Vec::new(),
            buckets: (0..BUCKET_COUNT).map(|_| Vec::new()).collect(),
        }
    }

    fn find_tag(&self, name: &str) -> Option<Tag> {
        let bucket = &self.buckets[string_hash(name)];
        bucket
            .iter()
            .find(|(offset, len, _)| &self.buffer[*offset..*offset + *len] == name)
            .map(|(_, _, tag)| *tag)
    }
}

/// Guarded, append-only name ↔ tag table used by the tracker façade.
pub struct TagNameTable {
    inner: Mutex<Inner>,
    max_tags: u16,
    overflow_reported: AtomicBool,
}

impl TagNameTable {
    /// Creates an empty table. `max_tags` bounds the number of distinct
    /// tags (beyond `Tag::NONE`) that `make_tag` will assign before
    /// reporting overflow.
    #[must_use]
    pub fn new(max_tags: u16) -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            max_tags,
            overflow_reported: AtomicBool::new(false),
        }
    }

    /// Looks up the name for a tag. Returns `None` for `Tag::NONE` or an
    /// unregistered tag.
    #[must_use]
    pub fn get(&self, tag: Tag) -> Option<String> {
        if tag == Tag::NONE {
            return None;
        }
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let idx = usize::from(tag.raw()) - 1;
        inner.offsets.get(idx).map(|(offset, len)| inner.buffer[*offset..*offset + *len].to_string())
    }

    /// Looks up the tag for a name, if already registered.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<Tag> {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.find_tag(name)
    }

    /// Returns the tag for `name`, assigning a fresh one if it hasn't been
    /// seen before. Returns `None` and logs a one-time warning if the tag
    /// namespace is exhausted (§7: tag namespace overflow).
    pub fn make_tag(&self, name: &str) -> Option<Tag> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(existing) = inner.find_tag(name) {
            return Some(existing);
        }

        let next_raw = inner.offsets.len() + 1;
        if next_raw > usize::from(self.max_tags) || next_raw > usize::from(u16::MAX) {
            if !self.overflow_reported.swap(true, Ordering::Relaxed) {
                log::warn!("NMT tag namespace exhausted at {max} tags; dropping tag {name:?}", max = self.max_tags);
            }
            return None;
        }

        let offset = inner.buffer.len();
        inner.buffer.push_str(name);
        inner.offsets.push((offset, name.len()));

        #[allow(clippy::cast_possible_truncation)]
        let tag = Tag::from_raw(next_raw as u16);
        inner.buckets[string_hash(name)].push((offset, name.len(), tag));

        Some(tag)
    }

    /// `true` once a tag-overflow warning has fired for this table.
    #[must_use]
    pub fn has_overflowed(&self) -> bool {
        self.overflow_reported.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn make_tag_is_idempotent() {
        let table = TagNameTable::new(64);
        let a = table.make_tag("heap").expect("room for tag");
        let b = table.make_tag("heap").expect("room for tag");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_names_get_distinct_tags() {
        let table = TagNameTable::new(64);
        let a = table.make_tag("heap").unwrap();
        let b = table.make_tag("code").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_name() {
        let table = TagNameTable::new(64);
        let tag = table.make_tag("gc").unwrap();
        assert_eq!(table.get(tag).as_deref(), Some("gc"));
        assert_eq!(table.get_by_name("gc"), Some(tag));
    }

    #[test]
    fn none_tag_has_no_name() {
        let table = TagNameTable::new(64);
        assert_eq!(table.get(Tag::NONE), None);
    }

    #[test]
    fn overflow_reports_once() {
        let table = TagNameTable::new(1);
        let first = table.make_tag("a").expect("first tag fits");
        assert!(table.make_tag("b").is_none());
        assert!(table.has_overflowed());
        // Re-requesting the already-registered name still works.
        assert_eq!(table.make_tag("a"), Some(first));
    }
}
