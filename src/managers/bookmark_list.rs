//! In-memory bookmark list for one session.
//!
//! Holds at most one entry per id, always sorted newest first by
//! `created_at`. Only the sync controller mutates it.

use std::collections::HashSet;

use crate::types::bookmark::Bookmark;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookmarkList {
    items: Vec<Bookmark>,
}

impl BookmarkList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole list with `snapshot`.
    ///
    /// Duplicate ids keep their first occurrence; the result is re-sorted
    /// (stable) so a badly ordered snapshot cannot break the ordering.
    pub fn replace(&mut self, snapshot: Vec<Bookmark>) {
        let mut seen = HashSet::with_capacity(snapshot.len());
        let mut items: Vec<Bookmark> = snapshot
            .into_iter()
            .filter(|b| seen.insert(b.id.clone()))
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.items = items;
    }

    /// Inserts `bookmark` unless its id is already present.
    ///
    /// A new row is normally the newest and lands at the front; an older
    /// one is placed at its sorted position. Returns whether the list changed.
    pub fn insert(&mut self, bookmark: Bookmark) -> bool {
        if self.contains(&bookmark.id) {
            return false;
        }
        let pos = self
            .items
            .partition_point(|existing| existing.created_at > bookmark.created_at);
        self.items.insert(pos, bookmark);
        true
    }

    /// Removes the entry with `id`, returning it if it was present.
    pub fn remove(&mut self, id: &str) -> Option<Bookmark> {
        let pos = self.items.iter().position(|b| b.id == id)?;
        Some(self.items.remove(pos))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|b| b.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[Bookmark] {
        &self.items
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|b| b.id.as_str()).collect()
    }
}
