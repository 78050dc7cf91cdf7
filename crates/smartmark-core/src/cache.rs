//! Client-side snapshot of the owner's collection.
//!
//! The cache keeps its records sorted newest first and holds each id at
//! most once. Every change is applied to the whole collection or to a
//! single record in one step, so readers never see a half-applied update.

use chrono::{DateTime, Utc};

use crate::bookmark::{BookmarkId, BookmarkRecord, OwnerId};

/// A record taken out of the cache together with the slot it occupied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removed {
    pub index: usize,
    pub record: BookmarkRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalCache {
    records: Vec<BookmarkRecord>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from store output, keeping only `owner`'s records.
    pub fn from_records(owner: &OwnerId, records: Vec<BookmarkRecord>) -> Self {
        let mut cache = Self::new();
        cache.replace_all(owner, records);
        cache
    }

    pub fn records(&self) -> &[BookmarkRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &BookmarkId) -> Option<&BookmarkRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    pub fn position(&self, id: &BookmarkId) -> Option<usize> {
        self.records.iter().position(|r| &r.id == id)
    }

    /// Swap in a whole new snapshot.
    ///
    /// Foreign-owner records are dropped and duplicate ids keep their first
    /// occurrence. The sort is stable, so store order survives among equal
    /// `created_at` values. Returns the number of records discarded.
    pub fn replace_all(&mut self, owner: &OwnerId, records: Vec<BookmarkRecord>) -> usize {
        let incoming = records.len();
        let mut next: Vec<BookmarkRecord> = Vec::with_capacity(incoming);
        for record in records {
            if &record.owner_id != owner {
                tracing::warn!(id = %record.id, %owner, "dropping record of another owner");
                continue;
            }
            if next.iter().any(|r| r.id == record.id) {
                tracing::warn!(id = %record.id, "dropping duplicate record");
                continue;
            }
            next.push(record);
        }
        next.sort_by(BookmarkRecord::newest_first);
        let discarded = incoming - next.len();
        self.records = next;
        discarded
    }

    /// Insert or replace a single record at its sorted position.
    pub fn upsert(&mut self, record: BookmarkRecord) {
        if let Some(idx) = self.position(&record.id) {
            self.records.remove(idx);
        }
        let idx = self.sorted_slot(&record);
        self.records.insert(idx, record);
    }

    pub fn remove(&mut self, id: &BookmarkId) -> Option<Removed> {
        let index = self.position(id)?;
        let record = self.records.remove(index);
        Some(Removed { index, record })
    }

    /// Put a removed record back.
    ///
    /// The original slot is reused when it is still consistent with the
    /// sort order; otherwise the record goes to its sorted position. A
    /// record whose id reappeared in the meantime is not duplicated.
    pub fn restore(&mut self, removed: Removed) {
        let Removed { index, record } = removed;
        if self.position(&record.id).is_some() {
            return;
        }
        if self.slot_fits(index, &record) {
            self.records.insert(index, record);
        } else {
            self.upsert(record);
        }
    }

    /// Set `last_visited` on a record. Returns false if the id is unknown.
    pub fn touch(&mut self, id: &BookmarkId, at: DateTime<Utc>) -> bool {
        match self.records.iter_mut().find(|r| &r.id == id) {
            Some(record) => {
                record.last_visited = Some(at);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    // After every existing record that is at least as new.
    fn sorted_slot(&self, record: &BookmarkRecord) -> usize {
        self.records
            .partition_point(|r| r.created_at >= record.created_at)
    }

    fn slot_fits(&self, index: usize, record: &BookmarkRecord) -> bool {
        if index > self.records.len() {
            return false;
        }
        let after_prev = index == 0 || self.records[index - 1].created_at >= record.created_at;
        let before_next = index == self.records.len()
            || self.records[index].created_at <= record.created_at;
        after_prev && before_next
    }
}
