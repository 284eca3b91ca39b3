//! Bounded push cache keyed by iden

use std::collections::HashSet;

use crate::models::PushRecord;
use crate::store::PUSH_CACHE_LIMIT;

/// Result of merging one fetched page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Records not cached before, newest first
    pub new: Vec<PushRecord>,
    /// Cached records replaced in place
    pub updated: Vec<PushRecord>,
}

impl MergeOutcome {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.updated.is_empty()
    }
}

/// Ordered list of pushes, newest first, capped
#[derive(Debug, Clone, PartialEq)]
pub struct PushCache {
    records: Vec<PushRecord>,
    limit: usize,
}

impl PushCache {
    pub fn new(records: Vec<PushRecord>) -> Self {
        Self::with_limit(records, PUSH_CACHE_LIMIT)
    }

    pub fn with_limit(mut records: Vec<PushRecord>, limit: usize) -> Self {
        records.truncate(limit);
        Self { records, limit }
    }

    pub fn records(&self) -> &[PushRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, iden: &str) -> Option<&PushRecord> {
        self.records.iter().find(|r| r.iden == iden)
    }

    /// Merge a newest-first page
    ///
    /// Unseen idens are prepended in page order, seen idens replace their
    /// entry in place. Merging the same page twice leaves the cache as
    /// merging it once did.
    pub fn merge(&mut self, page: &[PushRecord]) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let mut seen_in_page = HashSet::new();

        for record in page {
            if !seen_in_page.insert(record.iden.as_str()) {
                continue;
            }
            match self.records.iter_mut().find(|r| r.iden == record.iden) {
                Some(existing) => {
                    *existing = record.clone();
                    outcome.updated.push(record.clone());
                }
                None => outcome.new.push(record.clone()),
            }
        }

        if !outcome.new.is_empty() {
            let mut merged = outcome.new.clone();
            merged.append(&mut self.records);
            self.records = merged;
        }
        self.records.truncate(self.limit);

        outcome
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
