//! Watermark bookkeeping and page application

use tracing::{debug, warn};

use super::cache::PushCache;
use super::FetchWindow;
use crate::models::{PushPage, PushRecord};
use crate::store::LocalStore;

/// What one applied page changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncOutcome {
    /// Newly seen records, newest first
    pub new: Vec<PushRecord>,
    /// Records replaced in place
    pub updated: Vec<PushRecord>,
    /// Idens of updated records that are now dismissed
    pub dismissed: Vec<String>,
    /// False for the first sync pass ever completed, whose records are history
    pub notify: bool,
    /// Watermark after the page was applied
    pub watermark: f64,
}

impl SyncOutcome {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.updated.is_empty()
    }
}

/// Delta sync state: the watermark plus the cache it describes
#[derive(Debug)]
pub struct DeltaSync {
    store: LocalStore,
    cache: PushCache,
    watermark: f64,
    /// A pass has completed before; an empty first page still counts
    first_sync_done: bool,
}

impl DeltaSync {
    /// Restore state from the store; unreadable values start empty
    pub fn load(store: LocalStore) -> Self {
        let watermark = store.last_modified().unwrap_or_else(|e| {
            warn!("Discarding unreadable sync watermark: {}", e);
            0.0
        });
        let records = store.pushes().unwrap_or_else(|e| {
            warn!("Discarding unreadable push cache: {}", e);
            Vec::new()
        });
        let first_sync_done = watermark > 0.0
            || store.first_sync_done().unwrap_or_else(|e| {
                warn!("Discarding unreadable sync flag: {}", e);
                false
            });

        debug!(
            "Loaded sync state: watermark {}, {} cached pushes",
            watermark,
            records.len()
        );

        Self {
            store,
            cache: PushCache::new(records),
            watermark,
            first_sync_done,
        }
    }

    pub fn watermark(&self) -> f64 {
        self.watermark
    }

    pub fn cache(&self) -> &PushCache {
        &self.cache
    }

    /// Window for the next fetch
    pub fn plan(&self) -> FetchWindow {
        FetchWindow::for_watermark(self.watermark)
    }

    /// Apply a fetched page
    ///
    /// The watermark moves to the newest `modified` in the page if that is
    /// ahead of it, and is persisted before anything else happens. Only the
    /// first page ever applied is silent, whether or not it had records.
    pub fn apply(&mut self, window: FetchWindow, page: PushPage) -> SyncOutcome {
        let newest = page
            .pushes
            .iter()
            .map(|p| p.modified)
            .fold(f64::NEG_INFINITY, f64::max);

        if newest > self.watermark {
            self.watermark = newest;
            if let Err(e) = self.store.set_last_modified(newest) {
                warn!("Failed to persist sync watermark: {}", e);
            }
        }

        let notify = self.first_sync_done;
        if !self.first_sync_done {
            self.first_sync_done = true;
            if let Err(e) = self.store.set_first_sync_done() {
                warn!("Failed to persist sync flag: {}", e);
            }
        }

        let merged = self.cache.merge(&page.pushes);
        if !merged.is_empty() {
            if let Err(e) = self.store.set_pushes(self.cache.records()) {
                warn!("Failed to persist push cache: {}", e);
            }
        }

        let dismissed = merged
            .updated
            .iter()
            .filter(|p| p.dismissed)
            .map(|p| p.iden.clone())
            .collect();

        debug!(
            "Applied {} page of {} pushes: {} new, {} updated, watermark {}",
            if window.is_initial() { "initial" } else { "delta" },
            page.pushes.len(),
            merged.new.len(),
            merged.updated.len(),
            self.watermark
        );

        SyncOutcome {
            new: merged.new,
            updated: merged.updated,
            dismissed,
            notify,
            watermark: self.watermark,
        }
    }

    /// Forget everything (sign-out)
    pub fn reset(&mut self) {
        self.watermark = 0.0;
        self.first_sync_done = false;
        self.cache.clear();
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear local sync state: {}", e);
        }
    }
}
