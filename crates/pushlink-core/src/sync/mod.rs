//! Delta sync
//!
//! Reconciles the local push cache with the server after every connect and
//! every `tickle`. Only records modified after the stored watermark are
//! fetched; the watermark only ever moves forward and is persisted as soon
//! as it moves, so a restarted process resumes from where the last one left
//! off instead of re-notifying old pushes.

mod cache;
mod engine;

pub use cache::{MergeOutcome, PushCache};
pub use engine::{DeltaSync, SyncOutcome};

/// Size of the first page fetched when there is no watermark yet
pub const INITIAL_PAGE_SIZE: usize = 20;

/// Which records a fetch asks for
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FetchWindow {
    /// No watermark yet: the most recent active pushes
    Initial { limit: usize },
    /// Active pushes modified after the watermark
    Since(f64),
}

impl FetchWindow {
    pub fn for_watermark(watermark: f64) -> Self {
        if watermark > 0.0 {
            FetchWindow::Since(watermark)
        } else {
            FetchWindow::Initial {
                limit: INITIAL_PAGE_SIZE,
            }
        }
    }

    /// No watermark yet
    pub fn is_initial(&self) -> bool {
        matches!(self, FetchWindow::Initial { .. })
    }

    /// Query parameters for `GET /pushes`
    pub fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            FetchWindow::Initial { limit } => vec![
                ("active", "true".to_string()),
                ("limit", limit.to_string()),
            ],
            FetchWindow::Since(watermark) => vec![
                ("modified_after", watermark.to_string()),
                ("active", "true".to_string()),
            ],
        }
    }
}
