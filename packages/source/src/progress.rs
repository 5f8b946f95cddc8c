//! Progress events from paged fetches and multi-step loads.
//!
//! The CLI renders these with `indicatif`; library callers and tests pass
//! [`null_progress`].

use std::sync::Arc;

/// One page returned by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEvent {
    /// Zero-based request number.
    pub page: u64,
    /// Offset the page was requested at.
    pub offset: u64,
    /// Records on this page.
    pub records: u64,
    /// Records accumulated so far, this page included.
    pub accumulated: u64,
}

/// Receives progress from long-running stages.
pub trait ProgressCallback: Send + Sync {
    /// The source reported `total` records, or a loop of `total` steps is
    /// about to run.
    fn expect(&self, total: u64);

    /// A page arrived.
    fn page(&self, event: PageEvent);

    /// One step of a multi-step load finished.
    fn step(&self, label: &str);

    /// The stage ended.
    fn finish(&self, summary: &str);
}

struct NullProgress;

impl ProgressCallback for NullProgress {
    fn expect(&self, _total: u64) {}
    fn page(&self, _event: PageEvent) {}
    fn step(&self, _label: &str) {}
    fn finish(&self, _summary: &str) {}
}

/// A [`ProgressCallback`] that ignores every event.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
