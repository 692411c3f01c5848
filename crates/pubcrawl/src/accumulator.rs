//! Per-session collector of accepted responses and failure counts.
//!
//! Both types here are written from the response consumer task and read by
//! the controlling task, so every mutation is a locked append or an atomic add.

use crate::error::ErrorKind;
use crate::types::{ErrorSummary, ResponseRecord};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Counts of responses seen by the driver vs. fully handled by the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainProgress {
    pub observed: usize,
    pub processed: usize,
}

impl DrainProgress {
    pub fn is_drained(&self) -> bool {
        self.processed >= self.observed
    }
}

/// Ordered, append-only record store plus running byte total.
#[derive(Debug, Default)]
pub struct CaptureAccumulator {
    records: Mutex<Vec<ResponseRecord>>,
    total_bytes: AtomicU64,
    observed: AtomicUsize,
    processed: AtomicUsize,
}

impl CaptureAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `record` and add `byte_count` to the running total.
    ///
    /// The byte total is updated under the same lock as the append so a
    /// snapshot never sees one without the other.
    pub fn offer(&self, record: ResponseRecord, byte_count: u64) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push(record);
        self.total_bytes.fetch_add(byte_count, Ordering::SeqCst);
    }

    pub fn mark_observed(&self) {
        self.observed.fetch_add(1, Ordering::SeqCst);
    }

    /// Undo a `mark_observed` for a response that never reached the pipeline.
    pub(crate) fn unmark_observed(&self) {
        let _ = self
            .observed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Called once per observed response, whether it was kept, rejected or failed.
    pub fn mark_processed(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn progress(&self) -> DrainProgress {
        // Read processed first: a concurrent delivery can only make observed larger,
        // never report processed ahead of observed.
        let processed = self.processed.load(Ordering::SeqCst);
        let observed = self.observed.load(Ordering::SeqCst);
        DrainProgress { observed, processed }
    }

    pub fn total_bytes(&self) -> u64 {
        let _records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        self.total_bytes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent copy of the records and byte total.
    pub fn snapshot(&self) -> (Vec<ResponseRecord>, u64) {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        (records.clone(), self.total_bytes.load(Ordering::SeqCst))
    }
}

/// Failure counts for one session, keyed by [`ErrorKind`].
#[derive(Debug, Default)]
pub struct ErrorTally {
    cloudflare: AtomicU64,
    content_unavailable: AtomicU64,
    other: AtomicU64,
}

impl ErrorTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: ErrorKind) {
        let counter = match kind {
            ErrorKind::CloudflareBlock => &self.cloudflare,
            ErrorKind::ContentUnavailable => &self.content_unavailable,
            ErrorKind::Other => &self.other,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self, kind: ErrorKind) -> u64 {
        match kind {
            ErrorKind::CloudflareBlock => self.cloudflare.load(Ordering::SeqCst),
            ErrorKind::ContentUnavailable => self.content_unavailable.load(Ordering::SeqCst),
            ErrorKind::Other => self.other.load(Ordering::SeqCst),
        }
    }

    pub fn summary(&self) -> ErrorSummary {
        ErrorSummary {
            cloudflare_protection: self.count(ErrorKind::CloudflareBlock),
            missing_content: self.count(ErrorKind::ContentUnavailable),
            other_errors: self.count(ErrorKind::Other),
        }
    }
}
