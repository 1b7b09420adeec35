//! Progress-callback trait for evidence scans.
//!
//! Inject an [`Arc<dyn ScanProgressCallback>`] via
//! [`crate::config::ChatConfigBuilder::progress_callback`] to receive an
//! event before and after every model request of a scan. Each completion
//! event carries the fraction of requests done, which is what a UI needs to
//! render a progress bar.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdfchat::{ChatConfig, ScanProgressCallback};
//! use std::sync::Arc;
//!
//! struct PrintFraction;
//!
//! impl ScanProgressCallback for PrintFraction {
//!     fn on_request_complete(&self, done: usize, total: usize, fraction: f32) {
//!         eprintln!("{done}/{total} ({:.0}%)", fraction * 100.0);
//!     }
//! }
//!
//! let config = ChatConfig::builder()
//!     .progress_callback(Arc::new(PrintFraction))
//!     .build()
//!     .unwrap();
//! ```

use std::ops::Range;
use std::sync::Arc;

/// Called by the evidence collector as it works through a scan.
///
/// All methods have no-op defaults. Requests are issued strictly one at a
/// time, so events for one scan never interleave.
pub trait ScanProgressCallback: Send + Sync {
    /// Called once before the first request.
    ///
    /// # Arguments
    /// * `total_requests` — requests this scan will issue
    /// * `total_pages`    — pages in the document
    fn on_scan_start(&self, total_requests: usize, total_pages: usize) {
        let _ = (total_requests, total_pages);
    }

    /// Called just before a request is dispatched.
    ///
    /// # Arguments
    /// * `request` — 1-indexed request number
    /// * `total`   — requests in this scan
    /// * `pages`   — 0-based page indices carried by the request
    fn on_request_start(&self, request: usize, total: usize, pages: &Range<usize>) {
        let _ = (request, total, pages);
    }

    /// Called after a request produced an evidence record.
    fn on_request_complete(&self, done: usize, total: usize, fraction: f32) {
        let _ = (done, total, fraction);
    }

    /// Called after a request failed and its pages were skipped.
    fn on_request_error(&self, done: usize, total: usize, fraction: f32, error: &str) {
        let _ = (done, total, fraction, error);
    }

    /// Called once after every request has been attempted.
    fn on_scan_complete(&self, total_requests: usize, succeeded: usize) {
        let _ = (total_requests, succeeded);
    }
}

/// No-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl ScanProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ChatConfig`].
pub type ProgressCallback = Arc<dyn ScanProgressCallback>;

/// Fraction of a scan completed after `done` of `total` requests.
///
/// An empty scan is complete by definition.
pub fn progress_fraction(done: usize, total: usize) -> f32 {
    if total == 0 {
        1.0
    } else {
        (done.min(total) as f32) / (total as f32)
    }
}
