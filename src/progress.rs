//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! real-time events as pages move through the pipeline. Callbacks are the
//! least-invasive integration point: callers can forward events to a channel,
//! a WebSocket, or a terminal progress bar without the library knowing how
//! the host application communicates. The trait is `Send + Sync` because
//! pages are processed concurrently.

use std::sync::Arc;

/// Called by the extraction pipeline as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. When `concurrency > 1`, the per-page methods may be
/// called concurrently from different tasks; implementations must protect
/// shared mutable state themselves.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before any page is sent to the vision provider.
    fn on_document_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the vision request is sent for a page.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page finishes outside the error state.
    ///
    /// `item_count` is the number of cleaned line items on the page.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, item_count: usize) {
        let _ = (page_num, total_pages, item_count);
    }

    /// Called when a page terminates in the error state.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after every page has been attempted.
    fn on_document_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_page_complete(&self, _page: usize, _total: usize, _items: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_error(&self, _page: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_document_start(3);
        cb.on_page_start(1, 3);
        cb.on_page_complete(1, 3, 7);
        cb.on_page_error(2, 3, "timeout");
        cb.on_document_complete(3, 2);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let cb = TrackingCallback {
            completes: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        };
        cb.on_page_complete(1, 2, 5);
        cb.on_page_error(2, 2, "boom");
        assert_eq!(cb.completes.load(Ordering::SeqCst), 1);
        assert_eq!(cb.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_document_start(10);
        cb.on_page_complete(1, 10, 3);
    }
}
