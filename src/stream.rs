//! Streaming extraction: page results as they complete.
//!
//! [`extract_document`](crate::extract::extract_document) holds every page
//! until the slowest one finishes. For interactive callers that want to
//! render rows as soon as a page lands, [`extract_stream`] yields each
//! [`PageExtraction`] in *completion* order instead — consumers that need
//! page order can collect and sort by `page_num`.
//!
//! Item type is `PageExtraction`, not `Result`: page failures arrive as the
//! page's error state, the same contract as the batch API.

use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::extract::{process_page, resolve_provider, PageInput};
use crate::output::PageExtraction;

/// Stream of per-page results, yielded as each page completes.
pub type PageStream = Pin<Box<dyn Stream<Item = PageExtraction> + Send>>;

/// Extract a document's pages, yielding each result as soon as it is done.
///
/// Concurrency, retries, and progress callbacks behave exactly as in
/// [`extract_document`](crate::extract::extract_document); only delivery
/// differs.
pub fn extract_stream(
    pages: Vec<PageInput>,
    config: &ExtractionConfig,
) -> Result<PageStream, ExtractError> {
    if pages.is_empty() {
        return Err(ExtractError::NoPages);
    }

    let provider = resolve_provider(config)?;
    let config = Arc::new(config.clone());
    let total_pages = pages.len();

    if let Some(cb) = &config.progress_callback {
        cb.on_document_start(total_pages);
    }

    let concurrency = config.concurrency;
    let stream = stream::iter(pages.into_iter().enumerate().map(move |(idx, input)| {
        process_page(provider.clone(), config.clone(), idx + 1, total_pages, input)
    }))
    .buffer_unordered(concurrency);

    Ok(Box::pin(stream))
}
