//! Document-level extraction: fan pages out across workers, fold results.
//!
//! This is the crate's main entry point. Pages are independent units of
//! work; they run through [`crate::pipeline::orchestrate`] concurrently via
//! `buffer_unordered` and the results are re-sorted by page number, so the
//! output is deterministic no matter which worker finished first.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use image::DynamicImage;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::ExtractionConfig;
use crate::error::{ExtractError, PageError};
use crate::output::{DocumentOutput, ExtractionStats, PageExtraction};
use crate::pipeline::encode::encode_page;
use crate::pipeline::orchestrate::run_page;
use crate::provider::{GeminiProvider, VisionProvider};

/// One page of a bill to extract: the image plus an optional claimed total
/// for that page (the figure printed in the bill's total box, if the caller
/// already knows it).
pub struct PageInput {
    pub image: DynamicImage,
    pub claimed_total: Option<Decimal>,
}

impl PageInput {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            claimed_total: None,
        }
    }

    pub fn with_claimed_total(image: DynamicImage, claimed_total: Decimal) -> Self {
        Self {
            image,
            claimed_total: Some(claimed_total),
        }
    }
}

/// Extract line items from every page of a document.
///
/// Pages run concurrently up to `config.concurrency`. A page failure never
/// fails the document: failed pages come back in their error state and the
/// rest proceed. `Err` is reserved for conditions that doom the whole run,
/// like an empty page list or no usable provider.
pub async fn extract_document(
    pages: Vec<PageInput>,
    config: &ExtractionConfig,
) -> Result<DocumentOutput, ExtractError> {
    if pages.is_empty() {
        return Err(ExtractError::NoPages);
    }

    let provider = resolve_provider(config)?;
    let config = Arc::new(config.clone());
    let total_pages = pages.len();
    let started = Instant::now();

    info!(
        pages = total_pages,
        concurrency = config.concurrency,
        provider = provider.name(),
        "starting document extraction"
    );
    if let Some(cb) = &config.progress_callback {
        cb.on_document_start(total_pages);
    }

    let concurrency = config.concurrency;
    let mut results: Vec<PageExtraction> = stream::iter(
        pages
            .into_iter()
            .enumerate()
            .map(|(idx, input)| process_page(provider.clone(), config.clone(), idx + 1, total_pages, input)),
    )
    .buffer_unordered(concurrency)
    .collect()
    .await;

    // Completion order depends on worker scheduling; page order should not.
    results.sort_by_key(|p| p.page_num);

    let stats = fold_stats(&results, total_pages, started.elapsed().as_millis() as u64);
    info!(
        processed = stats.processed_pages,
        failed = stats.failed_pages,
        items = stats.total_items,
        duration_ms = stats.total_duration_ms,
        "document extraction finished"
    );
    if let Some(cb) = &config.progress_callback {
        cb.on_document_complete(total_pages, stats.processed_pages);
    }

    Ok(DocumentOutput {
        pages: results,
        stats,
    })
}

/// Single-page convenience wrapper over the same pipeline.
pub async fn extract_page(
    image: &DynamicImage,
    claimed_total: Option<Decimal>,
    config: &ExtractionConfig,
) -> Result<PageExtraction, ExtractError> {
    let provider = resolve_provider(config)?;
    let config = Arc::new(config.clone());
    let input = PageInput {
        image: image.clone(),
        claimed_total,
    };
    Ok(process_page(provider, config, 1, 1, input).await)
}

/// An explicitly configured provider wins; otherwise fall back to Gemini
/// configured from the environment.
pub(crate) fn resolve_provider(
    config: &ExtractionConfig,
) -> Result<Arc<dyn VisionProvider>, ExtractError> {
    match &config.provider {
        Some(provider) => Ok(provider.clone()),
        None => Ok(Arc::new(GeminiProvider::from_env(config.model.as_deref())?)),
    }
}

/// Encode and extract one page, reporting progress along the way. Infallible
/// by construction: encode failures become the page's error state.
pub(crate) async fn process_page(
    provider: Arc<dyn VisionProvider>,
    config: Arc<ExtractionConfig>,
    page_num: usize,
    total_pages: usize,
    input: PageInput,
) -> PageExtraction {
    if let Some(cb) = &config.progress_callback {
        cb.on_page_start(page_num, total_pages);
    }

    let started = Instant::now();
    let encoded = match encode_page(&input.image) {
        Ok(encoded) => encoded,
        Err(err) => {
            let page_err = PageError::EncodeFailed {
                page: page_num,
                detail: err.to_string(),
            };
            if let Some(cb) = &config.progress_callback {
                cb.on_page_error(page_num, total_pages, &page_err.to_string());
            }
            return PageExtraction::from_error(
                page_num,
                page_err,
                started.elapsed().as_millis() as u64,
            );
        }
    };

    let result = run_page(&provider, page_num, &encoded, input.claimed_total, &config).await;

    if let Some(cb) = &config.progress_callback {
        match &result.error {
            Some(err) => cb.on_page_error(page_num, total_pages, &err.to_string()),
            None => cb.on_page_complete(page_num, total_pages, result.items.len()),
        }
    }
    debug!(page = page_num, of = total_pages, "page finished");
    result
}

fn fold_stats(pages: &[PageExtraction], total_pages: usize, total_duration_ms: u64) -> ExtractionStats {
    let mut stats = ExtractionStats {
        total_pages,
        total_duration_ms,
        ..ExtractionStats::default()
    };
    for page in pages {
        if page.error.is_some() {
            stats.failed_pages += 1;
        } else {
            stats.processed_pages += 1;
            stats.total_items += page.items.len();
        }
        if page.metadata.retry_attempts > 0 {
            stats.corrective_retries += 1;
        }
        stats.total_input_tokens += page.metadata.usage.input_tokens;
        stats.total_output_tokens += page.metadata.usage.output_tokens;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{ExtractionMetadata, ReconcileStatus};

    fn page(page_num: usize, items: usize, failed: bool) -> PageExtraction {
        let mut metadata = ExtractionMetadata::new(page_num);
        let error = failed.then(|| PageError::Timeout {
            page: page_num,
            secs: 60,
        });
        if failed {
            metadata.reconciliation = ReconcileStatus::Error;
        }
        PageExtraction {
            page_num,
            items: vec![
                crate::output::LineItem {
                    name: "x".into(),
                    quantity: Decimal::ONE,
                    rate: Decimal::ONE,
                    amount: Decimal::ONE,
                    confidence: 1.0,
                };
                items
            ],
            reconciled_total: Decimal::from(items),
            metadata,
            duration_ms: 10,
            error,
        }
    }

    #[test]
    fn stats_fold_processed_failed_and_items() {
        let pages = vec![page(1, 3, false), page(2, 0, true), page(3, 2, false)];
        let stats = fold_stats(&pages, 3, 500);
        assert_eq!(stats.total_pages, 3);
        assert_eq!(stats.processed_pages, 2);
        assert_eq!(stats.failed_pages, 1);
        assert_eq!(stats.total_items, 5);
        assert_eq!(stats.total_duration_ms, 500);
    }

    #[tokio::test]
    async fn empty_document_is_rejected() {
        let err = extract_document(Vec::new(), &ExtractionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::NoPages));
    }
}
