//! Per-page orchestration: vision call, recovery, validation,
//! reconciliation, and the bounded corrective retry.
//!
//! One invocation of [`run_page`] owns one page end to end. Page state
//! lives entirely in local variables here; nothing about a page is shared
//! or persisted across calls, which is what makes pages safe to run
//! concurrently.
//!
//! Two retry loops exist and must not be confused:
//! - the *transport* retry inside [`call_vision`] handles flaky I/O
//!   (timeouts, 5xx) with exponential backoff;
//! - the *corrective* retry is a semantic re-ask, taken at most once per
//!   page and only when the reconciliation discrepancy is large enough to
//!   justify a second paid vision call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::ExtractionConfig;
use crate::error::PageError;
use crate::output::{ExtractionMetadata, LineItem, PageExtraction};
use crate::pipeline::encode::EncodedPage;
use crate::pipeline::normalize::{clean_name, opt_decimal, to_decimal};
use crate::pipeline::reconcile::{line_item_total, sum_line_items, ReconciliationEngine};
use crate::pipeline::recover::{RawCorrection, ResponseRecoveryParser};
use crate::pipeline::validate::ExtractedDataValidator;
use crate::prompts::{corrective_retry_prompt, EXTRACTION_SYSTEM_PROMPT, EXTRACTION_USER_PROMPT};
use crate::provider::{VisionProvider, VisionReply, VisionRequest};

/// Extraction confidence reported after the cleanup pipeline ran through.
const CLEANED_CONFIDENCE: f32 = 0.95;

/// Extract one page. Never returns `Err`: vision failures become the
/// page's terminal error state inside the returned [`PageExtraction`].
pub(crate) async fn run_page(
    provider: &Arc<dyn VisionProvider>,
    page_num: usize,
    page: &EncodedPage,
    claimed_total: Option<Decimal>,
    config: &ExtractionConfig,
) -> PageExtraction {
    let started = Instant::now();
    let mut metadata = ExtractionMetadata::new(page_num);

    let system_prompt = config
        .system_prompt
        .as_deref()
        .unwrap_or(EXTRACTION_SYSTEM_PROMPT);

    let reply = match call_vision(
        provider,
        page_num,
        page,
        system_prompt,
        EXTRACTION_USER_PROMPT,
        config,
    )
    .await
    {
        Ok(reply) => reply,
        Err(err) => {
            warn!(page = page_num, %err, "page entered error state");
            return PageExtraction::from_error(page_num, err, elapsed_ms(started));
        }
    };
    metadata.usage.add(&reply.usage);

    let parser = ResponseRecoveryParser::new(config.salvage_window);
    let raw = parser.parse(&reply.text);
    if !raw.notes.is_empty() {
        metadata.warnings.push(raw.notes.clone());
    }

    // No items is a legitimate outcome (blank page, cover sheet). The page
    // completes normally with reconciliation left pending.
    if raw.line_items.is_empty() {
        debug!(page = page_num, "no line items recovered");
        return PageExtraction {
            page_num,
            items: Vec::new(),
            reconciled_total: Decimal::ZERO,
            metadata,
            duration_ms: elapsed_ms(started),
            error: None,
        };
    }

    // Bill_total printed on the page is a fallback; a caller-supplied
    // claimed total always wins.
    let claimed = claimed_total.or_else(|| raw.bill_total.as_ref().and_then(opt_decimal));

    let validator = ExtractedDataValidator::new(config);
    let (mut items, report) = validator.validate_and_clean(raw.line_items);
    metadata.warnings.extend(report.corrections.iter().cloned());
    metadata.warnings.extend(
        report
            .removed
            .iter()
            .map(|name| format!("removed summary row '{name}'")),
    );
    metadata.warnings.extend(report.errors.iter().cloned());

    let mut computed = sum_line_items(&items);
    let engine = ReconciliationEngine::new(config.match_threshold);

    if let Some(claimed) = claimed {
        let mut outcome = engine.reconcile(computed, claimed);

        if !outcome.is_match
            && metadata.retry_attempts < config.max_corrective_retries
            && retry_is_economic(outcome.discrepancy, claimed, config.retry_threshold)
        {
            info!(
                page = page_num,
                %computed,
                %claimed,
                discrepancy = %outcome.discrepancy,
                "reconciliation mismatch, taking corrective retry"
            );
            let prompt = corrective_retry_prompt(&items, computed, claimed, outcome.discrepancy);
            match call_vision(provider, page_num, page, system_prompt, &prompt, config).await {
                Ok(retry_reply) => {
                    metadata.usage.add(&retry_reply.usage);
                    metadata.retry_attempts += 1;
                    let corrective = parser.parse_corrective(&retry_reply.text);
                    let applied = apply_corrections(&mut items, corrective.corrections);
                    metadata
                        .warnings
                        .push(format!("corrective retry applied {applied} correction(s)"));
                    computed = sum_line_items(&items);
                    outcome = engine.reconcile(computed, claimed);
                }
                // The first-pass result stands; a failed retry only costs
                // us the improvement, not the page.
                Err(err) => {
                    warn!(page = page_num, %err, "corrective retry call failed");
                    metadata
                        .warnings
                        .push(format!("corrective retry failed: {err}"));
                }
            }
        }

        metadata.reconciliation = outcome.status;
        metadata.discrepancy = outcome.discrepancy;
    }

    metadata.confidence = if items.is_empty() {
        0.0
    } else {
        CLEANED_CONFIDENCE
    };

    debug!(
        page = page_num,
        items = items.len(),
        total = %computed,
        status = %metadata.reconciliation,
        "page complete"
    );

    PageExtraction {
        page_num,
        items,
        reconciled_total: computed,
        metadata,
        duration_ms: elapsed_ms(started),
        error: None,
    }
}

/// The corrective retry costs a full vision call, so it runs only when the
/// discrepancy is worth chasing: above `retry_threshold` as a fraction of a
/// positive claimed total.
fn retry_is_economic(discrepancy: Decimal, claimed: Decimal, threshold: Decimal) -> bool {
    claimed > Decimal::ZERO && discrepancy > threshold * claimed
}

/// One vision round trip with transport retries and a per-call timeout.
///
/// Attempts are `0..=max_transport_retries` with the backoff doubling per
/// retry. A timeout counts as a failed attempt like any transport error;
/// only when every attempt timed out does the page fail with
/// [`PageError::Timeout`] rather than [`PageError::VisionFailed`].
async fn call_vision(
    provider: &Arc<dyn VisionProvider>,
    page_num: usize,
    page: &EncodedPage,
    system_prompt: &str,
    user_prompt: &str,
    config: &ExtractionConfig,
) -> Result<VisionReply, PageError> {
    let mut last_detail = String::new();
    let mut all_timeouts = true;

    for attempt in 0..=config.max_transport_retries {
        if attempt > 0 {
            let delay = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            debug!(page = page_num, attempt, delay_ms = delay, "retrying vision call");
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let request = VisionRequest {
            page,
            system_prompt,
            user_prompt,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };
        let call = provider.describe(request);
        match tokio::time::timeout(Duration::from_secs(config.api_timeout_secs), call).await {
            Ok(Ok(reply)) => return Ok(reply),
            Ok(Err(err)) => {
                warn!(page = page_num, attempt, %err, "vision call failed");
                last_detail = err.to_string();
                all_timeouts = false;
            }
            Err(_) => {
                warn!(
                    page = page_num,
                    attempt,
                    timeout_secs = config.api_timeout_secs,
                    "vision call timed out"
                );
                last_detail = format!("timed out after {}s", config.api_timeout_secs);
            }
        }
    }

    if all_timeouts {
        Err(PageError::Timeout {
            page: page_num,
            secs: config.api_timeout_secs,
        })
    } else {
        Err(PageError::VisionFailed {
            page: page_num,
            retries: config.max_transport_retries,
            detail: last_detail,
        })
    }
}

/// Apply corrective-retry corrections in order, matching items by cleaned
/// name. Unknown actions and modify-targets that no longer exist are
/// ignored. Returns the number of corrections actually applied.
fn apply_corrections(items: &mut Vec<LineItem>, corrections: Vec<RawCorrection>) -> usize {
    let mut applied = 0;
    for corr in corrections {
        let name = clean_name(&corr.item_name);
        if name.is_empty() {
            continue;
        }
        match corr.action.as_str() {
            "remove" => {
                let before = items.len();
                items.retain(|i| i.name != name);
                if items.len() < before {
                    applied += 1;
                }
            }
            "add" => {
                let quantity = to_decimal(&corr.quantity, Decimal::ZERO);
                let rate = to_decimal(&corr.rate, Decimal::ZERO);
                let amount = to_decimal(&corr.amount, line_item_total(quantity, rate));
                items.push(LineItem {
                    name,
                    quantity,
                    rate,
                    amount,
                    confidence: CLEANED_CONFIDENCE,
                });
                applied += 1;
            }
            "modify" => {
                if let Some(item) = items.iter_mut().find(|i| i.name == name) {
                    if !corr.quantity.is_null() {
                        item.quantity = to_decimal(&corr.quantity, item.quantity);
                    }
                    if !corr.rate.is_null() {
                        item.rate = to_decimal(&corr.rate, item.rate);
                    }
                    if !corr.amount.is_null() {
                        item.amount = to_decimal(&corr.amount, item.amount);
                    }
                    applied += 1;
                }
            }
            other => {
                debug!(action = other, "ignoring unknown correction action");
            }
        }
    }
    applied
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
