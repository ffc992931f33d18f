//! Result types: line items, reconciliation outcomes, and per-page metadata.
//!
//! Everything here is page-scoped and short-lived: a [`PageExtraction`] is
//! built by the orchestrator for exactly one page and returned to the caller.
//! The only value that crosses pages is [`UsageStats`], and it does so as an
//! explicit per-page delta folded by summation at the document level — never
//! as a shared mutable counter.

use crate::error::PageError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One purchasable row of a bill: name, quantity, unit rate, and amount.
///
/// Soft invariant: `quantity * rate ≈ amount` within
/// `max(0.01, 0.05 * amount)`. Violations are corrected by the validator
/// (when the rate is known) or tolerated with the stated amount taken as
/// authoritative (handwritten bills often omit the rate). They are never
/// silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Item name as printed on the bill, after normalisation.
    pub name: String,
    /// Number of units.
    pub quantity: Decimal,
    /// Unit price. Zero means "not stated" and makes `amount` authoritative.
    pub rate: Decimal,
    /// Net amount for this row.
    pub amount: Decimal,
    /// Model-reported confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Outcome of comparing a computed item sum against a claimed bill total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    /// Reconciliation has not run (no claimed total, or nothing extracted).
    Pending,
    /// Discrepancy is exactly zero.
    ExactMatch,
    /// Discrepancy is nonzero but within the configured relative tolerance.
    WithinThreshold,
    /// Discrepancy exceeds the tolerance.
    Mismatch,
    /// The page pipeline terminated in its error state.
    Error,
}

impl ReconcileStatus {
    /// Whether this status counts as a successful reconciliation.
    pub fn is_match(self) -> bool {
        matches!(self, Self::ExactMatch | Self::WithinThreshold)
    }
}

impl fmt::Display for ReconcileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::ExactMatch => "exact_match",
            Self::WithinThreshold => "within_threshold",
            Self::Mismatch => "mismatch",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Result of one reconciliation run. Computed fresh each time; never
/// persisted beyond the extraction call that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationOutcome {
    pub is_match: bool,
    /// `|computed_sum - claimed_total|`, always ≥ 0.
    pub discrepancy: Decimal,
    pub status: ReconcileStatus,
}

/// Token counters for the vision calls made on behalf of one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Number of vision round trips (1, or 2 when the corrective retry ran).
    pub calls: u32,
}

impl UsageStats {
    /// Fold another delta into this one.
    pub fn add(&mut self, other: &UsageStats) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.calls += other.calls;
    }
}

/// Diagnostics accumulated while extracting one page.
///
/// Owned by the orchestrator for the lifetime of one extraction call,
/// returned inside [`PageExtraction`], and discarded by the caller at will.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    /// 1-indexed page number.
    pub page_no: usize,
    /// Final reconciliation status for the page.
    pub reconciliation: ReconcileStatus,
    /// Absolute discrepancy after the final reconciliation run.
    pub discrepancy: Decimal,
    /// Corrective round trips taken: 0 or 1.
    pub retry_attempts: u8,
    /// Overall extraction confidence in `[0, 1]`.
    pub confidence: f32,
    /// Human-readable warnings: corrections applied, removed summary rows,
    /// per-item arithmetic violations, absorbed failure text.
    pub warnings: Vec<String>,
    /// Token usage for this page's vision calls.
    pub usage: UsageStats,
}

impl ExtractionMetadata {
    pub(crate) fn new(page_no: usize) -> Self {
        Self {
            page_no,
            reconciliation: ReconcileStatus::Pending,
            discrepancy: Decimal::ZERO,
            retry_attempts: 0,
            confidence: 0.0,
            warnings: Vec::new(),
            usage: UsageStats::default(),
        }
    }
}

/// The result of extracting one page: cleaned items, the authoritative
/// computed total, and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageExtraction {
    /// 1-indexed page number.
    pub page_num: usize,
    /// Cleaned, de-duplicated, reconciled line items.
    pub items: Vec<LineItem>,
    /// Sum of `items[*].amount`, rounded to 2 decimal places half-up.
    /// This is the authoritative total, regardless of what the bill claims.
    pub reconciled_total: Decimal,
    /// Diagnostics: reconciliation status, warnings, usage counters.
    pub metadata: ExtractionMetadata,
    /// Wall-clock time spent on this page.
    pub duration_ms: u64,
    /// Set when the page terminated in its error state.
    pub error: Option<PageError>,
}

impl PageExtraction {
    /// Build the terminal error-state result for a page: empty items,
    /// `reconciliation = error`, and the failure text folded into warnings.
    pub(crate) fn from_error(page_num: usize, err: PageError, duration_ms: u64) -> Self {
        let mut metadata = ExtractionMetadata::new(page_num);
        metadata.reconciliation = ReconcileStatus::Error;
        metadata.warnings.push(err.to_string());
        Self {
            page_num,
            items: Vec::new(),
            reconciled_total: Decimal::ZERO,
            metadata,
            duration_ms,
            error: Some(err),
        }
    }
}

/// Aggregate counters for a whole multi-page document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_pages: usize,
    /// Pages that finished without entering the error state.
    pub processed_pages: usize,
    pub failed_pages: usize,
    /// Line items across all processed pages.
    pub total_items: usize,
    /// Pages on which the corrective retry ran.
    pub corrective_retries: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

/// Document-level output: per-page results in page order plus aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutput {
    /// Page results, sorted by `page_num` — deterministic regardless of
    /// which worker finished first.
    pub pages: Vec<PageExtraction>,
    pub stats: ExtractionStats,
}
