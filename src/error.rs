//! Error types for the billsense library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`] — **Fatal**: the extraction cannot start at all
//!   (no pages supplied, provider not configured, invalid configuration).
//!   Returned as `Err(ExtractError)` from the top-level `extract_*` functions.
//!
//! * [`PageError`] — **Non-fatal**: a single page failed (vision call
//!   exhausted its retries, timed out, or the image could not be encoded)
//!   but all sibling pages are fine. Stored inside
//!   [`crate::output::PageExtraction`] so callers can inspect partial
//!   success rather than losing the whole document to one bad page.
//!
//! Note what is *not* here: a malformed model response is never an error.
//! The recovery cascade always produces a (possibly empty) result, and a
//! reconciliation mismatch is an expected outcome that drives the corrective
//! retry — both are reported through
//! [`crate::output::ExtractionMetadata`], not through these types.

use thiserror::Error;

/// All fatal errors returned by the billsense library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::output::PageExtraction`] rather than propagated here.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// No page images were supplied to a document-level entry point.
    #[error("No pages supplied: at least one page image is required")]
    NoPages,

    /// The configured vision provider is not initialised (missing API key etc.).
    #[error("Vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The vision API returned an error response.
    #[error("Vision API error: {message}")]
    VisionApi { message: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// Stored alongside [`crate::output::PageExtraction`] when a page fails.
/// The overall extraction continues for all sibling pages.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The page image could not be encoded for the API request body.
    #[error("Page {page}: image encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// Vision call failed after all transport retries.
    #[error("Page {page}: vision call failed after {retries} retries: {detail}")]
    VisionFailed {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// Vision call timed out.
    #[error("Page {page}: vision call timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}
