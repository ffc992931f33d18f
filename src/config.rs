//! Configuration for bill extraction.
//!
//! All behaviour is controlled through [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across pages, log them, and diff two runs to
//! understand why their outputs differ.
//!
//! Nothing here mutates at runtime: tolerances, the double-count keyword
//! set, the retry cap — all of it is fixed at construction time. The keyword
//! set in particular is *data*, not a module-level constant, so test suites
//! can substitute their own set without tricks.

use crate::error::ExtractError;
use crate::progress::ProgressCallback;
use crate::provider::VisionProvider;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Summary-row keywords that flag an item as a double-count candidate.
///
/// Used when the builder is not given a custom set. Matching is by exact
/// equality or standalone token/phrase, never bare substring, so a product
/// legitimately named "Total Care Shampoo" survives the keyword rule (and
/// the quantity/rate veto backs that up).
pub const DEFAULT_DOUBLE_COUNT_KEYWORDS: &[&str] = &[
    "total",
    "subtotal",
    "grand total",
    "amount due",
    "carry forward",
    "vat",
    "tax",
    "gst",
    "sgst",
    "cgst",
    "igst",
    "discount",
    "fee",
    "charge",
    "shipping",
];

/// Configuration for a bill extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use billsense::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .concurrency(4)
///     .model("gemini-2.0-flash")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Relative tolerance for reconciliation agreement, as a fraction of the
    /// claimed total. Default: 0.0001 (i.e. 0.01%).
    ///
    /// A bill total and an item sum that differ by a rounding hair should
    /// still count as reconciled; anything beyond this is a real mismatch.
    pub match_threshold: Decimal,

    /// Minimum discrepancy, as a fraction of the claimed total, that
    /// justifies the corrective round trip. Default: 0.005 (0.5%).
    ///
    /// Independent of `match_threshold` on purpose: a retry costs a full
    /// vision call, so a mismatch smaller than this is reported but not
    /// worth paying to chase.
    pub retry_threshold: Decimal,

    /// Corrective round trips per page: 0 disables, 1 is the cap. Default: 1.
    pub max_corrective_retries: u8,

    /// Summary-row keywords for the double-counting guard, lowercase.
    pub double_count_keywords: HashSet<String>,

    /// How many characters of text after an `item_name` match the salvage
    /// parser scans for that item's numeric fields. Default: 240.
    pub salvage_window: usize,

    /// Number of pages extracted in parallel. Default: 4.
    ///
    /// The vision call dominates latency and is idempotent per page, so
    /// pages of a multi-page document are safe to run concurrently.
    pub concurrency: usize,

    /// Vision model identifier. Default: "gemini-2.0-flash".
    pub model: Option<String>,

    /// Pre-constructed vision provider. Takes precedence over `model` +
    /// environment detection. This is also the injection point for tests.
    pub provider: Option<Arc<dyn VisionProvider>>,

    /// Sampling temperature. Default: 0.0 — deterministic transcription is
    /// exactly what extraction wants; creativity worsens accuracy.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Transport-level retry attempts per vision call (5xx, timeouts).
    /// Default: 3. Distinct from the corrective retry, which is a semantic
    /// re-ask driven by a reconciliation mismatch.
    pub max_transport_retries: u32,

    /// Initial transport retry delay in milliseconds (doubles per attempt).
    /// Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-vision-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom extraction system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Progress callback for per-page events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            match_threshold: Decimal::new(1, 4),  // 0.01%
            retry_threshold: Decimal::new(5, 3),  // 0.5%
            max_corrective_retries: 1,
            double_count_keywords: DEFAULT_DOUBLE_COUNT_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            salvage_window: 240,
            concurrency: 4,
            model: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_transport_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            system_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("match_threshold", &self.match_threshold)
            .field("retry_threshold", &self.retry_threshold)
            .field("max_corrective_retries", &self.max_corrective_retries)
            .field("double_count_keywords", &self.double_count_keywords.len())
            .field("salvage_window", &self.salvage_window)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn VisionProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_transport_retries", &self.max_transport_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn match_threshold(mut self, fraction: Decimal) -> Self {
        self.config.match_threshold = fraction;
        self
    }

    pub fn retry_threshold(mut self, fraction: Decimal) -> Self {
        self.config.retry_threshold = fraction;
        self
    }

    pub fn max_corrective_retries(mut self, n: u8) -> Self {
        self.config.max_corrective_retries = n.min(1);
        self
    }

    /// Replace the double-count keyword set entirely.
    pub fn double_count_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.double_count_keywords = keywords
            .into_iter()
            .map(|s| s.into().to_lowercase())
            .filter(|s| !s.trim().is_empty())
            .collect();
        self
    }

    pub fn salvage_window(mut self, chars: usize) -> Self {
        self.config.salvage_window = chars.max(32);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn VisionProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_transport_retries(mut self, n: u32) -> Self {
        self.config.max_transport_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.match_threshold < Decimal::ZERO {
            return Err(ExtractError::InvalidConfig(format!(
                "match_threshold must be ≥ 0, got {}",
                c.match_threshold
            )));
        }
        if c.retry_threshold < Decimal::ZERO {
            return Err(ExtractError::InvalidConfig(format!(
                "retry_threshold must be ≥ 0, got {}",
                c.retry_threshold
            )));
        }
        if c.concurrency == 0 {
            return Err(ExtractError::InvalidConfig(
                "concurrency must be ≥ 1".into(),
            ));
        }
        if c.double_count_keywords.is_empty() {
            return Err(ExtractError::InvalidConfig(
                "double_count_keywords must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn defaults_build() {
        let c = ExtractionConfig::builder().build().unwrap();
        assert_eq!(c.match_threshold, Decimal::from_str("0.0001").unwrap());
        assert_eq!(c.max_corrective_retries, 1);
        assert!(c.double_count_keywords.contains("subtotal"));
        assert!(c.double_count_keywords.contains("carry forward"));
    }

    #[test]
    fn custom_keywords_are_lowercased() {
        let c = ExtractionConfig::builder()
            .double_count_keywords(["TOTAL", "Rabatt"])
            .build()
            .unwrap();
        assert!(c.double_count_keywords.contains("total"));
        assert!(c.double_count_keywords.contains("rabatt"));
        assert_eq!(c.double_count_keywords.len(), 2);
    }

    #[test]
    fn blank_keywords_are_dropped_by_the_builder() {
        let c = ExtractionConfig::builder()
            .double_count_keywords(["total", "", "  "])
            .build()
            .unwrap();
        assert_eq!(c.double_count_keywords.len(), 1);
        assert!(c.double_count_keywords.contains("total"));

        // All-blank input leaves nothing to match and fails validation.
        let err = ExtractionConfig::builder()
            .double_count_keywords(["", "  "])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("double_count_keywords"));
    }

    #[test]
    fn empty_keyword_set_is_rejected() {
        let err = ExtractionConfig::builder()
            .double_count_keywords(Vec::<String>::new())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("double_count_keywords"));
    }

    #[test]
    fn corrective_retries_capped_at_one() {
        let c = ExtractionConfig::builder()
            .max_corrective_retries(5)
            .build()
            .unwrap();
        assert_eq!(c.max_corrective_retries, 1);
    }

    #[test]
    fn negative_threshold_is_rejected() {
        let err = ExtractionConfig::builder()
            .match_threshold(Decimal::from_str("-0.1").unwrap())
            .build()
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));
    }
}
