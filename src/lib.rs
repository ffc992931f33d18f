//! # billsense
//!
//! Line-item extraction from scanned bill and invoice images using vision
//! language models, with arithmetic reconciliation against the bill's own
//! printed total.
//!
//! A vision model reads each page and proposes line items as JSON; the
//! pipeline then treats that output as untrusted input — recovering it from
//! malformed syntax, normalising OCR artefacts, removing double-counted
//! summary rows, and checking that the items actually sum to the total the
//! bill claims. When they do not, one corrective retry shows the model its
//! own mismatch and asks it to look again.
//!
//! ```text
//!   page image
//!       │ encode (base64 PNG)
//!       ▼
//!   vision model ──► recovery parser ──► validator ──► guard
//!                                                        │
//!       ┌────────────────────────────────────────────────┘
//!       ▼
//!   reconcile computed sum vs claimed total
//!       │ mismatch worth a second call?
//!       ▼
//!   corrective retry (≤ 1) ──► final PageExtraction
//! ```
//!
//! Pages of a multi-page document are independent and run concurrently;
//! one failed page never sinks the document.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use billsense::{extract_document, ExtractionConfig, PageInput};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let image = image::open("bill_page_1.png")?;
//! let config = ExtractionConfig::builder()
//!     .model("gemini-2.0-flash")
//!     .concurrency(4)
//!     .build()?;
//!
//! let output = extract_document(vec![PageInput::new(image)], &config).await?;
//! for page in &output.pages {
//!     println!(
//!         "page {}: {} items, total {} ({})",
//!         page.page_num,
//!         page.items.len(),
//!         page.reconciled_total,
//!         page.metadata.reconciliation
//!     );
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The model backend defaults to Gemini configured from `GEMINI_API_KEY`;
//! any [`VisionProvider`] implementation can be injected through
//! [`ExtractionConfig::builder()`] instead.

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod stream;

pub use config::{ExtractionConfig, ExtractionConfigBuilder, DEFAULT_DOUBLE_COUNT_KEYWORDS};
pub use error::{ExtractError, PageError};
pub use extract::{extract_document, extract_page, PageInput};
pub use output::{
    DocumentOutput, ExtractionMetadata, ExtractionStats, LineItem, PageExtraction,
    ReconcileStatus, ReconciliationOutcome, UsageStats,
};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use provider::{GeminiProvider, VisionProvider, VisionReply, VisionRequest, DEFAULT_MODEL};
pub use stream::{extract_stream, PageStream};
