//! billsense CLI: extract and reconcile bill line items from page images.
//!
//! ```text
//! billsense page1.png page2.png --total 572.03 --json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rust_decimal::Decimal;

use billsense::{
    extract_document, DocumentOutput, ExtractionConfig, ExtractionProgressCallback, PageInput,
};

#[derive(Parser, Debug)]
#[command(
    name = "billsense",
    version,
    about = "Extract line items from scanned bills and reconcile them against the printed total"
)]
struct Cli {
    /// Page images in page order (PNG or JPEG)
    #[arg(required = true, value_name = "IMAGE")]
    images: Vec<PathBuf>,

    /// Claimed bill total to reconcile against (applies to the last page
    /// when the document has several)
    #[arg(short, long, value_name = "AMOUNT")]
    total: Option<Decimal>,

    /// Emit the full result as JSON instead of a human summary
    #[arg(long)]
    json: bool,

    /// Pages extracted in parallel
    #[arg(short, long, default_value_t = 4)]
    concurrency: usize,

    /// Vision model identifier
    #[arg(short, long, env = "BILLSENSE_MODEL")]
    model: Option<String>,

    /// Replace the double-count keyword list (comma-separated)
    #[arg(long, value_name = "KW,KW,..", value_delimiter = ',')]
    keywords: Vec<String>,

    /// Disable the corrective retry round trip
    #[arg(long)]
    no_retry: bool,

    /// Maximum tokens per vision reply
    #[arg(long, default_value_t = 4096)]
    max_tokens: usize,

    /// Per-call timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Suppress the progress bar
    #[arg(long)]
    no_progress: bool,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Silence all logging
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

struct BarCallback {
    bar: ProgressBar,
}

impl ExtractionProgressCallback for BarCallback {
    fn on_document_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
    }

    fn on_page_complete(&self, page_num: usize, _total: usize, item_count: usize) {
        self.bar.inc(1);
        self.bar
            .set_message(format!("page {page_num}: {item_count} items"));
    }

    fn on_page_error(&self, page_num: usize, _total: usize, error: &str) {
        self.bar.inc(1);
        self.bar.set_message(format!("page {page_num} failed: {error}"));
    }

    fn on_document_complete(&self, _total: usize, success_count: usize) {
        self.bar
            .finish_with_message(format!("{success_count} page(s) extracted"));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let last = cli.images.len();
    let mut pages = Vec::with_capacity(last);
    for (idx, path) in cli.images.iter().enumerate() {
        let image = image::open(path)
            .with_context(|| format!("failed to open page image {}", path.display()))?;
        // The claimed total is printed once, on the final page.
        let input = match cli.total {
            Some(total) if idx + 1 == last => PageInput::with_claimed_total(image, total),
            _ => PageInput::new(image),
        };
        pages.push(input);
    }

    let mut builder = ExtractionConfig::builder()
        .concurrency(cli.concurrency)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.timeout);
    if let Some(model) = &cli.model {
        builder = builder.model(model);
    }
    if !cli.keywords.is_empty() {
        builder = builder.double_count_keywords(cli.keywords.clone());
    }
    if cli.no_retry {
        builder = builder.max_corrective_retries(0);
    }
    if !cli.no_progress && !cli.json {
        let bar = ProgressBar::new(last as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}",
            )?
            .progress_chars("=>-"),
        );
        builder = builder.progress_callback(Arc::new(BarCallback { bar }));
    }
    let config = builder.build()?;

    let output = extract_document(pages, &config).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_summary(&output);
    }

    if output.stats.processed_pages == 0 {
        bail!("every page failed");
    }
    Ok(())
}

fn init_logging(cli: &Cli) {
    if cli.quiet {
        return;
    }
    let level = match cli.verbose {
        0 => "billsense=info",
        1 => "billsense=debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_summary(output: &DocumentOutput) {
    for page in &output.pages {
        println!(
            "page {} [{}]  total {}  discrepancy {}",
            page.page_num,
            page.metadata.reconciliation,
            page.reconciled_total,
            page.metadata.discrepancy
        );
        for item in &page.items {
            println!(
                "  {:<40} {:>8} x {:>10}  = {:>12}",
                item.name, item.quantity, item.rate, item.amount
            );
        }
        for warning in &page.metadata.warnings {
            println!("  ! {warning}");
        }
    }
    let s = &output.stats;
    println!(
        "{} page(s), {} item(s), {} failed, {} corrective retries, {} in / {} out tokens, {} ms",
        s.total_pages,
        s.total_items,
        s.failed_pages,
        s.corrective_retries,
        s.total_input_tokens,
        s.total_output_tokens,
        s.total_duration_ms
    );
}
