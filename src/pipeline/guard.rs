//! Double-counting guard: drop summary rows masquerading as line items.
//!
//! Vision models routinely extract a bill's "Total" or "Subtotal" row as
//! one more item, which then double-counts against the computed sum. The
//! guard removes such rows by keyword, with a veto for genuine products
//! whose names merely contain a keyword, plus a structural outlier check
//! for summary rows that carry no keyword at all.

use std::collections::HashSet;

use rust_decimal::Decimal;
use tracing::debug;

use crate::output::LineItem;

/// Filters summary rows out of an extracted item list.
///
/// Filtering is idempotent: running [`filter`](Self::filter) over its own
/// kept output removes nothing further, since every decision depends only
/// on the item itself and items already kept before it.
#[derive(Debug, Clone)]
pub struct DoubleCountingGuard {
    keywords: Vec<String>,
}

impl DoubleCountingGuard {
    /// Keywords are matched case-insensitively; they are lowercased once
    /// here rather than per item. Blank entries (a config or CLI artefact
    /// like a doubled comma) are dropped: an empty keyword has no tokens
    /// to match and would otherwise break the token-window comparison.
    pub fn new(keywords: &HashSet<String>) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.to_lowercase())
                .filter(|k| !k.trim().is_empty())
                .collect(),
        }
    }

    /// Split `items` into (kept, removed).
    pub fn filter(&self, items: Vec<LineItem>) -> (Vec<LineItem>, Vec<LineItem>) {
        let mut kept: Vec<LineItem> = Vec::with_capacity(items.len());
        let mut removed = Vec::new();

        for item in items {
            if self.is_summary_keyword(&item.name) {
                // Veto: a keyword row with real quantity and rate is a
                // product whose name happens to contain the keyword
                // ("Total Care Shampoo"), not a summary row.
                if item.quantity > Decimal::ZERO && item.rate != Decimal::ZERO {
                    kept.push(item);
                } else {
                    debug!(name = %item.name, "guard removed summary-keyword row");
                    removed.push(item);
                }
                continue;
            }

            // Structural check: with enough accepted items to trust the
            // running aggregate, a row whose amount dwarfs the average AND
            // equals the running sum is the total row under another name.
            if kept.len() >= 3 && is_sum_outlier(&item, &kept) {
                debug!(name = %item.name, amount = %item.amount, "guard removed sum-outlier row");
                removed.push(item);
            } else {
                kept.push(item);
            }
        }

        (kept, removed)
    }

    /// True when the item name equals a keyword, or contains one as a
    /// standalone token phrase. Substring matches inside a longer word
    /// ("feeding", "subtotaled") do not count.
    fn is_summary_keyword(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        let tokens: Vec<&str> = lowered.split_whitespace().collect();
        self.keywords.iter().any(|kw| {
            if lowered == *kw {
                return true;
            }
            let kw_tokens: Vec<&str> = kw.split_whitespace().collect();
            tokens
                .windows(kw_tokens.len())
                .any(|window| window == kw_tokens.as_slice())
        })
    }
}

// An exact-sum row necessarily equals `kept.len()` times the average, so
// the 5x gate can only pass once more than five items are accepted. Short
// bills fall back on the keyword rule alone.
fn is_sum_outlier(item: &LineItem, kept: &[LineItem]) -> bool {
    let sum: Decimal = kept.iter().map(|i| i.amount).sum();
    let count = Decimal::from(kept.len());
    let average = sum / count;
    let tolerance = Decimal::new(1, 2); // 0.01
    item.amount > average * Decimal::from(5) && (item.amount - sum).abs() < tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use crate::config::DEFAULT_DOUBLE_COUNT_KEYWORDS;

    fn guard() -> DoubleCountingGuard {
        let keywords: HashSet<String> = DEFAULT_DOUBLE_COUNT_KEYWORDS
            .iter()
            .map(|k| k.to_string())
            .collect();
        DoubleCountingGuard::new(&keywords)
    }

    fn item(name: &str, quantity: Decimal, rate: Decimal, amount: Decimal) -> LineItem {
        LineItem {
            name: name.to_string(),
            quantity,
            rate,
            amount,
            confidence: 1.0,
        }
    }

    #[test]
    fn total_row_is_removed_and_product_kept() {
        let items = vec![
            item("Tab A", dec!(1), dec!(448), dec!(448.00)),
            item("Total", dec!(0), dec!(0), dec!(572.03)),
        ];
        let (kept, removed) = guard().filter(items);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "Tab A");
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].name, "Total");
    }

    #[test]
    fn keyword_row_with_quantity_and_rate_is_vetoed() {
        let items = vec![item("Total Care Shampoo", dec!(2), dec!(90), dec!(180.00))];
        let (kept, removed) = guard().filter(items);
        assert_eq!(kept.len(), 1);
        assert!(removed.is_empty());
    }

    #[test]
    fn keyword_inside_longer_word_does_not_match() {
        let items = vec![
            item("Feeding Bottle", dec!(0), dec!(0), dec!(120.00)),
            item("Discharge Kit", dec!(0), dec!(0), dec!(85.00)),
        ];
        let (kept, removed) = guard().filter(items);
        assert_eq!(kept.len(), 2);
        assert!(removed.is_empty());
    }

    #[test]
    fn blank_keywords_are_ignored() {
        // A doubled comma in a CLI keyword list produces an empty entry;
        // matching must neither panic nor treat it as a wildcard.
        let keywords: HashSet<String> = ["total", "", "  ", "tax"]
            .iter()
            .map(|k| k.to_string())
            .collect();
        let guard = DoubleCountingGuard::new(&keywords);
        let items = vec![
            item("Paracetamol 500mg", dec!(2), dec!(12), dec!(24.00)),
            item("Total", dec!(0), dec!(0), dec!(24.00)),
        ];
        let (kept, removed) = guard.filter(items);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "Paracetamol 500mg");
        assert_eq!(removed[0].name, "Total");
    }

    #[test]
    fn multi_word_keyword_matches_token_phrase() {
        let items = vec![item("Grand Total Due", dec!(0), dec!(0), dec!(999.00))];
        let (_, removed) = guard().filter(items);
        assert_eq!(removed.len(), 1);
    }

    #[test]
    fn unlabelled_sum_outlier_is_removed() {
        let items = vec![
            item("A", dec!(1), dec!(100), dec!(100.00)),
            item("B", dec!(1), dec!(150), dec!(150.00)),
            item("C", dec!(1), dec!(250), dec!(250.00)),
            item("D", dec!(1), dec!(80), dec!(80.00)),
            item("E", dec!(1), dec!(120), dec!(120.00)),
            item("F", dec!(1), dec!(300), dec!(300.00)),
            // 1000.00 is 6x the 166.67 average (the exact-sum row always
            // sits at Nx the average, so the 5x gate needs N > 5) and
            // equals the running sum
            item("Balance", dec!(0), dec!(0), dec!(1000.00)),
        ];
        let (kept, removed) = guard().filter(items);
        assert_eq!(kept.len(), 6);
        assert_eq!(removed[0].name, "Balance");
    }

    #[test]
    fn large_item_that_is_not_the_sum_is_kept() {
        let items = vec![
            item("A", dec!(1), dec!(100), dec!(100.00)),
            item("B", dec!(1), dec!(150), dec!(150.00)),
            item("C", dec!(1), dec!(250), dec!(250.00)),
            item("MRI Scan", dec!(1), dec!(4500), dec!(4500.00)),
        ];
        let (kept, removed) = guard().filter(items);
        assert_eq!(kept.len(), 4);
        assert!(removed.is_empty());
    }

    #[test]
    fn outlier_rule_needs_three_accepted_items() {
        let items = vec![
            item("A", dec!(1), dec!(100), dec!(100.00)),
            item("B", dec!(1), dec!(100), dec!(100.00)),
            item("Balance", dec!(0), dec!(0), dec!(200.00)),
        ];
        let (kept, removed) = guard().filter(items);
        assert_eq!(kept.len(), 3);
        assert!(removed.is_empty());
    }

    #[test]
    fn filtering_is_idempotent() {
        let items = vec![
            item("A", dec!(1), dec!(100), dec!(100.00)),
            item("B", dec!(1), dec!(150), dec!(150.00)),
            item("C", dec!(1), dec!(250), dec!(250.00)),
            item("Subtotal", dec!(0), dec!(0), dec!(500.00)),
        ];
        let g = guard();
        let (kept, _) = g.filter(items);
        let (kept_again, removed_again) = g.filter(kept.clone());
        assert_eq!(kept_again, kept);
        assert!(removed_again.is_empty());
    }
}
