//! Validation and cleanup of raw extracted items.
//!
//! This is the one boundary where loosely-typed raw fields become typed
//! [`LineItem`]s: names are normalised, numbers become decimals, internally
//! inconsistent amounts are corrected to quantity x rate, and the
//! double-counting guard strips summary rows. Every change made is logged
//! into a [`CleaningReport`] so a reviewer can audit what happened to the
//! model's raw output.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::config::ExtractionConfig;
use crate::output::LineItem;
use crate::pipeline::guard::DoubleCountingGuard;
use crate::pipeline::normalize::{clean_name, to_decimal};
use crate::pipeline::reconcile::{amount_tolerance, line_item_total, validate_line_item_amounts};
use crate::pipeline::recover::RawItem;

/// Audit trail of one cleanup pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleaningReport {
    pub original_count: usize,
    pub final_count: usize,
    /// Amount overwrites, one entry per corrected item.
    pub corrections: Vec<String>,
    /// Names of rows the double-counting guard dropped.
    pub removed: Vec<String>,
    /// Items dropped as unusable, plus residual consistency failures.
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Turns raw parser output into validated line items.
#[derive(Debug, Clone)]
pub struct ExtractedDataValidator {
    guard: DoubleCountingGuard,
}

impl ExtractedDataValidator {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            guard: DoubleCountingGuard::new(&config.double_count_keywords),
        }
    }

    /// Clean every raw item, drop unusable ones, correct inconsistent
    /// amounts, and run the double-counting guard.
    pub fn validate_and_clean(&self, raw_items: Vec<RawItem>) -> (Vec<LineItem>, CleaningReport) {
        let mut report = CleaningReport {
            original_count: raw_items.len(),
            ..CleaningReport::default()
        };

        let mut items = Vec::with_capacity(raw_items.len());
        for raw in raw_items {
            let name = clean_name(&raw.item_name);
            let quantity = to_decimal(&raw.quantity, Decimal::ZERO);
            let rate = to_decimal(&raw.rate, Decimal::ZERO);
            let computed = line_item_total(quantity, rate);
            let mut amount = to_decimal(&raw.amount, computed);

            // A row with no name and no value carries no information.
            if name.is_empty() && amount.is_zero() {
                report
                    .errors
                    .push("dropped unusable item with empty name and zero amount".to_string());
                continue;
            }

            // When both quantity and rate are present, quantity x rate is
            // the more trustworthy figure; the stated amount is where OCR
            // misreads concentrate (misplaced decimal points, merged
            // digits). Zero-rate rows keep the stated amount untouched.
            if !rate.is_zero() && (computed - amount).abs() > amount_tolerance(amount) {
                report.corrections.push(format!(
                    "'{}': amount {} replaced with {} x {} = {}",
                    name, amount, quantity, rate, computed
                ));
                amount = computed;
            }

            items.push(LineItem {
                name,
                quantity,
                rate,
                amount,
                confidence: raw.confidence.unwrap_or(1.0).clamp(0.0, 1.0),
            });
        }

        let (kept, removed) = self.guard.filter(items);
        report.removed = removed.into_iter().map(|i| i.name).collect();
        report.errors.extend(validate_line_item_amounts(&kept));
        report.final_count = kept.len();

        if !report.corrections.is_empty() || !report.removed.is_empty() {
            debug!(
                corrections = report.corrections.len(),
                removed = report.removed.len(),
                "cleanup altered extracted items"
            );
        }

        (kept, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn validator() -> ExtractedDataValidator {
        ExtractedDataValidator::new(&ExtractionConfig::default())
    }

    fn raw(name: &str, quantity: serde_json::Value, rate: serde_json::Value, amount: serde_json::Value) -> RawItem {
        RawItem {
            item_name: name.to_string(),
            quantity,
            rate,
            amount,
            confidence: None,
        }
    }

    #[test]
    fn inconsistent_amount_is_replaced_by_quantity_times_rate() {
        let (items, report) =
            validator().validate_and_clean(vec![raw("Tab A", json!(14), json!(32), json!(500))]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].amount, dec!(448.00));
        assert_eq!(report.corrections.len(), 1);
        assert!(report.corrections[0].contains("448"));
    }

    #[test]
    fn zero_rate_keeps_the_stated_amount() {
        let (items, report) =
            validator().validate_and_clean(vec![raw("Handwritten", json!(0), json!(0), json!(75))]);
        assert_eq!(items[0].amount, dec!(75));
        assert!(report.corrections.is_empty());
    }

    #[test]
    fn missing_amount_falls_back_to_the_product() {
        let (items, _) = validator()
            .validate_and_clean(vec![raw("Tab A", json!(3), json!(12.5), serde_json::Value::Null)]);
        assert_eq!(items[0].amount, dec!(37.50));
    }

    #[test]
    fn string_numbers_and_messy_names_are_normalised() {
        let (items, _) = validator().validate_and_clean(vec![raw(
            "  Livi 300mg  Tab ",
            json!("2"),
            json!("$600.25"),
            json!("1,200.50"),
        )]);
        assert_eq!(items[0].name, "Livi 300mg Tab");
        assert_eq!(items[0].quantity, dec!(2));
        assert_eq!(items[0].rate, dec!(600.25));
        assert_eq!(items[0].amount, dec!(1200.50));
    }

    #[test]
    fn empty_unusable_items_are_dropped_with_an_error() {
        let (items, report) = validator().validate_and_clean(vec![
            raw("", json!(0), json!(0), json!(0)),
            raw("Real", json!(1), json!(10), json!(10)),
        ]);
        assert_eq!(items.len(), 1);
        assert_eq!(report.original_count, 2);
        assert_eq!(report.final_count, 1);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn summary_rows_appear_in_the_removed_list() {
        let (items, report) = validator().validate_and_clean(vec![
            raw("Tab A", json!(1), json!(448), json!(448)),
            raw("Total", json!(0), json!(0), json!(572.03)),
        ]);
        assert_eq!(items.len(), 1);
        assert_eq!(report.removed, vec!["Total".to_string()]);
    }

    #[test]
    fn confidence_defaults_to_one_and_is_clamped() {
        let mut item = raw("A", json!(1), json!(5), json!(5));
        item.confidence = Some(1.7);
        let (items, _) = validator().validate_and_clean(vec![item]);
        assert_eq!(items[0].confidence, 1.0);

        let (items, _) = validator().validate_and_clean(vec![raw("B", json!(1), json!(5), json!(5))]);
        assert_eq!(items[0].confidence, 1.0);
    }
}
