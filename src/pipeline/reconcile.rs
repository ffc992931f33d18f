//! Reconciliation: compare the computed item sum against the bill's own
//! claimed total.
//!
//! All money maths in this crate runs through [`rust_decimal::Decimal`];
//! float arithmetic never touches an amount. Two-decimal rounding uses the
//! half-away-from-zero convention common on printed bills (2.005 rounds to
//! 2.01, not banker's 2.00).

use rust_decimal::{Decimal, RoundingStrategy};

use crate::output::{LineItem, ReconcileStatus, ReconciliationOutcome};

/// Round a money value to two decimal places, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// The expected amount of one line: quantity times unit rate, rounded.
pub fn line_item_total(quantity: Decimal, rate: Decimal) -> Decimal {
    round_money(quantity * rate)
}

/// Sum of stated per-item amounts, rounded once at the end.
pub fn sum_line_items(items: &[LineItem]) -> Decimal {
    round_money(items.iter().map(|i| i.amount).sum())
}

/// Per-item discrepancy tolerance: one cent, or 5% of the amount for
/// larger values where OCR of a long digit string gets less reliable.
pub fn amount_tolerance(amount: Decimal) -> Decimal {
    let proportional = Decimal::new(5, 2) * amount.abs();
    proportional.max(Decimal::new(1, 2))
}

/// Internal-consistency check: each item's stated amount should be near
/// quantity x rate. Items with a zero rate are skipped; on handwritten
/// bills the amount column is frequently the only number written down,
/// and the stated amount is authoritative there.
pub fn validate_line_item_amounts(items: &[LineItem]) -> Vec<String> {
    let mut errors = Vec::new();
    for item in items {
        if item.rate.is_zero() {
            continue;
        }
        let expected = line_item_total(item.quantity, item.rate);
        if (expected - item.amount).abs() > amount_tolerance(item.amount) {
            errors.push(format!(
                "'{}': stated amount {} differs from {} x {} = {}",
                item.name, item.amount, item.quantity, item.rate, expected
            ));
        }
    }
    errors
}

/// Compares computed and claimed totals under a relative threshold.
#[derive(Debug, Clone, Copy)]
pub struct ReconciliationEngine {
    /// Relative threshold as a fraction of the claimed total
    /// (0.0001 = 0.01%).
    threshold: Decimal,
}

impl ReconciliationEngine {
    pub fn new(threshold: Decimal) -> Self {
        Self { threshold }
    }

    /// Classify the discrepancy between `computed` and `claimed`.
    ///
    /// Zero discrepancy is always an exact match, including when both
    /// totals are zero. The relative comparison applies only to positive
    /// claimed totals; a zero or negative claim with any discrepancy is a
    /// mismatch outright.
    pub fn reconcile(&self, computed: Decimal, claimed: Decimal) -> ReconciliationOutcome {
        let discrepancy = round_money((computed - claimed).abs());
        let status = if discrepancy.is_zero() {
            ReconcileStatus::ExactMatch
        } else if claimed > Decimal::ZERO && discrepancy / claimed <= self.threshold {
            ReconcileStatus::WithinThreshold
        } else {
            ReconcileStatus::Mismatch
        };
        ReconciliationOutcome {
            is_match: status.is_match(),
            discrepancy,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn engine() -> ReconciliationEngine {
        ReconciliationEngine::new(dec!(0.0001))
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
    fn identical_totals_reconcile_exactly() {
        let outcome = engine().reconcile(dec!(572.03), dec!(572.03));
        assert_eq!(outcome.status, ReconcileStatus::ExactMatch);
        assert!(outcome.is_match);
        assert_eq!(outcome.discrepancy, dec!(0.00));
    }

    #[test]
    fn item_sum_matches_claimed_total() {
        let items = vec![
            item("Tab A", dec!(14), dec!(32), dec!(448.00)),
            item("Syrup B", dec!(1), dec!(124.03), dec!(124.03)),
        ];
        let computed = sum_line_items(&items);
        assert_eq!(computed, dec!(572.03));
        let outcome = engine().reconcile(computed, dec!(572.03));
        assert_eq!(outcome.status, ReconcileStatus::ExactMatch);
    }

    #[test]
    fn tiny_relative_discrepancy_is_within_threshold() {
        // 0.04 on 1000.00 is 0.004%, inside the 0.01% default.
        let outcome = engine().reconcile(dec!(999.96), dec!(1000.00));
        assert_eq!(outcome.status, ReconcileStatus::WithinThreshold);
        assert!(outcome.is_match);
        assert_eq!(outcome.discrepancy, dec!(0.04));
    }

    #[test]
    fn large_discrepancy_is_a_mismatch() {
        let outcome = engine().reconcile(dec!(448.00), dec!(572.03));
        assert_eq!(outcome.status, ReconcileStatus::Mismatch);
        assert!(!outcome.is_match);
        assert_eq!(outcome.discrepancy, dec!(124.03));
    }

    #[test]
    fn zero_claimed_total_with_discrepancy_is_a_mismatch() {
        let outcome = engine().reconcile(dec!(10.00), dec!(0));
        assert_eq!(outcome.status, ReconcileStatus::Mismatch);
    }

    #[test]
    fn both_zero_is_an_exact_match() {
        let outcome = engine().reconcile(dec!(0), dec!(0));
        assert_eq!(outcome.status, ReconcileStatus::ExactMatch);
    }

    #[test]
    fn money_rounds_half_away_from_zero() {
        assert_eq!(round_money(dec!(2.005)), dec!(2.01));
        assert_eq!(round_money(dec!(-2.005)), dec!(-2.01));
        assert_eq!(round_money(dec!(2.004)), dec!(2.00));
    }

    #[test]
    fn line_total_rounds_the_product() {
        assert_eq!(line_item_total(dec!(3), dec!(1.115)), dec!(3.35));
        assert_eq!(line_item_total(dec!(14), dec!(32)), dec!(448.00));
    }

    #[test]
    fn tolerance_has_a_one_cent_floor() {
        assert_eq!(amount_tolerance(dec!(0.10)), dec!(0.01));
        assert_eq!(amount_tolerance(dec!(100)), dec!(5.00));
    }

    #[test]
    fn amount_validation_flags_inconsistent_rows_and_skips_zero_rate() {
        let items = vec![
            item("Consistent", dec!(14), dec!(32), dec!(448.00)),
            item("Wrong", dec!(14), dec!(32), dec!(500.00)),
            item("Handwritten", dec!(0), dec!(0), dec!(75.00)),
        ];
        let errors = validate_line_item_amounts(&items);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Wrong"));
    }
}
