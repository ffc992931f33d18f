//! Normalisers: heterogeneous numbers → exact decimals, noisy names → clean
//! names.
//!
//! The model reports numbers however the bill printed them — `"$1,200.50"`,
//! `"448"`, `448.0`, `null` — and these all have to land in exact decimal
//! arithmetic because the downstream reconciliation compares against an
//! externally-stated total to hundredths-of-currency precision. Both entry
//! points are total functions: unparsable input yields the caller's default,
//! never an error.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use tracing::warn;

/// Currency symbols and whitespace stripped before numeric parsing.
static RE_CURRENCY: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\$£€₹\s]").unwrap());

/// Convert a raw JSON field into an exact decimal, falling back to `default`.
///
/// Handles numbers, currency-prefixed / comma-grouped strings, and
/// null/empty/garbage (→ `default`). Total function.
pub fn to_decimal(value: &Value, default: Decimal) -> Decimal {
    match value {
        Value::Number(n) => {
            Decimal::from_str(&n.to_string()).unwrap_or_else(|_| {
                warn!("unrepresentable number '{n}', using default");
                default
            })
        }
        Value::String(s) => parse_decimal_str(s).unwrap_or_else(|| {
            if !s.trim().is_empty() {
                warn!("failed to standardize number '{s}', using default");
            }
            default
        }),
        _ => default,
    }
}

/// Like [`to_decimal`] but distinguishes "absent" from "zero": null, missing
/// and unparseable values all yield `None`.
pub fn opt_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => parse_decimal_str(s),
        _ => None,
    }
}

/// Parse a currency-formatted string into a decimal.
///
/// `"$1,200.50"` → `1200.50`. Returns `None` when nothing numeric remains.
pub fn parse_decimal_str(s: &str) -> Option<Decimal> {
    let stripped = RE_CURRENCY.replace_all(s.trim(), "");
    let unseparated = strip_thousands_separators(&stripped);
    Decimal::from_str(&unseparated).ok()
}

/// Remove commas acting as thousands separators: a comma followed by exactly
/// three digits and then a non-digit (or `.` or end of string). Commas in any
/// other position are left alone so genuinely odd input fails to parse rather
/// than silently changing value.
fn strip_thousands_separators(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    for (i, &c) in chars.iter().enumerate() {
        if c == ',' {
            let next3 = &chars[(i + 1).min(chars.len())..(i + 4).min(chars.len())];
            let grouped = next3.len() == 3 && next3.iter().all(|d| d.is_ascii_digit());
            let boundary_after = chars
                .get(i + 4)
                .map(|d| !d.is_ascii_digit())
                .unwrap_or(true);
            if grouped && boundary_after {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Clean and normalise an item name.
///
/// Collapses internal whitespace runs to one space, strips leading/trailing
/// punctuation noise (`-`, `*`, whitespace), then repairs digit/letter OCR
/// confusions in strictly numeric contexts.
pub fn clean_name(name: &str) -> String {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '-' || c == '*' || c.is_whitespace());
    fix_digit_confusions(trimmed)
}

/// Substitute characters commonly misread for digits (`l`→`1`, `O`→`0`,
/// `S`→`5`, `B`→`8`) **only** when immediately bounded by digits on both
/// sides. The digit-bounded rule keeps this false-positive-averse: it can
/// only fire inside a numeric run that leaked into the name field, never in
/// ordinary words.
fn fix_digit_confusions(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        let replacement = match c {
            'l' => Some('1'),
            'O' => Some('0'),
            'S' => Some('5'),
            'B' => Some('8'),
            _ => None,
        };
        match replacement {
            Some(digit)
                if i > 0
                    && chars[i - 1].is_ascii_digit()
                    && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) =>
            {
                out.push(digit);
            }
            _ => out.push(c),
        }
    }
    out
}
