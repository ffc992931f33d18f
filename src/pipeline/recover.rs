//! Response recovery: turn raw vision-model text into a well-shaped result.
//!
//! Vision models reliably get *values* right more often than *syntax*: the
//! digits in a reply tend to be correct even when the JSON around them is
//! broken — chat preambles, trailing commas, literal newlines inside strings,
//! two objects glued together. So recovery is modelled as an ordered list of
//! strategies, each returning `Option<RawExtraction>`, and [`parse`] picks
//! the first success — a first-match combinator, not a nest of exception
//! handlers:
//!
//! 1. strict  — `serde_json` on the first-`{`-to-last-`}` slice
//! 2. lenient — tolerate trailing commas and Python-ish bare literals
//! 3. repair  — collapse embedded control characters, merge `}{` seams,
//!    strip trailing commas, then re-attempt strict
//! 4. salvage — per-field regex extraction with a bounded look-ahead window;
//!    needs no valid JSON at all
//!
//! [`ResponseRecoveryParser::parse`] is a total function: no input makes it
//! raise, and absent fields default to empty/None rather than an error state.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Note attached when the reply contains no braces at all.
const NOTE_NO_JSON: &str = "no JSON found";

/// Raw extraction result, the parser's output contract regardless of how
/// much of the original response was malformed.
///
/// Numeric fields stay as [`serde_json::Value`] (number, string, or null)
/// here; they are converted to decimals at exactly one boundary, the
/// validator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawExtraction {
    #[serde(default, alias = "extraction_reasoning")]
    pub reasoning: String,
    #[serde(default)]
    pub line_items: Vec<RawItem>,
    #[serde(default)]
    pub bill_total: Option<Value>,
    #[serde(default)]
    pub subtotals: Vec<RawSubtotal>,
    #[serde(default)]
    pub notes: String,
}

impl RawExtraction {
    fn with_note(note: &str) -> Self {
        Self {
            notes: note.to_string(),
            ..Self::default()
        }
    }
}

/// One raw item record as the model stated it. Field aliases cover the two
/// naming styles models produce (`quantity` vs `item_quantity`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawItem {
    #[serde(default, alias = "name")]
    pub item_name: String,
    #[serde(default, alias = "item_quantity")]
    pub quantity: Value,
    #[serde(default, alias = "item_rate")]
    pub rate: Value,
    #[serde(default, alias = "item_amount")]
    pub amount: Value,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// An intermediate subtotal row the model noticed, kept for diagnostics.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSubtotal {
    #[serde(default, alias = "label")]
    pub description: String,
    #[serde(default)]
    pub amount: Value,
}

/// Reply to the corrective round trip: a list of proposed corrections plus
/// an advisory total hint (never trusted over the recomputed sum).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorrectiveReply {
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub corrections: Vec<RawCorrection>,
    #[serde(default)]
    pub new_total: Option<Value>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// One proposed correction: add, remove, or modify an item, matched by name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCorrection {
    #[serde(default)]
    pub action: String,
    #[serde(default, alias = "name")]
    pub item_name: String,
    #[serde(default, alias = "item_quantity")]
    pub quantity: Value,
    #[serde(default, alias = "item_rate")]
    pub rate: Value,
    #[serde(default, alias = "item_amount")]
    pub amount: Value,
    #[serde(default)]
    pub reason: String,
}

/// The layered recovery parser. Stateless apart from configuration.
#[derive(Debug, Clone)]
pub struct ResponseRecoveryParser {
    /// Look-ahead window (chars) the salvage stage scans after each
    /// `item_name` match for that item's numeric fields.
    salvage_window: usize,
}

impl Default for ResponseRecoveryParser {
    fn default() -> Self {
        Self {
            salvage_window: 240,
        }
    }
}

impl ResponseRecoveryParser {
    pub fn new(salvage_window: usize) -> Self {
        Self { salvage_window }
    }

    /// Extract a [`RawExtraction`] from raw model output. Total function.
    ///
    /// Salvage runs not only when every syntactic stage fails but also when
    /// one *succeeds with zero items*: a truncated reply can leave a brace
    /// slice that parses as a valid object carrying none of the expected
    /// fields, and the items still sitting in the surrounding text must not
    /// be lost to that accident. A genuinely empty well-formed reply is
    /// returned as-is once salvage confirms there is nothing to recover.
    pub fn parse(&self, raw: &str) -> RawExtraction {
        let strategies: [(&str, fn(&str) -> Option<RawExtraction>); 3] = [
            ("strict", parse_strict),
            ("lenient", parse_lenient),
            ("repair", parse_repaired),
        ];

        let mut empty_syntactic = None;
        if let Some(slice) = slice_braces(raw) {
            for (stage, strategy) in strategies {
                if let Some(result) = strategy(slice) {
                    if !result.line_items.is_empty() {
                        debug!(stage, items = result.line_items.len(), "recovery succeeded");
                        return result;
                    }
                    debug!(stage, "parse yielded zero items, attempting salvage");
                    empty_syntactic = Some(result);
                    break;
                }
            }
        }

        if let Some(result) = self.parse_salvage(raw) {
            debug!(items = result.line_items.len(), "recovery succeeded via salvage");
            return result;
        }

        if let Some(result) = empty_syntactic {
            return result;
        }

        if !raw.contains('{') {
            debug!("recovery: no braces in reply");
            return RawExtraction::with_note(NOTE_NO_JSON);
        }
        // Terminal, non-retryable parse failure for this call. The note names
        // the stages so the orchestrator's warnings stay inspectable.
        RawExtraction::with_note(
            "response unrecoverable: strict, lenient, repair and salvage all found no items",
        )
    }

    /// Parse the corrective round-trip reply. Total function: unusable text
    /// yields an empty correction list, which the orchestrator treats as
    /// "nothing to apply".
    pub fn parse_corrective(&self, raw: &str) -> CorrectiveReply {
        let Some(slice) = slice_braces(raw) else {
            return CorrectiveReply::default();
        };
        serde_json::from_str(slice)
            .ok()
            .or_else(|| serde_json::from_str(&relax_json(slice)).ok())
            .unwrap_or_default()
    }

    // ── Stage 4: field salvage ───────────────────────────────────────────

    /// Regex-match every `item_name` occurrence, then scan a bounded window
    /// of subsequent text for the nearest quantity/rate/amount fields. An
    /// item is assembled only if at least one numeric field is recovered.
    fn parse_salvage(&self, raw: &str) -> Option<RawExtraction> {
        static RE_NAME: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r#""(?:item_)?name"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap()
        });

        let name_matches: Vec<_> = RE_NAME.captures_iter(raw).collect();
        if name_matches.is_empty() {
            return None;
        }

        let mut items = Vec::new();
        for (i, caps) in name_matches.iter().enumerate() {
            let full = caps.get(0).unwrap();
            let window_start = full.end();
            // The window is bounded both by the configured size and by the
            // start of the next item, so fields never bleed across items.
            let mut window_end = (window_start + self.salvage_window).min(raw.len());
            if let Some(next) = name_matches.get(i + 1) {
                window_end = window_end.min(next.get(0).unwrap().start());
            }
            while window_end > window_start && !raw.is_char_boundary(window_end) {
                window_end -= 1;
            }
            let window = &raw[window_start..window_end];

            let quantity = salvage_number(window, &RE_QUANTITY);
            let rate = salvage_number(window, &RE_RATE);
            let amount = salvage_number(window, &RE_AMOUNT);

            if quantity.is_null() && rate.is_null() && amount.is_null() {
                continue;
            }
            items.push(RawItem {
                item_name: caps[1].to_string(),
                quantity,
                rate,
                amount,
                confidence: None,
            });
        }

        if items.is_empty() {
            return None;
        }

        Some(RawExtraction {
            line_items: items,
            bill_total: salvage_bill_total(raw),
            notes: "fields salvaged from malformed response".to_string(),
            ..RawExtraction::default()
        })
    }
}

// ── Stage 1: brace slicing ───────────────────────────────────────────────

/// Slice from the first `{` to the last `}`; `None` when either is absent.
fn slice_braces(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

// ── Stage 2: strict ──────────────────────────────────────────────────────

fn parse_strict(json: &str) -> Option<RawExtraction> {
    serde_json::from_str(json).ok()
}

// ── Stage 3: lenient ─────────────────────────────────────────────────────

static RE_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").unwrap());
static RE_BARE_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":\s*(None|NaN|nan|undefined)\b").unwrap());

/// Relax the most common grammar violations: trailing commas before closing
/// brackets and Python-ish bare literals in value position.
fn relax_json(json: &str) -> String {
    let no_commas = RE_TRAILING_COMMA.replace_all(json, "$1");
    RE_BARE_LITERAL.replace_all(&no_commas, ": null").to_string()
}

fn parse_lenient(json: &str) -> Option<RawExtraction> {
    serde_json::from_str(&relax_json(json)).ok()
}

// ── Stage 4: structural repair ───────────────────────────────────────────

static RE_OBJECT_SEAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\}\s*\{").unwrap());

/// Apply structural repairs, then re-attempt a strict parse:
/// collapse literal control characters to spaces (JSON strings must not
/// contain them), merge adjacent `}{` seams into `},{`, and strip trailing
/// commas.
fn parse_repaired(json: &str) -> Option<RawExtraction> {
    let despaced: String = json
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let seamed = RE_OBJECT_SEAM.replace_all(&despaced, "},{");
    let repaired = RE_TRAILING_COMMA.replace_all(&seamed, "$1");
    serde_json::from_str(&repaired).ok()
}

// ── Salvage helpers ──────────────────────────────────────────────────────

static RE_QUANTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:(?:item_)?quantity|qty)"\s*:\s*"?\s*[\$£€₹]?\s*(-?[0-9][0-9,]*\.?[0-9]*)"#)
        .unwrap()
});
static RE_RATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:(?:item_)?rate|unit_price)"\s*:\s*"?\s*[\$£€₹]?\s*(-?[0-9][0-9,]*\.?[0-9]*)"#)
        .unwrap()
});
static RE_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:(?:item_)?amount|total)"\s*:\s*"?\s*[\$£€₹]?\s*(-?[0-9][0-9,]*\.?[0-9]*)"#)
        .unwrap()
});

/// Match a numeric field in `window`, tolerating quoting and a currency
/// prefix. Returns `Value::Null` when nothing matches; the string form is
/// converted by the normaliser later.
fn salvage_number(window: &str, re: &Regex) -> Value {
    match re.captures(window) {
        Some(caps) => Value::String(caps[1].trim_end_matches([',', '.']).to_string()),
        None => Value::Null,
    }
}

static RE_BILL_TOTAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""bill_total"\s*:\s*"?\s*[\$£€₹]?\s*(-?[0-9][0-9,]*\.?[0-9]*)"#).unwrap()
});

fn salvage_bill_total(raw: &str) -> Option<Value> {
    RE_BILL_TOTAL
        .captures(raw)
        .map(|caps| Value::String(caps[1].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parser() -> ResponseRecoveryParser {
        ResponseRecoveryParser::default()
    }

    const WELL_FORMED: &str = r#"{
        "extraction_reasoning": "found a two-row table",
        "line_items": [
            {"item_name": "Tab A", "quantity": 1, "rate": 448, "amount": 448.00, "confidence": 0.95},
            {"item_name": "Syrup B", "quantity": 1, "rate": 124.03, "amount": 124.03}
        ],
        "bill_total": 572.03,
        "subtotals": [{"description": "Pharmacy", "amount": 572.03}],
        "notes": "clear print"
    }"#;

    #[test]
    fn well_formed_input_equals_direct_decode() {
        let via_cascade = parser().parse(WELL_FORMED);
        let direct: RawExtraction = serde_json::from_str(WELL_FORMED).unwrap();
        assert_eq!(via_cascade.line_items.len(), direct.line_items.len());
        assert_eq!(via_cascade.reasoning, direct.reasoning);
        assert_eq!(via_cascade.bill_total, direct.bill_total);
        assert_eq!(via_cascade.notes, direct.notes);
        assert_eq!(via_cascade.subtotals.len(), 1);
        assert_eq!(via_cascade.line_items[0].item_name, "Tab A");
        assert_eq!(via_cascade.line_items[0].confidence, Some(0.95));
    }

    #[test]
    fn chat_preamble_and_trailing_comma_are_recovered() {
        let raw = r#"Sure, here is the data: {"line_items": [{"item_name": "A", "quantity": 1, "rate": 2, "amount": 2},]} Thanks!"#;
        let result = parser().parse(raw);
        assert_eq!(result.line_items.len(), 1);
        assert_eq!(result.line_items[0].item_name, "A");
        assert_eq!(result.line_items[0].amount, serde_json::json!(2));
    }

    #[test]
    fn no_braces_yields_empty_with_note() {
        let result = parser().parse("I could not read this image, sorry.");
        assert!(result.line_items.is_empty());
        assert_eq!(result.notes, "no JSON found");
    }

    #[test]
    fn empty_input_never_raises() {
        for raw in ["", "{}", "{", "}", "null", "[1,2,3]"] {
            let result = parser().parse(raw);
            assert!(result.line_items.is_empty(), "input {raw:?}");
        }
    }

    #[test]
    fn bare_python_literals_are_relaxed() {
        let raw = r#"{"line_items": [{"item_name": "A", "quantity": 2, "rate": None, "amount": 10}], "bill_total": NaN}"#;
        let result = parser().parse(raw);
        assert_eq!(result.line_items.len(), 1);
        assert!(result.line_items[0].rate.is_null());
        // serde folds a JSON null into Option::None for Option<Value>
        assert!(result.bill_total.is_none());
    }

    #[test]
    fn truncated_reply_without_closing_brace_is_salvaged() {
        // Output cut off mid-generation: an opening brace but no closing
        // one anywhere. Field salvage must still recover the items.
        let raw = r#"{"line_items": [
            {"item_name": "Tab A", "quantity": 14, "rate": 32, "amount": 448.00},
            {"item_name": "Cough Syrup", "quantity": 1, "rate": 124.03, "amount": 124."#;
        let result = parser().parse(raw);
        assert_eq!(result.line_items.len(), 2);
        assert_eq!(result.line_items[0].item_name, "Tab A");
        assert_eq!(result.line_items[1].item_name, "Cough Syrup");
        assert!(result.notes.contains("salvaged"));
    }

    #[test]
    fn well_formed_empty_reply_keeps_its_notes() {
        // A valid reply with no items is a real outcome (blank page); the
        // parsed result survives the salvage attempt untouched.
        let raw = r#"{"line_items": [], "bill_total": null, "notes": "blank page"}"#;
        let result = parser().parse(raw);
        assert!(result.line_items.is_empty());
        assert_eq!(result.notes, "blank page");
    }

    #[test]
    fn embedded_newlines_are_repaired() {
        let raw = "{\"line_items\": [{\"item_name\": \"Gauze\nRoll\", \"quantity\": 2, \"rate\": 15, \"amount\": 30}]}";
        let result = parser().parse(raw);
        assert_eq!(result.line_items.len(), 1);
        assert_eq!(result.line_items[0].item_name, "Gauze Roll");
    }

    #[test]
    fn adjacent_object_seam_is_merged() {
        let raw = r#"{"line_items": [{"item_name": "A", "quantity": 1, "rate": 5, "amount": 5} {"item_name": "B", "quantity": 1, "rate": 7, "amount": 7}]}"#;
        let result = parser().parse(raw);
        assert_eq!(result.line_items.len(), 2);
        assert_eq!(result.line_items[1].item_name, "B");
    }

    #[test]
    fn salvage_recovers_items_from_broken_json() {
        // Unbalanced quotes make every syntactic stage fail; the field
        // salvage still assembles the two items and the bill total.
        let raw = r#"{"line_items": [
            {"item_name": "Tab A", "quantity": 14, "rate": "32, "amount": 448},
            {"item_name": "Syrup B", "quantity": 1, "amount": "$124.03"
            "bill_total": 572.03"#;
        let result = parser().parse(raw);
        assert_eq!(result.line_items.len(), 2);
        assert_eq!(result.line_items[0].item_name, "Tab A");
        assert_eq!(result.line_items[0].quantity, Value::String("14".into()));
        assert_eq!(result.line_items[1].amount, Value::String("124.03".into()));
        assert_eq!(result.bill_total, Some(Value::String("572.03".into())));
        assert!(result.notes.contains("salvaged"));
    }

    #[test]
    fn salvage_requires_at_least_one_numeric_field() {
        let raw = r#"{"line_items": [{"item_name": "Orphan", "note": "no numbers here" broken"#;
        let result = parser().parse(raw);
        assert!(result.line_items.is_empty());
        assert!(result.notes.contains("unrecoverable"));
    }

    #[test]
    fn salvage_window_does_not_bleed_across_items() {
        // First item carries no numeric fields; its window must not steal
        // the second item's quantity.
        let raw = r#"broken {"item_name": "Empty One"} {"item_name": "Real One", "quantity": 3, "amount": 30 broken"#;
        let result = parser().parse(raw);
        assert_eq!(result.line_items.len(), 1);
        assert_eq!(result.line_items[0].item_name, "Real One");
    }

    #[test]
    fn field_aliases_are_accepted() {
        let raw = r#"{"line_items": [{"name": "A", "item_quantity": 2, "item_rate": 5, "item_amount": 10}]}"#;
        let result = parser().parse(raw);
        assert_eq!(result.line_items[0].item_name, "A");
        assert_eq!(result.line_items[0].quantity, serde_json::json!(2));
    }

    #[test]
    fn corrective_reply_parses_and_defaults() {
        let raw = r#"Looking again: {"analysis": "missed one row", "corrections": [
            {"action": "add", "item_name": "Bandage", "quantity": 2, "rate": 62.015, "amount": 124.03, "reason": "row below the fold"}
        ], "new_total": 572.03, "confidence": 0.8}"#;
        let reply = parser().parse_corrective(raw);
        assert_eq!(reply.corrections.len(), 1);
        assert_eq!(reply.corrections[0].action, "add");
        assert_eq!(reply.corrections[0].item_name, "Bandage");

        let empty = parser().parse_corrective("no json at all");
        assert!(empty.corrections.is_empty());
        assert!(empty.new_total.is_none());
    }
}
