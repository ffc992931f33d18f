//! Prompts for vision-based bill extraction.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing the extraction behaviour (e.g.
//!    adding a rule about subtotal rows) requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect prompts directly without a
//!    real vision call, making prompt regressions easy to catch.
//!
//! Callers can override the system prompt via
//! [`crate::config::ExtractionConfig::system_prompt`]; the constants here are
//! used only when no override is provided.

use crate::output::LineItem;
use rust_decimal::Decimal;

/// Default system prompt for extracting line items from a bill page image.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are an expert financial document analyst specializing in bill and invoice processing.
Your task is to extract line item data from bill images with high accuracy and precision.

IMPORTANT RULES:
1. Extract ONLY line items that represent products/services sold (not totals, taxes, discounts, or fees)
2. Identify and extract for each line item:
   - Item Name (product/service description)
   - Quantity (number of units)
   - Rate/Unit Price (price per unit)
   - Amount (total for this line: quantity x rate)
3. IGNORE rows that contain: "Total", "Subtotal", "VAT", "Tax", "GST", "SGST", "CGST", "IGST", "Amount Due", "Carry Forward"
4. Be precise with numbers - do not hallucinate or guess numbers that aren't clearly visible
5. Preserve exact decimal places as shown in the document
6. If a field is unclear or missing, mark it as null and explain why in the reasoning"#;

/// User prompt sent alongside the page image.
pub const EXTRACTION_USER_PROMPT: &str = r#"Please extract all line items from this bill image following this chain-of-thought process:

1. LOCATE THE TABLE: Identify where the main line items table is located on the page
2. IDENTIFY HEADERS: Look at the column headers to understand the structure (typically: Item/Description, Qty/Quantity, Rate/Unit Price, Amount/Total)
3. EXTRACT ROWS: Go through each row line-by-line and extract the data
   - For each row that is NOT a total/subtotal, extract the item information
   - If the same item name appears multiple times, extract each occurrence separately
4. IDENTIFY TOTAL: Locate the "TOTAL" or "GRAND TOTAL" row at the bottom - note this value but do NOT include it in line items
5. EXTRACT SUBTOTALS: If there are intermediate subtotals, note them separately

Your response must be a JSON object with this structure:
{
    "extraction_reasoning": "Step-by-step explanation of what you found",
    "line_items": [
        {
            "item_name": "exact item name from document",
            "quantity": numeric quantity,
            "rate": numeric unit price,
            "amount": numeric total amount,
            "confidence": 0.95
        }
    ],
    "bill_total": numeric total found at bottom of bill,
    "subtotals": [
        {
            "description": "e.g., 'Subtotal for Section A'",
            "amount": numeric amount
        }
    ],
    "notes": "Any observations about the bill structure, clarity issues, or discrepancies noted"
}

Be thorough and accurate. Double-check all numbers before including them."#;

/// Build the corrective-retry prompt sent when the computed item sum
/// disagrees with the claimed bill total beyond the economic threshold.
///
/// Carries the current item list, both totals, and the discrepancy so the
/// model can re-examine the image with the mismatch in front of it.
pub fn corrective_retry_prompt(
    items: &[LineItem],
    computed_total: Decimal,
    claimed_total: Decimal,
    discrepancy: Decimal,
) -> String {
    let items_json =
        serde_json::to_string_pretty(items).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"I've extracted {item_count} line items from the bill:

{items_json}

The sum of all extracted items is: {computed_total}
But the bill shows a final total of: {claimed_total}
Discrepancy: {discrepancy}

There is a mismatch. Please look at the image again and:
1. Verify each line item I extracted is correct
2. Check if I missed any line items (especially small amounts or items formatted differently)
3. Check if I misread any digits (e.g., 1 vs l, 0 vs O)
4. Look for items in different sections, footnotes, or alternative formatting
5. Check if any extracted items are actually subtotals or totals that should be removed

Please provide:
{{
    "analysis": "What you found when re-examining the bill",
    "corrections": [
        {{
            "action": "remove|modify|add",
            "item_name": "item name",
            "quantity": number,
            "rate": number,
            "amount": number,
            "reason": "why this correction"
        }}
    ],
    "new_total": numeric calculated total after corrections,
    "confidence": 0-1
}}"#,
        item_count = items.len(),
    )
}
