//! Prompts for Form 460 page classification and extraction.
//!
//! Every prompt lives here so a wording change is a one-file diff and unit
//! tests can inspect prompts without a model. The JSON Schema for each call
//! is appended by [`with_schema`] at request time.

use serde_json::Value;

/// Classifier prompt. The image is the top-left corner of the page only.
pub const PAGE_TYPE_PROMPT: &str = r#"You are looking at the top-left corner of one page of a California Form 460 (Recipient Committee Campaign Statement) filing.

Identify which part of the form this page is, using the printed title in the page header:

- "Cover Page" → cover_page; "Cover Page - Part 2" → cover_page_part_2
- "Campaign Disclosure Statement Summary Page" → campaign_disclosure_summary_page
- "Schedule A Monetary Contributions Received" → schedule_a
- A Schedule A page marked "Continuation Sheet" → schedule_a_continuation
- "Schedule B - Part 1 Loans Received" → schedule_b_part_1; "Schedule B - Part 2" → schedule_b_part_2
- "Schedule C" through "Schedule I" → the matching schedule_* label
- A Schedule E page marked "Continuation Sheet" → schedule_e_continuation
- Anything else (attachments, letters, blank pages) → other

Answer with the single best label."#;

/// Extractor prompt for the Campaign Disclosure Summary Page.
pub const SUMMARY_PAGE_PROMPT: &str = r#"This image is the Summary Page of a California Form 460 campaign disclosure statement.

Transcribe the filer name, filer ID and statement period from the header, then every numbered line of the summary:

- Lines 1-5 (Contributions Received) and lines 6-11 (Expenditures Made) have two columns: "This Period" (column A) and "Calendar Year Total To Date" (column B).
- Lines 12-16 (Current Cash Statement) have a single amount each.
- Line 19 is Outstanding Debts.

Rules:
- Amounts are plain numbers without "$" or thousands separators; use negative numbers for amounts shown in parentheses.
- Use null for a line that is blank or illegible. Never guess a number."#;

/// Extractor prompt for Schedule A and its continuation sheets.
pub const SCHEDULE_A_PROMPT: &str = r#"This image is a Schedule A (Monetary Contributions Received) page of a California Form 460 filing, possibly a continuation sheet.

Transcribe the header (filer name, filer ID, statement period) and every contribution line item in the order printed. For each line item record:
- date received
- full name and street address of the contributor
- the contributor code checkbox (IND, COM, OTH, PTY or SCC)
- committee ID, if the contributor is a committee
- occupation and employer, if the contributor is an individual
- amount received this period, cumulative to date for the calendar year, and per election to date

Also record the page subtotal if printed.

Rules:
- Amounts are plain numbers without "$" or thousands separators.
- Dates as written on the form (MM/DD/YYYY).
- Use null for blank fields. Do not invent line items that are not on the page."#;

/// Append the output schema to a prompt.
///
/// The schema is rendered as compact JSON so it costs as few tokens as
/// possible while still being unambiguous.
pub fn with_schema(prompt: &str, schema: &Value) -> String {
    format!(
        "{prompt}\n\nRespond with a single JSON object that validates against this JSON Schema, \
and nothing else:\n{schema}"
    )
}
