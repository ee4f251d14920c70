//! California Form 460 page types and structured model-output shapes.
//!
//! Each type here has two faces: a serde struct the model's JSON answer is
//! validated against, and a JSON Schema (`*_schema()`) that is sent with the
//! prompt so the model knows the exact shape expected. Keep the two in sync
//! when adding a field: the schema is what the model sees, the struct is what
//! we accept.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Structural category of a single Form 460 page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    CoverPage,
    #[serde(rename = "cover_page_part_2")]
    CoverPagePart2,
    CampaignDisclosureSummaryPage,
    ScheduleA,
    ScheduleAContinuation,
    #[serde(rename = "schedule_b_part_1")]
    ScheduleBPart1,
    #[serde(rename = "schedule_b_part_2")]
    ScheduleBPart2,
    ScheduleC,
    ScheduleD,
    ScheduleE,
    ScheduleEContinuation,
    ScheduleF,
    ScheduleG,
    ScheduleH,
    ScheduleI,
    Other,
}

impl PageType {
    /// Every label, in form order.
    pub const ALL: [PageType; 16] = [
        PageType::CoverPage,
        PageType::CoverPagePart2,
        PageType::CampaignDisclosureSummaryPage,
        PageType::ScheduleA,
        PageType::ScheduleAContinuation,
        PageType::ScheduleBPart1,
        PageType::ScheduleBPart2,
        PageType::ScheduleC,
        PageType::ScheduleD,
        PageType::ScheduleE,
        PageType::ScheduleEContinuation,
        PageType::ScheduleF,
        PageType::ScheduleG,
        PageType::ScheduleH,
        PageType::ScheduleI,
        PageType::Other,
    ];

    /// The snake_case label stored in the database and used in the schema enum.
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::CoverPage => "cover_page",
            PageType::CoverPagePart2 => "cover_page_part_2",
            PageType::CampaignDisclosureSummaryPage => "campaign_disclosure_summary_page",
            PageType::ScheduleA => "schedule_a",
            PageType::ScheduleAContinuation => "schedule_a_continuation",
            PageType::ScheduleBPart1 => "schedule_b_part_1",
            PageType::ScheduleBPart2 => "schedule_b_part_2",
            PageType::ScheduleC => "schedule_c",
            PageType::ScheduleD => "schedule_d",
            PageType::ScheduleE => "schedule_e",
            PageType::ScheduleEContinuation => "schedule_e_continuation",
            PageType::ScheduleF => "schedule_f",
            PageType::ScheduleG => "schedule_g",
            PageType::ScheduleH => "schedule_h",
            PageType::ScheduleI => "schedule_i",
            PageType::Other => "other",
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PageType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown page type '{s}'"))
    }
}

// ── Classification ───────────────────────────────────────────────────────

/// The classifier's answer: a single enumerated label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTypePrediction {
    pub page_type: PageType,
}

/// JSON Schema for [`PageTypePrediction`].
pub fn page_type_schema() -> Value {
    let labels: Vec<&str> = PageType::ALL.iter().map(|t| t.as_str()).collect();
    json!({
        "type": "object",
        "properties": {
            "page_type": {
                "type": "string",
                "enum": labels,
                "description": "The Form 460 page type shown in the header of the page"
            }
        },
        "required": ["page_type"],
        "additionalProperties": false
    })
}

// ── Summary page ─────────────────────────────────────────────────────────

/// One summary-page line with its two columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryAmounts {
    /// Column A: this reporting period.
    #[serde(default)]
    pub this_period: Option<f64>,
    /// Column B: calendar year to date.
    #[serde(default)]
    pub calendar_year_to_date: Option<f64>,
}

/// Lines 1–5.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContributionsReceived {
    pub monetary_contributions: SummaryAmounts,
    pub loans_received: SummaryAmounts,
    pub subtotal_cash_contributions: SummaryAmounts,
    pub nonmonetary_contributions: SummaryAmounts,
    pub total_contributions_received: SummaryAmounts,
}

/// Lines 6–11.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpendituresMade {
    pub payments_made: SummaryAmounts,
    pub loans_made: SummaryAmounts,
    pub subtotal_cash_payments: SummaryAmounts,
    pub accrued_expenses: SummaryAmounts,
    pub nonmonetary_adjustment: SummaryAmounts,
    pub total_expenditures_made: SummaryAmounts,
}

/// Lines 12–16.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentCashStatement {
    #[serde(default)]
    pub beginning_cash_balance: Option<f64>,
    #[serde(default)]
    pub cash_receipts: Option<f64>,
    #[serde(default)]
    pub miscellaneous_increases_to_cash: Option<f64>,
    #[serde(default)]
    pub cash_payments: Option<f64>,
    #[serde(default)]
    pub ending_cash_balance: Option<f64>,
}

/// Structured data read off a Campaign Disclosure Summary Page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryPage {
    #[serde(default)]
    pub filer_name: Option<String>,
    #[serde(default)]
    pub filer_id: Option<String>,
    #[serde(default)]
    pub statement_period_from: Option<String>,
    #[serde(default)]
    pub statement_period_through: Option<String>,
    pub contributions_received: ContributionsReceived,
    pub expenditures_made: ExpendituresMade,
    pub current_cash_statement: CurrentCashStatement,
    #[serde(default)]
    pub outstanding_debts: Option<f64>,
}

fn amount() -> Value {
    json!({ "type": ["number", "null"] })
}

fn text() -> Value {
    json!({ "type": ["string", "null"] })
}

fn two_column() -> Value {
    json!({
        "type": "object",
        "properties": {
            "this_period": amount(),
            "calendar_year_to_date": amount()
        },
        "required": ["this_period", "calendar_year_to_date"]
    })
}

fn object_of(fields: &[&str], field_schema: fn() -> Value) -> Value {
    let properties: serde_json::Map<String, Value> = fields
        .iter()
        .map(|f| (f.to_string(), field_schema()))
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": fields
    })
}

/// JSON Schema for [`SummaryPage`].
pub fn summary_page_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "filer_name": text(),
            "filer_id": text(),
            "statement_period_from": text(),
            "statement_period_through": text(),
            "contributions_received": object_of(&[
                "monetary_contributions",
                "loans_received",
                "subtotal_cash_contributions",
                "nonmonetary_contributions",
                "total_contributions_received",
            ], two_column),
            "expenditures_made": object_of(&[
                "payments_made",
                "loans_made",
                "subtotal_cash_payments",
                "accrued_expenses",
                "nonmonetary_adjustment",
                "total_expenditures_made",
            ], two_column),
            "current_cash_statement": object_of(&[
                "beginning_cash_balance",
                "cash_receipts",
                "miscellaneous_increases_to_cash",
                "cash_payments",
                "ending_cash_balance",
            ], amount),
            "outstanding_debts": amount()
        },
        "required": [
            "contributions_received",
            "expenditures_made",
            "current_cash_statement"
        ]
    })
}

// ── Schedule A ───────────────────────────────────────────────────────────

/// One monetary contribution line item on Schedule A.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleAContribution {
    #[serde(default)]
    pub date_received: Option<String>,
    pub contributor_name: String,
    #[serde(default)]
    pub contributor_address: Option<String>,
    /// IND, COM, OTH, PTY or SCC.
    #[serde(default)]
    pub contributor_code: Option<String>,
    #[serde(default)]
    pub committee_id: Option<String>,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub employer: Option<String>,
    #[serde(default)]
    pub amount_received_this_period: Option<f64>,
    #[serde(default)]
    pub cumulative_to_date_calendar_year: Option<f64>,
    #[serde(default)]
    pub per_election_to_date: Option<f64>,
}

/// Structured data read off a Schedule A (or continuation) page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleA {
    #[serde(default)]
    pub filer_name: Option<String>,
    #[serde(default)]
    pub filer_id: Option<String>,
    #[serde(default)]
    pub statement_period_from: Option<String>,
    #[serde(default)]
    pub statement_period_through: Option<String>,
    pub contributions: Vec<ScheduleAContribution>,
    #[serde(default)]
    pub subtotal: Option<f64>,
}

/// JSON Schema for [`ScheduleA`].
pub fn schedule_a_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "filer_name": text(),
            "filer_id": text(),
            "statement_period_from": text(),
            "statement_period_through": text(),
            "contributions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "date_received": text(),
                        "contributor_name": { "type": "string" },
                        "contributor_address": text(),
                        "contributor_code": {
                            "type": ["string", "null"],
                            "enum": ["IND", "COM", "OTH", "PTY", "SCC", null]
                        },
                        "committee_id": text(),
                        "occupation": text(),
                        "employer": text(),
                        "amount_received_this_period": amount(),
                        "cumulative_to_date_calendar_year": amount(),
                        "per_election_to_date": amount()
                    },
                    "required": ["contributor_name"]
                }
            },
            "subtotal": amount()
        },
        "required": ["contributions"]
    })
}
