use chrono::{DateTime, Datelike, NaiveDate, Utc};
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single spreadsheet cell as it appeared in the source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Empty,
    Text(String),
    Number(f64),
}

impl CellValue {
    /// Blank text counts as empty; spreadsheets rarely distinguish the two.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => write!(f, "{}", s),
            CellValue::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Row-major cells of the first worksheet. Row 0 is the header when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawGrid {
    pub rows: Vec<Vec<CellValue>>,
    /// Sheet row that `rows[0]` was read from. Non-zero when a spreadsheet
    /// starts with blank rows.
    #[serde(default)]
    pub first_row: usize,
}

impl RawGrid {
    pub fn new(rows: Vec<Vec<CellValue>>) -> Self {
        Self { rows, first_row: 0 }
    }

    pub fn with_first_row(mut self, first_row: usize) -> Self {
        self.first_row = first_row;
        self
    }

    pub fn header(&self) -> Option<&[CellValue]> {
        self.rows.first().map(|r| r.as_slice())
    }

    pub fn data_rows(&self) -> &[Vec<CellValue>] {
        if self.rows.is_empty() {
            &[]
        } else {
            &self.rows[1..]
        }
    }

    pub fn data_row_count(&self) -> usize {
        self.data_rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A reporting period: one calendar month. Serialized as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn prev(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// Every month from `self` to `end`, both inclusive. Empty when `end < self`.
    pub fn months_through(self, end: Period) -> Vec<Period> {
        let span = crate::utils::months_between(self, end).max(-1) + 1;
        let mut months = Vec::with_capacity(span as usize);
        let mut current = self;
        while current <= end {
            months.push(current);
            current = current.next();
        }
        months
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("Invalid period '{}'. Expected YYYY-MM", s))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("Invalid year in period '{}'", s))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("Invalid month in period '{}'", s))?;
        Period::new(year, month).ok_or_else(|| format!("Month out of range in period '{}'", s))
    }
}

impl TryFrom<String> for Period {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

impl JsonSchema for Period {
    fn schema_name() -> String {
        "Period".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Online,
    Offline,
}

impl Default for Channel {
    fn default() -> Self {
        Self::Online
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Online => write!(f, "online"),
            Channel::Offline => write!(f, "offline"),
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "online" => Ok(Channel::Online),
            "offline" | "retail" | "land-based" | "land based" => Ok(Channel::Offline),
            other => Err(format!("Unknown channel '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStatus::Pending => write!(f, "pending"),
            ReportStatus::Approved => write!(f, "approved"),
            ReportStatus::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

impl From<ReviewDecision> for ReportStatus {
    fn from(decision: ReviewDecision) -> Self {
        match decision {
            ReviewDecision::Approved => ReportStatus::Approved,
            ReviewDecision::Rejected => ReportStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReviewMetadata {
    pub reviewer: String,
    pub reviewed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Figures for one game type within a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GameBreakdown {
    pub game_type: String,
    pub bet_count: u64,
    pub stake: f64,
    pub winnings: f64,
    pub ggr: f64,
    pub ggr_percentage: f64,
    pub det_levy: f64,
    pub gaming_tax: f64,
    pub net_revenue: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReportTotals {
    pub stake: f64,
    pub winnings: f64,
    pub bet_count: u64,
    pub ggr: f64,
    pub ggr_percentage: f64,
    pub gaming_tax: f64,
    pub det_levy: f64,
    pub net_revenue: f64,
    pub cancelled: Option<f64>,
    pub open_tickets: Option<f64>,
}

/// A sheet row the mapper could not turn into figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InvalidRow {
    /// Index into the raw grid, header included.
    pub row_index: usize,
    pub operator_name: Option<String>,
    pub reason: String,
}

/// A numerically suspicious value that was still carried through the calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CalculationFlag {
    pub game_type: String,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReportRecord {
    pub id: String,
    pub submission_id: String,
    pub operator_id: String,
    pub operator_name: String,
    pub regulator_id: Option<String>,
    pub channel: Channel,
    pub period: Period,
    pub breakdowns: Vec<GameBreakdown>,
    pub totals: ReportTotals,
    pub opening_balance: Option<f64>,
    pub closing_balance: Option<f64>,
    pub balance_difference: Option<f64>,
    pub status: ReportStatus,
    pub submitted_at: DateTime<Utc>,
    pub review: Option<ReviewMetadata>,
    #[serde(default)]
    pub invalid_rows: Vec<InvalidRow>,
    #[serde(default)]
    pub calculation_flags: Vec<CalculationFlag>,
}

impl ReportRecord {
    pub fn key(&self) -> StoreKey {
        StoreKey {
            operator_id: self.operator_id.clone(),
            regulator_id: self.regulator_id.clone(),
            period: self.period,
            channel: self.channel,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == ReportStatus::Approved
    }
}

/// The storage identity of a report; at most one current record per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoreKey {
    pub operator_id: String,
    pub regulator_id: Option<String>,
    pub period: Period,
    pub channel: Channel,
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.operator_id,
            self.regulator_id.as_deref().unwrap_or("-"),
            self.period,
            self.channel
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OperatorRef {
    pub operator_id: String,
    pub operator_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RegulatorRef {
    pub regulator_id: String,
    pub regulator_name: String,
}

/// Identity fields for an upload that the sheet itself may not carry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubmissionContext {
    pub submission_id: String,
    pub operator_id: Option<String>,
    pub operator_name: Option<String>,
    pub regulator_id: Option<String>,
    #[serde(default)]
    pub channel: Channel,
    pub period: Option<Period>,
    pub submitted_at: DateTime<Utc>,
}

impl SubmissionContext {
    pub fn new(submission_id: impl Into<String>) -> Self {
        Self {
            submission_id: submission_id.into(),
            operator_id: None,
            operator_name: None,
            regulator_id: None,
            channel: Channel::Online,
            period: None,
            submitted_at: Utc::now(),
        }
    }
}
