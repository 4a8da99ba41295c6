use crate::error::{ReportingError, Result};
use crate::schema::{CellValue, Channel, InvalidRow, Period, RawGrid};
use crate::utils::{month_from_name, parse_period_text, period_from_serial};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The record fields a header label can map onto.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ReportField {
    OperatorName,
    OperatorId,
    Period,
    Year,
    Month,
    GameType,
    Channel,
    BetCount,
    Stake,
    Winnings,
    Cancelled,
    OpenTickets,
    OpeningBalance,
    ClosingBalance,
}

impl ReportField {
    pub const REQUIRED: [ReportField; 2] = [ReportField::Stake, ReportField::Winnings];

    pub fn label(self) -> &'static str {
        match self {
            ReportField::OperatorName => "operator name",
            ReportField::OperatorId => "operator id",
            ReportField::Period => "period",
            ReportField::Year => "year",
            ReportField::Month => "month",
            ReportField::GameType => "game type",
            ReportField::Channel => "channel",
            ReportField::BetCount => "bet count",
            ReportField::Stake => "stake",
            ReportField::Winnings => "winnings",
            ReportField::Cancelled => "cancelled",
            ReportField::OpenTickets => "open tickets",
            ReportField::OpeningBalance => "opening balance",
            ReportField::ClosingBalance => "closing balance",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnAlias {
    pub label: String,
    pub field: ReportField,
}

/// Declarative `header label -> field` table. Header wording differs between
/// operators, so new variants are added here rather than in the mapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnMapping {
    pub aliases: Vec<ColumnAlias>,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        use ReportField::*;

        let table: &[(&str, ReportField)] = &[
            ("operator", OperatorName),
            ("operator name", OperatorName),
            ("operator_name", OperatorName),
            ("licensee", OperatorName),
            ("company", OperatorName),
            ("operator id", OperatorId),
            ("operator_id", OperatorId),
            ("licence number", OperatorId),
            ("license number", OperatorId),
            ("licence no", OperatorId),
            ("period", Period),
            ("reporting period", Period),
            ("month/year", Period),
            ("year", Year),
            ("month", Month),
            ("game type", GameType),
            ("game_type", GameType),
            ("game", GameType),
            ("product", GameType),
            ("channel", Channel),
            ("mode", Channel),
            ("bet count", BetCount),
            ("bets", BetCount),
            ("no. of bets", BetCount),
            ("number of bets", BetCount),
            ("stake", Stake),
            ("stakes", Stake),
            ("total stake", Stake),
            ("amount staked", Stake),
            ("turnover", Stake),
            ("payout", Winnings),
            ("payouts", Winnings),
            ("total payout", Winnings),
            ("winnings", Winnings),
            ("total winnings", Winnings),
            ("amount paid out", Winnings),
            ("cancelled", Cancelled),
            ("cancelled bets", Cancelled),
            ("voided", Cancelled),
            ("open tickets", OpenTickets),
            ("open bets", OpenTickets),
            ("opening balance", OpeningBalance),
            ("closing balance", ClosingBalance),
        ];

        Self {
            aliases: table
                .iter()
                .map(|(label, field)| ColumnAlias {
                    label: label.to_string(),
                    field: *field,
                })
                .collect(),
        }
    }
}

impl ColumnMapping {
    pub fn empty() -> Self {
        Self {
            aliases: Vec::new(),
        }
    }

    pub fn with_alias(mut self, label: impl Into<String>, field: ReportField) -> Self {
        self.aliases.push(ColumnAlias {
            label: label.into(),
            field,
        });
        self
    }

    pub fn field_for(&self, label: &str) -> Option<ReportField> {
        let wanted = normalize_label(label);
        self.aliases
            .iter()
            .find(|a| normalize_label(&a.label) == wanted)
            .map(|a| a.field)
    }

    /// Column index per recognised field. The leftmost column wins when two
    /// headers map onto the same field.
    pub fn resolve_header(&self, header: &[CellValue]) -> BTreeMap<ReportField, usize> {
        let mut columns = BTreeMap::new();
        for (idx, cell) in header.iter().enumerate() {
            let label = cell.to_string();
            if let Some(field) = self.field_for(&label) {
                columns.entry(field).or_insert(idx);
            }
        }
        columns
    }
}

fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A sheet row with its recognised fields extracted and typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedRow {
    pub row_index: usize,
    pub operator_name: Option<String>,
    pub operator_id: Option<String>,
    pub period: Option<Period>,
    pub game_type: Option<String>,
    pub channel: Option<Channel>,
    pub bet_count: u64,
    pub stake: f64,
    pub winnings: f64,
    pub cancelled: Option<f64>,
    pub open_tickets: Option<f64>,
    pub opening_balance: Option<f64>,
    pub closing_balance: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingOutcome {
    pub valid_rows: Vec<MappedRow>,
    pub invalid_rows: Vec<InvalidRow>,
    /// Spacer rows with no operator, ignored without being flagged.
    pub skipped_rows: usize,
}

enum RowResult {
    Skipped,
    Valid(MappedRow),
    Invalid(InvalidRow),
}

pub struct RowMapper<'a> {
    mapping: &'a ColumnMapping,
}

impl<'a> RowMapper<'a> {
    pub fn new(mapping: &'a ColumnMapping) -> Self {
        Self { mapping }
    }

    /// Maps every data row of `grid`. Bad rows are reported in the outcome and
    /// never stop the rest of the sheet from being mapped; only a header without
    /// the required numeric columns fails the whole grid.
    pub fn map_grid(&self, grid: &RawGrid) -> Result<MappingOutcome> {
        let header = match grid.header() {
            Some(header) => header,
            None => return Ok(MappingOutcome::default()),
        };

        let columns = self.mapping.resolve_header(header);
        let missing: Vec<String> = ReportField::REQUIRED
            .iter()
            .filter(|f| !columns.contains_key(f))
            .map(|f| f.label().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ReportingError::MissingColumns(missing));
        }

        let mut outcome = MappingOutcome::default();
        for (offset, row) in grid.data_rows().iter().enumerate() {
            let row_index = grid.first_row + offset + 1;
            match self.map_row(row_index, row, &columns) {
                RowResult::Skipped => outcome.skipped_rows += 1,
                RowResult::Valid(mapped) => outcome.valid_rows.push(mapped),
                RowResult::Invalid(invalid) => {
                    debug!("Row {} invalid: {}", invalid.row_index, invalid.reason);
                    outcome.invalid_rows.push(invalid);
                }
            }
        }

        debug!(
            "Mapped {} valid, {} invalid, {} skipped rows",
            outcome.valid_rows.len(),
            outcome.invalid_rows.len(),
            outcome.skipped_rows
        );

        Ok(outcome)
    }

    fn map_row(
        &self,
        row_index: usize,
        row: &[CellValue],
        columns: &BTreeMap<ReportField, usize>,
    ) -> RowResult {
        let cell = |field: ReportField| columns.get(&field).and_then(|&idx| row.get(idx));

        let operator_name = cell(ReportField::OperatorName).and_then(cell_text);
        let is_spacer = if columns.contains_key(&ReportField::OperatorName) {
            operator_name.is_none()
        } else {
            row.iter().all(|c| c.is_empty())
        };
        if is_spacer {
            return RowResult::Skipped;
        }

        let mut problems = Vec::new();

        let mut required = |field: ReportField| match cell(field).map(cell_amount) {
            Some(Ok(value)) => value.unwrap_or(0.0),
            Some(Err(msg)) => {
                problems.push(format!("{}: {}", field.label(), msg));
                0.0
            }
            None => 0.0,
        };
        let stake = required(ReportField::Stake);
        let winnings = required(ReportField::Winnings);

        let period = match self.extract_period(row, columns) {
            Ok(period) => period,
            Err(msg) => {
                problems.push(msg);
                None
            }
        };

        // An unreadable channel invalidates the row.
        let channel = match cell(ReportField::Channel).and_then(cell_text) {
            Some(text) => match text.parse::<Channel>() {
                Ok(channel) => Some(channel),
                Err(msg) => {
                    problems.push(format!("{}: {}", ReportField::Channel.label(), msg));
                    None
                }
            },
            None => None,
        };

        if !problems.is_empty() {
            return RowResult::Invalid(InvalidRow {
                row_index,
                operator_name,
                reason: problems.join("; "),
            });
        }

        let optional = |field: ReportField| match cell(field).map(cell_amount) {
            Some(Ok(value)) => value,
            Some(Err(msg)) => {
                debug!("Row {}: ignoring {} ({})", row_index, field.label(), msg);
                None
            }
            None => None,
        };

        let bet_count = match optional(ReportField::BetCount) {
            Some(v) if v >= 0.0 => v.round() as u64,
            Some(v) => {
                debug!("Row {}: ignoring negative bet count {}", row_index, v);
                0
            }
            None => 0,
        };

        RowResult::Valid(MappedRow {
            row_index,
            operator_name,
            operator_id: cell(ReportField::OperatorId).and_then(cell_text),
            period,
            game_type: cell(ReportField::GameType).and_then(cell_text),
            channel,
            bet_count,
            stake,
            winnings,
            cancelled: optional(ReportField::Cancelled),
            open_tickets: optional(ReportField::OpenTickets),
            opening_balance: optional(ReportField::OpeningBalance),
            closing_balance: optional(ReportField::ClosingBalance),
        })
    }

    fn extract_period(
        &self,
        row: &[CellValue],
        columns: &BTreeMap<ReportField, usize>,
    ) -> std::result::Result<Option<Period>, String> {
        let cell = |field: ReportField| {
            columns
                .get(&field)
                .and_then(|&idx| row.get(idx))
                .filter(|c| !c.is_empty())
        };

        if let Some(value) = cell(ReportField::Period) {
            return period_from_cell(value)
                .map(Some)
                .ok_or_else(|| format!("period: unrecognised value '{}'", value));
        }

        match (cell(ReportField::Year), cell(ReportField::Month)) {
            (Some(year), Some(month)) => {
                let year = match year {
                    CellValue::Number(n) if n.fract() == 0.0 => Some(*n as i32),
                    CellValue::Text(s) => s.trim().parse::<i32>().ok(),
                    _ => None,
                };
                let month = match month {
                    CellValue::Number(n) if n.fract() == 0.0 && *n >= 1.0 => Some(*n as u32),
                    CellValue::Text(s) => s
                        .trim()
                        .parse::<u32>()
                        .ok()
                        .or_else(|| month_from_name(s)),
                    _ => None,
                };
                year.zip(month)
                    .and_then(|(y, m)| Period::new(y, m))
                    .map(Some)
                    .ok_or_else(|| "year/month: unrecognised values".to_string())
            }
            _ => Ok(None),
        }
    }
}

/// Numeric period cells are either `YYYYMM` integers or Excel date serials.
fn period_from_cell(value: &CellValue) -> Option<Period> {
    match value {
        CellValue::Number(n) if n.fract() == 0.0 && (190_001.0..=299_912.0).contains(n) => {
            let n = *n as i64;
            Period::new((n / 100) as i32, (n % 100) as u32)
        }
        CellValue::Number(n) => period_from_serial(*n),
        CellValue::Text(s) => parse_period_text(s),
        CellValue::Empty => None,
    }
}

fn cell_text(value: &CellValue) -> Option<String> {
    match value {
        CellValue::Empty => None,
        CellValue::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        CellValue::Number(n) if n.fract() == 0.0 => Some(format!("{}", *n as i64)),
        CellValue::Number(n) => Some(n.to_string()),
    }
}

/// `Ok(None)` for blank cells, `Err` for cells that hold something non-numeric.
fn cell_amount(value: &CellValue) -> std::result::Result<Option<f64>, String> {
    match value {
        CellValue::Empty => Ok(None),
        CellValue::Number(n) if n.is_finite() => Ok(Some(*n)),
        CellValue::Number(n) => Err(format!("'{}' is not a finite number", n)),
        CellValue::Text(s) if s.trim().is_empty() => Ok(None),
        CellValue::Text(s) => parse_amount(s)
            .map(Some)
            .ok_or_else(|| format!("'{}' is not a number", s.trim())),
    }
}

/// Parses a money amount, tolerating thousands separators, currency symbols or
/// codes at either end, and accounting-style parentheses for negatives.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let mut text: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '_')
        .collect();

    let mut negative = false;
    if text.starts_with('(') && text.ends_with(')') && text.len() > 2 {
        negative = true;
        text = text[1..text.len() - 1].to_string();
    }
    if let Some(rest) = text.strip_prefix('-') {
        negative = !negative;
        text = rest.to_string();
    }

    let is_numeric_edge = |c: char| c.is_ascii_digit() || c == '.' || c == '-';
    let core = text
        .trim_start_matches(|c: char| !is_numeric_edge(c))
        .trim_end_matches(|c: char| !is_numeric_edge(c));

    if core.is_empty() {
        return None;
    }

    let value: f64 = core.parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    Some(if negative { -value } else { value })
}
