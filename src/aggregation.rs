//! Roll-ups of report records into the analytics views: monthly trends,
//! operator rankings, product breakdowns and per-regulator tables.
//!
//! Every view is recomputed from the records on each call.

use crate::error::{ReportingError, Result};
use crate::schema::{Channel, Period, RegulatorRef, ReportRecord};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "scope", content = "operator_id", rename_all = "snake_case")]
pub enum OperatorScope {
    All,
    Operator(String),
}

impl Default for OperatorScope {
    fn default() -> Self {
        Self::All
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReportFilter {
    #[serde(default)]
    pub operator: OperatorScope,
    pub regulator_id: Option<String>,
    pub from: Option<Period>,
    pub to: Option<Period>,
    pub channel: Option<Channel>,
    /// Aggregate pending and rejected reports too, not only approved ones.
    #[serde(default)]
    pub include_all_statuses: bool,
}

impl ReportFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Builds a filter from loosely-typed query parameters. `"all"` selects
    /// every operator; periods are `YYYY-MM`.
    pub fn parse(
        operator: &str,
        regulator_id: Option<&str>,
        from: Option<&str>,
        to: Option<&str>,
        channel: Option<&str>,
    ) -> Result<Self> {
        let operator = match operator.trim() {
            "" => {
                return Err(ReportingError::AggregationInput(
                    "operator must be an identifier or \"all\"".to_string(),
                ))
            }
            op if op.eq_ignore_ascii_case("all") => OperatorScope::All,
            op => OperatorScope::Operator(op.to_string()),
        };

        let parse_period = |label: &str, raw: Option<&str>| -> Result<Option<Period>> {
            raw.map(|r| {
                r.parse::<Period>()
                    .map_err(|e| ReportingError::AggregationInput(format!("{}: {}", label, e)))
            })
            .transpose()
        };

        let channel = channel
            .map(|c| c.parse::<Channel>().map_err(ReportingError::AggregationInput))
            .transpose()?;

        let filter = Self {
            operator,
            regulator_id: regulator_id.map(|r| r.trim().to_string()),
            from: parse_period("from", from)?,
            to: parse_period("to", to)?,
            channel,
            include_all_statuses: false,
        };
        filter.validate()?;
        Ok(filter)
    }

    pub fn validate(&self) -> Result<()> {
        if let OperatorScope::Operator(id) = &self.operator {
            if id.trim().is_empty() {
                return Err(ReportingError::AggregationInput(
                    "operator identifier is empty".to_string(),
                ));
            }
        }
        if let Some(regulator) = &self.regulator_id {
            if regulator.trim().is_empty() {
                return Err(ReportingError::AggregationInput(
                    "regulator identifier is empty".to_string(),
                ));
            }
        }
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(ReportingError::AggregationInput(format!(
                    "date range starts at {} after it ends at {}",
                    from, to
                )));
            }
        }
        Ok(())
    }

    pub fn matches(&self, report: &ReportRecord) -> bool {
        if !self.include_all_statuses && !report.is_approved() {
            return false;
        }
        if let OperatorScope::Operator(id) = &self.operator {
            if &report.operator_id != id {
                return false;
            }
        }
        if let Some(regulator) = &self.regulator_id {
            if report.regulator_id.as_ref() != Some(regulator) {
                return false;
            }
        }
        if self.from.is_some_and(|from| report.period < from) {
            return false;
        }
        if self.to.is_some_and(|to| report.period > to) {
            return false;
        }
        if self.channel.is_some_and(|channel| report.channel != channel) {
            return false;
        }
        true
    }

    /// Validates the filter, then selects the matching records.
    pub fn apply<'a>(&self, reports: &'a [ReportRecord]) -> Result<Vec<&'a ReportRecord>> {
        self.validate()?;
        let selected: Vec<&ReportRecord> = reports.iter().filter(|r| self.matches(r)).collect();
        debug!(
            "Filter selected {} of {} reports",
            selected.len(),
            reports.len()
        );
        Ok(selected)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrendTotals {
    pub total_ggr: f64,
    pub total_stake: f64,
    pub total_winnings: f64,
    pub total_bet_count: u64,
    pub total_det_levy: f64,
    pub total_gaming_tax: f64,
    pub report_count: usize,
}

impl TrendTotals {
    pub fn add_report(&mut self, report: &ReportRecord) {
        self.total_ggr += report.totals.ggr;
        self.total_stake += report.totals.stake;
        self.total_winnings += report.totals.winnings;
        self.total_bet_count = self.total_bet_count.saturating_add(report.totals.bet_count);
        self.total_det_levy += report.totals.det_levy;
        self.total_gaming_tax += report.totals.gaming_tax;
        self.report_count += 1;
    }

    pub fn merge(&mut self, other: &TrendTotals) {
        self.total_ggr += other.total_ggr;
        self.total_stake += other.total_stake;
        self.total_winnings += other.total_winnings;
        self.total_bet_count = self.total_bet_count.saturating_add(other.total_bet_count);
        self.total_det_levy += other.total_det_levy;
        self.total_gaming_tax += other.total_gaming_tax;
        self.report_count += other.report_count;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MonthlyTrend {
    pub period: Period,
    #[serde(flatten)]
    pub totals: TrendTotals,
}

impl MonthlyTrend {
    /// Fractional GGR change against `previous`; `None` when the previous
    /// month had zero GGR.
    pub fn ggr_growth_from(&self, previous: &MonthlyTrend) -> Option<f64> {
        let base = previous.totals.total_ggr;
        if base == 0.0 {
            None
        } else {
            Some((self.totals.total_ggr - base) / base.abs())
        }
    }
}

/// Growth of each month against the point before it in the series.
pub fn month_over_month_growth(trends: &[MonthlyTrend]) -> Vec<(Period, Option<f64>)> {
    trends
        .windows(2)
        .map(|pair| (pair[1].period, pair[1].ggr_growth_from(&pair[0])))
        .collect()
}

fn trends_from<'a>(reports: impl IntoIterator<Item = &'a ReportRecord>) -> Vec<MonthlyTrend> {
    let mut by_month: BTreeMap<Period, TrendTotals> = BTreeMap::new();
    for report in reports {
        by_month.entry(report.period).or_default().add_report(report);
    }
    by_month
        .into_iter()
        .map(|(period, totals)| MonthlyTrend { period, totals })
        .collect()
}

/// Monthly totals across the filtered records, oldest month first.
pub fn monthly_trends(reports: &[ReportRecord], filter: &ReportFilter) -> Result<Vec<MonthlyTrend>> {
    let selected = filter.apply(reports)?;
    Ok(trends_from(selected))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OperatorPerformance {
    pub rank: usize,
    pub operator_id: String,
    pub operator_name: String,
    pub total_ggr: f64,
    pub total_stake: f64,
    pub total_bet_count: u64,
    pub report_count: usize,
}

/// Operators ranked by total GGR, highest first; ties go to the
/// alphabetically earlier name.
pub fn operator_performance(
    reports: &[ReportRecord],
    filter: &ReportFilter,
) -> Result<Vec<OperatorPerformance>> {
    let selected = filter.apply(reports)?;

    let mut by_operator: BTreeMap<&str, OperatorPerformance> = BTreeMap::new();
    for report in selected {
        let entry = by_operator
            .entry(report.operator_name.as_str())
            .or_insert_with(|| OperatorPerformance {
                rank: 0,
                operator_id: report.operator_id.clone(),
                operator_name: report.operator_name.clone(),
                total_ggr: 0.0,
                total_stake: 0.0,
                total_bet_count: 0,
                report_count: 0,
            });
        entry.total_ggr += report.totals.ggr;
        entry.total_stake += report.totals.stake;
        entry.total_bet_count = entry.total_bet_count.saturating_add(report.totals.bet_count);
        entry.report_count += 1;
    }

    let mut ranking: Vec<OperatorPerformance> = by_operator.into_values().collect();
    ranking.sort_by(|a, b| {
        b.total_ggr
            .total_cmp(&a.total_ggr)
            .then_with(|| a.operator_name.cmp(&b.operator_name))
    });
    for (idx, row) in ranking.iter_mut().enumerate() {
        row.rank = idx + 1;
    }
    Ok(ranking)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProductBreakdown {
    pub game_type: String,
    pub total_ggr: f64,
    pub total_stake: f64,
    pub total_winnings: f64,
    pub total_bet_count: u64,
    /// This product's fraction of the overall GGR; 0 when the overall GGR is 0.
    pub share_of_ggr: f64,
}

pub fn product_breakdown(
    reports: &[ReportRecord],
    filter: &ReportFilter,
) -> Result<Vec<ProductBreakdown>> {
    let selected = filter.apply(reports)?;

    let mut by_game: BTreeMap<&str, ProductBreakdown> = BTreeMap::new();
    for breakdown in selected.iter().flat_map(|r| r.breakdowns.iter()) {
        let entry = by_game
            .entry(breakdown.game_type.as_str())
            .or_insert_with(|| ProductBreakdown {
                game_type: breakdown.game_type.clone(),
                total_ggr: 0.0,
                total_stake: 0.0,
                total_winnings: 0.0,
                total_bet_count: 0,
                share_of_ggr: 0.0,
            });
        entry.total_ggr += breakdown.ggr;
        entry.total_stake += breakdown.stake;
        entry.total_winnings += breakdown.winnings;
        entry.total_bet_count = entry.total_bet_count.saturating_add(breakdown.bet_count);
    }

    let overall: f64 = by_game.values().map(|p| p.total_ggr).sum();
    let mut products: Vec<ProductBreakdown> = by_game.into_values().collect();
    for product in &mut products {
        product.share_of_ggr = if overall == 0.0 {
            0.0
        } else {
            product.total_ggr / overall
        };
    }
    products.sort_by(|a, b| {
        b.total_ggr
            .total_cmp(&a.total_ggr)
            .then_with(|| a.game_type.cmp(&b.game_type))
    });
    Ok(products)
}

/// Monthly rows plus the synthetic total row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MonthlyTable {
    pub rows: Vec<MonthlyTrend>,
    pub total: TrendTotals,
}

impl MonthlyTable {
    fn from_rows(rows: Vec<MonthlyTrend>) -> Self {
        let mut total = TrendTotals::default();
        for row in &rows {
            total.merge(&row.totals);
        }
        Self { rows, total }
    }

    /// Rows labelled by month, followed by a `"Total"` row.
    pub fn labeled_rows(&self) -> Vec<(String, TrendTotals)> {
        self.rows
            .iter()
            .map(|r| (r.period.to_string(), r.totals.clone()))
            .chain(std::iter::once(("Total".to_string(), self.total.clone())))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PivotRow {
    pub operator_id: String,
    pub operator_name: String,
    /// One value per table column; months without data hold 0.
    pub values: Vec<f64>,
    pub total: f64,
}

/// Operators down, months across, with a TOTAL column per operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OperatorPivotTable {
    pub columns: Vec<Period>,
    pub rows: Vec<PivotRow>,
}

impl OperatorPivotTable {
    fn build<'a>(
        reports: impl Iterator<Item = &'a ReportRecord>,
        columns: &[Period],
        value_of: impl Fn(&ReportRecord) -> f64,
    ) -> Self {
        let mut cells: BTreeMap<(&str, &str), BTreeMap<Period, f64>> = BTreeMap::new();
        for report in reports {
            *cells
                .entry((report.operator_name.as_str(), report.operator_id.as_str()))
                .or_default()
                .entry(report.period)
                .or_default() += value_of(report);
        }

        let rows = cells
            .into_iter()
            .map(|((operator_name, operator_id), by_month)| {
                let values: Vec<f64> = columns
                    .iter()
                    .map(|period| by_month.get(period).copied().unwrap_or(0.0))
                    .collect();
                PivotRow {
                    operator_id: operator_id.to_string(),
                    operator_name: operator_name.to_string(),
                    total: values.iter().sum(),
                    values,
                }
            })
            .collect();

        Self {
            columns: columns.to_vec(),
            rows,
        }
    }

    pub fn value(&self, operator_id: &str, period: Period) -> Option<f64> {
        let column = self.columns.iter().position(|p| *p == period)?;
        self.rows
            .iter()
            .find(|r| r.operator_id == operator_id)
            .and_then(|r| r.values.get(column).copied())
    }

    pub fn column_totals(&self) -> Vec<f64> {
        (0..self.columns.len())
            .map(|col| {
                self.rows
                    .iter()
                    .map(|r| r.values.get(col).copied().unwrap_or(0.0))
                    .sum()
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RegulatorAnalytics {
    pub regulator_id: String,
    pub regulator_name: String,
    /// Union of months across every sub-table, ascending.
    pub months: Vec<Period>,
    pub online: MonthlyTable,
    pub offline: MonthlyTable,
    pub combined: MonthlyTable,
    pub online_stake: OperatorPivotTable,
    pub online_ggr: OperatorPivotTable,
    pub offline_stake: OperatorPivotTable,
    pub offline_ggr: OperatorPivotTable,
}

pub fn regulator_analytics(
    reports: &[ReportRecord],
    regulator: &RegulatorRef,
    filter: &ReportFilter,
) -> Result<RegulatorAnalytics> {
    // A regulator set on the filter narrows further; it never widens.
    let mut selected = filter.apply(reports)?;
    selected.retain(|r| r.regulator_id.as_deref() == Some(regulator.regulator_id.as_str()));

    let on = |channel: Channel| selected.iter().copied().filter(move |r| r.channel == channel);

    let online_trends = trends_from(on(Channel::Online));
    let offline_trends = trends_from(on(Channel::Offline));

    let mut combined: BTreeMap<Period, TrendTotals> = BTreeMap::new();
    for trend in online_trends.iter().chain(offline_trends.iter()) {
        combined.entry(trend.period).or_default().merge(&trend.totals);
    }
    let combined_trends: Vec<MonthlyTrend> = combined
        .into_iter()
        .map(|(period, totals)| MonthlyTrend { period, totals })
        .collect();

    let months: Vec<Period> = selected
        .iter()
        .map(|r| r.period)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    Ok(RegulatorAnalytics {
        regulator_id: regulator.regulator_id.clone(),
        regulator_name: regulator.regulator_name.clone(),
        online_stake: OperatorPivotTable::build(on(Channel::Online), &months, |r| r.totals.stake),
        online_ggr: OperatorPivotTable::build(on(Channel::Online), &months, |r| r.totals.ggr),
        offline_stake: OperatorPivotTable::build(on(Channel::Offline), &months, |r| {
            r.totals.stake
        }),
        offline_ggr: OperatorPivotTable::build(on(Channel::Offline), &months, |r| r.totals.ggr),
        online: MonthlyTable::from_rows(online_trends),
        offline: MonthlyTable::from_rows(offline_trends),
        combined: MonthlyTable::from_rows(combined_trends),
        months,
    })
}

pub fn all_regulator_analytics(
    reports: &[ReportRecord],
    regulators: &[RegulatorRef],
    filter: &ReportFilter,
) -> Result<Vec<RegulatorAnalytics>> {
    regulators
        .iter()
        .filter(|regulator| {
            filter
                .regulator_id
                .as_ref()
                .map_or(true, |id| id == &regulator.regulator_id)
        })
        .map(|regulator| regulator_analytics(reports, regulator, filter))
        .collect()
}

/// Every analytics view over one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsViews {
    pub monthly_trends: Vec<MonthlyTrend>,
    pub operator_performance: Vec<OperatorPerformance>,
    pub product_breakdown: Vec<ProductBreakdown>,
    pub regulators: Vec<RegulatorAnalytics>,
}

pub fn build_views(
    reports: &[ReportRecord],
    filter: &ReportFilter,
    regulators: &[RegulatorRef],
) -> Result<AnalyticsViews> {
    filter.validate()?;
    Ok(AnalyticsViews {
        monthly_trends: monthly_trends(reports, filter)?,
        operator_performance: operator_performance(reports, filter)?,
        product_breakdown: product_breakdown(reports, filter)?,
        regulators: all_regulator_analytics(reports, regulators, filter)?,
    })
}
