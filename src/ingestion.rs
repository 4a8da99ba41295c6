use crate::mapping::{MappedRow, MappingOutcome};
use crate::metrics::{balance_difference, sum_present, MetricCalculator};
use crate::schema::{
    Channel, InvalidRow, OperatorRef, Period, ReportRecord, ReportStatus, StoreKey,
    SubmissionContext,
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Records produced from one uploaded file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub reports: Vec<ReportRecord>,
    /// Invalid rows that could not be attached to any record from this file.
    pub orphan_rows: Vec<InvalidRow>,
    pub skipped_rows: usize,
}

impl SubmissionOutcome {
    pub fn invalid_row_count(&self) -> usize {
        self.orphan_rows.len()
            + self
                .reports
                .iter()
                .map(|r| r.invalid_rows.len())
                .sum::<usize>()
    }
}

struct ReportGroup<'a> {
    operator_name: String,
    rows: Vec<&'a MappedRow>,
}

/// Groups mapped rows into one record per (operator, period, channel) and
/// derives their metrics. Identity missing from a row falls back to the
/// submission context, then to the operator catalog.
pub fn assemble_reports(
    context: &SubmissionContext,
    outcome: &MappingOutcome,
    calculator: &MetricCalculator,
    operator_catalog: &[OperatorRef],
) -> SubmissionOutcome {
    let mut groups: BTreeMap<(String, Period, Channel), ReportGroup> = BTreeMap::new();
    let mut invalid_rows = outcome.invalid_rows.clone();

    for row in &outcome.valid_rows {
        let Some((operator_id, operator_name)) = resolve_operator(row, context, operator_catalog)
        else {
            invalid_rows.push(InvalidRow {
                row_index: row.row_index,
                operator_name: None,
                reason: "operator: no name or identifier".to_string(),
            });
            continue;
        };

        let Some(period) = row.period.or(context.period) else {
            invalid_rows.push(InvalidRow {
                row_index: row.row_index,
                operator_name: Some(operator_name),
                reason: "period: no reporting period in row or submission".to_string(),
            });
            continue;
        };

        let channel = row.channel.unwrap_or(context.channel);

        groups
            .entry((operator_id, period, channel))
            .or_insert_with(|| ReportGroup {
                operator_name,
                rows: Vec::new(),
            })
            .rows
            .push(row);
    }

    let mut reports: Vec<ReportRecord> = groups
        .into_iter()
        .map(|((operator_id, period, channel), group)| {
            build_report(
                context,
                calculator,
                operator_id,
                group.operator_name,
                period,
                channel,
                &group.rows,
            )
        })
        .collect();

    let mut orphan_rows = Vec::new();
    invalid_rows.sort_by_key(|r| r.row_index);
    for invalid in invalid_rows {
        // Rows naming an operator only attach to that operator's report.
        let owner = match invalid.operator_name.as_deref() {
            Some(name) => owning_report(&reports, name, operator_catalog),
            None if reports.is_empty() => None,
            None => Some(0),
        };

        match owner {
            Some(idx) => reports[idx].invalid_rows.push(invalid),
            None => orphan_rows.push(invalid),
        }
    }

    if !orphan_rows.is_empty() {
        warn!(
            "Submission {}: {} invalid rows have no report to attach to",
            context.submission_id,
            orphan_rows.len()
        );
    }

    debug!(
        "Submission {} assembled into {} reports",
        context.submission_id,
        reports.len()
    );

    SubmissionOutcome {
        reports,
        orphan_rows,
        skipped_rows: outcome.skipped_rows,
    }
}

fn resolve_operator(
    row: &MappedRow,
    context: &SubmissionContext,
    catalog: &[OperatorRef],
) -> Option<(String, String)> {
    let name = row
        .operator_name
        .clone()
        .or_else(|| context.operator_name.clone());

    let id = row
        .operator_id
        .clone()
        .or_else(|| {
            name.as_ref().and_then(|n| {
                catalog
                    .iter()
                    .find(|op| op.operator_name.eq_ignore_ascii_case(n))
                    .map(|op| op.operator_id.clone())
            })
        })
        .or_else(|| context.operator_id.clone())
        .or_else(|| name.as_deref().map(slugify))?;

    let name = name
        .or_else(|| {
            catalog
                .iter()
                .find(|op| op.operator_id == id)
                .map(|op| op.operator_name.clone())
        })
        .unwrap_or_else(|| id.clone());

    Some((id, name))
}

fn owning_report(reports: &[ReportRecord], name: &str, catalog: &[OperatorRef]) -> Option<usize> {
    let slug = slugify(name);
    let catalog_id = catalog
        .iter()
        .find(|op| op.operator_name.eq_ignore_ascii_case(name))
        .map(|op| op.operator_id.as_str());
    reports.iter().position(|r| {
        r.operator_name.eq_ignore_ascii_case(name)
            || r.operator_id == slug
            || catalog_id == Some(r.operator_id.as_str())
    })
}

fn build_report(
    context: &SubmissionContext,
    calculator: &MetricCalculator,
    operator_id: String,
    operator_name: String,
    period: Period,
    channel: Channel,
    rows: &[&MappedRow],
) -> ReportRecord {
    let breakdowns = calculator.breakdowns_from_rows(rows);
    let totals = calculator.totals_from_rows(rows, &breakdowns);
    let opening_balance = sum_present(rows.iter().map(|r| r.opening_balance));
    let closing_balance = sum_present(rows.iter().map(|r| r.closing_balance));
    let calculation_flags = calculator.flag_suspicious(&breakdowns);

    let key = StoreKey {
        operator_id: operator_id.clone(),
        regulator_id: context.regulator_id.clone(),
        period,
        channel,
    };

    ReportRecord {
        id: format!("{}:{}", context.submission_id, key),
        submission_id: context.submission_id.clone(),
        operator_id,
        operator_name,
        regulator_id: context.regulator_id.clone(),
        channel,
        period,
        balance_difference: balance_difference(opening_balance, closing_balance, totals.ggr),
        breakdowns,
        totals,
        opening_balance,
        closing_balance,
        status: ReportStatus::Pending,
        submitted_at: context.submitted_at,
        review: None,
        invalid_rows: Vec::new(),
        calculation_flags,
    }
}

pub fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}
