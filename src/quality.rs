//! Data-quality scan over the report store.
//!
//! Each check is a [`QualityRule`]; the engine runs every registered rule over
//! the same snapshot and concatenates what they find. Issues are derived on
//! every scan and never stored.

use crate::schema::{Period, ReportRecord};
use log::{debug, info, warn};
use rayon::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_BALANCE_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataQualityIssue {
    MissingMonth {
        operator_id: String,
        expected_period: Period,
    },
    InvalidRow {
        report_id: String,
        issue_description: String,
    },
    BalanceDiscrepancy {
        report_id: String,
        opening_balance: f64,
        closing_balance: f64,
        expected_closing_balance: f64,
        difference: f64,
    },
}

pub trait QualityRule: Send + Sync {
    fn name(&self) -> &str;

    /// Must not fail the scan: records that cannot be evaluated are skipped.
    fn evaluate(&self, reports: &[&ReportRecord]) -> Vec<DataQualityIssue>;
}

/// Flags calendar months absent between an operator's first and latest report.
#[derive(Debug, Clone, Default)]
pub struct MissingMonthRule {
    operator_universe: Option<BTreeSet<String>>,
}

impl MissingMonthRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the check to the given operators, typically the operator catalog.
    pub fn bounded_to(operators: impl IntoIterator<Item = String>) -> Self {
        Self {
            operator_universe: Some(operators.into_iter().collect()),
        }
    }
}

impl QualityRule for MissingMonthRule {
    fn name(&self) -> &str {
        "missing_month"
    }

    fn evaluate(&self, reports: &[&ReportRecord]) -> Vec<DataQualityIssue> {
        let mut periods_by_operator: BTreeMap<&str, BTreeSet<Period>> = BTreeMap::new();
        for report in reports {
            if let Some(universe) = &self.operator_universe {
                if !universe.contains(&report.operator_id) {
                    continue;
                }
            }
            periods_by_operator
                .entry(report.operator_id.as_str())
                .or_default()
                .insert(report.period);
        }

        let mut issues = Vec::new();
        for (operator_id, periods) in periods_by_operator {
            // A lone report has nothing to be missing between.
            if periods.len() < 2 {
                continue;
            }
            let (Some(&first), Some(&last)) = (periods.first(), periods.last()) else {
                continue;
            };
            for expected_period in first.months_through(last) {
                if !periods.contains(&expected_period) {
                    issues.push(DataQualityIssue::MissingMonth {
                        operator_id: operator_id.to_string(),
                        expected_period,
                    });
                }
            }
        }
        issues
    }
}

/// Surfaces the rows the mapper rejected, per owning report.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvalidRowRule;

impl QualityRule for InvalidRowRule {
    fn name(&self) -> &str {
        "invalid_row"
    }

    fn evaluate(&self, reports: &[&ReportRecord]) -> Vec<DataQualityIssue> {
        reports
            .iter()
            .flat_map(|report| {
                report
                    .invalid_rows
                    .iter()
                    .map(move |row| DataQualityIssue::InvalidRow {
                        report_id: report.id.clone(),
                        issue_description: format!("row {}: {}", row.row_index, row.reason),
                    })
            })
            .collect()
    }
}

/// Checks `closing == opening + ggr` within a tolerance.
#[derive(Debug, Clone, Copy)]
pub struct BalanceReconciliationRule {
    tolerance: f64,
}

impl BalanceReconciliationRule {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }
}

impl Default for BalanceReconciliationRule {
    fn default() -> Self {
        Self::new(DEFAULT_BALANCE_TOLERANCE)
    }
}

impl QualityRule for BalanceReconciliationRule {
    fn name(&self) -> &str {
        "balance_reconciliation"
    }

    fn evaluate(&self, reports: &[&ReportRecord]) -> Vec<DataQualityIssue> {
        let mut issues = Vec::new();
        for report in reports {
            let (Some(opening_balance), Some(closing_balance)) =
                (report.opening_balance, report.closing_balance)
            else {
                debug!("Report {} has no balances; skipping reconciliation", report.id);
                continue;
            };

            let expected_closing_balance = opening_balance + report.totals.ggr;
            let difference = closing_balance - expected_closing_balance;
            if !difference.is_finite() {
                warn!(
                    "Report {} has non-finite balance figures; skipping reconciliation",
                    report.id
                );
                continue;
            }

            if difference.abs() > self.tolerance {
                issues.push(DataQualityIssue::BalanceDiscrepancy {
                    report_id: report.id.clone(),
                    opening_balance,
                    closing_balance,
                    expected_closing_balance,
                    difference,
                });
            }
        }
        issues
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub issues: Vec<DataQualityIssue>,
    pub total_issues: usize,
    pub issues_per_rule: BTreeMap<String, usize>,
    pub reports_scanned: usize,
}

impl QualityReport {
    pub fn missing_months(&self) -> impl Iterator<Item = &DataQualityIssue> {
        self.issues
            .iter()
            .filter(|i| matches!(i, DataQualityIssue::MissingMonth { .. }))
    }

    pub fn invalid_rows(&self) -> impl Iterator<Item = &DataQualityIssue> {
        self.issues
            .iter()
            .filter(|i| matches!(i, DataQualityIssue::InvalidRow { .. }))
    }

    pub fn balance_discrepancies(&self) -> impl Iterator<Item = &DataQualityIssue> {
        self.issues
            .iter()
            .filter(|i| matches!(i, DataQualityIssue::BalanceDiscrepancy { .. }))
    }

    pub fn summary(&self) -> String {
        let per_rule = self
            .issues_per_rule
            .iter()
            .map(|(rule, count)| format!("{}={}", rule, count))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{} issues across {} reports ({})",
            self.total_issues, self.reports_scanned, per_rule
        )
    }
}

pub struct DataQualityEngine {
    rules: Vec<Box<dyn QualityRule>>,
    include_all_statuses: bool,
}

impl Default for DataQualityEngine {
    fn default() -> Self {
        Self::with_default_rules(DEFAULT_BALANCE_TOLERANCE)
    }
}

impl DataQualityEngine {
    /// An engine with no rules registered.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            include_all_statuses: false,
        }
    }

    pub fn with_default_rules(balance_tolerance: f64) -> Self {
        Self::new()
            .with_rule(MissingMonthRule::new())
            .with_rule(InvalidRowRule)
            .with_rule(BalanceReconciliationRule::new(balance_tolerance))
    }

    pub fn with_rule(mut self, rule: impl QualityRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Replaces any registered rule with the same name.
    pub fn replace_rule(mut self, rule: impl QualityRule + 'static) -> Self {
        let name = rule.name().to_string();
        self.rules.retain(|r| r.name() != name);
        self.rules.push(Box::new(rule));
        self
    }

    pub fn include_all_statuses(mut self, include: bool) -> Self {
        self.include_all_statuses = include;
        self
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Runs every rule over the snapshot. Only approved reports are scanned
    /// unless the engine was told to include all statuses.
    pub fn scan(&self, reports: &[ReportRecord]) -> QualityReport {
        let scoped: Vec<&ReportRecord> = reports
            .iter()
            .filter(|r| self.include_all_statuses || r.is_approved())
            .collect();

        let results: Vec<(String, Vec<DataQualityIssue>)> = self
            .rules
            .par_iter()
            .map(|rule| (rule.name().to_string(), rule.evaluate(&scoped)))
            .collect();

        let mut report = QualityReport {
            reports_scanned: scoped.len(),
            ..QualityReport::default()
        };
        for (name, issues) in results {
            debug!("Rule {} found {} issues", name, issues.len());
            *report.issues_per_rule.entry(name).or_default() += issues.len();
            report.issues.extend(issues);
        }
        report.total_issues = report.issues.len();

        info!("Quality scan: {}", report.summary());
        report
    }
}
