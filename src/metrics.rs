use crate::mapping::MappedRow;
use crate::schema::{CalculationFlag, GameBreakdown, ReportTotals};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_GAMING_TAX_RATE: f64 = 0.20;
pub const DEFAULT_DET_LEVY_RATE: f64 = 0.05;
pub const DEFAULT_GAME_TYPE: &str = "Unspecified";

/// Levy rates applied to GGR. Both are fractions, e.g. `0.20` for 20%.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LevyRates {
    pub gaming_tax_rate: f64,
    pub det_levy_rate: f64,
}

impl Default for LevyRates {
    fn default() -> Self {
        Self {
            gaming_tax_rate: DEFAULT_GAMING_TAX_RATE,
            det_levy_rate: DEFAULT_DET_LEVY_RATE,
        }
    }
}

/// Returns 0 for a zero stake instead of dividing by it.
pub fn ggr_percentage(ggr: f64, stake: f64) -> f64 {
    if stake == 0.0 {
        0.0
    } else {
        ggr / stake
    }
}

/// `closing - (opening + ggr)`, or `None` when either balance is unknown.
pub fn balance_difference(opening: Option<f64>, closing: Option<f64>, ggr: f64) -> Option<f64> {
    match (opening, closing) {
        (Some(opening), Some(closing)) => Some(closing - (opening + ggr)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricCalculator {
    rates: LevyRates,
}

impl MetricCalculator {
    pub fn new(rates: LevyRates) -> Self {
        Self { rates }
    }

    pub fn rates(&self) -> LevyRates {
        self.rates
    }

    /// Derives GGR and levies for one game type. Negative GGR is a loss month
    /// and is carried through as-is.
    pub fn compute_breakdown(
        &self,
        game_type: &str,
        bet_count: u64,
        stake: f64,
        winnings: f64,
    ) -> GameBreakdown {
        let ggr = stake - winnings;
        let ggr_percentage = ggr_percentage(ggr, stake);
        let gaming_tax = self.rates.gaming_tax_rate * ggr;
        let det_levy = self.rates.det_levy_rate * ggr;
        let net_revenue = ggr - gaming_tax - det_levy;

        GameBreakdown {
            game_type: game_type.to_string(),
            bet_count,
            stake,
            winnings,
            ggr,
            ggr_percentage,
            det_levy,
            gaming_tax,
            net_revenue,
        }
    }

    /// Report totals are sums of the per-game figures so that the two levels
    /// always agree. Only the percentage is re-derived from the summed values.
    pub fn aggregate(&self, breakdowns: &[GameBreakdown]) -> ReportTotals {
        let mut totals = ReportTotals::default();
        for b in breakdowns {
            totals.stake += b.stake;
            totals.winnings += b.winnings;
            totals.bet_count = totals.bet_count.saturating_add(b.bet_count);
            totals.ggr += b.ggr;
            totals.gaming_tax += b.gaming_tax;
            totals.det_levy += b.det_levy;
            totals.net_revenue += b.net_revenue;
        }
        totals.ggr_percentage = ggr_percentage(totals.ggr, totals.stake);
        totals
    }

    /// Groups rows by game type, sums their raw figures, then derives metrics
    /// per group. Output is ordered by game type.
    pub fn breakdowns_from_rows(&self, rows: &[&MappedRow]) -> Vec<GameBreakdown> {
        let mut groups: BTreeMap<String, (u64, f64, f64)> = BTreeMap::new();
        for row in rows {
            let game_type = row
                .game_type
                .clone()
                .unwrap_or_else(|| DEFAULT_GAME_TYPE.to_string());
            let entry = groups.entry(game_type).or_insert((0, 0.0, 0.0));
            entry.0 = entry.0.saturating_add(row.bet_count);
            entry.1 += row.stake;
            entry.2 += row.winnings;
        }

        groups
            .into_iter()
            .map(|(game_type, (bets, stake, winnings))| {
                self.compute_breakdown(&game_type, bets, stake, winnings)
            })
            .collect()
    }

    /// Totals for the rows, including the optional ticket figures.
    pub fn totals_from_rows(&self, rows: &[&MappedRow], breakdowns: &[GameBreakdown]) -> ReportTotals {
        let mut totals = self.aggregate(breakdowns);
        totals.cancelled = sum_present(rows.iter().map(|r| r.cancelled));
        totals.open_tickets = sum_present(rows.iter().map(|r| r.open_tickets));
        totals
    }

    pub fn flag_suspicious(&self, breakdowns: &[GameBreakdown]) -> Vec<CalculationFlag> {
        let mut flags = Vec::new();
        for b in breakdowns {
            if b.stake < 0.0 {
                flags.push(CalculationFlag {
                    game_type: b.game_type.clone(),
                    field: "stake".to_string(),
                    message: format!("Negative stake {:.2}", b.stake),
                });
            }
            if b.winnings < 0.0 {
                flags.push(CalculationFlag {
                    game_type: b.game_type.clone(),
                    field: "winnings".to_string(),
                    message: format!("Negative winnings {:.2}", b.winnings),
                });
            }
        }
        flags
    }
}

/// Sum of the present values, `None` when every value is absent.
pub fn sum_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}
