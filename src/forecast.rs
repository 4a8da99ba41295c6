use crate::aggregation::MonthlyTrend;
use crate::error::{ReportingError, Result};
use crate::schema::Period;
use crate::utils::months_between;
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SeriesPoint {
    pub period: Period,
    pub value: f64,
}

/// External predictive model. Implementations receive an ordered monthly
/// history and return `horizon` points following its last month.
pub trait Forecaster {
    fn forecast(&self, history: &[SeriesPoint], horizon: usize) -> Result<Vec<SeriesPoint>>;
}

/// Monthly GGR series from aggregated trends, oldest first.
pub fn ggr_series(trends: &[MonthlyTrend]) -> Vec<SeriesPoint> {
    trends
        .iter()
        .map(|t| SeriesPoint {
            period: t.period,
            value: t.totals.total_ggr,
        })
        .collect()
}

/// Runs `forecaster` over the GGR history and checks what comes back.
pub fn forecast_ggr(
    forecaster: &dyn Forecaster,
    trends: &[MonthlyTrend],
    horizon: usize,
) -> Result<Vec<SeriesPoint>> {
    if horizon == 0 {
        return Err(ReportingError::Forecast(
            "horizon must be at least one month".to_string(),
        ));
    }
    let history = ggr_series(trends);
    let Some(last) = history.last().map(|p| p.period) else {
        return Err(ReportingError::Forecast(
            "no monthly history to forecast from".to_string(),
        ));
    };
    if history
        .windows(2)
        .any(|w| months_between(w[0].period, w[1].period) <= 0)
    {
        return Err(ReportingError::Forecast(
            "history must be strictly ordered by month".to_string(),
        ));
    }

    let predicted = forecaster.forecast(&history, horizon)?;
    if predicted.len() != horizon {
        return Err(ReportingError::Forecast(format!(
            "expected {} forecast points, got {}",
            horizon,
            predicted.len()
        )));
    }
    if let Some(point) = predicted.iter().find(|p| p.period <= last) {
        return Err(ReportingError::Forecast(format!(
            "forecast point {} does not follow the last observed month {}",
            point.period, last
        )));
    }
    if predicted.iter().any(|p| !p.value.is_finite()) {
        return Err(ReportingError::Forecast(
            "forecast returned a non-finite value".to_string(),
        ));
    }

    info!(
        "Forecast {} months of GGR from {} observed months",
        horizon,
        history.len()
    );
    Ok(predicted)
}
