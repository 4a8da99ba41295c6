use crate::decoder::{DecodeLimits, DEFAULT_MAX_FILE_BYTES, DEFAULT_MAX_ROWS};
use crate::error::{ReportingError, Result};
use crate::mapping::ColumnMapping;
use crate::metrics::LevyRates;
use crate::quality::DEFAULT_BALANCE_TOLERANCE;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct IngestConfig {
    #[schemars(description = "Largest accepted upload in bytes. Defaults to 15 MiB.")]
    pub max_file_bytes: usize,

    #[schemars(description = "Largest accepted worksheet row count, header included.")]
    pub max_rows: usize,

    #[schemars(
        description = "Allowed absolute gap between the reported closing balance and opening balance plus GGR."
    )]
    pub balance_tolerance: f64,

    #[schemars(description = "Gaming tax and DET levy rates used when a regulator has no override.")]
    pub default_rates: LevyRates,

    #[schemars(description = "Per-regulator rate overrides keyed by regulator identifier.")]
    pub regulator_rates: BTreeMap<String, LevyRates>,

    #[schemars(description = "Header label to field table used by the row mapper.")]
    pub column_mapping: ColumnMapping,

    #[schemars(
        description = "When true, quality scans and analytics include pending and rejected reports."
    )]
    pub include_all_statuses: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_rows: DEFAULT_MAX_ROWS,
            balance_tolerance: DEFAULT_BALANCE_TOLERANCE,
            default_rates: LevyRates::default(),
            regulator_rates: BTreeMap::new(),
            column_mapping: ColumnMapping::default(),
            include_all_statuses: false,
        }
    }
}

impl IngestConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: IngestConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_file_bytes == 0 || self.max_rows == 0 {
            return Err(ReportingError::Config(
                "max_file_bytes and max_rows must be positive".to_string(),
            ));
        }
        if !self.balance_tolerance.is_finite() || self.balance_tolerance < 0.0 {
            return Err(ReportingError::Config(format!(
                "balance_tolerance {} must be a non-negative number",
                self.balance_tolerance
            )));
        }
        validate_rates("default_rates", &self.default_rates)?;
        for (regulator, rates) in &self.regulator_rates {
            validate_rates(regulator, rates)?;
        }
        if self.column_mapping.aliases.is_empty() {
            return Err(ReportingError::Config(
                "column_mapping has no aliases".to_string(),
            ));
        }
        Ok(())
    }

    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_bytes: self.max_file_bytes,
            max_rows: self.max_rows,
        }
    }

    /// Rates for a regulator, falling back to the defaults.
    pub fn rates_for(&self, regulator_id: Option<&str>) -> LevyRates {
        regulator_id
            .and_then(|id| self.regulator_rates.get(id))
            .copied()
            .unwrap_or(self.default_rates)
    }

    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(IngestConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::json_schema())
    }
}

fn validate_rates(owner: &str, rates: &LevyRates) -> Result<()> {
    for (name, rate) in [
        ("gaming_tax_rate", rates.gaming_tax_rate),
        ("det_levy_rate", rates.det_levy_rate),
    ] {
        if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
            return Err(ReportingError::Config(format!(
                "{}.{} = {} must be between 0 and 1",
                owner, name, rate
            )));
        }
    }
    Ok(())
}
