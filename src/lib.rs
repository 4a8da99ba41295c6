//! # Gaming Revenue Core
//!
//! Turns operator-submitted revenue spreadsheets into structured monthly
//! report records, derives regulatory levies, checks data quality, and rolls
//! the results up across operators, regulators and months.
//!
//! ## Core Concepts
//!
//! - **RawGrid**: the first sheet of an upload as untyped `Empty | Text | Number` cells
//! - **MappedRow**: one data row resolved against a declarative header table
//! - **ReportRecord**: one operator-month-channel report with per-game breakdowns and totals
//! - **GGR**: stake minus winnings; gaming tax and the DET levy are fractions of it
//! - **Quality rules**: independent checks (missing months, invalid rows, balance reconciliation)
//!   run over a snapshot of records
//!
//! ## Example
//!
//! ```rust,ignore
//! use gaming_revenue_core::*;
//!
//! let config = IngestConfig::default();
//! let mut context = SubmissionContext::new("upload-17");
//! context.period = Period::new(2024, 1);
//!
//! let csv = b"Operator,Stake,Payout\nAcme,1000,600\n";
//! let outcome = process_submission(csv, Some(FileFormat::Csv), &context, &config, &[])?;
//!
//! let report = &outcome.reports[0];
//! assert_eq!(report.totals.ggr, 400.0);
//! assert_eq!(report.totals.gaming_tax, 80.0);
//! ```

pub mod aggregation;
pub mod config;
pub mod decoder;
pub mod error;
pub mod forecast;
pub mod ingestion;
pub mod mapping;
pub mod metrics;
pub mod quality;
pub mod schema;
pub mod store;
pub mod utils;

pub use aggregation::*;
pub use config::IngestConfig;
pub use decoder::{decode_workbook, DecodeLimits, FileFormat};
pub use error::{DecodeError, ReportingError, Result};
pub use forecast::{forecast_ggr, ggr_series, Forecaster, SeriesPoint};
pub use ingestion::{assemble_reports, SubmissionOutcome};
pub use mapping::{ColumnMapping, MappedRow, MappingOutcome, ReportField, RowMapper};
pub use metrics::{LevyRates, MetricCalculator};
pub use quality::*;
pub use schema::*;
pub use store::{InMemoryReportStore, ReportStore, UpsertOutcome};

use log::{debug, info, warn};
use rayon::prelude::*;

/// One uploaded file awaiting processing.
#[derive(Debug, Clone)]
pub struct SubmissionFile {
    pub context: SubmissionContext,
    pub bytes: Vec<u8>,
    /// Declared format, usually from the file extension. `None` lets the
    /// decoder sniff the content.
    pub format: Option<FileFormat>,
}

impl SubmissionFile {
    pub fn new(context: SubmissionContext, bytes: Vec<u8>) -> Self {
        Self {
            context,
            bytes,
            format: None,
        }
    }

    pub fn with_file_name(mut self, file_name: &str) -> Result<Self> {
        self.format = Some(FileFormat::from_file_name(file_name)?);
        Ok(self)
    }
}

pub struct RevenueReportProcessor;

impl RevenueReportProcessor {
    /// Decodes, maps and assembles one upload. File-level problems are
    /// returned as errors; row-level problems end up on the records.
    pub fn process(
        bytes: &[u8],
        format: Option<FileFormat>,
        context: &SubmissionContext,
        config: &IngestConfig,
        operator_catalog: &[OperatorRef],
    ) -> Result<SubmissionOutcome> {
        config.validate()?;

        let grid = decode_workbook(bytes, format, &config.decode_limits())?;
        debug!(
            "Submission {} decoded into {} data rows",
            context.submission_id,
            grid.data_row_count()
        );

        let mapped = RowMapper::new(&config.column_mapping).map_grid(&grid)?;
        let calculator = MetricCalculator::new(config.rates_for(context.regulator_id.as_deref()));
        let outcome = assemble_reports(context, &mapped, &calculator, operator_catalog);

        info!(
            "Processed submission {}: {} reports, {} invalid rows, {} skipped rows",
            context.submission_id,
            outcome.reports.len(),
            outcome.invalid_row_count(),
            outcome.skipped_rows
        );
        Ok(outcome)
    }

    /// Processes every file in parallel. The result has one entry per input,
    /// in input order, and a failed file never affects the others.
    pub fn process_batch(
        files: &[SubmissionFile],
        config: &IngestConfig,
        operator_catalog: &[OperatorRef],
    ) -> Vec<Result<SubmissionOutcome>> {
        info!("Processing batch of {} submissions", files.len());

        let results: Vec<Result<SubmissionOutcome>> = files
            .par_iter()
            .map(|file| {
                Self::process(
                    &file.bytes,
                    file.format,
                    &file.context,
                    config,
                    operator_catalog,
                )
            })
            .collect();

        for (file, result) in files.iter().zip(&results) {
            if let Err(e) = result {
                warn!("Submission {} failed: {}", file.context.submission_id, e);
            }
        }
        results
    }

    /// Processes one upload and stores its records and raw bytes. When the
    /// store refuses any record, nothing from the upload is written.
    pub fn ingest(
        store: &mut InMemoryReportStore,
        file: &SubmissionFile,
        config: &IngestConfig,
    ) -> Result<Vec<UpsertOutcome>> {
        let catalog = store.operator_catalog();
        let outcome = Self::process(&file.bytes, file.format, &file.context, config, &catalog)?;

        let upserts = store.upsert_all(outcome.reports)?;
        store.store_raw_submission(file.context.submission_id.clone(), file.bytes.clone());
        Ok(upserts)
    }

    /// Runs the quality scan and the analytics views over one snapshot at the
    /// same time. The quality scan covers the whole snapshot; `filter` scopes
    /// the analytics views.
    pub fn analyze_snapshot(
        reports: &[ReportRecord],
        filter: &ReportFilter,
        operators: &[OperatorRef],
        regulators: &[RegulatorRef],
        config: &IngestConfig,
    ) -> Result<(QualityReport, AnalyticsViews)> {
        filter.validate()?;

        let mut engine = DataQualityEngine::with_default_rules(config.balance_tolerance)
            .include_all_statuses(config.include_all_statuses);
        if !operators.is_empty() {
            engine = engine.replace_rule(MissingMonthRule::bounded_to(
                operators.iter().map(|o| o.operator_id.clone()),
            ));
        }

        let (quality, views) = rayon::join(
            || engine.scan(reports),
            || build_views(reports, filter, regulators),
        );
        Ok((quality, views?))
    }

    /// [`Self::analyze_snapshot`] over everything a store currently holds.
    pub fn analyze_store(
        store: &impl ReportStore,
        filter: &ReportFilter,
        config: &IngestConfig,
    ) -> Result<(QualityReport, AnalyticsViews)> {
        let snapshot = store.fetch_report_records(&ReportFilter {
            include_all_statuses: true,
            ..ReportFilter::all()
        })?;
        Self::analyze_snapshot(
            &snapshot,
            filter,
            &store.operator_catalog(),
            &store.regulator_catalog(),
            config,
        )
    }
}

pub fn process_submission(
    bytes: &[u8],
    format: Option<FileFormat>,
    context: &SubmissionContext,
    config: &IngestConfig,
    operator_catalog: &[OperatorRef],
) -> Result<SubmissionOutcome> {
    RevenueReportProcessor::process(bytes, format, context, config, operator_catalog)
}

pub fn process_batch(
    files: &[SubmissionFile],
    config: &IngestConfig,
    operator_catalog: &[OperatorRef],
) -> Vec<Result<SubmissionOutcome>> {
    RevenueReportProcessor::process_batch(files, config, operator_catalog)
}

pub fn analyze_snapshot(
    reports: &[ReportRecord],
    filter: &ReportFilter,
    operators: &[OperatorRef],
    regulators: &[RegulatorRef],
    config: &IngestConfig,
) -> Result<(QualityReport, AnalyticsViews)> {
    RevenueReportProcessor::analyze_snapshot(reports, filter, operators, regulators, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(id: &str, month: u32) -> SubmissionContext {
        let mut context = SubmissionContext::new(id);
        context.period = Period::new(2024, month);
        context
    }

    #[test]
    fn test_end_to_end_csv() {
        let csv = b"Operator,Game Type,Stake,Payout\nAcme,Slots,1000,600\nAcme,Poker,500,100\n";
        let outcome = process_submission(
            csv,
            Some(FileFormat::Csv),
            &context("sub-1", 3),
            &IngestConfig::default(),
            &[],
        )
        .unwrap();

        assert_eq!(outcome.reports.len(), 1);
        let report = &outcome.reports[0];
        assert_eq!(report.operator_id, "acme");
        assert_eq!(report.period.to_string(), "2024-03");
        assert_eq!(report.breakdowns.len(), 2);
        assert!((report.totals.ggr - 800.0).abs() < 1e-6);
        assert!((report.totals.gaming_tax - 160.0).abs() < 1e-6);
        assert_eq!(report.status, ReportStatus::Pending);
    }

    #[test]
    fn test_regulator_rates_are_applied() {
        let mut config = IngestConfig::default();
        config.regulator_rates.insert(
            "lotteries".to_string(),
            LevyRates {
                gaming_tax_rate: 0.10,
                det_levy_rate: 0.0,
            },
        );
        let mut ctx = context("sub-2", 1);
        ctx.regulator_id = Some("lotteries".to_string());

        let outcome = process_submission(
            b"Operator,Stake,Payout\nAcme,1000,600\n",
            None,
            &ctx,
            &config,
            &[],
        )
        .unwrap();
        let totals = &outcome.reports[0].totals;
        assert!((totals.gaming_tax - 40.0).abs() < 1e-6);
        assert_eq!(totals.det_levy, 0.0);
    }

    #[test]
    fn test_missing_required_column_fails_file() {
        let err = process_submission(
            b"Operator,Stake\nAcme,1000\n",
            Some(FileFormat::Csv),
            &context("sub-3", 1),
            &IngestConfig::default(),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, ReportingError::MissingColumns(_)));
    }

    #[test]
    fn test_submission_file_name() {
        let file = SubmissionFile::new(context("sub-4", 1), vec![])
            .with_file_name("returns.XLSX")
            .unwrap();
        assert_eq!(file.format, Some(FileFormat::Xlsx));

        let err = SubmissionFile::new(context("sub-4", 1), vec![])
            .with_file_name("returns.pdf")
            .unwrap_err();
        assert!(matches!(
            err,
            ReportingError::Decode(DecodeError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_ingest_and_analyze_store() {
        let mut store = InMemoryReportStore::with_catalogs(
            vec![OperatorRef {
                operator_id: "acme".to_string(),
                operator_name: "Acme".to_string(),
            }],
            vec![],
        );
        let config = IngestConfig::default();

        for (id, month) in [("a", 1), ("b", 3)] {
            let file = SubmissionFile::new(
                context(id, month),
                b"Operator,Stake,Payout\nAcme,1000,600\n".to_vec(),
            );
            let upserts = RevenueReportProcessor::ingest(&mut store, &file, &config).unwrap();
            assert_eq!(upserts, vec![UpsertOutcome::Inserted]);
        }
        for record in store.records() {
            store
                .apply_review(&record.id, ReviewDecision::Approved, "auditor", None)
                .unwrap();
        }

        let (quality, views) =
            RevenueReportProcessor::analyze_store(&store, &ReportFilter::all(), &config).unwrap();
        assert_eq!(quality.missing_months().count(), 1);
        assert_eq!(views.monthly_trends.len(), 2);
        assert!(store.fetch_raw_submission("a:acme/-/2024-01/online").is_ok());
    }

    #[test]
    fn test_refused_ingest_writes_nothing() {
        let mut store = InMemoryReportStore::new();
        let config = IngestConfig::default();

        let beta = SubmissionFile::new(
            context("first", 2),
            b"Operator,Stake,Payout\nBeta,500,100\n".to_vec(),
        );
        RevenueReportProcessor::ingest(&mut store, &beta, &config).unwrap();
        let beta_id = store.records()[0].id.clone();
        store
            .apply_review(&beta_id, ReviewDecision::Approved, "auditor", None)
            .unwrap();

        let both = SubmissionFile::new(
            context("second", 2),
            b"Operator,Stake,Payout\nAcme,1000,600\nBeta,700,200\n".to_vec(),
        );
        let err = RevenueReportProcessor::ingest(&mut store, &both, &config).unwrap_err();
        assert!(matches!(err, ReportingError::DuplicateSubmission { .. }));
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].operator_id, "beta");
        assert!(store.raw_submission("second").is_none());
        assert!(store.raw_submission("first").is_some());
    }

    #[test]
    fn test_analyze_rejects_bad_filter() {
        let filter = ReportFilter {
            from: Period::new(2024, 5),
            to: Period::new(2024, 1),
            ..ReportFilter::all()
        };
        let err = analyze_snapshot(&[], &filter, &[], &[], &IngestConfig::default()).unwrap_err();
        assert!(matches!(err, ReportingError::AggregationInput(_)));
    }
}
