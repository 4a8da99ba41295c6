use anyhow::Result;
use gaming_revenue_core::*;

const TOLERANCE: f64 = 1e-6;

fn context(submission_id: &str, year: i32, month: u32) -> SubmissionContext {
    let mut context = SubmissionContext::new(submission_id);
    context.period = Period::new(year, month);
    context.regulator_id = Some("gaming-board".to_string());
    context
}

fn approve_all(reports: &mut [ReportRecord]) {
    for report in reports {
        report.status = ReportStatus::Approved;
    }
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < TOLERANCE,
        "expected {}, got {}",
        expected,
        actual
    );
}

#[test]
fn test_csv_with_spacer_row() -> Result<()> {
    let csv = b"Operator,Stake,Payout\nAcme,1000,600\n,,\n";
    let config = IngestConfig::default();

    let grid = decode_workbook(csv, Some(FileFormat::Csv), &config.decode_limits())?;
    assert_eq!(grid.data_row_count(), 2);

    let mapped = RowMapper::new(&config.column_mapping).map_grid(&grid)?;
    assert_eq!(mapped.valid_rows.len(), 1);
    assert_eq!(mapped.skipped_rows, 1);
    assert!(mapped.invalid_rows.is_empty());

    let outcome = process_submission(csv, None, &context("sub-csv", 2024, 1), &config, &[])?;
    assert_eq!(outcome.reports.len(), 1);
    let totals = &outcome.reports[0].totals;
    assert_close(totals.ggr, 400.0);
    assert_close(totals.ggr_percentage, 0.4);
    assert_close(totals.gaming_tax, 80.0);
    assert_close(totals.det_levy, 20.0);
    assert_close(totals.net_revenue, 300.0);
    Ok(())
}

#[test]
fn test_xlsx_submission() -> Result<()> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    let header = ["Licensee", "Period", "Game", "Bets", "Turnover", "Winnings"];
    for (col, label) in header.iter().enumerate() {
        sheet.write_string(0, col as u16, *label)?;
    }
    let rows = [
        ("Acme Gaming", "2024-02", "Slots", 120.0, 5000.0, 4200.0),
        ("Acme Gaming", "2024-02", "Roulette", 30.0, 2000.0, 1500.0),
        ("Beta Bets", "2024-02", "Slots", 10.0, 800.0, 900.0),
    ];
    for (i, (operator, period, game, bets, stake, winnings)) in rows.iter().enumerate() {
        let row = (i + 1) as u32;
        sheet.write_string(row, 0, *operator)?;
        sheet.write_string(row, 1, *period)?;
        sheet.write_string(row, 2, *game)?;
        sheet.write_number(row, 3, *bets)?;
        sheet.write_number(row, 4, *stake)?;
        sheet.write_number(row, 5, *winnings)?;
    }
    let bytes = workbook.save_to_buffer()?;

    let mut ctx = SubmissionContext::new("sub-xlsx");
    ctx.channel = Channel::Offline;
    let outcome = process_submission(&bytes, None, &ctx, &IngestConfig::default(), &[])?;

    assert_eq!(outcome.reports.len(), 2);
    let acme = outcome
        .reports
        .iter()
        .find(|r| r.operator_id == "acme-gaming")
        .expect("acme report");
    assert_eq!(acme.channel, Channel::Offline);
    assert_eq!(acme.breakdowns.len(), 2);
    assert_eq!(acme.totals.bet_count, 150);
    assert_close(acme.totals.ggr, 1300.0);

    let beta = outcome
        .reports
        .iter()
        .find(|r| r.operator_id == "beta-bets")
        .expect("beta report");
    assert_close(beta.totals.ggr, -100.0);
    assert!(beta.calculation_flags.is_empty());
    Ok(())
}

#[test]
fn test_derived_fields_hold_for_every_record() -> Result<()> {
    let csv = b"Operator,Period,Game Type,Stake,Payout,Opening Balance,Closing Balance\n\
Acme,2024-01,Slots,1000,600,0,400\n\
Acme,2024-01,Poker,250.50,100.25,,\n\
Beta,2024-01,Slots,0,0,10,10\n\
Beta,2024-02,Slots,\"1,200\",(50),10,1260\n";
    let outcome = process_submission(
        csv,
        Some(FileFormat::Csv),
        &context("sub-props", 2024, 1),
        &IngestConfig::default(),
        &[],
    )?;
    assert_eq!(outcome.reports.len(), 3);

    for report in &outcome.reports {
        let t = &report.totals;
        assert_close(t.ggr, t.stake - t.winnings);
        assert_close(t.gaming_tax, 0.20 * t.ggr);
        assert_close(t.det_levy, 0.05 * t.ggr);
        if let (Some(opening), Some(closing), Some(diff)) = (
            report.opening_balance,
            report.closing_balance,
            report.balance_difference,
        ) {
            assert_close(diff, closing - (opening + t.ggr));
        }
    }
    Ok(())
}

#[test]
fn test_zero_stake_has_zero_percentage() -> Result<()> {
    let outcome = process_submission(
        b"Operator,Stake,Payout\nAcme,0,0\n",
        Some(FileFormat::Csv),
        &context("sub-zero", 2024, 1),
        &IngestConfig::default(),
        &[],
    )?;
    let totals = &outcome.reports[0].totals;
    assert_eq!(totals.ggr_percentage, 0.0);
    assert!(totals.ggr_percentage.is_finite());
    Ok(())
}

#[test]
fn test_balance_discrepancy_scenario() -> Result<()> {
    let csv = b"Operator,Period,Stake,Payout,Opening Balance,Closing Balance\n\
Acme,2024-01,1000,600,0,400\n\
Acme,2024-03,300,200,400,1000\n";
    let mut outcome = process_submission(
        csv,
        Some(FileFormat::Csv),
        &context("sub-balance", 2024, 1),
        &IngestConfig::default(),
        &[],
    )?;
    approve_all(&mut outcome.reports);

    let report = DataQualityEngine::default().scan(&outcome.reports);
    let discrepancies: Vec<_> = report.balance_discrepancies().collect();
    assert_eq!(discrepancies.len(), 1);
    match discrepancies[0] {
        DataQualityIssue::BalanceDiscrepancy {
            difference,
            expected_closing_balance,
            ..
        } => {
            assert_close(*difference, 500.0);
            assert_close(*expected_closing_balance, 500.0);
        }
        other => panic!("unexpected issue {:?}", other),
    }
    Ok(())
}

#[test]
fn test_missing_months() -> Result<()> {
    let csv = b"Operator,Period,Stake,Payout\n\
Acme,2024-01,100,50\n\
Acme,2024-04,100,50\n\
Solo,2024-02,100,50\n";
    let mut outcome = process_submission(
        csv,
        Some(FileFormat::Csv),
        &context("sub-months", 2024, 1),
        &IngestConfig::default(),
        &[],
    )?;
    approve_all(&mut outcome.reports);

    let report = DataQualityEngine::default().scan(&outcome.reports);
    let missing: Vec<(String, String)> = report
        .missing_months()
        .filter_map(|issue| match issue {
            DataQualityIssue::MissingMonth {
                operator_id,
                expected_period,
            } => Some((operator_id.clone(), expected_period.to_string())),
            _ => None,
        })
        .collect();
    assert_eq!(
        missing,
        vec![
            ("acme".to_string(), "2024-02".to_string()),
            ("acme".to_string(), "2024-03".to_string()),
        ]
    );
    Ok(())
}

#[test]
fn test_invalid_rows_surface_as_issues() -> Result<()> {
    let csv = b"Operator,Stake,Payout\nAcme,1000,600\nAcme,lots,600\n";
    let mut outcome = process_submission(
        csv,
        Some(FileFormat::Csv),
        &context("sub-invalid", 2024, 1),
        &IngestConfig::default(),
        &[],
    )?;
    assert_eq!(outcome.invalid_row_count(), 1);
    assert_eq!(outcome.reports[0].invalid_rows[0].row_index, 2);
    assert_close(outcome.reports[0].totals.ggr, 400.0);

    approve_all(&mut outcome.reports);
    let report = DataQualityEngine::default().scan(&outcome.reports);
    assert_eq!(report.invalid_rows().count(), 1);
    Ok(())
}

#[test]
fn test_batch_with_corrupt_file() {
    let files = vec![
        SubmissionFile::new(
            context("first", 2024, 1),
            b"Operator,Stake,Payout\nAcme,1000,600\n".to_vec(),
        ),
        SubmissionFile {
            format: Some(FileFormat::Xlsx),
            ..SubmissionFile::new(context("second", 2024, 1), b"\x00\x01not a workbook".to_vec())
        },
        SubmissionFile::new(
            context("third", 2024, 1),
            b"Operator,Stake,Payout\nBeta,500,100\n".to_vec(),
        ),
    ];

    let results = process_batch(&files, &IngestConfig::default(), &[]);
    assert_eq!(results.len(), 3);

    let first = results[0].as_ref().expect("first file parses");
    assert_eq!(first.reports[0].operator_id, "acme");

    assert!(matches!(
        results[1],
        Err(ReportingError::Decode(DecodeError::Unreadable(_)))
    ));

    let third = results[2].as_ref().expect("third file parses");
    assert_eq!(third.reports[0].operator_id, "beta");
    assert_close(third.reports[0].totals.ggr, 400.0);
}

#[test]
fn test_oversized_file_rejected() {
    let mut config = IngestConfig::default();
    config.max_file_bytes = 16;
    let err = process_submission(
        b"Operator,Stake,Payout\nAcme,1000,600\n",
        Some(FileFormat::Csv),
        &context("big", 2024, 1),
        &config,
        &[],
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ReportingError::Decode(DecodeError::TooLarge { limit: 16, .. })
    ));
}

#[test]
fn test_mapper_is_idempotent() -> Result<()> {
    let csv = b"Operator,Month/Year,Game,Stake,Payout,Open Tickets\n\
Acme,Jan 2024,Slots,1000,600,3\n\
,,,,,\n\
Beta,2024/02,Poker,abc,10,\n";
    let grid = decode_workbook(csv, Some(FileFormat::Csv), &DecodeLimits::default())?;
    let mapping = ColumnMapping::default();
    let mapper = RowMapper::new(&mapping);

    let first = mapper.map_grid(&grid)?;
    let second = mapper.map_grid(&grid)?;
    assert_eq!(first, second);
    assert_eq!(first.valid_rows.len(), 1);
    assert_eq!(first.invalid_rows.len(), 1);
    Ok(())
}

#[test]
fn test_aggregation_roundtrip() -> Result<()> {
    let csv = b"Operator,Period,Channel,Game,Stake,Payout\n\
Acme,2024-01,online,Slots,1000,600\n\
Acme,2024-02,online,Slots,1200,700\n\
Acme,2024-02,offline,Bingo,300,100\n\
Beta,2024-01,online,Poker,800,500\n\
Beta,2024-03,offline,Slots,400,450\n";
    let mut outcome = process_submission(
        csv,
        Some(FileFormat::Csv),
        &context("sub-agg", 2024, 1),
        &IngestConfig::default(),
        &[],
    )?;
    approve_all(&mut outcome.reports);
    let reports = outcome.reports;

    let trends = monthly_trends(&reports, &ReportFilter::all())?;
    let trend_total: f64 = trends.iter().map(|t| t.totals.total_ggr).sum();
    let record_total: f64 = reports.iter().map(|r| r.totals.ggr).sum();
    assert_close(trend_total, record_total);
    assert_eq!(trends.len(), 3);

    let performance = operator_performance(&reports, &ReportFilter::all())?;
    assert_eq!(performance[0].operator_id, "acme");
    assert_eq!(performance[0].rank, 1);

    let products = product_breakdown(&reports, &ReportFilter::all())?;
    let share: f64 = products.iter().map(|p| p.share_of_ggr).sum();
    assert_close(share, 1.0);

    let online_only = ReportFilter::parse("all", None, Some("2024-01"), Some("2024-02"), Some("online"))?;
    let online = monthly_trends(&reports, &online_only)?;
    let online_total: f64 = online.iter().map(|t| t.totals.total_ggr).sum();
    assert_close(online_total, 400.0 + 500.0 + 300.0);

    let regulator = RegulatorRef {
        regulator_id: "gaming-board".to_string(),
        regulator_name: "Gaming Board".to_string(),
    };
    let analytics = regulator_analytics(&reports, &regulator, &ReportFilter::all())?;
    assert_close(
        analytics.online.total.total_ggr + analytics.offline.total.total_ggr,
        record_total,
    );
    assert_close(analytics.combined.total.total_ggr, record_total);
    assert_eq!(analytics.online_ggr.value("acme", Period::new(2024, 2).expect("period")), Some(500.0));
    Ok(())
}

#[test]
fn test_malformed_filter_is_rejected() {
    assert!(matches!(
        ReportFilter::parse("all", None, Some("2024-05"), Some("2024-01"), None),
        Err(ReportingError::AggregationInput(_))
    ));
    assert!(matches!(
        ReportFilter::parse("all", None, Some("May"), None, None),
        Err(ReportingError::AggregationInput(_))
    ));
    assert!(matches!(
        ReportFilter::parse("", None, None, None, None),
        Err(ReportingError::AggregationInput(_))
    ));
}

#[test]
fn test_store_review_and_resubmission() -> Result<()> {
    let mut store = InMemoryReportStore::new();
    let config = IngestConfig::default();
    let csv = b"Operator,Stake,Payout\nAcme,1000,600\n".to_vec();

    let first = SubmissionFile::new(context("first", 2024, 1), csv.clone());
    RevenueReportProcessor::ingest(&mut store, &first, &config)?;
    let pending_id = store.records()[0].id.clone();

    let second = SubmissionFile::new(context("second", 2024, 1), csv.clone());
    let upserts = RevenueReportProcessor::ingest(&mut store, &second, &config)?;
    assert_eq!(
        upserts,
        vec![UpsertOutcome::Superseded {
            previous_id: pending_id.clone()
        }]
    );
    assert_eq!(store.len(), 1);
    assert_eq!(store.history()[0].id, pending_id);

    let current_id = store.records()[0].id.clone();
    let approved = store.apply_review(&current_id, ReviewDecision::Approved, "auditor", None)?;
    assert_eq!(approved.status, ReportStatus::Approved);
    let repeat = store.apply_review(&current_id, ReviewDecision::Approved, "auditor", None)?;
    assert_eq!(repeat, approved);

    let third = SubmissionFile::new(context("third", 2024, 1), csv);
    assert!(matches!(
        RevenueReportProcessor::ingest(&mut store, &third, &config),
        Err(ReportingError::DuplicateSubmission { .. })
    ));

    let raw = store.fetch_raw_submission(&current_id)?;
    assert!(raw.starts_with(b"Operator"));
    Ok(())
}

#[test]
fn test_snapshot_analysis_runs_both_passes() -> Result<()> {
    let csv = b"Operator,Period,Stake,Payout,Opening Balance,Closing Balance\n\
Acme,2024-01,1000,600,0,400\n\
Acme,2024-03,300,200,400,1000\n";
    let mut outcome = process_submission(
        csv,
        Some(FileFormat::Csv),
        &context("sub-snap", 2024, 1),
        &IngestConfig::default(),
        &[],
    )?;
    approve_all(&mut outcome.reports);

    let regulators = vec![RegulatorRef {
        regulator_id: "gaming-board".to_string(),
        regulator_name: "Gaming Board".to_string(),
    }];
    let (quality, views) = analyze_snapshot(
        &outcome.reports,
        &ReportFilter::all(),
        &[],
        &regulators,
        &IngestConfig::default(),
    )?;

    assert_eq!(quality.reports_scanned, 2);
    assert_eq!(quality.missing_months().count(), 1);
    assert_eq!(quality.balance_discrepancies().count(), 1);
    assert_eq!(views.monthly_trends.len(), 2);
    assert_eq!(views.regulators.len(), 1);
    assert_close(views.regulators[0].combined.total.total_ggr, 500.0);
    Ok(())
}

#[test]
fn test_batch_survives_huge_bet_counts() {
    let files = vec![
        SubmissionFile::new(
            context("huge-bets", 2024, 1),
            b"Operator,Bets,Stake,Payout\nAcme,1e20,10,5\nAcme,1e20,10,5\n".to_vec(),
        ),
        SubmissionFile::new(
            context("ordinary", 2024, 1),
            b"Operator,Bets,Stake,Payout\nBeta,12,500,100\n".to_vec(),
        ),
    ];

    let results = process_batch(&files, &IngestConfig::default(), &[]);
    assert_eq!(results.len(), 2);

    let huge = results[0].as_ref().expect("huge bet counts still parse");
    assert_eq!(huge.reports[0].totals.bet_count, u64::MAX);
    assert_close(huge.reports[0].totals.ggr, 10.0);

    let ordinary = results[1].as_ref().expect("second file parses");
    assert_eq!(ordinary.reports[0].totals.bet_count, 12);
}

#[test]
fn test_invalid_row_of_operator_without_valid_rows_is_orphaned() -> Result<()> {
    let outcome = process_submission(
        b"Operator,Stake,Payout\nAcme,1000,600\nGamma,lots,10\n",
        Some(FileFormat::Csv),
        &context("sub-orphan", 2024, 1),
        &IngestConfig::default(),
        &[],
    )?;

    assert_eq!(outcome.reports.len(), 1);
    assert_eq!(outcome.reports[0].operator_id, "acme");
    assert!(outcome.reports[0].invalid_rows.is_empty());
    assert_eq!(outcome.orphan_rows.len(), 1);
    assert_eq!(outcome.orphan_rows[0].operator_name.as_deref(), Some("Gamma"));
    assert_eq!(outcome.orphan_rows[0].row_index, 2);
    assert_eq!(outcome.invalid_row_count(), 1);
    Ok(())
}

#[test]
fn test_partly_refused_ingest_leaves_store_untouched() -> Result<()> {
    let mut store = InMemoryReportStore::new();
    let config = IngestConfig::default();

    let beta = SubmissionFile::new(
        context("beta-only", 2024, 1),
        b"Operator,Stake,Payout\nBeta,500,100\n".to_vec(),
    );
    RevenueReportProcessor::ingest(&mut store, &beta, &config)?;
    let beta_id = store.records()[0].id.clone();
    store.apply_review(&beta_id, ReviewDecision::Approved, "auditor", None)?;

    let mixed = SubmissionFile::new(
        context("acme-and-beta", 2024, 1),
        b"Operator,Stake,Payout\nAcme,1000,600\nBeta,700,200\n".to_vec(),
    );
    assert!(matches!(
        RevenueReportProcessor::ingest(&mut store, &mixed, &config),
        Err(ReportingError::DuplicateSubmission { .. })
    ));

    assert_eq!(store.len(), 1);
    assert!(store.history().is_empty());
    assert_eq!(store.records()[0].id, beta_id);
    assert!(store.raw_submission("acme-and-beta").is_none());

    // Without the approved conflict the same upload goes through whole.
    let acme = SubmissionFile::new(
        context("acme-only", 2024, 1),
        b"Operator,Stake,Payout\nAcme,1000,600\n".to_vec(),
    );
    let upserts = RevenueReportProcessor::ingest(&mut store, &acme, &config)?;
    assert_eq!(upserts, vec![UpsertOutcome::Inserted]);
    assert_eq!(store.len(), 2);
    Ok(())
}

#[test]
fn test_regulator_filter_scopes_regulator_tables() -> Result<()> {
    let config = IngestConfig::default();
    let csv = b"Operator,Stake,Payout\nAcme,100,50\n";

    let mut board = process_submission(csv, None, &context("board", 2024, 1), &config, &[])?;
    let mut lotto_context = context("lotto", 2024, 1);
    lotto_context.regulator_id = Some("lotteries".to_string());
    let mut lotto = process_submission(csv, None, &lotto_context, &config, &[])?;

    let mut reports = Vec::new();
    reports.append(&mut board.reports);
    reports.append(&mut lotto.reports);
    approve_all(&mut reports);

    let regulators = vec![
        RegulatorRef {
            regulator_id: "gaming-board".to_string(),
            regulator_name: "Gaming Board".to_string(),
        },
        RegulatorRef {
            regulator_id: "lotteries".to_string(),
            regulator_name: "Lotteries".to_string(),
        },
    ];
    let filter = ReportFilter {
        regulator_id: Some("gaming-board".to_string()),
        ..ReportFilter::all()
    };
    let views = build_views(&reports, &filter, &regulators)?;

    assert_eq!(views.monthly_trends.len(), 1);
    assert_close(views.monthly_trends[0].totals.total_ggr, 50.0);
    assert_eq!(views.regulators.len(), 1);
    assert_eq!(views.regulators[0].regulator_id, "gaming-board");
    assert_close(views.regulators[0].combined.total.total_ggr, 50.0);
    Ok(())
}
