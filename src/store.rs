use crate::aggregation::ReportFilter;
use crate::error::{ReportingError, Result};
use crate::schema::{
    OperatorRef, RegulatorRef, ReportRecord, ReportStatus, ReviewDecision, ReviewMetadata,
    StoreKey,
};
use chrono::Utc;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};

/// Read and review access to persisted reports. Storage and transport live
/// behind this trait; the engines only ever see the records it returns.
pub trait ReportStore {
    fn fetch_report_records(&self, filter: &ReportFilter) -> Result<Vec<ReportRecord>>;

    fn fetch_raw_submission(&self, report_id: &str) -> Result<Vec<u8>>;

    /// The only mutation entry point. Repeating a decision already applied
    /// returns the record unchanged.
    fn apply_review(
        &mut self,
        report_id: &str,
        decision: ReviewDecision,
        reviewer: &str,
        notes: Option<&str>,
    ) -> Result<ReportRecord>;

    fn operator_catalog(&self) -> Vec<OperatorRef>;

    fn regulator_catalog(&self) -> Vec<RegulatorRef>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Inserted,
    /// The same submission was processed again; status and review are kept.
    Reprocessed,
    /// A newer submission replaced a pending or rejected record, which moved to history.
    Superseded { previous_id: String },
}

/// Keyed report collection holding one current record per [`StoreKey`].
#[derive(Debug, Default)]
pub struct InMemoryReportStore {
    current: BTreeMap<StoreKey, ReportRecord>,
    history: Vec<ReportRecord>,
    raw_submissions: HashMap<String, Vec<u8>>,
    operators: Vec<OperatorRef>,
    regulators: Vec<RegulatorRef>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalogs(operators: Vec<OperatorRef>, regulators: Vec<RegulatorRef>) -> Self {
        Self {
            operators,
            regulators,
            ..Self::default()
        }
    }

    /// Fails with `DuplicateSubmission` when `record` would replace an
    /// approved record from a different submission.
    pub fn check_upsert(&self, record: &ReportRecord) -> Result<()> {
        let key = record.key();
        match self.current.get(&key) {
            Some(existing)
                if existing.is_approved() && existing.submission_id != record.submission_id =>
            {
                Err(ReportingError::DuplicateSubmission {
                    key: key.to_string(),
                    submission_id: record.submission_id.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Upserts every record, or none of them when any one would be refused.
    pub fn upsert_all(&mut self, records: Vec<ReportRecord>) -> Result<Vec<UpsertOutcome>> {
        for record in &records {
            self.check_upsert(record)?;
        }
        records.into_iter().map(|r| self.upsert(r)).collect()
    }

    pub fn upsert(&mut self, record: ReportRecord) -> Result<UpsertOutcome> {
        self.check_upsert(&record)?;
        let key = record.key();

        let Some(existing) = self.current.get_mut(&key) else {
            debug!("Inserting report {}", record.id);
            self.current.insert(key, record);
            return Ok(UpsertOutcome::Inserted);
        };

        if existing.submission_id == record.submission_id {
            let status = existing.status;
            let review = existing.review.take();
            *existing = ReportRecord {
                status,
                review,
                ..record
            };
            debug!("Reprocessed report {}", existing.id);
            return Ok(UpsertOutcome::Reprocessed);
        }

        let previous = std::mem::replace(existing, record);
        let previous_id = previous.id.clone();
        info!(
            "Report {} superseded by submission {}",
            previous_id, existing.submission_id
        );
        self.history.push(previous);
        Ok(UpsertOutcome::Superseded { previous_id })
    }

    pub fn store_raw_submission(&mut self, submission_id: impl Into<String>, bytes: Vec<u8>) {
        self.raw_submissions.insert(submission_id.into(), bytes);
    }

    pub fn raw_submission(&self, submission_id: &str) -> Option<&[u8]> {
        self.raw_submissions.get(submission_id).map(Vec::as_slice)
    }

    /// Current records, one per key, in key order.
    pub fn records(&self) -> Vec<ReportRecord> {
        self.current.values().cloned().collect()
    }

    /// Records replaced by later submissions, oldest first.
    pub fn history(&self) -> &[ReportRecord] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    fn find_any(&self, report_id: &str) -> Option<&ReportRecord> {
        self.current
            .values()
            .find(|r| r.id == report_id)
            .or_else(|| self.history.iter().find(|r| r.id == report_id))
    }
}

impl ReportStore for InMemoryReportStore {
    fn fetch_report_records(&self, filter: &ReportFilter) -> Result<Vec<ReportRecord>> {
        filter.validate()?;
        Ok(self
            .current
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    fn fetch_raw_submission(&self, report_id: &str) -> Result<Vec<u8>> {
        let report = self
            .find_any(report_id)
            .ok_or_else(|| ReportingError::ReportNotFound(report_id.to_string()))?;
        self.raw_submissions
            .get(&report.submission_id)
            .cloned()
            .ok_or_else(|| ReportingError::ReportNotFound(report_id.to_string()))
    }

    fn apply_review(
        &mut self,
        report_id: &str,
        decision: ReviewDecision,
        reviewer: &str,
        notes: Option<&str>,
    ) -> Result<ReportRecord> {
        let record = self
            .current
            .values_mut()
            .find(|r| r.id == report_id)
            .ok_or_else(|| ReportingError::ReportNotFound(report_id.to_string()))?;

        let target = ReportStatus::from(decision);
        match record.status {
            ReportStatus::Pending => {}
            status if status == target => return Ok(record.clone()),
            status => {
                return Err(ReportingError::InvalidTransition {
                    report_id: report_id.to_string(),
                    from: status.to_string(),
                    to: target.to_string(),
                })
            }
        }

        let notes = notes.map(str::trim).filter(|n| !n.is_empty());
        if decision == ReviewDecision::Rejected && notes.is_none() {
            return Err(ReportingError::MissingReviewReason(report_id.to_string()));
        }

        record.status = target;
        record.review = Some(ReviewMetadata {
            reviewer: reviewer.to_string(),
            reviewed_at: Utc::now(),
            notes: notes.map(|n| n.to_string()),
        });
        info!("Report {} {} by {}", report_id, target, reviewer);
        Ok(record.clone())
    }

    fn operator_catalog(&self) -> Vec<OperatorRef> {
        self.operators.clone()
    }

    fn regulator_catalog(&self) -> Vec<RegulatorRef> {
        self.regulators.clone()
    }
}
