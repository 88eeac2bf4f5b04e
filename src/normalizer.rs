use crate::error::{LoanReportError, Result};
use crate::schema::{GradeBucket, LoanRecord, StatusCategory, TimeBucket};
use crate::utils::{ensure_finite, parse_interest_rate, time_bucket_for_issue_date};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A loan record with every categorical field classified and every derived
/// numeric field parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedLoan {
    pub time_bucket: TimeBucket,
    pub grade: GradeBucket,
    pub status: StatusCategory,
    /// Fraction in [0, 1], e.g. 0.1356 for "13.56%".
    pub interest_rate: f64,
    pub loan_amount: f64,
    pub principal_received: f64,
    pub interest_received: f64,
}

pub struct Normalizer {
    bucket_axis: Option<BTreeSet<TimeBucket>>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self { bucket_axis: None }
    }

    /// Restricts accepted records to the given time buckets.
    pub fn with_bucket_axis(axis: &[TimeBucket]) -> Self {
        Self {
            bucket_axis: Some(axis.iter().copied().collect()),
        }
    }

    pub fn normalize_record(&self, record: &LoanRecord) -> Result<NormalizedLoan> {
        let status = StatusCategory::classify(&record.loan_status)?;
        let grade = GradeBucket::from_raw(&record.grade)?;
        let interest_rate = parse_interest_rate(&record.interest_rate)?;
        let time_bucket = time_bucket_for_issue_date(&record.issue_date)?;

        if let Some(axis) = &self.bucket_axis {
            if !axis.contains(&time_bucket) {
                return Err(LoanReportError::classification(
                    "time_bucket",
                    time_bucket.to_string(),
                ));
            }
        }

        Ok(NormalizedLoan {
            time_bucket,
            grade,
            status,
            interest_rate,
            loan_amount: ensure_finite("loan_amount", record.loan_amount)?,
            principal_received: ensure_finite("principal_received", record.principal_received)?,
            interest_received: ensure_finite("interest_received", record.interest_received)?,
        })
    }

    /// Normalizes every record, preserving order. The first bad record
    /// aborts the whole batch.
    pub fn normalize(&self, records: &[LoanRecord]) -> Result<Vec<NormalizedLoan>> {
        records
            .iter()
            .enumerate()
            .map(|(idx, record)| {
                self.normalize_record(record).inspect_err(|e| {
                    debug!("Record #{} rejected during normalization: {}", idx, e);
                })
            })
            .collect()
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn normalize_records(records: &[LoanRecord]) -> Result<Vec<NormalizedLoan>> {
    Normalizer::new().normalize(records)
}
