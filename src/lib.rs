//! # Loan Report Builder
//!
//! A library for turning loan-level records (one row per loan application)
//! into a quarterly summary report broken down by risk grade.
//!
//! ## Core Concepts
//!
//! - **Normalization**: raw status, grade, rate and issue-date strings become typed
//!   categories (`StatusCategory`, `GradeBucket`, `TimeBucket`)
//! - **Aggregation**: records are grouped by (time bucket, grade[, status]) and reduced
//!   with sum or mean
//! - **Rollups**: every time bucket gets a synthetic `All` grade row, re-reduced with
//!   the same rule as the grade rows
//! - **Pivoting**: status is spread into columns; combinations with no loans stay null
//! - **Joining**: the per-metric tables are left-joined on (time bucket, grade), the first
//!   metric's table defining the row set
//!
//! ## Example
//!
//! ```rust,ignore
//! use loan_report_builder::*;
//! use chrono::NaiveDate;
//!
//! let records = vec![
//!     LoanRecord {
//!         issue_date: "Sep-2018".to_string(),
//!         grade: "A".to_string(),
//!         loan_status: "Fully Paid".to_string(),
//!         interest_rate: "13.56%".to_string(),
//!         loan_amount: 10_000.0,
//!         principal_received: 10_000.0,
//!         interest_received: 1_020.0,
//!     },
//! ];
//!
//! let report = build_loan_report(&records, &ReportConfig::default()).unwrap();
//! let rendered = report.render(
//!     NaiveDate::from_ymd_opt(2019, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
//! );
//! ```

pub mod aggregator;
pub mod error;
pub mod format;
pub mod join;
pub mod normalizer;
pub mod pivot;
pub mod report;
pub mod rollup;
pub mod schema;
pub mod utils;

pub use aggregator::{
    aggregate, KeyField, LoanField, MetricSpec, Reduction, RowKey, SummaryRow, SummaryTable,
};
pub use error::{LoanReportError, Result};
pub use format::{format_currency, format_percentage, parse_currency, parse_percentage};
pub use join::left_join;
pub use normalizer::{normalize_records, NormalizedLoan, Normalizer};
pub use pivot::{pivot, unpivot, widen, WideKey, WideRow, WideTable};
pub use report::{
    verify_status_conservation, ColumnFormat, MetricTable, RenderedReport, ReportBuilder,
    SummaryReport,
};
pub use rollup::{add_rollup_rows, verify_rollup_closure};
pub use schema::*;
pub use utils::*;

use log::{debug, info};

pub struct LoanReportProcessor;

impl LoanReportProcessor {
    pub fn process(records: &[LoanRecord], config: &ReportConfig) -> Result<SummaryReport> {
        config.validate()?;

        info!(
            "Building report '{}' from {} loan records",
            config.title,
            records.len()
        );
        debug!(
            "Metrics: {:?}, status columns: {:?}, bucket axis: {:?}",
            config.metrics, config.status_columns, config.bucket_axis
        );

        let normalizer = match &config.bucket_axis {
            Some(axis) => Normalizer::with_bucket_axis(axis),
            None => Normalizer::new(),
        };
        let loans = normalizer.normalize(records)?;

        ReportBuilder::new(config).build(&loans)
    }

    pub fn process_with_verification(
        records: &[LoanRecord],
        config: &ReportConfig,
        tolerance: f64,
    ) -> Result<SummaryReport> {
        let report = Self::process(records, config)?;

        report.verify(tolerance)?;

        Ok(report)
    }
}

pub fn build_loan_report(records: &[LoanRecord], config: &ReportConfig) -> Result<SummaryReport> {
    LoanReportProcessor::process(records, config)
}

pub fn build_loan_report_with_verification(
    records: &[LoanRecord],
    config: &ReportConfig,
    tolerance: f64,
) -> Result<SummaryReport> {
    LoanReportProcessor::process_with_verification(records, config, tolerance)
}
