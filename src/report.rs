use crate::aggregator::{aggregate, KeyField, LoanField, MetricSpec, SummaryTable};
use crate::error::{LoanReportError, Result};
use crate::format::{format_currency, format_percentage};
use crate::join::left_join;
use crate::normalizer::NormalizedLoan;
use crate::pivot::{pivot, widen, WideTable};
use crate::rollup::{add_rollup_rows, verify_rollup_closure};
use crate::schema::{BucketLabelFormat, ReportConfig, ReportMetric, StatusCategory};
use chrono::NaiveDateTime;
use log::{debug, info};
use serde::{Deserialize, Serialize};

pub const TIME_BUCKET_COLUMN: &str = "TimeBucket";
pub const GRADE_BUCKET_COLUMN: &str = "GradeBucket";

const ISSUED_BY_STATUS_METRIC: &str = "Issued";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnFormat {
    Currency,
    /// Stored as a fraction, rendered as a percentage.
    Percentage,
}

/// Intermediate tables of one metric family: the rolled-up long table and
/// its wide form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricTable {
    pub metric: ReportMetric,
    pub long: SummaryTable,
    pub wide: WideTable,
}

/// Numeric report: the joined table projected onto the output columns.
/// Values stay unformatted until [`SummaryReport::render`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub title: String,
    pub bucket_label: BucketLabelFormat,
    pub table: WideTable,
    pub formats: Vec<ColumnFormat>,
    pub metric_tables: Vec<MetricTable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedReport {
    pub title: String,
    pub generated_at: NaiveDateTime,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub struct ReportBuilder<'a> {
    config: &'a ReportConfig,
}

impl<'a> ReportBuilder<'a> {
    pub fn new(config: &'a ReportConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, loans: &[NormalizedLoan]) -> Result<SummaryReport> {
        self.config.validate()?;

        let metric_tables = self
            .config
            .metrics
            .iter()
            .map(|metric| self.build_metric_table(*metric, loans))
            .collect::<Result<Vec<_>>>()?;

        let wide_tables: Vec<WideTable> = metric_tables.iter().map(|t| t.wide.clone()).collect();
        let joined = left_join(&wide_tables)?;

        let mut columns: Vec<&str> = Vec::new();
        let mut formats = Vec::new();
        for metric in &self.config.metrics {
            for column in self.output_columns(*metric) {
                columns.push(column);
                formats.push(column_format(*metric));
            }
        }

        let table = joined.select(&columns);
        info!(
            "Built report '{}' with {} rows and {} columns",
            self.config.title,
            table.len(),
            table.columns.len()
        );

        Ok(SummaryReport {
            title: self.config.title.clone(),
            bucket_label: self.config.bucket_label.clone(),
            table,
            formats,
            metric_tables,
        })
    }

    fn build_metric_table(
        &self,
        metric: ReportMetric,
        loans: &[NormalizedLoan],
    ) -> Result<MetricTable> {
        let by_grade = [KeyField::TimeBucket, KeyField::Grade];
        let by_status = [KeyField::TimeBucket, KeyField::Grade, KeyField::Status];

        let (long, wide) = match metric {
            ReportMetric::TotalIssued => {
                let spec = MetricSpec::sum(metric.name(), LoanField::LoanAmount);
                let long = add_rollup_rows(&aggregate(loans, &by_grade, &[spec])?)?;
                let wide = widen(&long)?;
                (long, wide)
            }
            ReportMetric::IssuedByStatus => {
                let spec = MetricSpec::sum(ISSUED_BY_STATUS_METRIC, LoanField::LoanAmount);
                let long = add_rollup_rows(&aggregate(loans, &by_status, &[spec])?)?;
                let wide = pivot(&long, ISSUED_BY_STATUS_METRIC)?;
                (long, wide)
            }
            ReportMetric::PrincipalReceived => {
                let spec = MetricSpec::sum(metric.name(), LoanField::PrincipalReceived);
                let long = add_rollup_rows(&aggregate(loans, &by_grade, &[spec])?)?;
                let wide = widen(&long)?;
                (long, wide)
            }
            ReportMetric::InterestReceived => {
                let spec = MetricSpec::sum(metric.name(), LoanField::InterestReceived);
                let long = add_rollup_rows(&aggregate(loans, &by_grade, &[spec])?)?;
                let wide = widen(&long)?;
                (long, wide)
            }
            ReportMetric::AverageInterestRate => {
                let spec = MetricSpec::mean(metric.name(), LoanField::InterestRate);
                let long = add_rollup_rows(&aggregate(loans, &by_grade, &[spec])?)?;
                let wide = widen(&long)?;
                (long, wide)
            }
            ReportMetric::AdjustedNetAnnualizedReturn => {
                return Err(LoanReportError::UnimplementedMetric(
                    metric.name().to_string(),
                ));
            }
        };

        debug!(
            "Metric '{}': {} long rows, {} wide rows",
            metric.name(),
            long.len(),
            wide.len()
        );

        Ok(MetricTable { metric, long, wide })
    }

    fn output_columns(&self, metric: ReportMetric) -> Vec<&'static str> {
        match metric {
            ReportMetric::IssuedByStatus => self
                .config
                .status_columns
                .iter()
                .map(|s| s.label())
                .collect(),
            other => vec![other.name()],
        }
    }
}

fn column_format(metric: ReportMetric) -> ColumnFormat {
    match metric {
        ReportMetric::AverageInterestRate => ColumnFormat::Percentage,
        _ => ColumnFormat::Currency,
    }
}

impl SummaryReport {
    pub fn metric_table(&self, metric: ReportMetric) -> Option<&MetricTable> {
        self.metric_tables.iter().find(|t| t.metric == metric)
    }

    /// Formats every cell for presentation. Null cells render as an empty
    /// string.
    pub fn render(&self, generated_at: NaiveDateTime) -> RenderedReport {
        let mut headers = vec![
            TIME_BUCKET_COLUMN.to_string(),
            GRADE_BUCKET_COLUMN.to_string(),
        ];
        headers.extend(self.table.columns.iter().cloned());

        let rows = self
            .table
            .rows
            .iter()
            .map(|row| {
                let mut cells = vec![
                    self.bucket_label.render(&row.key.time_bucket),
                    row.key.grade.label().to_string(),
                ];
                cells.extend(row.cells.iter().zip(&self.formats).map(|(cell, format)| {
                    match (cell, format) {
                        (None, _) => String::new(),
                        (Some(v), ColumnFormat::Currency) => format_currency(*v),
                        (Some(v), ColumnFormat::Percentage) => format_percentage(*v * 100.0),
                    }
                }));
                cells
            })
            .collect();

        RenderedReport {
            title: self.title.clone(),
            generated_at,
            headers,
            rows,
        }
    }

    /// Runs the closure check on every rolled-up sum table, and the status
    /// conservation check when both issued tables are present.
    pub fn verify(&self, tolerance: f64) -> Result<()> {
        for table in &self.metric_tables {
            verify_rollup_closure(&table.long, tolerance)?;
        }

        match (
            self.metric_table(ReportMetric::TotalIssued),
            self.metric_table(ReportMetric::IssuedByStatus),
        ) {
            (Some(total), Some(by_status)) => {
                verify_status_conservation(&total.wide, &by_status.wide, tolerance)
            }
            _ => {
                debug!("Skipping status conservation check: issued tables not both present");
                Ok(())
            }
        }
    }
}

/// For every key of `total_issued`, the status columns of `issued_by_status`
/// must add up to the total.
pub fn verify_status_conservation(
    total_issued: &WideTable,
    issued_by_status: &WideTable,
    tolerance: f64,
) -> Result<()> {
    let total_column = ReportMetric::TotalIssued.name();
    if total_issued.column_index(total_column).is_none() {
        return Err(LoanReportError::Schema(format!(
            "table has no '{}' column",
            total_column
        )));
    }
    if let Some(column) = issued_by_status
        .columns
        .iter()
        .find(|c| StatusCategory::from_label(c).is_none())
    {
        return Err(LoanReportError::Schema(format!(
            "column '{}' is not a status",
            column
        )));
    }

    for row in &total_issued.rows {
        let expected = total_issued.get(&row.key, total_column).unwrap_or(0.0);
        let actual: f64 = issued_by_status
            .row(&row.key)
            .map(|r| r.cells.iter().flatten().sum())
            .unwrap_or(0.0);

        if (expected - actual).abs() > tolerance {
            return Err(LoanReportError::VerificationFailed {
                key: row.key.to_string(),
                metric: total_column.to_string(),
                expected,
                actual,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pivot::WideKey;
    use crate::schema::{GradeBucket, Quarter, TimeBucket};
    use chrono::NaiveDate;

    fn loan(
        quarter: Quarter,
        grade: GradeBucket,
        status: StatusCategory,
        amount: f64,
        rate: f64,
    ) -> NormalizedLoan {
        NormalizedLoan {
            time_bucket: TimeBucket::new(2018, quarter),
            grade,
            status,
            interest_rate: rate,
            loan_amount: amount,
            principal_received: amount * 0.4,
            interest_received: amount * 0.05,
        }
    }

    fn sample() -> Vec<NormalizedLoan> {
        vec![
            loan(Quarter::Q3, GradeBucket::A, StatusCategory::FullyPaid, 100.0, 0.1356),
            loan(Quarter::Q3, GradeBucket::A, StatusCategory::Late, 50.0, 0.1356),
            loan(Quarter::Q3, GradeBucket::B, StatusCategory::Current, 2000.0, 0.10),
            loan(Quarter::Q3, GradeBucket::FG, StatusCategory::Default, 300.0, 0.30),
            loan(Quarter::Q4, GradeBucket::C, StatusCategory::ChargedOff, 1200.0, 0.20),
        ]
    }

    fn timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 1, 15)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_build_report_columns() {
        let config = ReportConfig::default();
        let report = ReportBuilder::new(&config).build(&sample()).unwrap();

        assert_eq!(
            report.table.columns,
            vec![
                "Total Issued",
                "Fully Paid",
                "Current",
                "Late",
                "Charged Off",
                "Principal Payments Received",
                "Interest Payments Received",
                "Average Interest Rate",
            ]
        );
        assert_eq!(report.formats.len(), report.table.columns.len());
        assert_eq!(report.formats[7], ColumnFormat::Percentage);

        // Q3: A, B, FG, All; Q4: C, All
        assert_eq!(report.table.len(), 6);
        let q3_a = WideKey::new(TimeBucket::new(2018, Quarter::Q3), GradeBucket::A);
        assert_eq!(report.table.get(&q3_a, "Total Issued"), Some(150.0));
        assert_eq!(report.table.get(&q3_a, "Current"), None);

        let q3_all = WideKey::new(TimeBucket::new(2018, Quarter::Q3), GradeBucket::All);
        assert_eq!(report.table.get(&q3_all, "Total Issued"), Some(2450.0));

        assert!(report.verify(1e-9).is_ok());
    }

    #[test]
    fn test_render() {
        let config = ReportConfig::default();
        let report = ReportBuilder::new(&config).build(&sample()).unwrap();
        let rendered = report.render(timestamp());

        assert_eq!(rendered.generated_at, timestamp());
        assert_eq!(rendered.headers[0], "TimeBucket");
        assert_eq!(rendered.headers[1], "GradeBucket");
        assert_eq!(rendered.headers.len(), 10);

        let first = &rendered.rows[0];
        assert_eq!(first[0], "2018_Q3");
        assert_eq!(first[1], "A");
        assert_eq!(first[2], "$150");
        assert_eq!(first[3], "$100");
        assert_eq!(first[4], "");
        assert_eq!(first[5], "$50");
        assert_eq!(first[9], "13.56%");

        let q3_all = &rendered.rows[3];
        assert_eq!(q3_all[1], "All");
        assert_eq!(q3_all[2], "$2,450");
    }

    #[test]
    fn test_unimplemented_metric_fails_the_run() {
        let config = ReportConfig {
            metrics: vec![
                ReportMetric::TotalIssued,
                ReportMetric::AdjustedNetAnnualizedReturn,
            ],
            ..ReportConfig::default()
        };
        assert!(matches!(
            ReportBuilder::new(&config).build(&sample()),
            Err(LoanReportError::UnimplementedMetric(_))
        ));
    }

    #[test]
    fn test_build_validates_config() {
        let config = ReportConfig {
            metrics: vec![ReportMetric::TotalIssued, ReportMetric::TotalIssued],
            ..ReportConfig::default()
        };
        assert!(matches!(
            ReportBuilder::new(&config).build(&sample()),
            Err(LoanReportError::Schema(_))
        ));
    }

    #[test]
    fn test_conservation_detects_mismatch() {
        let config = ReportConfig::default();
        let report = ReportBuilder::new(&config).build(&sample()).unwrap();
        let total = &report.metric_table(ReportMetric::TotalIssued).unwrap().wide;
        let mut by_status = report
            .metric_table(ReportMetric::IssuedByStatus)
            .unwrap()
            .wide
            .clone();

        assert!(verify_status_conservation(total, &by_status, 1e-9).is_ok());

        by_status.rows[0].cells[0] = Some(1.0);
        assert!(matches!(
            verify_status_conservation(total, &by_status, 1e-9),
            Err(LoanReportError::VerificationFailed { .. })
        ));
    }

    #[test]
    fn test_custom_label_and_status_columns() {
        let config = ReportConfig {
            bucket_label: BucketLabelFormat("{quarter}-{year}".to_string()),
            status_columns: vec![StatusCategory::Default],
            ..ReportConfig::default()
        };
        let report = ReportBuilder::new(&config).build(&sample()).unwrap();
        let rendered = report.render(timestamp());

        assert_eq!(rendered.headers[3], "Default");
        assert_eq!(rendered.rows[0][0], "Q3-2018");
        // FG row carries the only Default loan
        assert_eq!(rendered.rows[2][1], "FG");
        assert_eq!(rendered.rows[2][3], "$300");
    }
}
