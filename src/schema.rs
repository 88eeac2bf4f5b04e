use crate::error::{LoanReportError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// One loan application as delivered by the ingestion layer. Fields are kept
/// as the raw strings/numbers found in the export; the normalizer is the only
/// place that interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LoanRecord {
    #[serde(alias = "issue_d")]
    #[schemars(description = "Issue month in 'Mon-YYYY' form, e.g. 'Sep-2018'")]
    pub issue_date: String,

    #[schemars(description = "Risk grade letter, A through G")]
    pub grade: String,

    #[serde(alias = "status")]
    #[schemars(
        description = "Free-text loan status, e.g. 'Fully Paid', 'Late (31-120 days)', 'Charged Off'"
    )]
    pub loan_status: String,

    #[serde(alias = "int_rate")]
    #[schemars(description = "Interest rate as a percentage string, e.g. '13.56%'")]
    pub interest_rate: String,

    #[serde(alias = "loan_amnt")]
    pub loan_amount: f64,

    #[serde(alias = "total_rec_prncp")]
    pub principal_received: f64,

    #[serde(alias = "total_rec_int")]
    pub interest_received: f64,
}

/// Risk grade axis. Declaration order is the reporting order, with the
/// synthetic `All` rollup always last.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum GradeBucket {
    A,
    B,
    C,
    D,
    E,
    FG,
    All,
}

impl GradeBucket {
    /// The natural (non-synthetic) grades in reporting order.
    pub const NATURAL: [GradeBucket; 6] = [
        GradeBucket::A,
        GradeBucket::B,
        GradeBucket::C,
        GradeBucket::D,
        GradeBucket::E,
        GradeBucket::FG,
    ];

    /// Maps a raw grade letter onto its bucket. F and G share the FG bucket;
    /// `All` is never accepted from raw data.
    pub fn from_raw(raw: &str) -> Result<Self> {
        match raw.trim() {
            "A" => Ok(GradeBucket::A),
            "B" => Ok(GradeBucket::B),
            "C" => Ok(GradeBucket::C),
            "D" => Ok(GradeBucket::D),
            "E" => Ok(GradeBucket::E),
            "F" | "G" => Ok(GradeBucket::FG),
            _ => Err(LoanReportError::classification("grade", raw)),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GradeBucket::A => "A",
            GradeBucket::B => "B",
            GradeBucket::C => "C",
            GradeBucket::D => "D",
            GradeBucket::E => "E",
            GradeBucket::FG => "FG",
            GradeBucket::All => "All",
        }
    }

    pub fn is_rollup(&self) -> bool {
        matches!(self, GradeBucket::All)
    }
}

impl fmt::Display for GradeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Canonical loan status. Every raw status containing "Late" collapses to
/// `Late`; everything else must match one of the labels exactly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum StatusCategory {
    FullyPaid,
    Current,
    Late,
    ChargedOff,
    InGracePeriod,
    Default,
}

impl StatusCategory {
    pub const ALL: [StatusCategory; 6] = [
        StatusCategory::FullyPaid,
        StatusCategory::Current,
        StatusCategory::Late,
        StatusCategory::ChargedOff,
        StatusCategory::InGracePeriod,
        StatusCategory::Default,
    ];

    pub fn classify(raw: &str) -> Result<Self> {
        if raw.contains("Late") {
            return Ok(StatusCategory::Late);
        }

        Self::ALL
            .iter()
            .copied()
            .find(|status| status.label() == raw)
            .ok_or_else(|| LoanReportError::classification("loan_status", raw))
    }

    pub fn label(&self) -> &'static str {
        match self {
            StatusCategory::FullyPaid => "Fully Paid",
            StatusCategory::Current => "Current",
            StatusCategory::Late => "Late",
            StatusCategory::ChargedOff => "Charged Off",
            StatusCategory::InGracePeriod => "In Grace Period",
            StatusCategory::Default => "Default",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.label() == label)
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum Quarter {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl Quarter {
    /// Jan-Mar -> Q1, Apr-Jun -> Q2, Jul-Sep -> Q3, Oct-Dec -> Q4.
    pub fn from_month(month: u32) -> Option<Self> {
        match month {
            1..=3 => Some(Quarter::Q1),
            4..=6 => Some(Quarter::Q2),
            7..=9 => Some(Quarter::Q3),
            10..=12 => Some(Quarter::Q4),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Quarter::Q1 => "Q1",
            Quarter::Q2 => "Q2",
            Quarter::Q3 => "Q3",
            Quarter::Q4 => "Q4",
        }
    }
}

/// Reporting period derived from an issue date. Ordered by year, then quarter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct TimeBucket {
    pub year: i32,
    pub quarter: Quarter,
}

impl TimeBucket {
    pub fn new(year: i32, quarter: Quarter) -> Self {
        Self { year, quarter }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.year, self.quarter.label())
    }
}

/// Template used to render a [`TimeBucket`] label. `{year}` and `{quarter}`
/// are substituted; everything else is copied verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct BucketLabelFormat(pub String);

impl BucketLabelFormat {
    pub fn render(&self, bucket: &TimeBucket) -> String {
        self.0
            .replace("{year}", &bucket.year.to_string())
            .replace("{quarter}", bucket.quarter.label())
    }
}

impl Default for BucketLabelFormat {
    fn default() -> Self {
        Self("{year}_{quarter}".to_string())
    }
}

/// Metric families the report can be assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ReportMetric {
    #[schemars(description = "Sum of loan amounts per (bucket, grade)")]
    TotalIssued,

    #[schemars(description = "Sum of loan amounts per (bucket, grade), one column per status")]
    IssuedByStatus,

    #[schemars(description = "Sum of principal payments received per (bucket, grade)")]
    PrincipalReceived,

    #[schemars(description = "Sum of interest payments received per (bucket, grade)")]
    InterestReceived,

    #[schemars(description = "Mean interest rate per (bucket, grade)")]
    AverageInterestRate,

    #[schemars(description = "Reserved slot. Not computed; requesting it fails the run.")]
    AdjustedNetAnnualizedReturn,
}

impl ReportMetric {
    pub fn name(&self) -> &'static str {
        match self {
            ReportMetric::TotalIssued => "Total Issued",
            ReportMetric::IssuedByStatus => "Issued By Status",
            ReportMetric::PrincipalReceived => "Principal Payments Received",
            ReportMetric::InterestReceived => "Interest Payments Received",
            ReportMetric::AverageInterestRate => "Average Interest Rate",
            ReportMetric::AdjustedNetAnnualizedReturn => "Adjusted Net Annualized Return",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReportConfig {
    #[schemars(description = "Title carried into the rendered report")]
    pub title: String,

    #[serde(default)]
    #[schemars(description = "Label template for time buckets, using {year} and {quarter}")]
    pub bucket_label: BucketLabelFormat,

    #[serde(default)]
    #[schemars(
        description = "Explicit, strictly ascending list of time buckets to report on. Records outside it are rejected. When absent, every bucket found in the data is reported."
    )]
    pub bucket_axis: Option<Vec<TimeBucket>>,

    #[schemars(
        description = "Metric families to compute. The first one is the primary table of the join and defines the report's row set."
    )]
    pub metrics: Vec<ReportMetric>,

    #[schemars(description = "Status columns shown in the rendered report, in order")]
    pub status_columns: Vec<StatusCategory>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: "Loan Book Summary".to_string(),
            bucket_label: BucketLabelFormat::default(),
            bucket_axis: None,
            metrics: vec![
                ReportMetric::TotalIssued,
                ReportMetric::IssuedByStatus,
                ReportMetric::PrincipalReceived,
                ReportMetric::InterestReceived,
                ReportMetric::AverageInterestRate,
            ],
            status_columns: vec![
                StatusCategory::FullyPaid,
                StatusCategory::Current,
                StatusCategory::Late,
                StatusCategory::ChargedOff,
            ],
        }
    }
}

impl ReportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.metrics.is_empty() {
            return Err(LoanReportError::Schema(
                "at least one report metric is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for metric in &self.metrics {
            if !seen.insert(metric) {
                return Err(LoanReportError::Schema(format!(
                    "metric '{}' is listed more than once",
                    metric.name()
                )));
            }
        }

        if let Some(axis) = &self.bucket_axis {
            for pair in axis.windows(2) {
                if pair[0] >= pair[1] {
                    return Err(LoanReportError::Schema(format!(
                        "bucket axis must be strictly ascending, found {} before {}",
                        pair[0], pair[1]
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ReportConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
