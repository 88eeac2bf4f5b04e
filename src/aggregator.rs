use crate::error::{LoanReportError, Result};
use crate::normalizer::NormalizedLoan;
use crate::schema::{GradeBucket, StatusCategory, TimeBucket};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Axes a summary table can be grouped by. Declaration order is the sort
/// order of [`RowKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyField {
    TimeBucket,
    Grade,
    Status,
}

/// Group key of a summary row. Axes that the table is not grouped by are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub time_bucket: Option<TimeBucket>,
    pub grade: Option<GradeBucket>,
    pub status: Option<StatusCategory>,
}

impl RowKey {
    pub fn for_loan(loan: &NormalizedLoan, group_by: &[KeyField]) -> Self {
        Self {
            time_bucket: group_by
                .contains(&KeyField::TimeBucket)
                .then_some(loan.time_bucket),
            grade: group_by.contains(&KeyField::Grade).then_some(loan.grade),
            status: group_by.contains(&KeyField::Status).then_some(loan.status),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = [
            self.time_bucket.map(|b| b.to_string()),
            self.grade.map(|g| g.to_string()),
            self.status.map(|s| s.to_string()),
        ]
        .into_iter()
        .flatten()
        .collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Numeric field of a [`NormalizedLoan`] a metric reduces over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanField {
    LoanAmount,
    PrincipalReceived,
    InterestReceived,
    InterestRate,
}

impl LoanField {
    pub fn value(&self, loan: &NormalizedLoan) -> f64 {
        match self {
            LoanField::LoanAmount => loan.loan_amount,
            LoanField::PrincipalReceived => loan.principal_received,
            LoanField::InterestReceived => loan.interest_received,
            LoanField::InterestRate => loan.interest_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reduction {
    Sum,
    Mean,
}

impl Reduction {
    pub fn apply(&self, values: &[f64]) -> Result<f64> {
        match self {
            Reduction::Sum => Ok(values.iter().sum()),
            Reduction::Mean => {
                if values.is_empty() {
                    return Err(LoanReportError::Aggregation(
                        "mean requested over an empty partition".to_string(),
                    ));
                }
                Ok(values.iter().sum::<f64>() / values.len() as f64)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    pub field: LoanField,
    pub reduction: Reduction,
}

impl MetricSpec {
    pub fn sum(name: impl Into<String>, field: LoanField) -> Self {
        Self {
            name: name.into(),
            field,
            reduction: Reduction::Sum,
        }
    }

    pub fn mean(name: impl Into<String>, field: LoanField) -> Self {
        Self {
            name: name.into(),
            field,
            reduction: Reduction::Mean,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub key: RowKey,
    pub values: BTreeMap<String, f64>,
}

impl SummaryRow {
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.values.get(metric).copied()
    }
}

/// Long-format result of a group-by: one row per observed key, rows sorted
/// by key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryTable {
    pub group_by: Vec<KeyField>,
    pub metrics: Vec<MetricSpec>,
    pub rows: Vec<SummaryRow>,
}

impl SummaryTable {
    pub fn is_grouped_by(&self, field: KeyField) -> bool {
        self.group_by.contains(&field)
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSpec> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn row(&self, key: &RowKey) -> Option<&SummaryRow> {
        self.rows.iter().find(|r| &r.key == key)
    }

    pub fn value(&self, key: &RowKey, metric: &str) -> Option<f64> {
        self.row(key).and_then(|r| r.get(metric))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub(crate) fn canonical_group_by(group_by: &[KeyField]) -> Vec<KeyField> {
    let mut fields = group_by.to_vec();
    fields.sort();
    fields.dedup();
    fields
}

pub(crate) fn validate_metrics(metrics: &[MetricSpec]) -> Result<()> {
    if metrics.is_empty() {
        return Err(LoanReportError::Schema(
            "aggregation requires at least one metric".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for metric in metrics {
        if !names.insert(metric.name.as_str()) {
            return Err(LoanReportError::Schema(format!(
                "metric '{}' is configured more than once",
                metric.name
            )));
        }
    }
    Ok(())
}

fn reduce_partition(
    key: RowKey,
    members: &[&NormalizedLoan],
    metrics: &[MetricSpec],
) -> Result<SummaryRow> {
    let mut values = BTreeMap::new();
    for metric in metrics {
        let column: Vec<f64> = members.iter().map(|loan| metric.field.value(loan)).collect();
        values.insert(metric.name.clone(), metric.reduction.apply(&column)?);
    }
    Ok(SummaryRow { key, values })
}

/// Partitions `loans` by `group_by` and reduces every metric per partition.
/// Only keys that occur in the input produce a row.
pub fn aggregate(
    loans: &[NormalizedLoan],
    group_by: &[KeyField],
    metrics: &[MetricSpec],
) -> Result<SummaryTable> {
    validate_metrics(metrics)?;
    let group_by = canonical_group_by(group_by);

    let mut partitions: BTreeMap<RowKey, Vec<&NormalizedLoan>> = BTreeMap::new();
    for loan in loans {
        partitions
            .entry(RowKey::for_loan(loan, &group_by))
            .or_default()
            .push(loan);
    }

    debug!(
        "Aggregating {} loans into {} partitions by {:?}",
        loans.len(),
        partitions.len(),
        group_by
    );

    #[cfg(feature = "parallel")]
    let rows: Vec<SummaryRow> = partitions
        .into_iter()
        .collect::<Vec<_>>()
        .par_iter()
        .map(|(key, members)| reduce_partition(*key, members, metrics))
        .collect::<Result<Vec<_>>>()?;

    #[cfg(not(feature = "parallel"))]
    let rows: Vec<SummaryRow> = partitions
        .iter()
        .map(|(key, members)| reduce_partition(*key, members, metrics))
        .collect::<Result<Vec<_>>>()?;

    Ok(SummaryTable {
        group_by,
        metrics: metrics.to_vec(),
        rows,
    })
}
