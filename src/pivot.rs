use crate::aggregator::{KeyField, MetricSpec, RowKey, SummaryRow, SummaryTable};
use crate::error::{LoanReportError, Result};
use crate::schema::{GradeBucket, StatusCategory, TimeBucket};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Row identity shared by every wide table: (time bucket, grade).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WideKey {
    pub time_bucket: TimeBucket,
    pub grade: GradeBucket,
}

impl WideKey {
    pub fn new(time_bucket: TimeBucket, grade: GradeBucket) -> Self {
        Self { time_bucket, grade }
    }

    fn from_row_key(key: &RowKey) -> Result<Self> {
        match (key.time_bucket, key.grade) {
            (Some(time_bucket), Some(grade)) => Ok(Self { time_bucket, grade }),
            _ => Err(LoanReportError::Schema(format!(
                "row {} is missing its time bucket or grade",
                key
            ))),
        }
    }
}

impl fmt::Display for WideKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.time_bucket, self.grade)
    }
}

/// One row of a wide table. `cells` is aligned with [`WideTable::columns`];
/// `None` means no input contributed to the cell, which is distinct from zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WideRow {
    pub key: WideKey,
    pub cells: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WideTable {
    pub columns: Vec<String>,
    pub rows: Vec<WideRow>,
}

impl WideTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn row(&self, key: &WideKey) -> Option<&WideRow> {
        self.rows.iter().find(|r| &r.key == key)
    }

    pub fn get(&self, key: &WideKey, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        self.row(key).and_then(|r| r.cells.get(idx).copied().flatten())
    }

    pub fn keys(&self) -> Vec<WideKey> {
        self.rows.iter().map(|r| r.key).collect()
    }

    /// Projects the table onto `columns`, in that order. Columns the table
    /// does not have come back entirely null.
    pub fn select(&self, columns: &[&str]) -> WideTable {
        let indices: Vec<Option<usize>> =
            columns.iter().map(|name| self.column_index(name)).collect();

        WideTable {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| WideRow {
                    key: row.key,
                    cells: indices
                        .iter()
                        .map(|idx| idx.and_then(|i| row.cells.get(i).copied().flatten()))
                        .collect(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn require_group_by(table: &SummaryTable, expected: &[KeyField], stage: &str) -> Result<()> {
    if table.group_by != expected {
        return Err(LoanReportError::Schema(format!(
            "{} expects a table grouped by {:?}, got {:?}",
            stage, expected, table.group_by
        )));
    }
    Ok(())
}

/// Reshapes a (bucket, grade, status) table into one row per (bucket, grade)
/// with one column per status observed anywhere in the input.
pub fn pivot(table: &SummaryTable, metric: &str) -> Result<WideTable> {
    require_group_by(
        table,
        &[KeyField::TimeBucket, KeyField::Grade, KeyField::Status],
        "pivot",
    )?;
    if table.metric(metric).is_none() {
        return Err(LoanReportError::Schema(format!(
            "pivot metric '{}' is not in the table",
            metric
        )));
    }

    let statuses: BTreeSet<StatusCategory> =
        table.rows.iter().filter_map(|r| r.key.status).collect();
    let status_index: BTreeMap<StatusCategory, usize> = statuses
        .iter()
        .enumerate()
        .map(|(idx, status)| (*status, idx))
        .collect();

    let mut grid: BTreeMap<WideKey, Vec<Option<f64>>> = BTreeMap::new();
    for row in &table.rows {
        let key = WideKey::from_row_key(&row.key)?;
        let cells = grid
            .entry(key)
            .or_insert_with(|| vec![None; statuses.len()]);
        if let Some(idx) = row.key.status.and_then(|s| status_index.get(&s)) {
            cells[*idx] = row.get(metric);
        }
    }

    debug!(
        "Pivoted {} long rows into {} wide rows with {} status columns",
        table.rows.len(),
        grid.len(),
        statuses.len()
    );

    Ok(WideTable {
        columns: statuses.iter().map(|s| s.label().to_string()).collect(),
        rows: grid
            .into_iter()
            .map(|(key, cells)| WideRow { key, cells })
            .collect(),
    })
}

/// Inverse of [`pivot`]: every populated cell becomes one long row.
pub fn unpivot(wide: &WideTable, metric: &MetricSpec) -> Result<SummaryTable> {
    let statuses = wide
        .columns
        .iter()
        .map(|name| {
            StatusCategory::from_label(name).ok_or_else(|| {
                LoanReportError::Schema(format!("column '{}' is not a status", name))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut rows = Vec::new();
    for row in &wide.rows {
        for (status, cell) in statuses.iter().zip(&row.cells) {
            if let Some(value) = cell {
                rows.push(SummaryRow {
                    key: RowKey {
                        time_bucket: Some(row.key.time_bucket),
                        grade: Some(row.key.grade),
                        status: Some(*status),
                    },
                    values: BTreeMap::from([(metric.name.clone(), *value)]),
                });
            }
        }
    }
    rows.sort_by_key(|r| r.key);

    Ok(SummaryTable {
        group_by: vec![KeyField::TimeBucket, KeyField::Grade, KeyField::Status],
        metrics: vec![metric.clone()],
        rows,
    })
}

/// Turns a (bucket, grade) summary table into a wide table with one column
/// per metric.
pub fn widen(table: &SummaryTable) -> Result<WideTable> {
    require_group_by(table, &[KeyField::TimeBucket, KeyField::Grade], "widen")?;

    let rows = table
        .rows
        .iter()
        .map(|row| {
            Ok(WideRow {
                key: WideKey::from_row_key(&row.key)?,
                cells: table.metrics.iter().map(|m| row.get(&m.name)).collect(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(WideTable {
        columns: table.metrics.iter().map(|m| m.name.clone()).collect(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{aggregate, LoanField};
    use crate::normalizer::NormalizedLoan;
    use crate::rollup::add_rollup_rows;
    use crate::schema::Quarter;

    fn loan(bucket: TimeBucket, grade: GradeBucket, status: StatusCategory, amount: f64) -> NormalizedLoan {
        NormalizedLoan {
            time_bucket: bucket,
            grade,
            status,
            interest_rate: 0.1,
            loan_amount: amount,
            principal_received: 0.0,
            interest_received: 0.0,
        }
    }

    fn issued_by_status() -> SummaryTable {
        let q3 = TimeBucket::new(2018, Quarter::Q3);
        let q4 = TimeBucket::new(2018, Quarter::Q4);
        let loans = vec![
            loan(q3, GradeBucket::A, StatusCategory::FullyPaid, 100.0),
            loan(q3, GradeBucket::A, StatusCategory::Late, 50.0),
            loan(q3, GradeBucket::B, StatusCategory::Current, 0.0),
            loan(q4, GradeBucket::A, StatusCategory::Late, 75.0),
        ];
        aggregate(
            &loans,
            &[KeyField::TimeBucket, KeyField::Grade, KeyField::Status],
            &[MetricSpec::sum("Issued", LoanField::LoanAmount)],
        )
        .unwrap()
    }

    #[test]
    fn test_pivot_columns_and_nulls() {
        let wide = pivot(&issued_by_status(), "Issued").unwrap();

        // Only statuses present in the input, in enumeration order
        assert_eq!(wide.columns, vec!["Fully Paid", "Current", "Late"]);
        assert_eq!(wide.len(), 3);

        let q3_a = WideKey::new(TimeBucket::new(2018, Quarter::Q3), GradeBucket::A);
        let q3_b = WideKey::new(TimeBucket::new(2018, Quarter::Q3), GradeBucket::B);
        assert_eq!(wide.get(&q3_a, "Fully Paid"), Some(100.0));
        assert_eq!(wide.get(&q3_a, "Late"), Some(50.0));
        assert_eq!(wide.get(&q3_a, "Current"), None);

        // A real zero stays a zero, a missing combination stays null
        assert_eq!(wide.get(&q3_b, "Current"), Some(0.0));
        assert_eq!(wide.get(&q3_b, "Late"), None);
    }

    #[test]
    fn test_pivot_round_trip() {
        let long = add_rollup_rows(&issued_by_status()).unwrap();
        let wide = pivot(&long, "Issued").unwrap();
        let back = unpivot(&wide, long.metric("Issued").unwrap()).unwrap();
        assert_eq!(back, long);
    }

    #[test]
    fn test_pivot_rejects_wrong_shape() {
        let loans = vec![loan(
            TimeBucket::new(2018, Quarter::Q1),
            GradeBucket::A,
            StatusCategory::Current,
            1.0,
        )];
        let table = aggregate(
            &loans,
            &[KeyField::TimeBucket, KeyField::Grade],
            &[MetricSpec::sum("Issued", LoanField::LoanAmount)],
        )
        .unwrap();
        assert!(matches!(pivot(&table, "Issued"), Err(LoanReportError::Schema(_))));
        assert!(pivot(&issued_by_status(), "Unknown").is_err());
    }

    #[test]
    fn test_widen_and_select() {
        let loans = vec![
            loan(TimeBucket::new(2018, Quarter::Q1), GradeBucket::A, StatusCategory::Current, 5.0),
            loan(TimeBucket::new(2018, Quarter::Q1), GradeBucket::C, StatusCategory::Current, 7.0),
        ];
        let table = aggregate(
            &loans,
            &[KeyField::TimeBucket, KeyField::Grade],
            &[MetricSpec::sum("Total Issued", LoanField::LoanAmount)],
        )
        .unwrap();

        let wide = widen(&table).unwrap();
        assert_eq!(wide.columns, vec!["Total Issued"]);
        assert_eq!(wide.rows[1].cells, vec![Some(7.0)]);

        let projected = wide.select(&["Missing", "Total Issued"]);
        assert_eq!(projected.columns, vec!["Missing", "Total Issued"]);
        assert_eq!(projected.rows[0].cells, vec![None, Some(5.0)]);

        assert!(widen(&issued_by_status()).is_err());
    }

    #[test]
    fn test_select_tolerates_short_rows() {
        let wide = WideTable {
            columns: vec!["Total Issued".to_string(), "Late".to_string()],
            rows: vec![WideRow {
                key: WideKey::new(TimeBucket::new(2018, Quarter::Q2), GradeBucket::B),
                cells: vec![Some(4.0)],
            }],
        };

        let projected = wide.select(&["Late", "Total Issued"]);
        assert_eq!(projected.rows[0].cells, vec![None, Some(4.0)]);
    }

    #[test]
    fn test_unpivot_rejects_non_status_columns() {
        let wide = WideTable {
            columns: vec!["Total Issued".to_string()],
            rows: vec![],
        };
        assert!(unpivot(&wide, &MetricSpec::sum("Issued", LoanField::LoanAmount)).is_err());
    }
}
