use crate::aggregator::{KeyField, Reduction, RowKey, SummaryRow, SummaryTable};
use crate::error::{LoanReportError, Result};
use crate::schema::GradeBucket;
use log::debug;
use std::collections::BTreeMap;

fn rollup_key(key: &RowKey) -> RowKey {
    RowKey {
        grade: Some(GradeBucket::All),
        ..*key
    }
}

fn ensure_rollup_ready(table: &SummaryTable) -> Result<()> {
    if !table.is_grouped_by(KeyField::TimeBucket) || !table.is_grouped_by(KeyField::Grade) {
        return Err(LoanReportError::Schema(format!(
            "rollup needs a table grouped by time bucket and grade, got {:?}",
            table.group_by
        )));
    }
    Ok(())
}

/// Adds one synthetic `All` grade row per time bucket (and per status when
/// the table is grouped by status). Each metric is re-reduced across the
/// grade rows with the same rule that produced them, so a mean rollup is the
/// mean of the per-grade means.
pub fn add_rollup_rows(table: &SummaryTable) -> Result<SummaryTable> {
    ensure_rollup_ready(table)?;

    if let Some(row) = table.rows.iter().find(|r| r.key.grade == Some(GradeBucket::All)) {
        return Err(LoanReportError::Schema(format!(
            "table already contains a rollup row at {}",
            row.key
        )));
    }

    let mut groups: BTreeMap<RowKey, Vec<&SummaryRow>> = BTreeMap::new();
    for row in &table.rows {
        groups.entry(rollup_key(&row.key)).or_default().push(row);
    }

    let mut rows = table.rows.clone();
    for (key, members) in &groups {
        let mut values = BTreeMap::new();
        for metric in &table.metrics {
            let column = members
                .iter()
                .map(|row| {
                    row.get(&metric.name).ok_or_else(|| {
                        LoanReportError::Schema(format!(
                            "row {} has no value for metric '{}'",
                            row.key, metric.name
                        ))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            values.insert(metric.name.clone(), metric.reduction.apply(&column)?);
        }
        rows.push(SummaryRow { key: *key, values });
    }

    rows.sort_by_key(|r| r.key);

    debug!(
        "Added {} rollup rows to a table of {} rows",
        groups.len(),
        table.rows.len()
    );

    Ok(SummaryTable {
        group_by: table.group_by.clone(),
        metrics: table.metrics.clone(),
        rows,
    })
}

/// Checks that every `All` row of a sum metric equals the sum of the grade
/// rows it was built from.
pub fn verify_rollup_closure(table: &SummaryTable, tolerance: f64) -> Result<()> {
    ensure_rollup_ready(table)?;

    let mut expected: BTreeMap<(RowKey, &str), f64> = BTreeMap::new();
    for row in table.rows.iter().filter(|r| r.key.grade != Some(GradeBucket::All)) {
        for metric in table.metrics.iter().filter(|m| m.reduction == Reduction::Sum) {
            if let Some(value) = row.get(&metric.name) {
                *expected
                    .entry((rollup_key(&row.key), metric.name.as_str()))
                    .or_insert(0.0) += value;
            }
        }
    }

    for ((key, metric), expected_value) in expected {
        let actual = table.value(&key, metric).ok_or_else(|| {
            LoanReportError::Schema(format!("missing rollup row {} for '{}'", key, metric))
        })?;

        if (actual - expected_value).abs() > tolerance {
            return Err(LoanReportError::VerificationFailed {
                key: key.to_string(),
                metric: metric.to_string(),
                expected: expected_value,
                actual,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{aggregate, LoanField, MetricSpec};
    use crate::normalizer::NormalizedLoan;
    use crate::schema::{Quarter, StatusCategory, TimeBucket};

    fn loan(
        bucket: TimeBucket,
        grade: GradeBucket,
        status: StatusCategory,
        amount: f64,
        rate: f64,
    ) -> NormalizedLoan {
        NormalizedLoan {
            time_bucket: bucket,
            grade,
            status,
            interest_rate: rate,
            loan_amount: amount,
            principal_received: 0.0,
            interest_received: 0.0,
        }
    }

    fn sample() -> Vec<NormalizedLoan> {
        let q3 = TimeBucket::new(2018, Quarter::Q3);
        let q4 = TimeBucket::new(2018, Quarter::Q4);
        vec![
            loan(q3, GradeBucket::A, StatusCategory::FullyPaid, 100.0, 0.10),
            loan(q3, GradeBucket::A, StatusCategory::Late, 50.0, 0.10),
            loan(q3, GradeBucket::A, StatusCategory::Late, 30.0, 0.10),
            loan(q3, GradeBucket::C, StatusCategory::Current, 200.0, 0.20),
            loan(q3, GradeBucket::C, StatusCategory::Current, 0.0, 0.40),
            loan(q4, GradeBucket::FG, StatusCategory::ChargedOff, 25.0, 0.28),
        ]
    }

    #[test]
    fn test_rollup_sums_across_grades() {
        let table = aggregate(
            &sample(),
            &[KeyField::TimeBucket, KeyField::Grade],
            &[MetricSpec::sum("Total Issued", LoanField::LoanAmount)],
        )
        .unwrap();
        let rolled = add_rollup_rows(&table).unwrap();

        // 3 grade rows + 2 rollup rows
        assert_eq!(rolled.len(), 5);

        let all_q3 = RowKey {
            time_bucket: Some(TimeBucket::new(2018, Quarter::Q3)),
            grade: Some(GradeBucket::All),
            status: None,
        };
        assert_eq!(rolled.value(&all_q3, "Total Issued"), Some(380.0));
        assert!(verify_rollup_closure(&rolled, 1e-9).is_ok());

        // input is untouched
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_rollup_rows_follow_grade_rows() {
        let table = aggregate(
            &sample(),
            &[KeyField::TimeBucket, KeyField::Grade],
            &[MetricSpec::sum("Total Issued", LoanField::LoanAmount)],
        )
        .unwrap();
        let rolled = add_rollup_rows(&table).unwrap();

        let grades: Vec<GradeBucket> = rolled.rows.iter().map(|r| r.key.grade.unwrap()).collect();
        assert_eq!(
            grades,
            vec![
                GradeBucket::A,
                GradeBucket::C,
                GradeBucket::All,
                GradeBucket::FG,
                GradeBucket::All
            ]
        );
    }

    #[test]
    fn test_mean_rollup_averages_grade_means() {
        let table = aggregate(
            &sample(),
            &[KeyField::TimeBucket, KeyField::Grade],
            &[MetricSpec::mean("Average Interest Rate", LoanField::InterestRate)],
        )
        .unwrap();
        let rolled = add_rollup_rows(&table).unwrap();

        let all_q3 = RowKey {
            time_bucket: Some(TimeBucket::new(2018, Quarter::Q3)),
            grade: Some(GradeBucket::All),
            status: None,
        };
        // grade A mean = 0.10, grade C mean = 0.30, rollup = mean of means = 0.20
        // (a raw-record mean would have been 0.18)
        let rate = rolled.value(&all_q3, "Average Interest Rate").unwrap();
        assert!((rate - 0.20).abs() < 1e-12, "got {}", rate);
    }

    #[test]
    fn test_rollup_keeps_status_axis() {
        let table = aggregate(
            &sample(),
            &[KeyField::TimeBucket, KeyField::Grade, KeyField::Status],
            &[MetricSpec::sum("Issued", LoanField::LoanAmount)],
        )
        .unwrap();
        let rolled = add_rollup_rows(&table).unwrap();

        let all_q3_late = RowKey {
            time_bucket: Some(TimeBucket::new(2018, Quarter::Q3)),
            grade: Some(GradeBucket::All),
            status: Some(StatusCategory::Late),
        };
        assert_eq!(rolled.value(&all_q3_late, "Issued"), Some(80.0));
        assert!(verify_rollup_closure(&rolled, 1e-9).is_ok());
    }

    #[test]
    fn test_rollup_rejects_invalid_input() {
        let table = aggregate(
            &sample(),
            &[KeyField::TimeBucket],
            &[MetricSpec::sum("Total Issued", LoanField::LoanAmount)],
        )
        .unwrap();
        assert!(matches!(
            add_rollup_rows(&table),
            Err(LoanReportError::Schema(_))
        ));

        let table = aggregate(
            &sample(),
            &[KeyField::TimeBucket, KeyField::Grade],
            &[MetricSpec::sum("Total Issued", LoanField::LoanAmount)],
        )
        .unwrap();
        let rolled = add_rollup_rows(&table).unwrap();
        assert!(add_rollup_rows(&rolled).is_err());
    }

    #[test]
    fn test_closure_detects_tampering() {
        let table = aggregate(
            &sample(),
            &[KeyField::TimeBucket, KeyField::Grade],
            &[MetricSpec::sum("Total Issued", LoanField::LoanAmount)],
        )
        .unwrap();
        let mut rolled = add_rollup_rows(&table).unwrap();
        if let Some(row) = rolled
            .rows
            .iter_mut()
            .find(|r| r.key.grade == Some(GradeBucket::All))
        {
            row.values.insert("Total Issued".to_string(), 1.0);
        }
        assert!(matches!(
            verify_rollup_closure(&rolled, 1e-9),
            Err(LoanReportError::VerificationFailed { .. })
        ));
    }
}
