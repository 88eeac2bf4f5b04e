use crate::error::{LoanReportError, Result};
use crate::schema::{Quarter, TimeBucket};
use chrono::{Datelike, NaiveDate};

/// Parses an issue date in the export's "Mon-YYYY" form (e.g. "Sep-2018",
/// "September-2018"). Full ISO dates ("2018-09-01") are accepted as well.
/// The day is always pinned to the first of the month.
pub fn parse_issue_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(LoanReportError::parse("issue_date", raw, "empty value"));
    }

    if let Ok(date) = NaiveDate::parse_from_str(&format!("01-{}", trimmed), "%d-%b-%Y") {
        return Ok(date);
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map(|date| date.with_day(1).unwrap_or(date))
        .map_err(|_| LoanReportError::parse("issue_date", raw, "expected 'Mon-YYYY'"))
}

pub fn time_bucket_for_date(date: NaiveDate) -> Result<TimeBucket> {
    let quarter = Quarter::from_month(date.month()).ok_or_else(|| {
        LoanReportError::parse("issue_date", date.to_string(), "month out of range")
    })?;
    Ok(TimeBucket::new(date.year(), quarter))
}

pub fn time_bucket_for_issue_date(raw: &str) -> Result<TimeBucket> {
    time_bucket_for_date(parse_issue_date(raw)?)
}

/// Parses a percentage string such as "13.56%" or " 7.5 % " into a fraction
/// (0.1356, 0.075). The result must lie in [0, 1].
pub fn parse_interest_rate(raw: &str) -> Result<f64> {
    let number = raw
        .trim()
        .strip_suffix('%')
        .ok_or_else(|| LoanReportError::parse("interest_rate", raw, "missing '%' suffix"))?
        .trim();

    let percent: f64 = number
        .parse()
        .map_err(|_| LoanReportError::parse("interest_rate", raw, "not a number"))?;

    if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
        return Err(LoanReportError::parse(
            "interest_rate",
            raw,
            "rate must be between 0% and 100%",
        ));
    }

    Ok(percent / 100.0)
}

pub fn ensure_finite(field: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(LoanReportError::parse(
            field,
            value.to_string(),
            "value is not finite",
        ))
    }
}
