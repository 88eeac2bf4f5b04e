//! Display conversions for report cells. These only ever run on final
//! numeric values; nothing downstream aggregates a formatted string.

use crate::error::{LoanReportError, Result};

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `1234567.0` -> `"$1,234,567"`, `1234.5` -> `"$1,234.5"`, `-20.0` -> `"-$20"`.
/// Values are rounded to cents; trailing zero cents are not shown.
pub fn format_currency(value: f64) -> String {
    if !value.is_finite() {
        return format!("${}", value);
    }

    let rounded = format!("{:.2}", value.abs());
    let magnitude = rounded.trim_end_matches('0').trim_end_matches('.');
    let sign = if value < 0.0 && magnitude != "0" { "-" } else { "" };
    let (integer, fraction) = match magnitude.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (magnitude, None),
    };

    let mut out = format!("{}${}", sign, group_thousands(integer));
    if let Some(fraction) = fraction {
        out.push('.');
        out.push_str(fraction);
    }
    out
}

/// Renders a whole-number percentage with two decimals: `13.56` -> `"13.56%"`.
pub fn format_percentage(value: f64) -> String {
    format!("{:.2}%", value)
}

pub fn parse_currency(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    let (negative, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let digits: String = rest
        .strip_prefix('$')
        .ok_or_else(|| LoanReportError::parse("currency", text, "missing '$' prefix"))?
        .chars()
        .filter(|c| *c != ',')
        .collect();

    let value: f64 = digits
        .parse()
        .map_err(|_| LoanReportError::parse("currency", text, "not a number"))?;
    Ok(if negative { -value } else { value })
}

pub fn parse_percentage(text: &str) -> Result<f64> {
    text.trim()
        .strip_suffix('%')
        .ok_or_else(|| LoanReportError::parse("percentage", text, "missing '%' suffix"))?
        .trim()
        .parse()
        .map_err(|_| LoanReportError::parse("percentage", text, "not a number"))
}
