use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoanReportError {
    #[error("Unrecognized {field} value: '{value}'")]
    Classification { field: &'static str, value: String },

    #[error("Could not parse {field} from '{value}': {reason}")]
    Parse {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Join error: {0}")]
    Join(String),

    #[error("Aggregation error: {0}")]
    Aggregation(String),

    #[error("Schema mismatch: {0}")]
    Schema(String),

    #[error("Metric '{0}' is not implemented")]
    UnimplementedMetric(String),

    #[error("Verification failed for {key} ({metric}): expected {expected}, got {actual}")]
    VerificationFailed {
        key: String,
        metric: String,
        expected: f64,
        actual: f64,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LoanReportError {
    pub fn classification(field: &'static str, value: impl Into<String>) -> Self {
        Self::Classification {
            field,
            value: value.into(),
        }
    }

    pub fn parse(field: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LoanReportError>;
