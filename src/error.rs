use thiserror::Error;

/// File-level failures raised before any record is created from an upload.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("File is {size} bytes, exceeding the {limit} byte ceiling")]
    TooLarge { size: usize, limit: usize },

    #[error("Worksheet has more than {limit} rows")]
    TooManyRows { limit: usize },

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("File could not be read as a spreadsheet: {0}")]
    Unreadable(String),

    #[error("Workbook contains no sheets")]
    NoSheets,
}

#[derive(Error, Debug)]
pub enum ReportingError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Header row is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Invalid aggregation input: {0}")]
    AggregationInput(String),

    #[error("Report not found: {0}")]
    ReportNotFound(String),

    #[error("Report {report_id} cannot move from {from} to {to}")]
    InvalidTransition {
        report_id: String,
        from: String,
        to: String,
    },

    #[error("Rejecting report {0} requires a reason")]
    MissingReviewReason(String),

    #[error("A report for {key} is already approved; resubmission {submission_id} refused")]
    DuplicateSubmission { key: String, submission_id: String },

    #[error("Forecast error: {0}")]
    Forecast(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReportingError>;
