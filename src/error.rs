use thiserror::Error;

/// Errors surfaced by the review shell. The highlight and viewport engines never
/// produce these; they are total over their inputs.
#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not decode image: {0}")]
    Image(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Field index {index} out of range ({len} fields)")]
    FieldIndex { index: usize, len: usize },

    #[error("No document loaded")]
    NoDocument,
}

impl From<rust_xlsxwriter::XlsxError> for ReviewError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        ReviewError::Export(e.to_string())
    }
}

impl From<csv::Error> for ReviewError {
    fn from(e: csv::Error) -> Self {
        ReviewError::Export(e.to_string())
    }
}

impl From<image::ImageError> for ReviewError {
    fn from(e: image::ImageError) -> Self {
        ReviewError::Image(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReviewError>;
