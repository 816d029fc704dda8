//! Error type shared by every fatal pipeline stage.
//!
//! Malformed amounts and annotations never surface here: the normalizer and
//! the original-debit extractor recover from them locally.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdjusterError {
    #[error("Input file not found or unreadable: {path}: {source}")]
    InputNotFound {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Input contains no data rows")]
    EmptyInput,

    #[error("Input is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Malformed line {line}: expected at most {expected} fields, found {found}")]
    MalformedLine {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to render workbook: {0}")]
    Render(#[from] rust_xlsxwriter::XlsxError),
}

pub type Result<T> = std::result::Result<T, AdjusterError>;
