//! Error type for histogram filling and event file access.

use thiserror::Error;

/// Errors raised by the histogram backend.
#[derive(Error, Debug)]
pub enum HistError {
    /// I/O error while reading an event file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed event file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expression could not be compiled or evaluated.
    #[error("expression error: {0}")]
    Expression(String),

    /// Invalid or incompatible bin edges.
    #[error("binning error: {0}")]
    Binning(String),

    /// Failure while filling a histogram.
    #[error("fill error: {0}")]
    HistogramFill(String),

    /// A requested folder or column is absent from an event file.
    #[error("missing source: {0}")]
    MissingSource(String),
}

/// Result alias for the histogram backend.
pub type Result<T> = std::result::Result<T, HistError>;
