// ⚠️ Domain errors
// Failures callers may want to match on; everything else travels as anyhow::Error

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IbsgError {
    #[error("HTTP request to {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("{0} is not supported by ibsg (expected .csv, .csv.gz or .parquet)")]
    UnsupportedOutputFormat(String),

    #[error("archive {archive:?} did not contain {payload}")]
    MissingPayload { archive: PathBuf, payload: String },

    #[error("unknown filter: {0:?}")]
    UnknownFilter(String),

    #[error("invalid bounds for {filter}: lower bound {lb} is not below upper bound {ub}")]
    InvalidBounds { filter: String, lb: f64, ub: f64 },
}
