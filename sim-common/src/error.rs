//! Error taxonomy shared by the decoder, the aggregators and the fitters.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// The file does not even hold `container_radius`, `N` and the properties table.
    #[error("Malformed header: {reason}")]
    MalformedHeader { reason: String },

    /// A fit or aggregation was asked for on too few usable samples.
    #[error("Insufficient data: {context}")]
    InsufficientData { context: String },

    #[error("Missing input file: {}", path.display())]
    MissingInputFile { path: PathBuf },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    pub fn insufficient(context: impl Into<String>) -> Self {
        AnalysisError::InsufficientData { context: context.into() }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        AnalysisError::MalformedHeader { reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
