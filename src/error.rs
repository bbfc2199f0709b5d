// ⚠️ Pipeline errors
// Per-file and per-row problems never show up here: those are handled by
// exclusion (see sniffer/classifier/aggregation). Only bundle-level and
// run-level failures are errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Archive unreadable or corrupt. Fatal for that bundle only.
    #[error("failed to extract bundle {bundle}: {reason}")]
    Extraction { bundle: String, reason: String },

    /// Primary input absent (no bundles, no registry file). Fatal for the run.
    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    pub fn extraction(bundle: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        PipelineError::Extraction {
            bundle: bundle.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the run must stop (as opposed to skipping one bundle)
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PipelineError::Extraction { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
