use std::fmt;
use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VoxError>;

#[derive(Debug, Error)]
pub enum VoxError {
    /// No points to compute a bounding box from.
    #[error("point set is empty")]
    EmptyInput,

    /// A label that cannot index a count table (negative, or not an integer
    /// when parsed from text).
    #[error("invalid label {label}")]
    InvalidLabel { label: String },

    /// Grid resolution is zero or N³ does not fit in memory addressing.
    #[error("invalid grid resolution {n}")]
    InvalidResolution { n: usize },

    /// A required array or field is absent from an upstream source.
    #[error("missing data: {what}")]
    MissingData { what: String },

    /// A binary record is truncated or a text record is short/unparseable.
    #[error("malformed record in {context}: {detail}")]
    MalformedRecord { context: String, detail: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("color map: {0}")]
    ColorMap(#[from] serde_json::Error),
}

impl VoxError {
    #[cold]
    pub(crate) fn malformed(context: &str, detail: impl fmt::Display) -> Self {
        VoxError::MalformedRecord {
            context: context.to_owned(),
            detail: detail.to_string(),
        }
    }

    #[cold]
    pub(crate) fn missing(what: impl Into<String>) -> Self {
        VoxError::MissingData { what: what.into() }
    }

    #[cold]
    pub(crate) fn invalid_label(label: impl fmt::Display) -> Self {
        VoxError::InvalidLabel {
            label: label.to_string(),
        }
    }
}

/// Non-fatal problem found while running a pipeline stage.
///
/// The affected output is skipped; everything else still completes.
#[derive(Debug)]
pub struct Diagnostic {
    pub stage: &'static str,
    pub error: VoxError,
}

impl Diagnostic {
    pub(crate) fn missing(stage: &'static str, what: impl Into<String>) -> Self {
        let diagnostic = Self {
            stage,
            error: VoxError::missing(what),
        };
        log::debug!("{diagnostic}");
        diagnostic
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.error)
    }
}
