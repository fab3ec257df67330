//! Error taxonomy for reading, sorting and differencing record files.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which input of a diff a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Old,
    New,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Old => f.write_str("old"),
            Side::New => f.write_str("new"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DiffError {
    /// The descriptor marks no attribute as identifier, so records have no key.
    #[error("descriptor declares no identifier attribute; keys cannot be compared")]
    MissingIdentifier,

    #[error("attribute `{0}` is declared more than once")]
    DuplicateAttribute(String),

    #[error("attribute `{attribute}` has no matching column in the header")]
    UnknownColumn { attribute: String },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("unknown transformer `{0}`")]
    UnknownTransformer(String),

    #[error("working directory {} is not writable", path.display())]
    WorkingDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: expected {expected} columns, found {found}")]
    Malformed {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: mandatory attribute `{attribute}` is empty")]
    MandatoryMissing { line: u64, attribute: String },

    #[error("attribute `{attribute}`: cannot convert {value:?}: {reason}")]
    Conversion {
        attribute: String,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("{side} input: {source}")]
    Input {
        side: Side,
        #[source]
        source: Box<DiffError>,
    },

    #[error("usage error: {0}")]
    Usage(String),
}

impl DiffError {
    /// Attributes the error to one side of the diff.
    pub fn on(self, side: Side) -> Self {
        match self {
            DiffError::Input { .. } => self,
            other => DiffError::Input {
                side,
                source: Box::new(other),
            },
        }
    }

    /// True for the errors raised before any data is touched.
    pub fn is_configuration(&self) -> bool {
        match self {
            DiffError::MissingIdentifier
            | DiffError::DuplicateAttribute(_)
            | DiffError::UnknownColumn { .. }
            | DiffError::InvalidDescriptor(_)
            | DiffError::UnknownTransformer(_)
            | DiffError::WorkingDirectory { .. } => true,
            DiffError::Input { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}

pub type Result<T, E = DiffError> = std::result::Result<T, E>;
