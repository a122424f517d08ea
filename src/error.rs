//! Domain error types.
//!
//! Parsing and table errors carry enough context (file, variable, line)
//! to point at the offending input. Orchestration code wraps them with
//! `anyhow::Context`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading the positional layout dictionary.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("layout file {path} has no header row with a VAR column")]
    MissingHeader { path: PathBuf },

    #[error("layout file {path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },

    #[error("variable {var} not found in layout file {path}")]
    MissingVariable { path: PathBuf, var: String },

    #[error("invalid {column} value '{value}' for variable {var}")]
    InvalidPosition {
        var: String,
        column: String,
        value: String,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while decoding a single fixed-width microdata line.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("line {line}: field {field} ({start}..{end}) is beyond the end of a {len}-byte record")]
    Truncated {
        line: u64,
        field: String,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("line {line}: field {field} is not valid text")]
    Encoding { line: u64, field: String },

    #[error("line {line}: field {field} has non-numeric value '{value}'")]
    NotNumeric {
        line: u64,
        field: String,
        value: String,
    },

    #[error("line {line}: unknown {field} code '{value}'")]
    UnknownCode {
        line: u64,
        field: String,
        value: String,
    },

    #[error("line {line}: residence municipality {geocode} is outside the extraction scope")]
    OutOfScope { line: u64, geocode: String },
}

/// Errors raised while loading lookup tables.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("table {path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },

    #[error("table {path}, row {row}: invalid {column} value '{value}'")]
    InvalidValue {
        path: PathBuf,
        row: usize,
        column: String,
        value: String,
    },

    #[error("municipality {geocode} has no sampling fraction")]
    MissingFraction { geocode: String },

    #[error("municipality {geocode} is not in the municipality table")]
    UnknownMunicipality { geocode: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while reading or filtering mobility matrices.
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("matrix {path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: String },

    #[error("matrix {path}, row {row}: invalid {column} value '{value}'")]
    InvalidValue {
        path: PathBuf,
        row: usize,
        column: String,
        value: String,
    },

    #[error("no rows left after filtering")]
    Empty,

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while opening or streaming a microdata input.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("archive {archive} has no entry matching '{pattern}'")]
    MissingEntry { archive: PathBuf, pattern: String },

    #[error("cannot derive an extraction prefix from {path}")]
    NoPrefix { path: PathBuf },

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
