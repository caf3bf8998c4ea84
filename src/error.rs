use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid GEO accession: {0}")]
    InvalidAccession(String),

    #[error("input stream is empty")]
    EmptyInput,

    #[error("failed to read input: {0}")]
    Io(String),

    #[error("parse error at line {line}: {message}")]
    #[diagnostic(help("the SOFT file may be truncated or not a GEO SOFT file"))]
    Parse { line: usize, message: String },

    #[error("parse was cancelled")]
    Cancelled,

    #[error("values store error: {0}")]
    Values(String),

    #[error("no datasets were given to match samples across")]
    NoDatasets,

    #[error("dataset {dataset} uses platform {platform}, which no sample of its series uses, and the series has several platforms")]
    #[diagnostic(help("GEO record is inconsistent; split the series by platform"))]
    AmbiguousPlatform { dataset: String, platform: String },

    #[error("sample correspondence failed: {0}")]
    Correspondence(String),

    #[error("GEO request failed: {0}")]
    GeoHttp(String),

    #[error("GEO returned status {status}: {message}")]
    GeoStatus { status: u16, message: String },

    #[error("NCBI request failed: {0}")]
    NcbiHttp(String),

    #[error("NCBI returned status {status}: {message}")]
    NcbiStatus { status: u16, message: String },

    #[error("{0}")]
    EntrezLookup(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid quantitation pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("series {accession} refused: {reason}")]
    SeriesRefused { accession: String, reason: String },

    #[error("{0} did not yield a series")]
    NotASeries(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
