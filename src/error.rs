use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("resolution {0} is finer than the 0.25-degree floor")]
    ResolutionTooFine(String),

    #[error("invalid time window: {0}")]
    InvalidWindow(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("missing config file s2s-ingest.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("archive request failed: {0}")]
    ArchiveHttp(String),

    #[error("archive returned status {status}: {message}")]
    ArchiveStatus { status: u16, message: String },

    #[error("archive rejected request {request}: {message}")]
    ArchiveRequest { request: String, message: String },

    #[error("missing archive credentials: {0}")]
    MissingCredentials(String),

    #[error("no fragment codec available: {0}")]
    MissingCodec(String),

    #[error("failed to decode fragment {path}: {message}")]
    FragmentDecode { path: PathBuf, message: String },

    #[error("window {window}: expected {expected} fragments, got {actual}")]
    FragmentCount {
        window: String,
        expected: usize,
        actual: usize,
    },

    #[error("coordinate mismatch on `{name}`: {details}")]
    CoordinateMismatch { name: String, details: String },

    #[error("dataset error: {0}")]
    Dataset(String),
}
