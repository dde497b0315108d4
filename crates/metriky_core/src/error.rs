use thiserror::Error;

/// Failures of the report pipeline's own logic. Collaborator failures
/// (HTTP, MediaWiki API, SQL) travel as `anyhow` errors with context.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("unknown target `{target}` (known targets: {known})")]
    UnknownTarget { target: String, known: String },

    #[error("{0} not found in page text")]
    NotFound(String),

    #[error("malformed {0}")]
    Format(String),

    #[error("expected two times (start and end) after the section date, found {found}")]
    MissingTimes { found: usize },

    #[error("time window ends ({end}) before it starts ({start})")]
    InvertedWindow { start: String, end: String },

    #[error("unknown lemma `{0}`")]
    UnknownLemma(String),

    #[error("offset {offset} is not a valid insertion point in text of {len} bytes")]
    InvalidOffset { offset: usize, len: usize },
}
