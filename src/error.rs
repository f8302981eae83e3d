use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Patterns (lowercase) that indicate a response body echoes credentials.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "authorization:",
    "basic ",
    "bearer ",
    "secret",
    "api_key",
];

/// Placeholder logged in place of a body that looks like it carries credentials.
pub(crate) const REDACTED_BODY: &str = "[response body redacted]";

/// Maximum number of characters of a response body kept for logs and errors.
const MAX_BODY_CHARS: usize = 2_000;

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Makes a remote response body safe to log or embed in an error.
///
/// Bodies that look like they echo credentials are replaced entirely; long
/// bodies are truncated.
pub(crate) fn redact_body(body: &str) -> String {
    if contains_sensitive(body) {
        return REDACTED_BODY.to_string();
    }
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

/// Library-wide error type.
#[derive(Debug, Error)]
pub enum ScoreError {
    // ── Input ─────────────────────────────────────────────────────────────────
    #[error("no valid texts to process")]
    EmptyInput,

    #[error("ids has {ids} entries but there are {texts} texts")]
    IdLengthMismatch { texts: usize, ids: usize },

    #[error("{role} column `{column}` is not in the input")]
    MissingColumn { role: &'static str, column: String },

    #[error("a text is {size} bytes once serialized, over the bundle limit of {limit} bytes")]
    OversizedRecord { size: usize, limit: usize },

    #[error("Invalid CSV: {0}")]
    Csv(String),

    // ── Preconditions ─────────────────────────────────────────────────────────
    #[error("output file {} already exists; set overwrite to replace it", .0.display())]
    OutputExists(PathBuf),

    #[error("API status check failed: HTTP {status}")]
    StatusCheckFailed { status: u16 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    // ── Remote ────────────────────────────────────────────────────────────────
    #[error("HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("bundle {bundle} failed after {attempts} attempts: {source}")]
    BundleFailed {
        bundle: usize,
        attempts: u32,
        #[source]
        source: Box<ScoreError>,
    },

    // ── Assembly ──────────────────────────────────────────────────────────────
    #[error("{missing} transmitted texts received no result row")]
    IncompleteResults { missing: usize },

    #[error("framework `{0}` matched no result columns")]
    UnknownFramework(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScoreError {
    /// True for input and precondition failures, raised before any bundle
    /// is sent.
    pub fn is_pre_dispatch(&self) -> bool {
        matches!(
            self,
            ScoreError::EmptyInput
                | ScoreError::IdLengthMismatch { .. }
                | ScoreError::MissingColumn { .. }
                | ScoreError::OversizedRecord { .. }
                | ScoreError::Csv(_)
                | ScoreError::OutputExists(_)
                | ScoreError::StatusCheckFailed { .. }
                | ScoreError::Configuration(_)
        )
    }
}

impl From<csv::Error> for ScoreError {
    fn from(err: csv::Error) -> Self {
        ScoreError::Csv(err.to_string())
    }
}
