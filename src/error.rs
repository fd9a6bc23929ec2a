use std::fmt;

use thiserror::Error;

/// A single violated field, addressed by a dotted/indexed path
/// such as `jobs[2].apply_link`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every violation found while validating a payload, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

#[cfg(test)]
impl ValidationError {
    pub fn has_field(&self, field: &str) -> bool {
        self.issues.iter().any(|issue| issue.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation error(s): ", self.issues.len())?;
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", issue)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    MissingVar(&'static str),

    #[error("{name} has an invalid value: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("search API returned no data")]
    Empty,
}

impl FetchError {
    /// Missing credentials will not fix themselves between attempts.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Config(_))
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload failed validation: {0}")]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("search document '{0}' already exists")]
    DuplicateSearch(String),

    #[error("search document '{0}' not found")]
    SearchNotFound(String),

    #[error("stored timestamp '{0}' is not RFC 3339")]
    Timestamp(String),
}
