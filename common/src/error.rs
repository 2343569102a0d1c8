use std::path::PathBuf;
use thiserror::Error;

/// Failures talking to the workflow server.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(reqwest::Error),

    /// The server's host name does not resolve.
    #[error("cannot resolve {host}: {reason}")]
    Unresolvable { host: String, reason: String },

    #[error("server returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("malformed response ({reason}): {body}")]
    Decode { body: String, reason: String },

    #[error("invalid server url {0}")]
    InvalidServer(String),
}

impl ApiError {
    /// Whether a later retry can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(e) => !e.is_builder() && !e.is_redirect(),
            ApiError::Status { code, .. } => *code >= 500 || *code == 408 || *code == 429,
            ApiError::Decode { .. } => true,
            ApiError::Unresolvable { .. } | ApiError::InvalidServer(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        match name_resolution_failure(&e) {
            Some(reason) => ApiError::Unresolvable {
                host: e
                    .url()
                    .and_then(|u| u.host_str())
                    .unwrap_or("server")
                    .to_string(),
                reason,
            },
            None => ApiError::Transport(e),
        }
    }
}

/// The resolver's message when `e` failed looking up the host name.
fn name_resolution_failure(e: &reqwest::Error) -> Option<String> {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        let message = err.to_string();
        if message.starts_with("dns error") {
            return Some(match err.source() {
                Some(cause) => format!("{}: {}", message, cause),
                None => message,
            });
        }
        source = err.source();
    }
    None
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("cannot write ledger {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger {path} is corrupt: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("no such record")]
    NoSuchRecord,

    #[error("job id prefix {0} matches more than one job")]
    AmbiguousPrefix(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no workflow has been submitted yet; submit one first")]
    NoPriorSubmission,

    #[error("asked for job -{requested} but only {available} have been submitted")]
    IndexOutOfRange { requested: usize, available: usize },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
