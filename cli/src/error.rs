//! Errors surfaced by `lunaflow` and the exit codes they map to.

use crate::dispatch::DispatchError;
use common::{ApiError, JobId, LedgerError, ResolveError};
use thiserror::Error;

pub const EXIT_OK: i32 = 0;
pub const EXIT_UNEXPECTED: i32 = 1;
/// Same code clap uses for its own usage errors.
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_NO_PRIOR_SUBMISSION: i32 = 3;
pub const EXIT_BAD_RECIPIENT: i32 = 4;
pub const EXIT_REMOTE: i32 = 5;
pub const EXIT_LEDGER: i32 = 6;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("{0}")]
    Recipient(String),

    #[error("workflow server error: {0}")]
    Api(#[from] ApiError),

    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The server accepted the job but the ledger has no row for it.
    #[error("job {job_id} was submitted but not recorded: {source}")]
    Unrecorded {
        job_id: JobId,
        #[source]
        source: LedgerError,
    },

    #[error("could not start watcher: {0}")]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Resolve(ResolveError::NoPriorSubmission)
            | CliError::Resolve(ResolveError::IndexOutOfRange { .. }) => EXIT_NO_PRIOR_SUBMISSION,
            CliError::Resolve(ResolveError::Ledger(e))
            | CliError::Ledger(e)
            | CliError::Unrecorded { source: e, .. } => ledger_code(e),
            CliError::Usage(_) => EXIT_USAGE,
            CliError::Recipient(_) => EXIT_BAD_RECIPIENT,
            CliError::Api(_) | CliError::Dispatch(_) => EXIT_REMOTE,
            CliError::Other(_) => EXIT_UNEXPECTED,
        }
    }
}

fn ledger_code(e: &LedgerError) -> i32 {
    match e {
        LedgerError::Persistence { .. } | LedgerError::Format { .. } => EXIT_LEDGER,
        LedgerError::NoSuchRecord | LedgerError::AmbiguousPrefix(_) => EXIT_UNEXPECTED,
    }
}
