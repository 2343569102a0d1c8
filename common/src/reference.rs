use crate::error::{LedgerError, ResolveError};
use crate::job::{JobId, ResolvedReference};
use crate::ledger::LedgerStore;

/// What a user typed to name a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRef {
    Latest,
    /// `-n`: the n-th most recent submission.
    Offset(usize),
    Explicit(String),
}

impl JobRef {
    pub fn parse(token: &str) -> Result<Self, ResolveError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(JobRef::Latest);
        }
        if let Some(digits) = token.strip_prefix('-') {
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                // Too many digits to fit is out of range by definition.
                let n = digits.parse().unwrap_or(usize::MAX);
                return Ok(JobRef::Offset(n));
            }
        }
        Ok(JobRef::Explicit(token.to_string()))
    }
}

/// Turns user references into `(job id, server)` pairs. Read-only.
pub struct Resolver<'a> {
    ledger: &'a dyn LedgerStore,
    default_server: &'a str,
}

impl<'a> Resolver<'a> {
    pub fn new(ledger: &'a dyn LedgerStore, default_server: &'a str) -> Self {
        Self { ledger, default_server }
    }

    pub fn resolve_token(&self, token: Option<&str>) -> Result<ResolvedReference, ResolveError> {
        self.resolve(&JobRef::parse(token.unwrap_or(""))?)
    }

    pub fn resolve(&self, job_ref: &JobRef) -> Result<ResolvedReference, ResolveError> {
        match job_ref {
            JobRef::Latest => self.nth(1),
            JobRef::Offset(n) => self.nth(*n),
            JobRef::Explicit(id) => match self.ledger.find_by_prefix_or_exact(id) {
                Ok(rec) => Ok(ResolvedReference {
                    job_id: rec.job_id,
                    server_url: rec.server_url,
                }),
                Err(LedgerError::NoSuchRecord) => {
                    let job_id = JobId(id.clone());
                    if !job_id.is_uuid_shaped() {
                        log::warn!("{} does not look like a workflow id", job_id);
                    }
                    log::debug!("{} is not in the ledger, using {}", job_id, self.default_server);
                    Ok(ResolvedReference {
                        job_id,
                        server_url: self.default_server.to_string(),
                    })
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    fn nth(&self, n: usize) -> Result<ResolvedReference, ResolveError> {
        match self.ledger.most_recent(n) {
            Ok(rec) => Ok(ResolvedReference {
                job_id: rec.job_id,
                server_url: rec.server_url,
            }),
            Err(LedgerError::NoSuchRecord) => {
                let available = self.ledger.len()?;
                if available == 0 {
                    Err(ResolveError::NoPriorSubmission)
                } else {
                    Err(ResolveError::IndexOutOfRange { requested: n, available })
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}
