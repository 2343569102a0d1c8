use common::{ApiError, JobApi, JobId, JobStatus, LedgerError, LedgerStore, ResolvedReference};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("stopped polling {job}: {source}")]
    Unrecoverable {
        job: JobId,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Persistence(#[from] LedgerError),
}

/// Polls one job until the server reports a terminal state.
///
/// Transient API failures are logged and retried after the same fixed
/// interval. There is no overall deadline; callers that need one wrap
/// [`StatusPoller::wait_for_terminal`] in a timeout or cancel its task.
pub struct StatusPoller {
    api: Arc<dyn JobApi>,
    ledger: Arc<dyn LedgerStore>,
    interval: Duration,
}

impl StatusPoller {
    pub fn new(api: Arc<dyn JobApi>, ledger: Arc<dyn LedgerStore>, interval: Duration) -> Self {
        Self { api, ledger, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One tick: ask the server for the current state.
    pub async fn tick(&self, job: &ResolvedReference) -> Result<JobStatus, ApiError> {
        let status = self.api.status(job).await?.job_status();
        Ok(status)
    }

    pub async fn wait_for_terminal(&self, job: &ResolvedReference) -> Result<JobStatus, PollError> {
        let mut last = JobStatus::Submitted;
        let mut ticks: u64 = 0;

        loop {
            ticks += 1;
            match self.tick(job).await {
                Ok(status) => {
                    if status != last {
                        log::info!("Job {} is {} (tick {})", job.job_id, status, ticks);
                        last = status;
                    } else {
                        log::debug!("Job {} still {} (tick {})", job.job_id, status, ticks);
                    }
                    self.ledger.update_status(&job.job_id, status)?;
                    if status.is_terminal() {
                        return Ok(status);
                    }
                }
                Err(e) if e.is_transient() => {
                    log::warn!(
                        "Status check for {} on {} failed, retrying in {:?}: {}",
                        job.job_id, job.server_url, self.interval, e
                    );
                }
                Err(e) => {
                    log::error!("Status check for {} failed permanently: {}", job.job_id, e);
                    return Err(PollError::Unrecoverable {
                        job: job.job_id.clone(),
                        source: e,
                    });
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
