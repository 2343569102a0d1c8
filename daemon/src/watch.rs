use crate::notifier::{DeliveryError, Messenger, Report};
use crate::poller::{PollError, StatusPoller};
use common::{JobApi, JobStatus, WatchRequest};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Poll(#[from] PollError),

    /// The job finished but the notification could not be delivered.
    #[error("job ended {status} but the notification failed: {source}")]
    Delivery {
        status: JobStatus,
        #[source]
        source: DeliveryError,
    },
}

/// Polls a job to completion, then sends a single report about it.
///
/// Delivery is attempted once. If the process dies before the job
/// finishes nothing is sent and nothing is retried later.
pub struct Watcher {
    poller: StatusPoller,
    api: Arc<dyn JobApi>,
    messenger: Arc<dyn Messenger>,
    notifier: String,
}

impl Watcher {
    pub fn new(poller: StatusPoller, api: Arc<dyn JobApi>, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            poller,
            api,
            messenger,
            notifier: common::origin_label(),
        }
    }

    pub async fn run(&self, request: &WatchRequest) -> Result<JobStatus, WatchError> {
        let status = self.wait(request).await?;
        self.notify(request, status).await
    }

    /// Polls until the job reaches a terminal state.
    pub async fn wait(&self, request: &WatchRequest) -> Result<JobStatus, WatchError> {
        let job = request.job();
        log::info!(
            "Watching {} on {} for {} every {:?}",
            job.job_id, job.server_url, request.recipient, self.poller.interval()
        );
        Ok(self.poller.wait_for_terminal(&job).await?)
    }

    /// Sends the single report for a job that ended in `status`.
    pub async fn notify(&self, request: &WatchRequest, status: JobStatus) -> Result<JobStatus, WatchError> {
        let job = request.job();
        let metadata = self.api.metadata(&job, &[]).await.map_err(|e| {
            log::warn!("Could not fetch metadata for {}: {}", job.job_id, e);
            e.to_string()
        });
        let report = Report {
            job,
            status,
            finished_at: chrono::Utc::now(),
            origin: request.origin.clone(),
            notifier: self.notifier.clone(),
            metadata,
        };

        match self.messenger.send(&request.recipient, &report.subject(), &report.body()).await {
            Ok(()) => {
                log::info!("Notified {} that {} is {}", request.recipient, request.job_id, status);
                Ok(status)
            }
            Err(source) => {
                log::error!("Failed to notify {} about {}: {}", request.recipient, request.job_id, source);
                Err(WatchError::Delivery { status, source })
            }
        }
    }
}
