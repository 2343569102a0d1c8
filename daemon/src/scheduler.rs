use crate::watch::{WatchError, Watcher};
use common::{JobId, JobStatus, WatchRequest};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum TaskOutcome {
    Finished(Result<JobStatus, WatchError>),
    Cancelled,
    Panicked(String),
}

type CancelMap = Arc<Mutex<HashMap<JobId, watch::Sender<bool>>>>;

/// Cancels watches owned by a [`WatchScheduler`] from anywhere, e.g. a
/// signal handler.
#[derive(Clone)]
pub struct CancelHandle {
    cancels: CancelMap,
}

impl CancelHandle {
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.cancels.lock().unwrap_or_else(|p| p.into_inner()).get(job_id) {
            Some(tx) => tx.send(true).is_ok(),
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let cancels = self.cancels.lock().unwrap_or_else(|p| p.into_inner());
        cancels.values().filter(|tx| tx.send(true).is_ok()).count()
    }
}

/// Runs watches as background tasks that can be cancelled individually
/// or all at once.
pub struct WatchScheduler {
    watcher: Arc<Watcher>,
    tasks: Vec<(JobId, JoinHandle<TaskOutcome>)>,
    cancels: CancelMap,
}

impl WatchScheduler {
    pub fn new(watcher: Arc<Watcher>) -> Self {
        Self {
            watcher,
            tasks: Vec::new(),
            cancels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancels: self.cancels.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_watching(&self, job_id: &JobId) -> bool {
        self.tasks.iter().any(|(id, h)| id == job_id && !h.is_finished())
    }

    /// Starts a watch. A job that is already being watched is not watched twice.
    pub fn submit(&mut self, request: WatchRequest) -> bool {
        if self.is_watching(&request.job_id) {
            log::warn!("Already watching {}", request.job_id);
            return false;
        }

        let (tx, mut rx) = watch::channel(false);
        self.cancels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(request.job_id.clone(), tx);

        let watcher = self.watcher.clone();
        let job_id = request.job_id.clone();
        // Only polling can be cancelled. A job seen in its final state is always reported.
        let handle = tokio::spawn(async move {
            let finished = tokio::select! {
                result = watcher.wait(&request) => result,
                _ = rx.wait_for(|cancelled| *cancelled) => {
                    log::warn!("Watch of {} cancelled, no notification will be sent", request.job_id);
                    return TaskOutcome::Cancelled;
                }
            };
            match finished {
                Ok(status) => TaskOutcome::Finished(watcher.notify(&request, status).await),
                Err(e) => TaskOutcome::Finished(Err(e)),
            }
        });
        self.tasks.push((job_id, handle));
        true
    }

    /// Waits for every submitted watch to end.
    pub async fn join_all(&mut self) -> Vec<(JobId, TaskOutcome)> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        for (job_id, handle) in self.tasks.drain(..) {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => TaskOutcome::Cancelled,
                Err(e) => TaskOutcome::Panicked(e.to_string()),
            };
            self.cancels
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .remove(&job_id);
            outcomes.push((job_id, outcome));
        }
        outcomes
    }
}
