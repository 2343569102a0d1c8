//! Scripted stand-in for the workflow server.

use crate::api::{JobApi, StatusResponse, SubmitRequest};
use crate::error::ApiError;
use crate::job::ResolvedReference;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn status(s: &str) -> StatusResponse {
    StatusResponse { id: None, status: s.to_string() }
}

pub fn transient_error() -> ApiError {
    ApiError::Status { code: 503, body: "Service Unavailable".to_string() }
}

/// Answers status calls from a queue. Once the queue runs dry every
/// status call fails with a non-transient 404 so a poller cannot spin forever.
#[derive(Default)]
pub struct ScriptedApi {
    statuses: Mutex<VecDeque<Result<StatusResponse, ApiError>>>,
    metadata: Mutex<Option<serde_json::Value>>,
    submitted: Mutex<Vec<String>>,
    pub status_calls: AtomicUsize,
    pub abort_calls: AtomicUsize,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(statuses: &[&str]) -> Self {
        let api = Self::new();
        for s in statuses {
            api.push_status(s);
        }
        api
    }

    pub fn push_status(&self, s: &str) {
        self.statuses.lock().unwrap().push_back(Ok(status(s)));
    }

    pub fn push_error(&self, e: ApiError) {
        self.statuses.lock().unwrap().push_back(Err(e));
    }

    pub fn set_metadata(&self, value: serde_json::Value) {
        *self.metadata.lock().unwrap() = Some(value);
    }

    pub fn submitted_workflows(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn status_call_count(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobApi for ScriptedApi {
    async fn submit(&self, _server_url: &str, request: &SubmitRequest) -> Result<StatusResponse, ApiError> {
        self.submitted.lock().unwrap().push(request.workflow.file_name.clone());
        Ok(StatusResponse {
            id: Some(uuid::Uuid::new_v4().to_string()),
            status: "Submitted".to_string(),
        })
    }

    async fn status(&self, job: &ResolvedReference) -> Result<StatusResponse, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.statuses.lock().unwrap().pop_front() {
            Some(Ok(mut resp)) => {
                resp.id = Some(job.job_id.0.clone());
                Ok(resp)
            }
            Some(Err(e)) => Err(e),
            None => Err(ApiError::Status { code: 404, body: "script exhausted".to_string() }),
        }
    }

    async fn metadata(
        &self,
        job: &ResolvedReference,
        _include_keys: &[String],
    ) -> Result<serde_json::Value, ApiError> {
        match self.metadata.lock().unwrap().clone() {
            Some(value) => Ok(value),
            None => Ok(serde_json::json!({ "id": job.job_id.0 })),
        }
    }

    async fn logs(&self, job: &ResolvedReference) -> Result<serde_json::Value, ApiError> {
        Ok(serde_json::json!({ "id": job.job_id.0, "calls": {} }))
    }

    async fn abort(&self, job: &ResolvedReference) -> Result<StatusResponse, ApiError> {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        Ok(StatusResponse { id: Some(job.job_id.0.clone()), status: "Aborting".to_string() })
    }
}
