use serde::{Deserialize, Serialize};
use crate::job::{JobId, ResolvedReference};
use std::path::Path;

/// Asks a daemon to watch one job and mail its final state.
///
/// This is the message sent to a remote host's `lunaflow-daemon accept`
/// and the argument set of a local `lunaflow-daemon watch`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchRequest {
    pub job_id: JobId,
    pub server_url: String,
    pub recipient: String,
    /// `user@host` of whoever asked for the notification.
    pub origin: String,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

impl WatchRequest {
    pub fn new(job: ResolvedReference, recipient: &str, origin: &str) -> Self {
        Self {
            job_id: job.job_id,
            server_url: job.server_url,
            recipient: recipient.to_string(),
            origin: origin.to_string(),
            poll_interval_secs: None,
        }
    }

    pub fn job(&self) -> ResolvedReference {
        ResolvedReference {
            job_id: self.job_id.clone(),
            server_url: self.server_url.clone(),
        }
    }

    /// Command line for `lunaflow-daemon` that runs this watch, reading
    /// its settings from `config` when given.
    pub fn to_watch_args(&self, config: Option<&Path>) -> Vec<String> {
        let mut args = vec![
            "watch".to_string(),
            "--job-id".to_string(),
            self.job_id.0.clone(),
            "--server".to_string(),
            self.server_url.clone(),
            "--recipient".to_string(),
            self.recipient.clone(),
            "--origin".to_string(),
            self.origin.clone(),
        ];
        if let Some(secs) = self.poll_interval_secs {
            args.push("--interval".to_string());
            args.push(secs.to_string());
        }
        if let Some(path) = config {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        args
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub host: String,
    pub pid: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum DispatchResponse {
    Started(DispatchReceipt),
    Error(String),
}
