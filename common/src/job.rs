use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobId(pub String);

impl JobId {
    /// Server-assigned ids are UUIDs; anything else is accepted but suspicious.
    pub fn is_uuid_shaped(&self) -> bool {
        uuid::Uuid::parse_str(&self.0).is_ok()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Aborted,
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Submitted => "Submitted",
            JobStatus::Running => "Running",
            JobStatus::Succeeded => "Succeeded",
            JobStatus::Failed => "Failed",
            JobStatus::Aborted => "Aborted",
            JobStatus::Unknown => "Unknown",
        }
    }

    /// Maps a status string reported by the workflow server.
    ///
    /// Transitional server states fold into the nearest local state:
    /// `On Hold` is still waiting to start and `Aborting` is still running.
    pub fn from_server(s: &str) -> Self {
        match s.trim() {
            "Submitted" | "On Hold" => JobStatus::Submitted,
            "Running" | "Aborting" => JobStatus::Running,
            "Succeeded" => JobStatus::Succeeded,
            "Failed" => JobStatus::Failed,
            "Aborted" => JobStatus::Aborted,
            _ => JobStatus::Unknown,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(JobStatus::from_server(s))
    }
}

/// One row of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobRecord {
    pub submitted_at: DateTime<Utc>,
    pub server_url: String,
    pub job_id: JobId,
    pub workflow_name: String,
    pub last_status: JobStatus,
}

impl JobRecord {
    pub fn submitted(job_id: JobId, server_url: &str, workflow_name: &str) -> Self {
        Self {
            submitted_at: Utc::now(),
            server_url: server_url.to_string(),
            job_id,
            workflow_name: workflow_name.to_string(),
            last_status: JobStatus::Submitted,
        }
    }
}

/// A job reference resolved against the ledger. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedReference {
    pub job_id: JobId,
    pub server_url: String,
}

/// Display label for a workflow definition file: its file stem.
pub fn workflow_name_from_path(path: &std::path::Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| path.display().to_string())
}
