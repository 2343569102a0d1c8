//! Client for the workflow server's REST endpoints.
//!
//! Every response body goes through [`decode`], which is the only place
//! server output is interpreted.

use crate::error::ApiError;
use crate::job::{JobStatus, ResolvedReference};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const API_PREFIX: &str = "api/workflows/v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub status: String,
}

impl StatusResponse {
    pub fn job_status(&self) -> JobStatus {
        JobStatus::from_server(&self.status)
    }
}

/// A named file attached to a submission.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub workflow: Attachment,
    pub inputs: Option<Attachment>,
    pub options: Option<Attachment>,
    pub dependencies: Option<Attachment>,
}

#[async_trait]
pub trait JobApi: Send + Sync {
    async fn submit(&self, server_url: &str, request: &SubmitRequest) -> Result<StatusResponse, ApiError>;

    async fn status(&self, job: &ResolvedReference) -> Result<StatusResponse, ApiError>;

    /// Full metadata; `include_keys` narrows it when not empty.
    async fn metadata(
        &self,
        job: &ResolvedReference,
        include_keys: &[String],
    ) -> Result<serde_json::Value, ApiError>;

    async fn logs(&self, job: &ResolvedReference) -> Result<serde_json::Value, ApiError>;

    async fn abort(&self, job: &ResolvedReference) -> Result<StatusResponse, ApiError>;
}

/// Interprets one HTTP response.
pub fn decode<T: DeserializeOwned>(code: u16, body: &str) -> Result<T, ApiError> {
    if !(200..300).contains(&code) {
        return Err(ApiError::Status {
            code,
            body: body.to_string(),
        });
    }
    serde_json::from_str(body).map_err(|e| ApiError::Decode {
        body: body.to_string(),
        reason: e.to_string(),
    })
}

pub fn server_url(server: &str) -> Result<Url, ApiError> {
    let url = Url::parse(server).map_err(|_| ApiError::InvalidServer(server.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ApiError::InvalidServer(server.to_string()));
    }
    Ok(url)
}

fn endpoint(server: &str, tail: &str) -> Result<Url, ApiError> {
    let base = server_url(server)?;
    let mut path = format!("{}/{}", base.path().trim_end_matches('/'), API_PREFIX);
    if !tail.is_empty() {
        path.push('/');
        path.push_str(tail);
    }
    let mut url = base;
    url.set_path(&path);
    Ok(url)
}

pub struct HttpJobApi {
    client: reqwest::Client,
}

impl HttpJobApi {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }

    async fn read<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await?;
        let code = response.status().as_u16();
        let body = response.text().await?;
        decode(code, &body)
    }
}

fn part(attachment: &Attachment) -> Part {
    Part::bytes(attachment.bytes.clone()).file_name(attachment.file_name.clone())
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn submit(&self, server_url: &str, request: &SubmitRequest) -> Result<StatusResponse, ApiError> {
        let url = endpoint(server_url, "")?;
        let mut form = Form::new().part("workflowSource", part(&request.workflow));
        if let Some(inputs) = &request.inputs {
            form = form.part("workflowInputs", part(inputs));
        }
        if let Some(options) = &request.options {
            form = form.part("workflowOptions", part(options));
        }
        if let Some(deps) = &request.dependencies {
            form = form.part("workflowDependencies", part(deps));
        }
        log::debug!("POST {}", url);
        self.read(self.client.post(url).multipart(form)).await
    }

    async fn status(&self, job: &ResolvedReference) -> Result<StatusResponse, ApiError> {
        let url = endpoint(&job.server_url, &format!("{}/status", job.job_id))?;
        log::debug!("GET {}", url);
        self.read(self.client.get(url)).await
    }

    async fn metadata(
        &self,
        job: &ResolvedReference,
        include_keys: &[String],
    ) -> Result<serde_json::Value, ApiError> {
        let url = endpoint(&job.server_url, &format!("{}/metadata", job.job_id))?;
        let mut request = self.client.get(url).query(&[("expandSubWorkflows", "true")]);
        for key in include_keys {
            request = request.query(&[("includeKey", key.as_str())]);
        }
        self.read(request).await
    }

    async fn logs(&self, job: &ResolvedReference) -> Result<serde_json::Value, ApiError> {
        let url = endpoint(&job.server_url, &format!("{}/logs", job.job_id))?;
        self.read(self.client.get(url)).await
    }

    async fn abort(&self, job: &ResolvedReference) -> Result<StatusResponse, ApiError> {
        let url = endpoint(&job.server_url, &format!("{}/abort", job.job_id))?;
        log::info!("Aborting {} on {}", job.job_id, job.server_url);
        self.read(self.client.post(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_status() {
        let resp: StatusResponse = decode(200, r#"{"id":"abc","status":"Running"}"#).unwrap();
        assert_eq!(resp.job_status(), JobStatus::Running);
        assert_eq!(resp.id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_decode_keeps_body_on_failure() {
        let err = decode::<StatusResponse>(404, "Unrecognized workflow ID").unwrap_err();
        match &err {
            ApiError::Status { code, body } => {
                assert_eq!(*code, 404);
                assert_eq!(body, "Unrecognized workflow ID");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!err.is_transient());

        let err = decode::<StatusResponse>(200, "<html>proxy error</html>").unwrap_err();
        assert!(matches!(err, ApiError::Decode { ref body, .. } if body.contains("proxy")));
        assert!(err.is_transient());
    }

    #[test]
    fn test_status_codes_classification() {
        let status = |code| ApiError::Status { code, body: String::new() };
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(401).is_transient());
        assert!(!status(403).is_transient());
    }

    #[test]
    fn test_endpoint_building() {
        let url = endpoint("http://cromwell:8000/", "abc/status").unwrap();
        assert_eq!(url.as_str(), "http://cromwell:8000/api/workflows/v1/abc/status");

        let url = endpoint("https://gw.example.org/proxy", "").unwrap();
        assert_eq!(url.as_str(), "https://gw.example.org/proxy/api/workflows/v1");
    }

    #[tokio::test]
    async fn test_unknown_host_is_not_transient() {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let err = client
            .get("http://no-such-host.invalid:8000/api/workflows/v1/abc/status")
            .send()
            .await
            .unwrap_err();

        let err = ApiError::from(err);
        assert!(
            matches!(err, ApiError::Unresolvable { ref host, .. } if host == "no-such-host.invalid"),
            "unexpected error {:?}",
            err
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn test_invalid_server() {
        assert!(matches!(endpoint("not a url", "x"), Err(ApiError::InvalidServer(_))));
        assert!(matches!(endpoint("ftp://host", "x"), Err(ApiError::InvalidServer(_))));
    }
}
