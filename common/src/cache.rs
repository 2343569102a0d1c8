use crate::api::server_url;
use crate::job::JobId;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// `host` or `host_port` for a server URL, used as a directory name.
pub fn server_host_label(server: &str) -> Result<String> {
    let url = server_url(server)?;
    let host = url.host_str().unwrap_or("unknown");
    Ok(match url.port() {
        Some(port) => format!("{}_{}", host, port),
        None => host.to_string(),
    })
}

/// Local copies of the files belonging to each job, one directory per
/// `(server, job id)`.
#[derive(Debug, Clone)]
pub struct JobCache {
    root: PathBuf,
}

impl JobCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn job_dir(&self, server: &str, job_id: &JobId) -> Result<PathBuf> {
        Ok(self.root.join(server_host_label(server)?).join(&job_id.0))
    }

    fn ensure_job_dir(&self, server: &str, job_id: &JobId) -> Result<PathBuf> {
        let dir = self.job_dir(server, job_id)?;
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {:?}", dir))?;
        Ok(dir)
    }

    /// Copies submitted files next to each other under the job directory.
    pub fn stash_files(&self, server: &str, job_id: &JobId, files: &[&Path]) -> Result<PathBuf> {
        let dir = self.ensure_job_dir(server, job_id)?;
        for file in files {
            let name = file
                .file_name()
                .with_context(|| format!("{:?} has no file name", file))?;
            fs::copy(file, dir.join(name))
                .with_context(|| format!("Failed to copy {:?} into {:?}", file, dir))?;
        }
        Ok(dir)
    }

    pub fn write_json(
        &self,
        server: &str,
        job_id: &JobId,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<PathBuf> {
        let path = self.ensure_job_dir(server, job_id)?.join(name);
        fs::write(&path, serde_json::to_vec_pretty(value)?)
            .with_context(|| format!("Failed to write {:?}", path))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_label() {
        assert_eq!(server_host_label("http://cromwell:8000").unwrap(), "cromwell_8000");
        assert_eq!(server_host_label("https://gw.example.org/x").unwrap(), "gw.example.org");
        assert!(server_host_label("nonsense").is_err());
    }

    #[test]
    fn test_stash_and_write() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("hello.wdl");
        fs::write(&src, "workflow hello {}").unwrap();

        let cache = JobCache::new(dir.path().join("cache"));
        let id = JobId::from("abc-123");
        let job_dir = cache.stash_files("http://localhost:8000", &id, &[&src]).unwrap();
        assert_eq!(job_dir, dir.path().join("cache/localhost_8000/abc-123"));
        assert_eq!(fs::read_to_string(job_dir.join("hello.wdl")).unwrap(), "workflow hello {}");

        let path = cache
            .write_json("http://localhost:8000", &id, "metadata.json", &serde_json::json!({"a": 1}))
            .unwrap();
        assert!(fs::read_to_string(path).unwrap().contains("\"a\": 1"));
    }
}
