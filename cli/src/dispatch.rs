//! Starting watchers: as a detached local process, or on another host
//! over ssh.
//!
//! A remote watcher is started by sending a JSON [`WatchRequest`] to
//! `lunaflow-daemon accept` on the target host. Once it has answered with
//! a pid the initiator has no further control over it: it can neither be
//! cancelled nor restarted from here.

use async_trait::async_trait;
use common::detach::{self, DAEMON_BINARY};
use common::{DispatchReceipt, DispatchResponse, WatchRequest};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("copying the daemon to {host} failed: {reason}")]
    Copy { host: String, reason: String },

    #[error("running the daemon on {host} failed: {reason}")]
    Invoke { host: String, reason: String },

    #[error("{host} refused the watch: {reason}")]
    Rejected { host: String, reason: String },

    #[error("unreadable reply from {host}: {reply:?}")]
    BadReply { host: String, reply: String },
}

/// Moves the daemon to other machines and runs commands there.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn copy_tool(&self, host: &str, local: &Path, remote_dir: &str) -> Result<(), DispatchError>;

    /// Runs `command` on `host` with `input` on its stdin and returns its stdout.
    async fn invoke(&self, host: &str, command: &str, input: &[u8]) -> Result<String, DispatchError>;
}

pub struct SshExecutor {
    ssh: String,
    scp: String,
}

impl SshExecutor {
    pub fn new(ssh: &str, scp: &str) -> Self {
        Self {
            ssh: ssh.to_string(),
            scp: scp.to_string(),
        }
    }

    async fn run(&self, program: &str, args: &[String], input: &[u8]) -> Result<(bool, String, String), DispatchError> {
        let spawn_err = |source| DispatchError::Spawn {
            program: program.to_string(),
            source,
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await.map_err(spawn_err)?;
        }
        let output = child.wait_with_output().await.map_err(spawn_err)?;
        Ok((
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn copy_tool(&self, host: &str, local: &Path, remote_dir: &str) -> Result<(), DispatchError> {
        let copy_err = |reason: String| DispatchError::Copy {
            host: host.to_string(),
            reason,
        };

        let mkdir = vec![host.to_string(), format!("mkdir -p '{}'", remote_dir)];
        let (ok, _, stderr) = self.run(&self.ssh, &mkdir, b"").await?;
        if !ok {
            return Err(copy_err(stderr));
        }

        let scp = vec![
            "-q".to_string(),
            local.display().to_string(),
            format!("{}:{}/{}", host, remote_dir, DAEMON_BINARY),
        ];
        let (ok, _, stderr) = self.run(&self.scp, &scp, b"").await?;
        if !ok {
            return Err(copy_err(stderr));
        }
        log::info!("Copied {} to {}:{}", local.display(), host, remote_dir);
        Ok(())
    }

    async fn invoke(&self, host: &str, command: &str, input: &[u8]) -> Result<String, DispatchError> {
        let args = vec![host.to_string(), command.to_string()];
        let (ok, stdout, stderr) = self.run(&self.ssh, &args, input).await?;
        if !ok && stdout.trim().is_empty() {
            return Err(DispatchError::Invoke {
                host: host.to_string(),
                reason: stderr,
            });
        }
        Ok(stdout)
    }
}

/// Starts watchers for `notify`.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn run_local(&self, request: &WatchRequest) -> Result<DispatchReceipt, DispatchError>;

    async fn run_remote(&self, host: &str, request: &WatchRequest) -> Result<DispatchReceipt, DispatchError>;
}

pub struct DaemonLauncher<E> {
    daemon: PathBuf,
    install_dir: String,
    config: Option<PathBuf>,
    executor: E,
}

impl<E: RemoteExecutor> DaemonLauncher<E> {
    pub fn new(daemon: PathBuf, install_dir: &str, executor: E) -> Self {
        Self {
            daemon,
            install_dir: install_dir.trim_end_matches('/').to_string(),
            config: None,
            executor,
        }
    }

    /// Config file handed to local watchers. Remote watchers use the
    /// target host's own configuration.
    pub fn with_config(mut self, config: Option<PathBuf>) -> Self {
        self.config = config;
        self
    }

    pub fn local_args(&self, request: &WatchRequest) -> Vec<String> {
        request.to_watch_args(self.config.as_deref())
    }
}

pub fn parse_reply(host: &str, reply: &str) -> Result<DispatchReceipt, DispatchError> {
    let last_line = reply.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    match serde_json::from_str::<DispatchResponse>(last_line) {
        Ok(DispatchResponse::Started(receipt)) => Ok(receipt),
        Ok(DispatchResponse::Error(reason)) => Err(DispatchError::Rejected {
            host: host.to_string(),
            reason,
        }),
        Err(_) => Err(DispatchError::BadReply {
            host: host.to_string(),
            reply: reply.to_string(),
        }),
    }
}

#[async_trait]
impl<E: RemoteExecutor> Launcher for DaemonLauncher<E> {
    async fn run_local(&self, request: &WatchRequest) -> Result<DispatchReceipt, DispatchError> {
        let pid = detach::spawn_detached(&self.daemon, &self.local_args(request)).map_err(|source| {
            DispatchError::Spawn {
                program: self.daemon.display().to_string(),
                source,
            }
        })?;
        Ok(DispatchReceipt {
            host: common::host_name(),
            pid,
        })
    }

    async fn run_remote(&self, host: &str, request: &WatchRequest) -> Result<DispatchReceipt, DispatchError> {
        self.executor.copy_tool(host, &self.daemon, &self.install_dir).await?;

        let message = serde_json::to_vec(request).map_err(|e| DispatchError::Invoke {
            host: host.to_string(),
            reason: e.to_string(),
        })?;
        let command = format!("{}/{} accept", self.install_dir, DAEMON_BINARY);
        let reply = self.executor.invoke(host, &command, &message).await?;
        let receipt = parse_reply(host, &reply)?;
        log::info!("Watcher for {} running on {} as pid {}", request.job_id, host, receipt.pid);
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{JobId, ResolvedReference};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeExecutor {
        calls: Mutex<Vec<String>>,
        reply: String,
        copy_fails: bool,
    }

    #[async_trait]
    impl RemoteExecutor for FakeExecutor {
        async fn copy_tool(&self, host: &str, local: &Path, remote_dir: &str) -> Result<(), DispatchError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("copy {} {}:{}", local.display(), host, remote_dir));
            if self.copy_fails {
                return Err(DispatchError::Copy {
                    host: host.to_string(),
                    reason: "Permission denied (publickey)".to_string(),
                });
            }
            Ok(())
        }

        async fn invoke(&self, host: &str, command: &str, input: &[u8]) -> Result<String, DispatchError> {
            let request: WatchRequest = serde_json::from_slice(input).unwrap();
            self.calls
                .lock()
                .unwrap()
                .push(format!("invoke {} {} {}", host, command, request.job_id));
            Ok(self.reply.clone())
        }
    }

    fn request() -> WatchRequest {
        WatchRequest::new(
            ResolvedReference {
                job_id: JobId::from("job-9"),
                server_url: "http://cromwell:8000".to_string(),
            },
            "me@example.org",
            "me@laptop",
        )
    }

    #[tokio::test]
    async fn test_remote_dispatch() {
        let executor = FakeExecutor {
            reply: "motd noise\n{\"Started\":{\"host\":\"hpc1\",\"pid\":4242}}\n".to_string(),
            ..Default::default()
        };
        let launcher = DaemonLauncher::new(PathBuf::from("/opt/lunaflow-daemon"), ".lunaflow/bin/", executor);

        let receipt = launcher.run_remote("hpc1", &request()).await.unwrap();
        assert_eq!(receipt, DispatchReceipt { host: "hpc1".to_string(), pid: 4242 });

        let calls = launcher.executor.calls.lock().unwrap();
        assert_eq!(calls[0], "copy /opt/lunaflow-daemon hpc1:.lunaflow/bin");
        assert_eq!(calls[1], "invoke hpc1 .lunaflow/bin/lunaflow-daemon accept job-9");
    }

    #[tokio::test]
    async fn test_copy_failure_stops_dispatch() {
        let executor = FakeExecutor {
            copy_fails: true,
            ..Default::default()
        };
        let launcher = DaemonLauncher::new(PathBuf::from("/opt/lunaflow-daemon"), ".lunaflow/bin", executor);

        let err = launcher.run_remote("hpc1", &request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Copy { .. }));
        assert_eq!(launcher.executor.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_parse_reply_variants() {
        assert!(matches!(
            parse_reply("h", r#"{"Error":"Malformed watch request"}"#),
            Err(DispatchError::Rejected { .. })
        ));
        assert!(matches!(
            parse_reply("h", "bash: lunaflow-daemon: command not found"),
            Err(DispatchError::BadReply { .. })
        ));
    }

    #[test]
    fn test_local_watch_uses_callers_config() {
        let launcher = DaemonLauncher::new(PathBuf::from("/opt/lunaflow-daemon"), ".lunaflow/bin", FakeExecutor::default());
        assert!(!launcher.local_args(&request()).contains(&"--config".to_string()));

        let launcher = launcher.with_config(Some(PathBuf::from("/etc/lunaflow/site.toml")));
        let args = launcher.local_args(&request());
        assert_eq!(&args[args.len() - 2..], ["--config", "/etc/lunaflow/site.toml"]);
    }

    #[tokio::test]
    async fn test_local_spawn_failure() {
        let launcher = DaemonLauncher::new(
            PathBuf::from("/nonexistent/lunaflow-daemon"),
            ".lunaflow/bin",
            FakeExecutor::default(),
        );
        assert!(matches!(
            launcher.run_local(&request()).await,
            Err(DispatchError::Spawn { .. })
        ));
    }
}
