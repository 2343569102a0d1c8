//! Command line of `lunaflow-daemon`.
//!
//! `lunaflow notify` builds `watch` invocations from a [`WatchRequest`],
//! and remote hosts receive the same request as JSON on `accept`.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use common::{DispatchReceipt, DispatchResponse, JobId, WatchRequest};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "lunaflow-daemon", author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (.yaml or .toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Watch a job in the foreground and email its final state
    Watch(WatchArgs),
    /// Read a watch request as JSON from stdin and start a detached watcher for it
    Accept,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[arg(long)]
    pub job_id: String,
    #[arg(long)]
    pub server: String,
    #[arg(long)]
    pub recipient: String,
    /// user@host that asked for the notification
    #[arg(long)]
    pub origin: Option<String>,
    /// Seconds between status checks
    #[arg(long)]
    pub interval: Option<u64>,
}

impl WatchArgs {
    pub fn into_request(self) -> WatchRequest {
        WatchRequest {
            job_id: JobId(self.job_id),
            server_url: self.server,
            recipient: self.recipient,
            origin: self.origin.unwrap_or_else(common::origin_label),
            poll_interval_secs: self.interval,
        }
    }
}

/// Handles one `accept` exchange: `input` is the JSON request and `spawn`
/// starts a watcher with the given `watch` arguments, returning its pid.
pub fn accept_request<F>(input: &str, spawn: F) -> DispatchResponse
where
    F: FnOnce(&[String]) -> std::io::Result<u32>,
{
    match start_watch(input, spawn) {
        Ok(receipt) => DispatchResponse::Started(receipt),
        Err(e) => DispatchResponse::Error(format!("{:#}", e)),
    }
}

fn start_watch<F>(input: &str, spawn: F) -> anyhow::Result<DispatchReceipt>
where
    F: FnOnce(&[String]) -> std::io::Result<u32>,
{
    let request: WatchRequest = serde_json::from_str(input).context("Malformed watch request")?;
    let pid = spawn(&request.to_watch_args(None))
        .with_context(|| format!("Failed to start watcher for {}", request.job_id))?;
    Ok(DispatchReceipt {
        host: common::host_name(),
        pid,
    })
}
