use crate::dispatch::Launcher;
use crate::error::{CliError, Result};
use anyhow::Context as _;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use common::job::workflow_name_from_path;
use common::{
    Attachment, Config, JobApi, JobCache, JobId, JobRecord, JobStatus, LedgerStore, ResolvedReference,
    Resolver, SubmitRequest, WatchRequest,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Everything a subcommand needs, built once per invocation.
pub struct Context {
    pub config: Config,
    pub ledger: Arc<dyn LedgerStore>,
    pub api: Arc<dyn JobApi>,
    pub cache: JobCache,
}

impl Context {
    pub fn resolve(&self, token: Option<&str>) -> Result<ResolvedReference> {
        let resolver = Resolver::new(self.ledger.as_ref(), &self.config.server.url);
        Ok(resolver.resolve_token(token)?)
    }

    /// Records a server-reported status; the ledger ignores jobs it does not know.
    fn record(&self, job: &ResolvedReference, status: JobStatus) -> Result<()> {
        if self.ledger.update_status(&job.job_id, status)? {
            log::debug!("Ledger: {} -> {}", job.job_id, status);
        }
        Ok(())
    }
}

fn print_json(out: &mut dyn Write, value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to render JSON")?;
    writeln!(out, "{}", text).context("Failed to write output")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SubmitArgs {
    pub workflow: PathBuf,
    pub inputs: Option<PathBuf>,
    pub options: Option<PathBuf>,
    pub dependencies: Option<PathBuf>,
}

fn attachment(path: &Path) -> Result<Attachment> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("workflow")
        .to_string();
    Ok(Attachment { file_name, bytes })
}

pub async fn submit(ctx: &Context, args: &SubmitArgs, out: &mut dyn Write) -> Result<ResolvedReference> {
    let request = SubmitRequest {
        workflow: attachment(&args.workflow)?,
        inputs: args.inputs.as_deref().map(attachment).transpose()?,
        options: args.options.as_deref().map(attachment).transpose()?,
        dependencies: args.dependencies.as_deref().map(attachment).transpose()?,
    };

    let server = ctx.config.server.url.clone();
    let response = ctx.api.submit(&server, &request).await?;
    let id = response.id.clone().ok_or_else(|| common::ApiError::Decode {
        body: serde_json::to_string(&response).unwrap_or_default(),
        reason: "no job id in submit response".to_string(),
    })?;

    let job = ResolvedReference {
        job_id: JobId(id),
        server_url: server,
    };
    let mut record = JobRecord::submitted(job.job_id.clone(), &job.server_url, &workflow_name_from_path(&args.workflow));
    record.last_status = match response.job_status() {
        JobStatus::Unknown => JobStatus::Submitted,
        status => status,
    };
    print_json(out, &response)?;
    ctx.ledger.append(record).map_err(|source| CliError::Unrecorded {
        job_id: job.job_id.clone(),
        source,
    })?;

    let files: Vec<&Path> = [Some(&args.workflow), args.inputs.as_ref(), args.options.as_ref(), args.dependencies.as_ref()]
        .into_iter()
        .flatten()
        .map(|p| p.as_path())
        .collect();
    if let Err(e) = ctx.cache.stash_files(&job.server_url, &job.job_id, &files) {
        log::warn!("Could not keep a copy of the submitted files: {:#}", e);
    }
    Ok(job)
}

pub async fn status(ctx: &Context, token: Option<&str>, out: &mut dyn Write) -> Result<JobStatus> {
    let job = ctx.resolve(token)?;
    let response = ctx.api.status(&job).await?;
    let status = response.job_status();
    ctx.record(&job, status)?;
    print_json(out, &response)?;
    Ok(status)
}

pub async fn logs(ctx: &Context, token: Option<&str>, out: &mut dyn Write) -> Result<()> {
    let job = ctx.resolve(token)?;
    let logs = ctx.api.logs(&job).await?;
    print_json(out, &logs)
}

pub async fn metadata(ctx: &Context, token: Option<&str>, keys: &[String], out: &mut dyn Write) -> Result<()> {
    let job = ctx.resolve(token)?;
    let metadata = ctx.api.metadata(&job, keys).await?;
    if keys.is_empty() {
        match ctx.cache.write_json(&job.server_url, &job.job_id, "metadata.json", &metadata) {
            Ok(path) => log::info!("Saved metadata to {}", path.display()),
            Err(e) => log::warn!("Could not save metadata: {:#}", e),
        }
    }
    print_json(out, &metadata)
}

pub async fn abort(ctx: &Context, token: Option<&str>, out: &mut dyn Write) -> Result<JobStatus> {
    let job = ctx.resolve(token)?;
    let response = ctx.api.abort(&job).await?;
    let status = response.job_status();
    ctx.record(&job, status)?;
    print_json(out, &response)?;
    Ok(status)
}

fn status_color(status: JobStatus) -> Color {
    match status {
        JobStatus::Succeeded => Color::Green,
        JobStatus::Failed => Color::Red,
        JobStatus::Aborted => Color::Magenta,
        JobStatus::Running => Color::Cyan,
        JobStatus::Submitted => Color::Yellow,
        JobStatus::Unknown => Color::Grey,
    }
}

/// Queries every unfinished job so the listing is current.
async fn refresh(ctx: &Context) -> Result<()> {
    let mut seen: Vec<JobId> = Vec::new();
    for record in ctx.ledger.list()? {
        if record.last_status.is_terminal() || seen.contains(&record.job_id) {
            continue;
        }
        seen.push(record.job_id.clone());
        let job = ResolvedReference {
            job_id: record.job_id,
            server_url: record.server_url,
        };
        match ctx.api.status(&job).await {
            Ok(response) => ctx.record(&job, response.job_status())?,
            Err(e) => log::warn!("Could not refresh {}: {}", job.job_id, e),
        }
    }
    Ok(())
}

pub async fn list(ctx: &Context, color: bool, refresh_first: bool, out: &mut dyn Write) -> Result<usize> {
    if refresh_first {
        refresh(ctx).await?;
    }

    let records = ctx.ledger.list()?;
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["#", "Submitted", "Server", "Job ID", "Workflow", "Status"]);
    if color {
        table.enforce_styling();
    } else {
        table.force_no_tty();
    }

    let total = records.len();
    for (i, record) in records.iter().enumerate() {
        let mut status = Cell::new(record.last_status);
        if color {
            status = status.fg(status_color(record.last_status));
        }
        table.add_row(vec![
            Cell::new(format!("-{}", total - i)),
            Cell::new(record.submitted_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(&record.server_url),
            Cell::new(&record.job_id),
            Cell::new(&record.workflow_name),
            status,
        ]);
    }

    writeln!(out, "{}", table).context("Failed to write output")?;
    Ok(total)
}

#[derive(Debug, Clone, Default)]
pub struct NotifyArgs {
    pub job: Option<String>,
    pub recipient: Option<String>,
    pub host: Option<String>,
    pub server: Option<String>,
}

fn check_recipient(recipient: Option<&str>) -> Result<String> {
    let recipient = recipient
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| CliError::Recipient("a recipient email address is required".to_string()))?;
    lettre::Address::from_str(recipient)
        .map_err(|e| CliError::Recipient(format!("{:?} is not a usable email address: {}", recipient, e)))?;
    Ok(recipient.to_string())
}

pub async fn notify(
    ctx: &Context,
    launcher: &dyn Launcher,
    args: &NotifyArgs,
    out: &mut dyn Write,
) -> Result<common::DispatchReceipt> {
    let recipient = check_recipient(args.recipient.as_deref())?;
    let mut job = ctx.resolve(args.job.as_deref())?;
    if let Some(server) = &args.server {
        common::api::server_url(server).map_err(|e| CliError::Usage(e.to_string()))?;
        job.server_url = server.clone();
    }

    let mut request = WatchRequest::new(job, &recipient, &common::origin_label());
    request.poll_interval_secs = Some(ctx.config.poll.interval_secs);

    let receipt = match args.host.as_deref() {
        Some(host) => launcher.run_remote(host, &request).await?,
        None => launcher.run_local(&request).await?,
    };
    log::info!("Watching {} from {} (pid {})", request.job_id, receipt.host, receipt.pid);
    print_json(out, &serde_json::json!({
        "id": request.job_id,
        "server": request.server_url,
        "recipient": request.recipient,
        "host": receipt.host,
        "pid": receipt.pid,
    }))?;
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_validation() {
        assert!(matches!(check_recipient(None), Err(CliError::Recipient(_))));
        assert!(matches!(check_recipient(Some("  ")), Err(CliError::Recipient(_))));
        assert!(matches!(check_recipient(Some("bob")), Err(CliError::Recipient(_))));
        assert_eq!(check_recipient(Some(" bob@example.org ")).unwrap(), "bob@example.org");
    }
}
