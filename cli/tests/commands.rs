use async_trait::async_trait;
use common::testing::ScriptedApi;
use common::{
    Config, DispatchReceipt, FileLedger, JobCache, JobId, JobRecord, JobStatus, LedgerStore, MemoryLedger,
    WatchRequest,
};
use lunaflow::commands::{self, Context, NotifyArgs, SubmitArgs};
use lunaflow::error::{EXIT_BAD_RECIPIENT, EXIT_LEDGER, EXIT_NO_PRIOR_SUBMISSION, EXIT_USAGE};
use lunaflow::{DispatchError, Launcher};
use std::sync::{Arc, Mutex};

const SERVER: &str = "http://cromwell:8000";

#[derive(Default)]
struct RecordingLauncher {
    local: Mutex<Vec<WatchRequest>>,
    remote: Mutex<Vec<(String, WatchRequest)>>,
}

#[async_trait]
impl Launcher for RecordingLauncher {
    async fn run_local(&self, request: &WatchRequest) -> Result<DispatchReceipt, DispatchError> {
        self.local.lock().unwrap().push(request.clone());
        Ok(DispatchReceipt { host: "laptop".to_string(), pid: 100 })
    }

    async fn run_remote(&self, host: &str, request: &WatchRequest) -> Result<DispatchReceipt, DispatchError> {
        self.remote.lock().unwrap().push((host.to_string(), request.clone()));
        Ok(DispatchReceipt { host: host.to_string(), pid: 200 })
    }
}

impl RecordingLauncher {
    fn dispatched(&self) -> usize {
        self.local.lock().unwrap().len() + self.remote.lock().unwrap().len()
    }
}

fn context(ledger: Arc<MemoryLedger>, api: Arc<ScriptedApi>, cache: &std::path::Path) -> Context {
    let mut config = Config::default();
    config.server.url = SERVER.to_string();
    Context {
        config,
        ledger,
        api,
        cache: JobCache::new(cache),
    }
}

fn ledger_with(ids: &[&str]) -> Arc<MemoryLedger> {
    Arc::new(MemoryLedger::with_records(
        ids.iter()
            .map(|id| JobRecord::submitted(JobId::from(*id), SERVER, "wf"))
            .collect(),
    ))
}

fn notify_args(job: Option<&str>, recipient: Option<&str>) -> NotifyArgs {
    NotifyArgs {
        job: job.map(str::to_string),
        recipient: recipient.map(str::to_string),
        ..Default::default()
    }
}

#[tokio::test]
async fn notify_on_empty_ledger_reports_no_prior_submission() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(Arc::new(MemoryLedger::new()), Arc::new(ScriptedApi::new()), dir.path());
    let launcher = RecordingLauncher::default();
    let mut out = Vec::new();

    let err = commands::notify(&ctx, &launcher, &notify_args(None, Some("ops@example.org")), &mut out)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), EXIT_NO_PRIOR_SUBMISSION);
    assert_eq!(launcher.dispatched(), 0);
    assert!(out.is_empty());
}

#[tokio::test]
async fn notify_without_recipient_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(ledger_with(&["a"]), Arc::new(ScriptedApi::new()), dir.path());
    let launcher = RecordingLauncher::default();

    let err = commands::notify(&ctx, &launcher, &notify_args(None, None), &mut std::io::sink())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), EXIT_BAD_RECIPIENT);
    assert_eq!(launcher.dispatched(), 0);
}

#[tokio::test]
async fn notify_resolves_offset_and_starts_local_watch() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(ledger_with(&["a", "b", "c"]), Arc::new(ScriptedApi::new()), dir.path());
    let launcher = RecordingLauncher::default();
    let mut out = Vec::new();

    let receipt = commands::notify(&ctx, &launcher, &notify_args(Some("-2"), Some("ops@example.org")), &mut out)
        .await
        .unwrap();
    assert_eq!(receipt.pid, 100);

    let local = launcher.local.lock().unwrap();
    assert_eq!(local[0].job_id.0, "b");
    assert_eq!(local[0].server_url, SERVER);
    assert_eq!(local[0].recipient, "ops@example.org");
    let printed: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(printed["pid"], 100);
}

#[tokio::test]
async fn notify_on_remote_host_with_server_override() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(ledger_with(&["a"]), Arc::new(ScriptedApi::new()), dir.path());
    let launcher = RecordingLauncher::default();
    let args = NotifyArgs {
        job: Some("a".to_string()),
        recipient: Some("ops@example.org".to_string()),
        host: Some("hpc1".to_string()),
        server: Some("http://other:9000".to_string()),
    };

    commands::notify(&ctx, &launcher, &args, &mut std::io::sink()).await.unwrap();
    let remote = launcher.remote.lock().unwrap();
    assert_eq!(remote[0].0, "hpc1");
    assert_eq!(remote[0].1.server_url, "http://other:9000");
    assert!(launcher.local.lock().unwrap().is_empty());
}

#[tokio::test]
async fn submit_records_job_and_keeps_files() {
    let dir = tempfile::tempdir().unwrap();
    let wdl = dir.path().join("hello_world.wdl");
    let inputs = dir.path().join("inputs.json");
    std::fs::write(&wdl, "workflow hello_world {}").unwrap();
    std::fs::write(&inputs, "{}").unwrap();

    let api = Arc::new(ScriptedApi::new());
    let ledger = Arc::new(MemoryLedger::new());
    let ctx = context(ledger.clone(), api.clone(), &dir.path().join("cache"));
    let args = SubmitArgs { workflow: wdl, inputs: Some(inputs), options: None, dependencies: None };

    let job = commands::submit(&ctx, &args, &mut std::io::sink()).await.unwrap();
    assert_eq!(api.submitted_workflows(), vec!["hello_world.wdl".to_string()]);

    let record = ledger.most_recent(1).unwrap();
    assert_eq!(record.job_id, job.job_id);
    assert_eq!(record.workflow_name, "hello_world");
    assert_eq!(record.last_status, JobStatus::Submitted);

    let job_dir = ctx.cache.job_dir(SERVER, &job.job_id).unwrap();
    assert!(job_dir.join("hello_world.wdl").exists());
    assert!(job_dir.join("inputs.json").exists());
}

#[tokio::test]
async fn notify_with_invalid_server_is_a_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(ledger_with(&["a"]), Arc::new(ScriptedApi::new()), dir.path());
    let launcher = RecordingLauncher::default();
    let args = NotifyArgs {
        server: Some("ftp://cromwell".to_string()),
        ..notify_args(Some("a"), Some("ops@example.org"))
    };

    let err = commands::notify(&ctx, &launcher, &args, &mut std::io::sink())
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), EXIT_USAGE);
    assert_eq!(launcher.dispatched(), 0);
}

#[tokio::test]
async fn submit_prints_job_id_even_when_ledger_is_unwritable() {
    let dir = tempfile::tempdir().unwrap();
    let wdl = dir.path().join("hello.wdl");
    std::fs::write(&wdl, "workflow hello {}").unwrap();
    let ledger_path = dir.path().join("ledger.tsv");
    std::fs::create_dir(ledger_path.with_extension("tmp")).unwrap();

    let api = Arc::new(ScriptedApi::new());
    let mut config = Config::default();
    config.server.url = SERVER.to_string();
    let ctx = Context {
        config,
        ledger: Arc::new(FileLedger::new(&ledger_path)),
        api: api.clone(),
        cache: JobCache::new(dir.path().join("cache")),
    };
    let args = SubmitArgs { workflow: wdl, inputs: None, options: None, dependencies: None };

    let mut out = Vec::new();
    let err = commands::submit(&ctx, &args, &mut out).await.unwrap_err();
    assert_eq!(err.exit_code(), EXIT_LEDGER);
    assert_eq!(api.submitted_workflows(), vec!["hello.wdl".to_string()]);

    let printed: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let job_id = printed["id"].as_str().unwrap().to_string();
    assert!(!job_id.is_empty());
    assert!(err.to_string().contains(&job_id));
}

#[tokio::test]
async fn status_updates_ledger_but_not_past_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = ledger_with(&["a"]);
    let api = Arc::new(ScriptedApi::with_statuses(&["Succeeded", "Running"]));
    let ctx = context(ledger.clone(), api, dir.path());

    let mut out = Vec::new();
    assert_eq!(commands::status(&ctx, None, &mut out).await.unwrap(), JobStatus::Succeeded);
    assert!(String::from_utf8(out).unwrap().contains("Succeeded"));

    assert_eq!(commands::status(&ctx, None, &mut std::io::sink()).await.unwrap(), JobStatus::Running);
    assert_eq!(ledger.most_recent(1).unwrap().last_status, JobStatus::Succeeded);
}

#[tokio::test]
async fn abort_records_reported_status() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = ledger_with(&["a"]);
    let api = Arc::new(ScriptedApi::new());
    let ctx = context(ledger.clone(), api.clone(), dir.path());

    assert_eq!(commands::abort(&ctx, Some("a"), &mut std::io::sink()).await.unwrap(), JobStatus::Running);
    assert_eq!(api.abort_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(ledger.most_recent(1).unwrap().last_status, JobStatus::Running);
}

#[tokio::test]
async fn list_refresh_queries_only_unfinished_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = ledger_with(&["done", "busy"]);
    ledger.update_status(&JobId::from("done"), JobStatus::Failed).unwrap();
    let api = Arc::new(ScriptedApi::with_statuses(&["Succeeded"]));
    let ctx = context(ledger.clone(), api.clone(), dir.path());

    let mut out = Vec::new();
    assert_eq!(commands::list(&ctx, false, true, &mut out).await.unwrap(), 2);
    assert_eq!(api.status_call_count(), 1);
    assert_eq!(ledger.find_by_prefix_or_exact("busy").unwrap().last_status, JobStatus::Succeeded);

    let table = String::from_utf8(out).unwrap();
    assert!(table.contains("done"));
    assert!(table.contains("Failed"));
    assert!(table.contains("-2"));
}

#[tokio::test]
async fn metadata_is_saved_in_job_cache() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(ScriptedApi::new());
    api.set_metadata(serde_json::json!({"workflowName": "wf", "status": "Running"}));
    let ctx = context(ledger_with(&["a"]), api, dir.path());

    commands::metadata(&ctx, None, &[], &mut std::io::sink()).await.unwrap();
    let saved = ctx.cache.job_dir(SERVER, &JobId::from("a")).unwrap().join("metadata.json");
    assert!(std::fs::read_to_string(saved).unwrap().contains("workflowName"));
}
