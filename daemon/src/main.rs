use anyhow::Context;
use clap::Parser;
use common::{Config, DispatchResponse, FileLedger, HttpJobApi, WatchRequest};
use lunaflow_daemon::cli::{accept_request, Cli, Commands};
use lunaflow_daemon::{MailMessenger, StatusPoller, TaskOutcome, WatchScheduler, Watcher};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch(args) => {
            let config = load_config(cli.config.as_deref())?;
            setup_logging(&config)?;
            run_watch(&config, args.into_request()).await
        }
        Commands::Accept => accept(),
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            Ok(config)
        }
        None => Config::load(),
    }
}

async fn run_watch(config: &Config, request: WatchRequest) -> anyhow::Result<()> {
    log::info!("Starting lunaflow-daemon watch (pid {})", std::process::id());

    let api = Arc::new(HttpJobApi::new(
        config.server.connect_timeout(),
        config.server.request_timeout(),
    )?);
    let ledger = Arc::new(FileLedger::new(&config.ledger.path));
    let interval = request
        .poll_interval_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.poll.interval());
    let poller = StatusPoller::new(api.clone(), ledger, interval);
    let messenger = Arc::new(MailMessenger::from_config(&config.smtp));
    let watcher = Arc::new(Watcher::new(poller, api, messenger));

    let mut scheduler = WatchScheduler::new(watcher);
    let cancel = scheduler.cancel_handle();
    tokio::spawn(async move {
        if shutdown_signal().await.is_ok() {
            log::warn!("Shutdown requested, cancelled {} watch(es)", cancel.cancel_all());
        }
    });

    scheduler.submit(request);

    let mut failed = false;
    for (job_id, outcome) in scheduler.join_all().await {
        match outcome {
            TaskOutcome::Finished(Ok(status)) => log::info!("Watch of {} done: {}", job_id, status),
            TaskOutcome::Finished(Err(e)) => {
                log::error!("Watch of {} failed: {}", job_id, e);
                failed = true;
            }
            TaskOutcome::Cancelled => log::warn!("Watch of {} cancelled", job_id),
            TaskOutcome::Panicked(e) => {
                log::error!("Watch of {} panicked: {}", job_id, e);
                failed = true;
            }
        }
    }

    if failed {
        anyhow::bail!("watch failed, see log");
    }
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r,
        _ = term.recv() => Ok(()),
    }
}

/// Remote entry point: one JSON request in, one JSON response out.
fn accept() -> anyhow::Result<()> {
    let mut input = String::new();
    let response = match std::io::stdin().read_to_string(&mut input) {
        Ok(_) => {
            let exe = std::env::current_exe().context("Cannot locate own executable")?;
            accept_request(&input, |args| common::detach::spawn_detached(&exe, args))
        }
        Err(e) => DispatchResponse::Error(format!("Failed to read watch request from stdin: {}", e)),
    };
    println!("{}", serde_json::to_string(&response)?);
    if let DispatchResponse::Error(e) = response {
        anyhow::bail!(e);
    }
    Ok(())
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let log_file = config.logging.output_path();
    if let Some(dir) = log_file.parent() {
        std::fs::create_dir_all(dir)?;
    }

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d][%H:%M:%S"),
                std::process::id(),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(config.logging.level_filter())
        .chain(std::io::stderr())
        .chain(fern::log_file(log_file)?)
        .apply()?;

    Ok(())
}
