use clap::{Parser, Subcommand};
use common::{Config, FileLedger, HttpJobApi, JobCache};
use lunaflow::commands::{self, Context, NotifyArgs, SubmitArgs};
use lunaflow::dispatch::{DaemonLauncher, SshExecutor};
use lunaflow::error::{CliError, EXIT_OK};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Workflow server URL, overriding config and LUNAFLOW_SERVER
    #[arg(long = "server", global = true)]
    server_url: Option<String>,
    /// Config file (.yaml or .toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a workflow
    Submit {
        /// Workflow definition file
        workflow: PathBuf,
        /// Inputs JSON
        #[arg(short, long)]
        inputs: Option<PathBuf>,
        /// Workflow options JSON
        #[arg(short, long)]
        options: Option<PathBuf>,
        /// Zip of imported workflow files
        #[arg(short, long)]
        dependencies: Option<PathBuf>,
    },
    /// Show a job's status (default: the last submitted job)
    Status {
        /// Job id, or -N for the N-th most recent job
        #[arg(allow_hyphen_values = true)]
        job: Option<String>,
    },
    /// Show a job's call logs
    Logs {
        #[arg(allow_hyphen_values = true)]
        job: Option<String>,
    },
    /// Show a job's metadata
    Metadata {
        #[arg(allow_hyphen_values = true)]
        job: Option<String>,
        /// Only include these metadata keys
        #[arg(short = 'k', long = "key")]
        keys: Vec<String>,
    },
    /// Abort a running job
    Abort {
        #[arg(allow_hyphen_values = true)]
        job: Option<String>,
    },
    /// List submitted jobs
    List {
        /// Colour the status column
        #[arg(long)]
        color: bool,
        /// Ask the server for the current status of unfinished jobs first
        #[arg(long)]
        refresh: bool,
    },
    /// Email a recipient when a job finishes
    Notify {
        /// Job id, or -N for the N-th most recent job
        #[arg(short, long, allow_hyphen_values = true)]
        job: Option<String>,
        /// Email address to notify
        recipient: Option<String>,
        /// Run the watcher on this host over ssh instead of locally
        host: Option<String>,
        /// Workflow server of the job, if not the one in the ledger
        #[arg(value_name = "SERVER", value_parser = parse_server)]
        job_server: Option<String>,
    },
}

fn parse_server(s: &str) -> Result<String, String> {
    common::api::server_url(s).map_err(|e| e.to_string())?;
    Ok(s.to_string())
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            config
        }
        None => Config::load()?,
    };
    if let Some(url) = &cli.server_url {
        config.server.url = url.clone();
    }
    Ok(config)
}

async fn run(cli: Cli) -> lunaflow::Result<()> {
    let config = load_config(&cli)?;
    let api = HttpJobApi::new(config.server.connect_timeout(), config.server.request_timeout())?;
    let ctx = Context {
        ledger: Arc::new(FileLedger::new(&config.ledger.path)),
        cache: JobCache::new(&config.ledger.cache_dir),
        api: Arc::new(api),
        config,
    };
    let mut stdout = std::io::stdout();

    match cli.command {
        Commands::Submit { workflow, inputs, options, dependencies } => {
            let args = SubmitArgs { workflow, inputs, options, dependencies };
            commands::submit(&ctx, &args, &mut stdout).await?;
        }
        Commands::Status { job } => {
            commands::status(&ctx, job.as_deref(), &mut stdout).await?;
        }
        Commands::Logs { job } => commands::logs(&ctx, job.as_deref(), &mut stdout).await?,
        Commands::Metadata { job, keys } => {
            commands::metadata(&ctx, job.as_deref(), &keys, &mut stdout).await?
        }
        Commands::Abort { job } => {
            commands::abort(&ctx, job.as_deref(), &mut stdout).await?;
        }
        Commands::List { color, refresh } => {
            commands::list(&ctx, color, refresh, &mut stdout).await?;
        }
        Commands::Notify { job, recipient, host, job_server } => {
            let config_path = cli
                .config
                .as_ref()
                .map(|path| std::fs::canonicalize(path).unwrap_or_else(|_| path.clone()));
            let launcher = DaemonLauncher::new(
                common::detach::daemon_binary(),
                &ctx.config.remote.install_dir,
                SshExecutor::new(&ctx.config.remote.ssh_program, &ctx.config.remote.scp_program),
            )
            .with_config(config_path);
            let args = NotifyArgs { job, recipient, host, server: job_server };
            commands::notify(&ctx, &launcher, &args, &mut stdout).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::from(EXIT_OK as u8),
        Err(e) => {
            eprintln!("error: {}", one_line(&e));
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn one_line(e: &CliError) -> String {
    match e {
        CliError::Other(inner) => format!("{:#}", inner),
        other => other.to_string(),
    }
    .replace('\n', " ")
}
