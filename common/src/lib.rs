pub mod api;
pub mod cache;
pub mod config;
pub mod detach;
pub mod error;
pub mod ipc;
pub mod job;
pub mod ledger;
pub mod reference;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::{Attachment, HttpJobApi, JobApi, StatusResponse, SubmitRequest};
pub use cache::JobCache;
pub use config::Config;
pub use error::{ApiError, LedgerError, ResolveError};
pub use ipc::{DispatchReceipt, DispatchResponse, WatchRequest};
pub use job::{JobId, JobRecord, JobStatus, ResolvedReference};
pub use ledger::{FileLedger, LedgerStore, MemoryLedger};
pub use reference::{JobRef, Resolver};

// Per-user paths; `~/` is expanded against $HOME.
pub const USER_CONFIG_PATH: &str = "~/.config/lunaflow/config.yaml";
pub const DEFAULT_LEDGER_PATH: &str = "~/.lunaflow/all.workflow.database.tsv";
pub const DEFAULT_CACHE_DIR: &str = "~/.lunaflow/cache";
pub const DEFAULT_DAEMON_LOG: &str = "~/.lunaflow/daemon.log";

pub fn host_name() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// `user@host` of the current process, for notification reports.
pub fn origin_label() -> String {
    let user = nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|u| u.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{}@{}", user, host_name())
}
