pub mod commands;
pub mod dispatch;
pub mod error;

pub use commands::{Context, NotifyArgs, SubmitArgs};
pub use dispatch::{DaemonLauncher, DispatchError, Launcher, RemoteExecutor, SshExecutor};
pub use error::{CliError, Result};
