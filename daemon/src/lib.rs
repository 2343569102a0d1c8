pub mod cli;
pub mod notifier;
pub mod poller;
pub mod scheduler;
pub mod watch;

pub use notifier::{DeliveryError, MailMessenger, Messenger, Report};
pub use poller::{PollError, StatusPoller};
pub use scheduler::{CancelHandle, TaskOutcome, WatchScheduler};
pub use watch::{WatchError, Watcher};
